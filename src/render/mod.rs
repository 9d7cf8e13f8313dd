use std::io::{self, Write};

use anyhow::Error;

use crate::core::{Report, Severity};

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub color: bool,
    pub include_evidence: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            color: false,
            include_evidence: false,
        }
    }
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error: {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }
}

/// Sectioned text rendering. Pure: no finding or skip reason is ever
/// dropped, and nothing is printed here.
pub fn render_text(report: &Report, opts: &RenderOptions) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "hwdoctor {} report  {}  {} {}\n",
        report.tool_version, report.generated_at, report.os.name, report.os.kernel
    ));

    for result in &report.results {
        out.push('\n');
        out.push_str(&format!("== {} ==\n", result.collector));
        for finding in &result.findings {
            out.push_str(&format!(
                "[{}] {}\n",
                severity_tag(finding.severity, opts.color),
                finding.message
            ));
            if opts.include_evidence {
                if let Some(evidence) = &finding.evidence {
                    for line in evidence.lines() {
                        out.push_str(&format!("    {line}\n"));
                    }
                }
            }
        }
        for skip in &result.skipped {
            out.push_str(&format!("(skipped: {})\n", skip.reason));
        }
        if result.findings.is_empty() && result.skipped.is_empty() {
            out.push_str("(nothing to report)\n");
        }
    }
    out
}

pub fn render_json(report: &Report) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn severity_tag(severity: Severity, color: bool) -> String {
    if !color {
        return severity.as_str().to_string();
    }
    match severity {
        Severity::Info => severity.as_str().to_string(),
        Severity::Warning => format!("\x1b[33m{}\x1b[0m", severity.as_str()),
        Severity::Critical => format!("\x1b[31m{}\x1b[0m", severity.as_str()),
    }
}

/// Structural view of a rendered text report: collector name, finding
/// count and skip count per section.
pub fn parse_section_headers(text: &str) -> Vec<(String, usize, usize)> {
    let mut sections: Vec<(String, usize, usize)> = Vec::new();
    for line in text.lines() {
        if let Some(name) = line
            .strip_prefix("== ")
            .and_then(|rest| rest.strip_suffix(" =="))
        {
            sections.push((name.to_string(), 0, 0));
            continue;
        }
        let Some(current) = sections.last_mut() else {
            continue;
        };
        if line.starts_with('[') {
            current.1 += 1;
        } else if line.starts_with("(skipped:") {
            current.2 += 1;
        }
    }
    sections
}
