use serde::{Deserialize, Serialize};

use crate::core::{BenchmarkSample, Finding, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub kernel: String,
}

/// One sub-check that could not run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipReason {
    pub check: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorResult {
    pub collector: String,
    pub findings: Vec<Finding>,
    pub skipped: Vec<SkipReason>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub samples: Vec<BenchmarkSample>,
}

impl CollectorResult {
    pub fn new(collector: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            findings: Vec::new(),
            skipped: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Every finding carries the collector's own name as its category.
    pub fn finding(&mut self, severity: Severity, message: impl Into<String>) {
        self.findings.push(Finding {
            category: self.collector.clone(),
            severity,
            message: message.into(),
            evidence: None,
        });
    }

    pub fn finding_with_evidence(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        evidence: impl Into<String>,
    ) {
        self.findings.push(Finding {
            category: self.collector.clone(),
            severity,
            message: message.into(),
            evidence: Some(evidence.into()),
        });
    }

    pub fn skip(&mut self, check: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkipReason {
            check: check.into(),
            reason: reason.into(),
        });
    }

    /// Folds a result produced by a concurrent sub-check back in. Both
    /// sides must carry the same collector name.
    pub fn merge(&mut self, other: CollectorResult) {
        debug_assert_eq!(self.collector, other.collector);
        self.findings.extend(other.findings);
        self.skipped.extend(other.skipped);
        self.samples.extend(other.samples);
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub tool_version: String,
    pub os: OsInfo,
    pub generated_at: String,
    pub results: Vec<CollectorResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_category_always_matches_collector_name() {
        let mut result = CollectorResult::new("raid");
        result.finding(Severity::Info, "controller present");
        result.finding_with_evidence(Severity::Critical, "bbu missing", "BBU: absent");
        assert!(result.findings.iter().all(|f| f.category == "raid"));
    }

    #[test]
    fn worst_severity_picks_the_maximum() {
        let mut result = CollectorResult::new("storage");
        assert_eq!(result.worst_severity(), None);
        result.finding(Severity::Info, "a");
        result.finding(Severity::Critical, "b");
        result.finding(Severity::Warning, "c");
        assert_eq!(result.worst_severity(), Some(Severity::Critical));
    }
}
