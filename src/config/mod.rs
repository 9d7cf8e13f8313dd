use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which display server the graphics checks should assume. Resolved
/// once at configuration time; collectors receive it explicitly and
/// never read the process environment themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    Wayland,
    X11,
    Unknown,
}

impl FromStr for DisplayServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wayland" => Ok(DisplayServer::Wayland),
            "x11" => Ok(DisplayServer::X11),
            "unknown" => Ok(DisplayServer::Unknown),
            other => Err(format!(
                "invalid display server: {other} (wayland|x11|unknown)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub run: RunConfig,
    pub report: ReportConfig,
    pub graphics: GraphicsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Per-command timeout in seconds for non-benchmark checks.
    pub timeout_secs: u64,
    /// Collector worker threads; 1 means sequential.
    pub jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub color: bool,
    pub include_evidence: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphicsConfig {
    pub display_server: DisplayServer,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            run: RunConfig {
                timeout_secs: 8,
                jobs: 1,
            },
            report: ReportConfig {
                color: true,
                include_evidence: false,
            },
            graphics: GraphicsConfig {
                display_server: DisplayServer::Unknown,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    run: Option<RawRunConfig>,
    report: Option<RawReportConfig>,
    graphics: Option<RawGraphicsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRunConfig {
    timeout_secs: Option<u64>,
    jobs: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    color: Option<bool>,
    include_evidence: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawGraphicsConfig {
    display_server: Option<DisplayServer>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/hwdoctor/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    // The session type is the single environment fact folded into
    // configuration; everything downstream gets it passed explicitly.
    if let Ok(session) = std::env::var("XDG_SESSION_TYPE") {
        if let Ok(server) = session.parse::<DisplayServer>() {
            cfg.graphics.display_server = server;
        }
    }

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s).context("failed to parse config file (TOML)")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(run) = raw.run {
        if let Some(timeout_secs) = run.timeout_secs {
            cfg.run.timeout_secs = timeout_secs;
        }
        if let Some(jobs) = run.jobs {
            cfg.run.jobs = jobs;
        }
    }

    if let Some(report) = raw.report {
        if let Some(color) = report.color {
            cfg.report.color = color;
        }
        if let Some(include_evidence) = report.include_evidence {
            cfg.report.include_evidence = include_evidence;
        }
    }

    if let Some(graphics) = raw.graphics {
        if let Some(display_server) = graphics.display_server {
            cfg.graphics.display_server = display_server;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("HWDOCTOR_RUN_TIMEOUT_SECS") {
        cfg.run.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "HWDOCTOR_RUN_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("HWDOCTOR_RUN_JOBS") {
        cfg.run.jobs = v.trim().parse::<usize>().with_context(|| "HWDOCTOR_RUN_JOBS")?;
    }
    if let Ok(v) = std::env::var("HWDOCTOR_REPORT_COLOR") {
        cfg.report.color = parse_bool(&v).with_context(|| "HWDOCTOR_REPORT_COLOR")?;
    }
    if let Ok(v) = std::env::var("HWDOCTOR_REPORT_INCLUDE_EVIDENCE") {
        cfg.report.include_evidence =
            parse_bool(&v).with_context(|| "HWDOCTOR_REPORT_INCLUDE_EVIDENCE")?;
    }
    if let Ok(v) = std::env::var("HWDOCTOR_GRAPHICS_DISPLAY_SERVER") {
        cfg.graphics.display_server = v
            .parse::<DisplayServer>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "HWDOCTOR_GRAPHICS_DISPLAY_SERVER")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (true|false|1|0|yes|no|on|off)"
        )),
    }
}
