use std::path::Path;

use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, note_unparsed, run_gated};
use crate::config::DisplayServer;
use crate::core::{CollectorResult, Severity};

const GPU_TEMP_WARNING_C: f64 = 90.0;

/// GPU inventory plus vendor-specific health: NVIDIA via nvidia-smi,
/// AMD via sysfs, display outputs via xrandr when an X server runs.
pub struct GraphicsCollector;

impl Collector for GraphicsCollector {
    fn name(&self) -> &'static str {
        "graphics"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![
            capability::LSPCI,
            capability::NVIDIA_SMI,
            capability::AMDGPU_SYSFS,
            capability::XRANDR,
        ]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        inventory_check(ctx, out);
        nvidia_check(ctx, out);
        amdgpu_check(ctx, out);
        display_server_check(ctx, out);
        xrandr_check(ctx, out);
    }
}

fn inventory_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(ctx, out, &capability::LSPCI, "gpu-inventory", "lspci", &[])
    else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "gpu-inventory", &result);
        return;
    }

    let gpus: Vec<&str> = result
        .stdout_lines()
        .filter(|line| line.contains("VGA compatible controller") || line.contains("3D controller"))
        .collect();
    if gpus.is_empty() {
        out.finding(Severity::Info, "no GPU found on the PCI bus");
        return;
    }
    for gpu in gpus {
        let model = gpu.split_once(": ").map(|(_, m)| m).unwrap_or(gpu);
        out.finding(Severity::Info, format!("GPU: {model}"));
    }
}

fn nvidia_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::NVIDIA_SMI,
        "nvidia",
        "nvidia-smi",
        &[
            "--query-gpu=name,utilization.gpu,temperature.gpu,memory.used,memory.total",
            "--format=csv,noheader,nounits",
        ],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "nvidia", &result);
        return;
    }

    let mut parsed_any = false;
    for line in result.stdout_lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            continue;
        }
        parsed_any = true;
        let name = fields[0];
        out.finding(
            Severity::Info,
            format!(
                "{name}: {}% utilization, {}/{} MiB memory",
                fields[1], fields[3], fields[4]
            ),
        );
        if let Ok(temp) = fields[2].parse::<f64>() {
            if temp >= GPU_TEMP_WARNING_C {
                out.finding_with_evidence(
                    Severity::Warning,
                    format!("{name}: GPU temperature {temp}°C"),
                    line.to_string(),
                );
            }
        }
    }
    if !parsed_any {
        note_unparsed(out, "nvidia", &result);
    }
}

fn amdgpu_check(ctx: &CollectContext, out: &mut CollectorResult) {
    if !ctx.detector.has(&capability::AMDGPU_SYSFS) {
        out.skip("amdgpu", "amdgpu-sysfs not available");
        return;
    }
    let path = Path::new("/sys/class/drm/card0/device/gpu_busy_percent");
    match ctx.files.read_to_string(path) {
        Ok(text) => match text.trim().parse::<u32>() {
            Ok(busy) => out.finding(Severity::Info, format!("amdgpu: {busy}% busy")),
            Err(_) => out.finding_with_evidence(
                Severity::Info,
                "amdgpu: no usable output",
                text.trim().to_string(),
            ),
        },
        Err(err) => out.skip("amdgpu", format!("amdgpu sysfs unreadable: {err}")),
    }
}

fn display_server_check(ctx: &CollectContext, out: &mut CollectorResult) {
    match ctx.display_server {
        DisplayServer::Wayland => out.finding(Severity::Info, "display server: wayland"),
        DisplayServer::X11 => out.finding(Severity::Info, "display server: x11"),
        DisplayServer::Unknown => out.finding(Severity::Info, "display server: unknown"),
    }
}

fn xrandr_check(ctx: &CollectContext, out: &mut CollectorResult) {
    // xrandr output is only meaningful against a running X server.
    if ctx.display_server != DisplayServer::X11 && !ctx.detector.has(&capability::XORG) {
        out.skip("displays", "no X server detected");
        return;
    }
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::XRANDR,
        "displays",
        "xrandr",
        &["--query"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "displays", &result);
        return;
    }

    let connected = result
        .stdout_lines()
        .filter(|line| line.split_whitespace().nth(1) == Some("connected"))
        .count();
    if connected == 0 {
        out.finding(Severity::Warning, "no display outputs connected");
    } else {
        out.finding(
            Severity::Info,
            format!("{connected} display output(s) connected"),
        );
    }
}
