use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::collectors::{CollectContext, Collector};
use crate::core::{CollectorResult, OsInfo, Report};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker threads; 1 keeps the reference sequential behavior.
    pub jobs: usize,
    pub show_progress: bool,
}

pub struct Engine {
    opts: EngineOptions,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        Self { opts }
    }

    /// Runs the given collectors and assembles the report. Result order
    /// always matches the input order; the capture timestamp is taken
    /// once, before the first collector runs.
    pub fn collect(
        &self,
        collectors: &[Box<dyn Collector + Send + Sync>],
        ctx: &CollectContext,
    ) -> Report {
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        use std::io::IsTerminal;
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message("collecting findings...");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let results = if self.opts.jobs <= 1 || collectors.len() <= 1 {
            collectors.iter().map(|c| c.run(ctx)).collect()
        } else {
            run_pool(collectors, ctx, self.opts.jobs)
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        Report {
            schema_version: "1.0".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: os_info(ctx),
            generated_at,
            results,
        }
    }
}

/// Bounded worker pool over an index queue. Collectors share nothing
/// mutable beyond the write-once capability cache, so handing each one
/// to a worker is safe; output slots keep the input order.
fn run_pool(
    collectors: &[Box<dyn Collector + Send + Sync>],
    ctx: &CollectContext,
    jobs: usize,
) -> Vec<CollectorResult> {
    let queue: Mutex<VecDeque<usize>> = Mutex::new((0..collectors.len()).collect());
    let slots: Vec<Mutex<Option<CollectorResult>>> =
        (0..collectors.len()).map(|_| Mutex::new(None)).collect();

    std::thread::scope(|scope| {
        for _ in 0..jobs.min(collectors.len()) {
            scope.spawn(|| {
                loop {
                    let index = {
                        let mut queue = queue.lock().expect("work queue poisoned");
                        queue.pop_front()
                    };
                    let Some(index) = index else {
                        break;
                    };
                    let result = collectors[index].run(ctx);
                    *slots[index].lock().expect("result slot poisoned") = Some(result);
                }
            });
        }
    });

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.into_inner()
                .expect("result slot poisoned")
                .unwrap_or_else(|| CollectorResult::new(collectors[index].name()))
        })
        .collect()
}

fn os_info(ctx: &CollectContext) -> OsInfo {
    let read = |path: &str| {
        ctx.files
            .read_to_string(Path::new(path))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    };
    OsInfo {
        name: read("/proc/sys/kernel/ostype"),
        kernel: read("/proc/sys/kernel/osrelease"),
    }
}
