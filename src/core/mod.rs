mod finding;
mod report;
mod sample;

pub use finding::{Finding, Severity};
pub use report::{CollectorResult, OsInfo, Report, SkipReason};
pub use sample::{BenchmarkSample, SampleStats, summarize_samples};
