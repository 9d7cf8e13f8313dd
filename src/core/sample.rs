use serde::{Deserialize, Serialize};

/// One sampled metric value, stamped with its offset from benchmark start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSample {
    pub offset_secs: f64,
    pub metric: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub metric: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Folds samples into per-metric min/max/mean, in first-seen metric order.
pub fn summarize_samples(samples: &[BenchmarkSample]) -> Vec<SampleStats> {
    let mut stats: Vec<SampleStats> = Vec::new();
    for sample in samples {
        match stats.iter_mut().find(|s| s.metric == sample.metric) {
            Some(s) => {
                s.count += 1;
                s.min = s.min.min(sample.value);
                s.max = s.max.max(sample.value);
                // mean holds the running sum until the final pass below
                s.mean += sample.value;
            }
            None => stats.push(SampleStats {
                metric: sample.metric.clone(),
                count: 1,
                min: sample.value,
                max: sample.value,
                mean: sample.value,
            }),
        }
    }
    for s in &mut stats {
        s.mean /= s.count as f64;
    }
    stats
}
