//! Pipeline metrics
//!
//! Recording helpers over the `metrics` facade plus an in-memory aggregator
//! for run summaries.

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// One frame reaching the application
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// Stream name
    pub stream: String,
    /// Delivered with its metadata
    pub with_metadata: bool,
    /// Capture to application hand-off (milliseconds)
    pub latency_ms: f64,
}

/// Record a frame delivered to the application
///
/// # Example
///
/// ```ignore
/// use observability::metrics::{record_frame_delivered, FrameSample};
///
/// record_frame_delivered(&FrameSample {
///     stream: "depth".into(),
///     with_metadata: md.is_some(),
///     latency_ms,
/// });
/// ```
pub fn record_frame_delivered(sample: &FrameSample) {
    let metadata = if sample.with_metadata { "matched" } else { "missing" };
    counter!(
        "depthcore_frames_delivered_total",
        "stream" => sample.stream.clone(),
        "metadata" => metadata
    )
    .increment(1);

    histogram!(
        "depthcore_delivery_latency_ms",
        "stream" => sample.stream.clone()
    )
    .record(sample.latency_ms);
}

/// Record frames the archive refused since the last call
pub fn record_frames_refused(stream: &str, count: u64) {
    if count > 0 {
        counter!("depthcore_frames_refused_total", "stream" => stream.to_string())
            .increment(count);
    }
}

/// Record the depth of a queue (dispatcher, syncer frame/metadata queue)
pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!("depthcore_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// Record time spent processing one frame on the dispatcher (milliseconds)
pub fn record_processing_ms(stream: &str, processing_ms: f64) {
    histogram!("depthcore_processing_ms", "stream" => stream.to_string()).record(processing_ms);
}

/// In-memory aggregation of frame samples
#[derive(Debug, Clone, Default)]
pub struct PipelineMetricsAggregator {
    /// Frames delivered
    pub total_frames: u64,

    /// Frames delivered with metadata
    pub with_metadata: u64,

    /// Frames refused by an archive
    pub refused: u64,

    /// Delivery latency (ms)
    pub latency_stats: RunningStats,

    /// Frames per stream
    pub stream_counts: BTreeMap<String, u64>,
}

impl PipelineMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one delivered frame
    pub fn update(&mut self, sample: &FrameSample) {
        self.total_frames += 1;
        if sample.with_metadata {
            self.with_metadata += 1;
        }
        self.latency_stats.push(sample.latency_ms);
        *self.stream_counts.entry(sample.stream.clone()).or_insert(0) += 1;
    }

    /// Add frames refused by an archive
    pub fn add_refused(&mut self, count: u64) {
        self.refused += count;
    }

    pub fn summary(&self) -> MetricsSummary {
        let offered = self.total_frames + self.refused;
        MetricsSummary {
            total_frames: self.total_frames,
            with_metadata: self.with_metadata,
            without_metadata: self.total_frames - self.with_metadata,
            refused: self.refused,
            metadata_rate: if self.total_frames > 0 {
                self.with_metadata as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            refuse_rate: if offered > 0 {
                self.refused as f64 / offered as f64 * 100.0
            } else {
                0.0
            },
            latency_ms: StatsSummary::from(&self.latency_stats),
            stream_counts: self.stream_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub with_metadata: u64,
    pub without_metadata: u64,
    pub refused: u64,
    pub metadata_rate: f64,
    pub refuse_rate: f64,
    pub latency_ms: StatsSummary,
    pub stream_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Pipeline Metrics Summary ===")?;
        writeln!(f, "Frames delivered: {}", self.total_frames)?;
        writeln!(
            f,
            "With metadata: {} ({:.2}%)",
            self.with_metadata, self.metadata_rate
        )?;
        writeln!(f, "Without metadata: {}", self.without_metadata)?;
        writeln!(
            f,
            "Refused by archive: {} ({:.2}%)",
            self.refused, self.refuse_rate
        )?;
        writeln!(f, "Delivery latency (ms): {}", self.latency_ms)?;

        if !self.stream_counts.is_empty() {
            writeln!(f, "Frames per stream:")?;
            for (stream, count) in &self.stream_counts {
                writeln!(f, "  {}: {}", stream, count)?;
            }
        }

        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
