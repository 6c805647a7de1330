//! Pipeline statistics and metrics.

use std::time::Duration;

use contracts::StreamKey;
use dispatcher::MetricsSnapshot;
use frame_source::ArchiveStats;
use observability::MetricsSummary;
use sync_engine::SyncerStats;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Number of configured streams
    pub streams: usize,

    /// Frames handed to the frame callback
    pub frames_produced: u64,

    /// Frames the archives refused to allocate
    pub frames_refused: u64,

    /// Processing dispatcher counters
    pub dispatcher: MetricsSnapshot,

    /// Per-stream syncer counters (synced streams only)
    pub syncers: Vec<(String, SyncerStats)>,

    /// Per-archive counters, taken before the frame source was flushed
    pub archives: Vec<(StreamKey, ArchiveStats)>,

    /// Delivery summary from the processing side
    pub summary: MetricsSummary,
}

impl PipelineStats {
    /// Processed frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.summary.total_frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of produced frames lost between capture and processing, in percent
    pub fn loss_rate(&self) -> f64 {
        let offered = self.frames_produced + self.frames_refused;
        if offered == 0 {
            return 0.0;
        }
        let lost = offered.saturating_sub(self.summary.total_frames);
        lost as f64 / offered as f64 * 100.0
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n================ Pipeline Statistics ================\n");

        println!("Overview");
        println!("   Duration:         {:.2}s", self.duration.as_secs_f64());
        println!("   Streams:          {}", self.streams);
        println!("   Frames produced:  {}", self.frames_produced);
        println!("   Frames refused:   {}", self.frames_refused);
        println!("   Frames processed: {}", self.summary.total_frames);
        println!("   FPS:              {:.2}", self.fps());
        println!("   Loss:             {:.2}%", self.loss_rate());

        println!("\nDispatcher");
        println!("   Enqueued: {}", self.dispatcher.enqueued_count);
        println!("   Executed: {}", self.dispatcher.executed_count);
        println!("   Dropped:  {}", self.dispatcher.dropped_count);
        println!("   Failures: {}", self.dispatcher.failure_count);

        if !self.syncers.is_empty() {
            println!("\nMetadata Syncers");
            for (name, stats) in &self.syncers {
                println!(
                    "   {}: matched {}, without metadata {}, metadata dropped {}, callback failures {}",
                    name,
                    stats.matched,
                    stats.without_metadata,
                    stats.metadata_dropped,
                    stats.callback_failures
                );
            }
        }

        if !self.archives.is_empty() {
            println!("\nArchives");
            for (key, stats) in &self.archives {
                println!(
                    "   {}: allocated {}, recycled {}, refused {}, released {}, published {}",
                    key, stats.allocated, stats.recycled, stats.dropped, stats.released, stats.published
                );
            }
        }

        println!("\n{}", self.summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(produced: u64, refused: u64, processed: u64, secs: u64) -> PipelineStats {
        PipelineStats {
            duration: Duration::from_secs(secs),
            frames_produced: produced,
            frames_refused: refused,
            summary: MetricsSummary {
                total_frames: processed,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fps() {
        assert_eq!(stats(100, 0, 100, 4).fps(), 25.0);
        assert_eq!(stats(100, 0, 100, 0).fps(), 0.0);
    }

    #[test]
    fn test_loss_rate() {
        assert_eq!(stats(90, 10, 80, 1).loss_rate(), 20.0);
        assert_eq!(stats(0, 0, 0, 1).loss_rate(), 0.0);
    }
}
