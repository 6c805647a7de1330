//! Pipeline orchestrator - wires the frame core together.
//!
//! Per stream, a mock capture thread feeds the frame source. Streams whose
//! metadata travels separately go through a metadata syncer, with their
//! metadata published on a simulated network thread (jitter and loss).
//! Every delivered frame is processed on the dispatcher worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use contracts::{CallbackResult, CoreConfig, Metadata, StreamConfig, StreamKey, SyncKey};
use dispatcher::Dispatcher;
use frame_source::{
    sensor_ref, Frame, FrameCallback, FrameSource, MetadataParsers, MetadataSink, MockStream,
    MockStreamConfig, NamedSensor,
};
use observability::{FrameSample, PipelineMetricsAggregator};
use parking_lot::Mutex;
use sync_engine::{apply_metadata, FrameHolder, FrameNumbering, MetadataSyncer};
use tracing::{debug, info, instrument, trace, warn};

use super::PipelineStats;
use crate::error::{CliError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated core configuration
    pub core: CoreConfig,

    /// Frames to capture per stream (None = unlimited)
    pub max_frames: Option<u64>,

    /// Run time limit (None = until shutdown or max frames)
    pub duration: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Maximum delay of network metadata
    pub md_jitter: Duration,

    /// Lose every Nth metadata message
    pub md_loss_every: Option<u64>,
}

type Syncer = MetadataSyncer<Frame>;

/// Where captured frames of one stream go
enum Route {
    /// Metadata is embedded, straight to processing
    Direct,
    /// Joined with network metadata first
    Synced(Arc<Syncer>),
}

struct StreamRoute {
    name: String,
    route: Route,
}

/// Hands delivered frames to the dispatcher
#[derive(Clone)]
struct Processor {
    dispatcher: Arc<Dispatcher>,
    aggregator: Arc<Mutex<PipelineMetricsAggregator>>,
}

impl Processor {
    fn process(&self, stream: &str, frame: Frame, with_metadata: bool) {
        let aggregator = Arc::clone(&self.aggregator);
        let stream = stream.to_string();

        // a full queue drops the oldest pending frame, releasing it
        self.dispatcher.invoke(
            move |_timer| {
                let started = Instant::now();
                let latency_ms = (epoch_ms() - frame.header().system_time).max(0.0);
                let checksum = frame
                    .data()
                    .iter()
                    .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
                trace!(
                    stream = %stream,
                    frame_number = frame.frame_number(),
                    checksum,
                    with_metadata,
                    "Frame processed"
                );
                drop(frame);

                let sample = FrameSample {
                    stream,
                    with_metadata,
                    latency_ms,
                };
                observability::record_frame_delivered(&sample);
                observability::record_processing_ms(
                    &sample.stream,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                aggregator.lock().update(&sample);
                Ok(())
            },
            false,
        );
    }
}

/// Simulated network carrying metadata of one stream to its syncer
struct MetadataLink {
    stream: String,
    worker: JoinHandle<()>,
}

fn spawn_metadata_link(
    stream: &StreamConfig,
    syncer: Arc<Syncer>,
    jitter: Duration,
    loss_every: Option<u64>,
) -> Result<(MetadataSink, MetadataLink)> {
    let (tx, rx) = mpsc::channel::<(SyncKey, Metadata, Instant)>();
    let name = stream.name.clone();

    let worker = thread::Builder::new()
        .name(format!("{}-network", stream.name))
        .spawn(move || {
            // FIFO: a message never overtakes an earlier one
            for (key, md, due) in rx {
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
                syncer.enqueue_metadata(key, md);
            }
            debug!(stream = %name, "Metadata link closed");
        })
        .map_err(|e| {
            CliError::pipeline_execution(format!(
                "failed to spawn metadata link for {}: {e}",
                stream.name
            ))
        })?;

    let sent = AtomicU64::new(0);
    let jitter_ms = jitter.as_millis() as u64;
    let sink_stream = stream.name.clone();
    let sink: MetadataSink = Arc::new(move |key: SyncKey, md: Metadata| {
        let n = sent.fetch_add(1, Ordering::Relaxed) + 1;
        if loss_every.is_some_and(|every| every > 0 && n % every == 0) {
            trace!(stream = %sink_stream, key, "Metadata lost in transit");
            return;
        }
        let delay = Duration::from_millis((key / 1_000_000) % (jitter_ms + 1));
        if tx.send((key, md, Instant::now() + delay)).is_err() {
            trace!(stream = %sink_stream, key, "Metadata link gone");
        }
    });

    Ok((
        sink,
        MetadataLink {
            stream: stream.name.clone(),
            worker,
        },
    ))
}

fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops a running pipeline gracefully once set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown, the duration limit, or every stream finished
    #[instrument(name = "pipeline_run", skip(self), fields(streams = self.config.core.streams.len()))]
    pub fn run(self) -> Result<PipelineStats> {
        let started = Instant::now();
        let core = &self.config.core;

        if core.streams.is_empty() {
            return Err(CliError::pipeline_execution("no streams configured"));
        }

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Dispatcher
        let dispatcher = Arc::new(Dispatcher::with_config(
            "processing",
            &core.dispatcher,
            None,
        )?);
        let processor = Processor {
            dispatcher: Arc::clone(&dispatcher),
            aggregator: Arc::new(Mutex::new(PipelineMetricsAggregator::new())),
        };

        // Frame source
        let source = Arc::new(FrameSource::new(&core.frame_source));
        source.init(Arc::new(MetadataParsers::with_header_defaults()))?;
        let device = NamedSensor::new("simulated_device");
        source.set_sensor(sensor_ref(&device));

        // Streams, syncers and metadata links
        let mut routes = HashMap::new();
        let mut syncers = Vec::new();
        let mut links = Vec::new();
        let mut streams = Vec::new();

        for stream_config in &core.streams {
            let mut mock_config = MockStreamConfig::from(stream_config);
            mock_config.max_frames = self.config.max_frames;
            let mut stream = MockStream::new(mock_config, Arc::clone(&source));

            let route = if stream_config.metadata {
                let syncer = Arc::new(build_syncer(core, stream_config, &processor));
                let (sink, link) = spawn_metadata_link(
                    stream_config,
                    Arc::clone(&syncer),
                    self.config.md_jitter,
                    self.config.md_loss_every,
                )?;
                stream = stream.with_metadata_sink(sink);
                links.push(link);
                syncers.push((stream_config.name.clone(), Arc::clone(&syncer)));
                Route::Synced(syncer)
            } else {
                Route::Direct
            };

            routes.insert(
                stream_config.key(),
                StreamRoute {
                    name: stream_config.name.clone(),
                    route,
                },
            );
            streams.push(stream);
        }

        source.set_callback(frame_callback(routes, processor.clone()));

        for stream in &mut streams {
            stream.start()?;
        }
        info!(
            streams = streams.len(),
            synced = syncers.len(),
            max_frames = ?self.config.max_frames,
            "Pipeline running"
        );

        self.wait_for_end(started, &streams, &dispatcher, &syncers);

        // Shutdown: producers, syncers, dispatcher, frame source
        info!("Shutting down pipeline...");
        let mut frames_produced = 0;
        let mut frames_refused = 0;
        for stream in &mut streams {
            stream.stop();
            frames_produced += stream.produced();
            frames_refused += stream.refused();
        }
        // closes the metadata links
        drop(streams);
        for link in links {
            if link.worker.join().is_err() {
                warn!(stream = %link.stream, "Metadata link thread panicked");
            }
        }

        for (_, syncer) in &syncers {
            syncer.flush();
        }

        if !dispatcher.flush(dispatcher.flush_timeout()) {
            warn!(
                timeout_ms = dispatcher.flush_timeout().as_millis() as u64,
                "Dispatcher did not drain in time"
            );
        }

        let archives = source.stats();
        if !source.flush() {
            warn!("Frame source flush timed out with frames outstanding");
        }
        source.reset();
        for (_, syncer) in &syncers {
            syncer.reset();
        }
        dispatcher.stop();
        drop(device);

        let summary = {
            let mut aggregator = processor.aggregator.lock();
            aggregator.add_refused(frames_refused);
            aggregator.summary()
        };

        let stats = PipelineStats {
            duration: started.elapsed(),
            streams: core.streams.len(),
            frames_produced,
            frames_refused,
            dispatcher: dispatcher.metrics(),
            syncers: syncers
                .iter()
                .map(|(name, syncer)| (name.clone(), syncer.stats()))
                .collect(),
            archives,
            summary,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }

    fn wait_for_end(
        &self,
        started: Instant,
        streams: &[MockStream],
        dispatcher: &Dispatcher,
        syncers: &[(String, Arc<Syncer>)],
    ) {
        let deadline = self.config.duration.map(|d| started + d);
        let mut refused_seen = vec![0u64; streams.len()];

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!("Run duration elapsed");
                break;
            }
            if streams.iter().all(|s| !s.is_running()) {
                info!("All streams finished");
                break;
            }

            observability::record_queue_depth("dispatcher", dispatcher.metrics().queue_len);
            for (name, syncer) in syncers {
                let stats = syncer.stats();
                observability::record_queue_depth(&format!("{name}.frames"), stats.frame_queue_len);
                observability::record_queue_depth(&format!("{name}.metadata"), stats.md_queue_len);
            }
            for (stream, seen) in streams.iter().zip(refused_seen.iter_mut()) {
                let refused = stream.refused();
                observability::record_frames_refused(&stream.config().name, refused - *seen);
                *seen = refused;
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn build_syncer(core: &CoreConfig, stream: &StreamConfig, processor: &Processor) -> Syncer {
    let syncer = MetadataSyncer::new(stream.name.clone(), &core.syncer);

    let name = stream.name.clone();
    let processor = processor.clone();
    let numbering = Mutex::new(FrameNumbering::new(stream.name.clone()));
    syncer.on_frame_ready(Arc::new(
        move |holder: FrameHolder<Frame>, md: Option<Metadata>| -> CallbackResult {
            let Some(mut frame) = holder.into_inner() else {
                return Ok(());
            };
            {
                let mut numbering = numbering.lock();
                match &md {
                    Some(md) => {
                        numbering.assign_from(frame.header_mut(), md);
                        let mut blob = *frame.metadata_blob();
                        apply_metadata(frame.header_mut(), &mut blob, md);
                        *frame.metadata_blob_mut() = blob;
                    }
                    None => numbering.assign_next(frame.header_mut()),
                }
            }
            processor.process(&name, frame, md.is_some());
            Ok(())
        },
    ));

    let name = stream.name.clone();
    syncer.on_metadata_dropped(Arc::new(move |key: SyncKey, _md: Metadata| -> CallbackResult {
        trace!(stream = %name, key, "Metadata without frame dropped");
        Ok(())
    }));

    let name = stream.name.clone();
    syncer.on_frame_release(Arc::new(move |frame: Frame| {
        trace!(
            stream = %name,
            frame_number = frame.frame_number(),
            "Unconsumed frame released"
        );
    }));

    syncer
}

fn frame_callback(routes: HashMap<StreamKey, StreamRoute>, processor: Processor) -> FrameCallback {
    Arc::new(move |frame: Frame| -> CallbackResult {
        let key = frame.key();
        let Some(stream) = routes.get(&key) else {
            return Err(format!("no route for stream key {key}").into());
        };

        match &stream.route {
            Route::Direct => {
                let with_metadata = !frame.metadata_blob().is_empty();
                processor.process(&stream.name, frame, with_metadata);
            }
            Route::Synced(syncer) => {
                let sync_key = frame.header().sync_key();
                syncer.enqueue_frame(sync_key, syncer.hold(frame));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StreamKind;

    fn stream(name: &str, kind: StreamKind, metadata: bool) -> StreamConfig {
        StreamConfig {
            name: name.into(),
            stream_kind: kind,
            payload_kind: None,
            fps: 200.0,
            width: 16,
            height: 8,
            bytes_per_pixel: 2,
            metadata,
        }
    }

    fn pipeline_config(streams: Vec<StreamConfig>, max_frames: u64) -> PipelineConfig {
        PipelineConfig {
            core: CoreConfig {
                streams,
                ..Default::default()
            },
            max_frames: Some(max_frames),
            duration: Some(Duration::from_secs(10)),
            metrics_port: None,
            md_jitter: Duration::from_millis(2),
            md_loss_every: None,
        }
    }

    #[test]
    fn test_run_delivers_every_frame() {
        let config = pipeline_config(
            vec![
                stream("depth", StreamKind::Depth, true),
                stream("color", StreamKind::Color, false),
            ],
            20,
        );
        let stats = Pipeline::new(config).run().unwrap();

        assert_eq!(stats.frames_produced + stats.frames_refused, 40);
        let depth = &stats.syncers[0].1;
        assert!(depth.frames_enqueued <= 20);
        assert_eq!(
            depth.matched + depth.without_metadata,
            depth.frames_enqueued
        );
        assert_eq!(
            stats.summary.total_frames + stats.dispatcher.dropped_count,
            stats.frames_produced
        );
    }

    #[test]
    fn test_lost_metadata_still_delivers_frames() {
        let mut config = pipeline_config(vec![stream("depth", StreamKind::Depth, true)], 30);
        config.md_loss_every = Some(3);
        let stats = Pipeline::new(config).run().unwrap();

        let depth = &stats.syncers[0].1;
        assert!(depth.without_metadata >= 1);
        assert_eq!(
            depth.matched + depth.without_metadata,
            depth.frames_enqueued
        );
    }

    #[test]
    fn test_shutdown_flag_stops_pipeline() {
        let mut config = pipeline_config(vec![stream("ir", StreamKind::Infrared, true)], 0);
        config.max_frames = None;
        config.duration = None;
        let pipeline = Pipeline::new(config);
        let shutdown = pipeline.shutdown_handle();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            shutdown.store(true, Ordering::SeqCst);
        });
        let begin = Instant::now();
        let stats = pipeline.run().unwrap();
        stopper.join().unwrap();

        assert!(begin.elapsed() < Duration::from_secs(5));
        assert!(stats.frames_produced > 0);
    }

    #[test]
    fn test_no_streams_is_an_error() {
        let config = pipeline_config(Vec::new(), 1);
        assert!(matches!(
            Pipeline::new(config).run(),
            Err(CliError::PipelineExecution { .. })
        ));
    }
}
