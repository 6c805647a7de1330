//! # Integration Tests
//!
//! Cross-crate tests of the frame core.
//!
//! Covers:
//! - Delivery guarantees of the metadata syncer
//! - Wait/signal safety and dispatcher flushing
//! - Frame ownership through the frame source
//! - A simulated capture -> sync -> dispatch pipeline

#[cfg(test)]
mod contract_tests {
    use contracts::{CoreConfig, StreamKey, StreamKind};

    #[test]
    fn test_default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config_loader::ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.syncer.max_frame_queue_size, 2);
        assert_eq!(config.syncer.max_md_queue_size, 8);
    }

    #[test]
    fn test_config_round_trip_keeps_stream_keys() {
        let toml = r#"
[[streams]]
name = "depth"
stream_kind = "depth"
fps = 30.0
metadata = true

[[streams]]
name = "color"
stream_kind = "color"
fps = 30.0
"#;
        let config = config_loader::ConfigLoader::load_from_str(
            toml,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        let json = config_loader::ConfigLoader::to_json(&config).unwrap();
        let back = config_loader::ConfigLoader::load_from_str(
            &json,
            config_loader::ConfigFormat::Json,
        )
        .unwrap();

        let keys: Vec<StreamKey> = back.streams.iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                StreamKey::for_stream(StreamKind::Depth),
                StreamKey::for_stream(StreamKind::Color)
            ]
        );
    }
}

#[cfg(test)]
mod sync_tests {
    use std::sync::Arc;
    use std::thread;

    use contracts::{CallbackResult, Metadata, SyncKey};
    use parking_lot::Mutex;
    use serde_json::json;
    use sync_engine::{FrameHolder, MetadataSyncer};

    type Delivered = Arc<Mutex<Vec<(SyncKey, bool)>>>;
    type Dropped = Arc<Mutex<Vec<SyncKey>>>;

    fn syncer(max_frames: usize, max_md: usize) -> (Arc<MetadataSyncer<SyncKey>>, Delivered, Dropped) {
        let syncer = Arc::new(MetadataSyncer::with_limits("test", max_frames, max_md));
        let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
        let dropped: Dropped = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&delivered);
        syncer.on_frame_ready(Arc::new(
            move |holder: FrameHolder<SyncKey>, md: Option<Metadata>| -> CallbackResult {
                if let Some(key) = holder.into_inner() {
                    sink.lock().push((key, md.is_some()));
                }
                Ok(())
            },
        ));
        let sink = Arc::clone(&dropped);
        syncer.on_metadata_dropped(Arc::new(move |key: SyncKey, _md: Metadata| -> CallbackResult {
            sink.lock().push(key);
            Ok(())
        }));
        (syncer, delivered, dropped)
    }

    fn md(key: SyncKey) -> Metadata {
        Arc::new(json!({ "header": { "frame_number": key } }))
    }

    #[test]
    fn test_exactly_once_from_racing_threads() {
        let (syncer, delivered, _) = syncer(16, 16);

        let frames = {
            let syncer = Arc::clone(&syncer);
            thread::spawn(move || {
                for key in 1..=500u64 {
                    syncer.enqueue_frame(key, FrameHolder::owned(key));
                }
            })
        };
        let metadata = {
            let syncer = Arc::clone(&syncer);
            thread::spawn(move || {
                for key in 1..=500u64 {
                    syncer.enqueue_metadata(key, md(key));
                }
            })
        };
        frames.join().unwrap();
        metadata.join().unwrap();
        syncer.flush();

        let delivered = delivered.lock();
        let mut keys: Vec<SyncKey> = delivered.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), 500);
        keys.dedup();
        assert_eq!(keys.len(), 500);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_metadata_alone_is_never_delivered() {
        let (syncer, delivered, dropped) = syncer(2, 4);
        for key in [10, 20, 30, 40, 50, 60] {
            syncer.enqueue_metadata(key, md(key));
        }
        syncer.flush();

        assert!(delivered.lock().is_empty());
        assert_eq!(dropped.lock().len(), 6);
    }

    #[test]
    fn test_frames_without_metadata_released_in_key_order() {
        let n = 3;
        let (syncer, delivered, _) = syncer(n, 8);
        for key in 1..=(n as u64 + 3) {
            syncer.enqueue_frame(key, FrameHolder::owned(key));
        }

        assert_eq!(
            *delivered.lock(),
            vec![(1, false), (2, false), (3, false)]
        );
    }

    #[test]
    fn test_late_metadata_is_dropped_not_matched() {
        let (syncer, delivered, dropped) = syncer(1, 8);
        syncer.enqueue_frame(1, FrameHolder::owned(1));
        syncer.enqueue_frame(2, FrameHolder::owned(2));
        syncer.enqueue_frame(3, FrameHolder::owned(3));
        assert_eq!(*delivered.lock(), vec![(1, false), (2, false)]);

        syncer.enqueue_metadata(1, md(1));
        assert_eq!(*dropped.lock(), vec![1]);

        syncer.enqueue_metadata(3, md(3));
        assert_eq!(delivered.lock().last(), Some(&(3, true)));
        assert_eq!(delivered.lock().len(), 3);
    }
}

#[cfg(test)]
mod dispatcher_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    use dispatcher::{Action, Dispatcher, DropCallback, WaitingOn};

    /// Park the worker on an action until the returned sender fires
    fn occupy(dispatcher: &Dispatcher) -> mpsc::Sender<()> {
        let (release, parked) = mpsc::channel::<()>();
        let (running_tx, running_rx) = mpsc::channel::<()>();
        dispatcher.invoke(
            move |_timer| {
                let _ = running_tx.send(());
                let _ = parked.recv();
                Ok(())
            },
            true,
        );
        running_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker did not pick up the parking action");
        release
    }

    #[test]
    fn test_late_signal_after_timeout_is_harmless() {
        let signalled = {
            let waiting = WaitingOn::new(false);
            let signal = waiting.in_thread();
            let signaller = thread::spawn(move || {
                thread::sleep(Duration::from_secs(2));
                signal.signal(true);
                signal.is_alive()
            });

            let begin = Instant::now();
            assert!(!waiting.wait_until(Duration::from_secs(1), |done| *done));
            let waited = begin.elapsed();
            assert!(waited >= Duration::from_millis(900));
            assert!(waited < Duration::from_millis(1900));
            signaller
        };

        // the waiter is gone by the time the signal fires
        assert!(!signalled.join().unwrap());
    }

    #[test]
    fn test_flush_waits_for_every_queued_action() {
        let dispatcher = Arc::new(Dispatcher::new(11, None).unwrap());
        let executed = Arc::new(AtomicUsize::new(0));
        let release = occupy(&dispatcher);

        let producer = {
            let dispatcher = Arc::clone(&dispatcher);
            let executed = Arc::clone(&executed);
            thread::spawn(move || {
                for _ in 0..10 {
                    let executed = Arc::clone(&executed);
                    dispatcher.invoke(
                        move |_timer| {
                            thread::sleep(Duration::from_millis(5));
                            executed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                        true,
                    );
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 0);

        release.send(()).unwrap();
        assert!(dispatcher.flush(Duration::from_secs(10)));
        assert_eq!(executed.load(Ordering::SeqCst), 10);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest_actions() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let on_drop: DropCallback = {
            let dropped = Arc::clone(&dropped);
            Arc::new(move |_action: Action| {
                dropped.fetch_add(1, Ordering::SeqCst);
            })
        };
        let dispatcher = Dispatcher::new(3, Some(on_drop)).unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        let release = occupy(&dispatcher);

        for _ in 0..5 {
            let executed = Arc::clone(&executed);
            dispatcher.invoke(
                move |_timer| {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                false,
            );
        }

        release.send(()).unwrap();
        assert!(dispatcher.flush(Duration::from_secs(5)));
        assert!(dropped.load(Ordering::SeqCst) <= 2);
        assert!(executed.load(Ordering::SeqCst) >= 3);
        assert_eq!(
            dropped.load(Ordering::SeqCst) + executed.load(Ordering::SeqCst),
            5
        );
    }
}

#[cfg(test)]
mod frame_source_tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use contracts::{CallbackResult, FrameHeader, FrameSourceConfig, StreamKey, StreamKind};
    use frame_source::{Frame, FrameSource, MetadataParsers};
    use parking_lot::Mutex;

    fn source(frame_queue_size: u32) -> Arc<FrameSource> {
        let source = Arc::new(FrameSource::new(&FrameSourceConfig {
            frame_queue_size,
            ..Default::default()
        }));
        source
            .init(Arc::new(MetadataParsers::with_header_defaults()))
            .unwrap();
        source
    }

    fn publish(source: &FrameSource, key: StreamKey, n: u64) -> bool {
        let mut handle = source
            .alloc_frame(key, 32, FrameHeader::new(n, n as f64), true)
            .unwrap();
        if handle.is_none() {
            return false;
        }
        if let Some(frame) = handle.as_mut() {
            frame.data_mut().fill(n as u8);
        }
        let _token = source.begin_callback(key).unwrap();
        source.invoke_callback(handle);
        true
    }

    #[test]
    fn test_single_slot_never_hands_out_a_frame_twice() {
        let source = source(1);
        let key = StreamKey::for_stream(StreamKind::Depth);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        source.set_callback(Arc::new(move |frame: Frame| -> CallbackResult {
            sink.lock().push((frame.id(), frame.frame_number()));
            Ok(())
        }));

        assert!(publish(&source, key, 1));
        assert!(publish(&source, key, 2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        let ids: HashSet<u64> = seen.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(
            seen.iter().map(|(_, n)| *n).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_held_frame_blocks_single_slot() {
        let source = source(1);
        let key = StreamKey::for_stream(StreamKind::Color);
        let held = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&held);
        source.set_callback(Arc::new(move |frame: Frame| -> CallbackResult {
            sink.lock().push(frame);
            Ok(())
        }));

        assert!(publish(&source, key, 1));
        assert!(!publish(&source, key, 2));

        held.lock().clear();
        assert!(publish(&source, key, 3));
        assert_eq!(held.lock().len(), 1);

        held.lock().clear();
        assert!(source.flush());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use contracts::{CallbackResult, FrameSourceConfig, Metadata, MetadataField, StreamKind, SyncKey};
    use dispatcher::Dispatcher;
    use frame_source::{Frame, FrameSource, MetadataParsers, MockStream, MockStreamConfig};
    use observability::{FrameSample, PipelineMetricsAggregator};
    use parking_lot::Mutex;
    use sync_engine::{apply_metadata, FrameHolder, FrameNumbering, MetadataSyncer};

    /// MockStream -> FrameSource -> MetadataSyncer -> Dispatcher
    #[test]
    fn test_e2e_mock_pipeline() {
        const FRAMES: u64 = 40;

        let source = Arc::new(FrameSource::new(&FrameSourceConfig::default()));
        source
            .init(Arc::new(MetadataParsers::with_header_defaults()))
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(64, None).unwrap());
        let syncer = Arc::new(MetadataSyncer::<Frame>::with_limits("depth", 4, 8));
        let aggregator = Arc::new(Mutex::new(PipelineMetricsAggregator::new()));
        let exposures = Arc::new(AtomicU64::new(0));

        {
            let dispatcher = Arc::clone(&dispatcher);
            let aggregator = Arc::clone(&aggregator);
            let exposures = Arc::clone(&exposures);
            let numbering = Mutex::new(FrameNumbering::new("depth"));
            syncer.on_frame_ready(Arc::new(
                move |holder: FrameHolder<Frame>, md: Option<Metadata>| -> CallbackResult {
                    let Some(mut frame) = holder.into_inner() else {
                        return Ok(());
                    };
                    match &md {
                        Some(md) => {
                            numbering.lock().assign_from(frame.header_mut(), md);
                            let mut blob = *frame.metadata_blob();
                            apply_metadata(frame.header_mut(), &mut blob, md);
                            *frame.metadata_blob_mut() = blob;
                        }
                        None => numbering.lock().assign_next(frame.header_mut()),
                    }

                    let aggregator = Arc::clone(&aggregator);
                    let exposures = Arc::clone(&exposures);
                    dispatcher.invoke(
                        move |_timer| {
                            if frame.metadata(MetadataField::ActualExposure).is_some() {
                                exposures.fetch_add(1, Ordering::SeqCst);
                            }
                            aggregator.lock().update(&FrameSample {
                                stream: "depth".to_string(),
                                with_metadata: md.is_some(),
                                latency_ms: 0.0,
                            });
                            Ok(())
                        },
                        true,
                    );
                    Ok(())
                },
            ));
        }

        {
            let syncer = Arc::clone(&syncer);
            source.set_callback(Arc::new(move |frame: Frame| -> CallbackResult {
                let key = frame.header().sync_key();
                syncer.enqueue_frame(key, syncer.hold(frame));
                Ok(())
            }));
        }

        let md_syncer = Arc::clone(&syncer);
        let mut stream = MockStream::new(
            MockStreamConfig {
                name: "depth".to_string(),
                fps: 400.0,
                frame_size: 64,
                max_frames: Some(FRAMES),
                ..MockStreamConfig::default()
            },
            Arc::clone(&source),
        )
        .with_metadata_sink(Arc::new(move |key: SyncKey, md: Metadata| {
            // every 5th message lost in transit
            if (md["header"]["frame_number"].as_u64().unwrap_or(0)) % 5 != 0 {
                md_syncer.enqueue_metadata(key, md);
            }
        }));

        stream.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while stream.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        stream.stop();

        syncer.flush();
        assert!(dispatcher.flush(Duration::from_secs(5)));
        assert!(source.flush());

        let summary = aggregator.lock().summary();
        assert_eq!(stream.produced() + stream.refused(), FRAMES);
        assert_eq!(summary.total_frames, stream.produced());
        assert_eq!(summary.with_metadata, exposures.load(Ordering::SeqCst));
        assert!(summary.without_metadata >= 1);

        let stats = syncer.stats();
        assert_eq!(stats.matched + stats.without_metadata, stats.frames_enqueued);
        assert_eq!(stats.frame_queue_len, 0);
        assert_eq!(stats.md_queue_len, 0);

        dispatcher.stop();
        source.reset();
    }

    #[test]
    fn test_kind_routes_to_distinct_archives() {
        let source = Arc::new(FrameSource::new(&FrameSourceConfig::default()));
        source
            .init(Arc::new(MetadataParsers::with_header_defaults()))
            .unwrap();
        source.set_callback(Arc::new(|_frame: Frame| -> CallbackResult { Ok(()) }));

        let mut streams: Vec<MockStream> = [StreamKind::Depth, StreamKind::Color]
            .into_iter()
            .map(|kind| {
                MockStream::new(
                    MockStreamConfig {
                        name: kind.to_string(),
                        key: contracts::StreamKey::for_stream(kind),
                        fps: 400.0,
                        frame_size: 16,
                        max_frames: Some(5),
                        ..MockStreamConfig::default()
                    },
                    Arc::clone(&source),
                )
            })
            .collect();
        for stream in &mut streams {
            stream.start().unwrap();
        }
        for stream in &mut streams {
            let deadline = Instant::now() + Duration::from_secs(5);
            while stream.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            stream.stop();
        }

        let stats = source.stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|(_, s)| s.allocated == 5 && s.published == 0));
    }
}
