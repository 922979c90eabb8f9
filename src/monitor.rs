//! The frame loop.
//!
//! One iteration: capture, resize to the monitoring resolution, run both
//! inference collaborators, classify, annotate, then update the five channels
//! in `BehaviorKind::ALL` order. Pose and object inference may run on two
//! scoped threads; their results are joined before any channel is touched.
//!
//! Whatever ends the loop (exhausted source, stop flag, frame limit, capture
//! error), every channel is shut down before `run` returns.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::annotate::annotate;
use crate::channel::{ChannelIo, ChannelSet, ChannelUpdate, EpisodeSink};
use crate::classify::{classify_frame, FrameSignals};
use crate::config::{Geometry, MonitorConfig};
use crate::detect::{or_no_detection, FrameDetections, InferenceBackends};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::recording::ClipFactory;
use crate::BehaviorKind;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What happened while processing one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    /// 1-based frame number within the session.
    pub index: u64,
    pub signals: FrameSignals,
    /// Channel transitions other than `Idle`, in update order.
    pub updates: Vec<(BehaviorKind, ChannelUpdate)>,
    /// Confirmed episodes whose persistence failed. They are not retried.
    pub persistence_failures: Vec<BehaviorKind>,
}

impl FrameReport {
    pub fn confirmed(&self) -> impl Iterator<Item = BehaviorKind> + '_ {
        self.updates
            .iter()
            .filter(|(_, u)| matches!(u, ChannelUpdate::Confirmed { .. }))
            .map(|(kind, _)| *kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The source had no more frames.
    Exhausted,
    /// The stop flag was raised (Ctrl-C or quit).
    Interrupted,
    FrameLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub confirmed: u64,
    pub discarded: u64,
    pub persistence_failures: u64,
    /// Recordings still open at shutdown; their partial clips stay on disk.
    pub interrupted_recordings: usize,
    pub stop: StopReason,
}

#[derive(Clone, Copy, Debug, Default)]
struct Totals {
    frames: u64,
    confirmed: u64,
    discarded: u64,
    persistence_failures: u64,
}

pub struct Monitor {
    channels: ChannelSet,
    backends: InferenceBackends,
    clips: Box<dyn ClipFactory>,
    sink: Box<dyn EpisodeSink>,
    geometry: Geometry,
    width: u32,
    height: u32,
    parallel: bool,
    totals: Totals,
}

impl Monitor {
    pub fn new(
        cfg: &MonitorConfig,
        backends: InferenceBackends,
        clips: Box<dyn ClipFactory>,
        sink: Box<dyn EpisodeSink>,
    ) -> Self {
        Self {
            channels: ChannelSet::new(&cfg.thresholds, &cfg.temp_dir),
            backends,
            clips,
            sink,
            geometry: cfg.geometry,
            width: cfg.capture.width,
            height: cfg.capture.height,
            parallel: cfg.inference.parallel,
            totals: Totals::default(),
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn frames_processed(&self) -> u64 {
        self.totals.frames
    }

    /// Process one captured frame.
    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameReport> {
        let mut frame = frame.resized(self.width, self.height)?;
        self.totals.frames += 1;

        let detections = self.infer(&frame);
        let signals = classify_frame(&detections, &self.geometry);
        for contact in &signals.passing.contacts {
            log::debug!("frame {}: close wrists {:?}", self.totals.frames, contact);
        }
        if signals.any() {
            annotate(&mut frame, &detections, &signals, &self.geometry);
        }

        let mut report = FrameReport {
            index: self.totals.frames,
            ..FrameReport::default()
        };
        let mut io = ChannelIo {
            clips: self.clips.as_mut(),
            sink: self.sink.as_mut(),
        };
        for kind in BehaviorKind::ALL {
            let channel = self.channels.get_mut(kind);
            match channel.observe(signals.get(kind), &frame, &mut io) {
                Ok(ChannelUpdate::Idle) => {}
                Ok(update) => {
                    match update {
                        ChannelUpdate::Confirmed { .. } => self.totals.confirmed += 1,
                        ChannelUpdate::Discarded { .. } => self.totals.discarded += 1,
                        _ => {}
                    }
                    report.updates.push((kind, update));
                }
                Err(e) => {
                    self.totals.persistence_failures += 1;
                    log::error!("{} episode dropped, not persisted: {:#}", kind, e);
                    report.persistence_failures.push(kind);
                }
            }
        }
        report.signals = signals;
        Ok(report)
    }

    fn infer(&mut self, frame: &Frame) -> FrameDetections {
        let InferenceBackends { pose, objects } = &mut self.backends;
        let (poses, boxes) = if self.parallel {
            std::thread::scope(|scope| {
                let poses = scope.spawn(|| guarded("pose estimator", || pose.estimate(frame)));
                let boxes = guarded("object detector", || objects.detect(frame));
                let poses = poses
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("pose estimator panicked")));
                (poses, boxes)
            })
        } else {
            (
                guarded("pose estimator", || pose.estimate(frame)),
                guarded("object detector", || objects.detect(frame)),
            )
        };
        FrameDetections {
            poses: or_no_detection(pose.name(), poses),
            boxes: or_no_detection(objects.name(), boxes),
        }
    }

    /// Run until the source is exhausted, `stop` is raised or `max_frames`
    /// frames were processed.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        max_frames: Option<u64>,
    ) -> Result<RunSummary> {
        self.run_with(source, stop, max_frames, &mut |_| {})
    }

    /// Like `run`, calling `on_frame` with every frame's report.
    pub fn run_with(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        max_frames: Option<u64>,
        on_frame: &mut dyn FnMut(&FrameReport),
    ) -> Result<RunSummary> {
        let start = self.totals;
        let outcome = self.run_loop(source, stop, max_frames, on_frame);
        let interrupted_recordings = self.shutdown();
        let stop = outcome?;

        let summary = RunSummary {
            frames: self.totals.frames - start.frames,
            confirmed: self.totals.confirmed - start.confirmed,
            discarded: self.totals.discarded - start.discarded,
            persistence_failures: self.totals.persistence_failures - start.persistence_failures,
            interrupted_recordings,
            stop,
        };
        log::info!(
            "session ended ({:?}): frames={} confirmed={} discarded={} persistence_failures={}",
            summary.stop,
            summary.frames,
            summary.confirmed,
            summary.discarded,
            summary.persistence_failures
        );
        Ok(summary)
    }

    fn run_loop(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        max_frames: Option<u64>,
        on_frame: &mut dyn FnMut(&FrameReport),
    ) -> Result<StopReason> {
        let mut processed = 0u64;
        let mut last_health_log = Instant::now();
        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }
            if max_frames.is_some_and(|max| processed >= max) {
                return Ok(StopReason::FrameLimit);
            }
            let Some(frame) = source.next_frame()? else {
                return Ok(StopReason::Exhausted);
            };
            let report = self.process_frame(frame)?;
            on_frame(&report);
            processed += 1;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "source health={} frames={} confirmed={} source={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    self.totals.confirmed,
                    stats.source
                );
                last_health_log = Instant::now();
            }
        }
    }

    /// Release every channel's recording. Returns how many were open.
    pub fn shutdown(&mut self) -> usize {
        self.channels.shutdown()
    }
}

/// Run one inference call, turning a panic into an error so both
/// collaborators share the no-detection fallback.
fn guarded<T>(what: &str, call: impl FnOnce() -> Result<Vec<T>>) -> Result<Vec<T>> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(anyhow!("{} panicked", what)))
}
