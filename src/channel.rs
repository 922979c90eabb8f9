//! Per-behaviour debounce and recording.
//!
//! Each `EventChannel` is either idle or inside exactly one episode. An episode
//! opens a proof recording on its first true frame and closes on the first
//! false frame; at that point the recording is released and the episode is
//! either handed to the `EpisodeSink` (long enough) or thrown away with its
//! temporary clip.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::config::EpisodeThresholds;
use crate::frame::Frame;
use crate::gateway::PersistedEvent;
use crate::recording::{ClipFactory, RecordedClip, Recording};
use crate::BehaviorKind;

/// Receives confirmed episodes.
pub trait EpisodeSink: Send {
    fn persist(
        &mut self,
        kind: BehaviorKind,
        clip: &Path,
        confirmed_at: DateTime<Local>,
    ) -> Result<PersistedEvent>;
}

/// Collaborators a channel needs while handling one frame.
pub struct ChannelIo<'a> {
    pub clips: &'a mut dyn ClipFactory,
    pub sink: &'a mut dyn EpisodeSink,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelUpdate {
    /// Idle and the signal stayed false.
    Idle,
    /// First true frame of a new episode.
    Started,
    Continued { frames: u32 },
    Confirmed { frames: u32, event: PersistedEvent },
    Discarded { frames: u32 },
}

pub struct EventChannel {
    kind: BehaviorKind,
    threshold: u32,
    temp_dir: PathBuf,
    active: bool,
    consecutive_frames: u32,
    recording: Option<Recording>,
}

impl EventChannel {
    pub fn new(kind: BehaviorKind, threshold: u32, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            threshold: threshold.max(1),
            temp_dir: temp_dir.into(),
            active: false,
            consecutive_frames: 0,
            recording: None,
        }
    }

    pub fn kind(&self) -> BehaviorKind {
        self.kind
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn consecutive_frames(&self) -> u32 {
        self.consecutive_frames
    }

    /// `<temp_dir>/output_<tag>.<ext>`
    pub fn temp_clip_path(&self, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("output_{}.{}", self.kind.tag(), extension))
    }

    /// Advance the state machine by one frame.
    ///
    /// On an episode close the channel is back to idle before this returns,
    /// including when persisting the episode fails.
    pub fn observe(
        &mut self,
        signal: bool,
        frame: &Frame,
        io: &mut ChannelIo<'_>,
    ) -> Result<ChannelUpdate> {
        let update = match (self.active, signal) {
            (false, false) => ChannelUpdate::Idle,
            (false, true) => {
                self.begin(frame, io.clips);
                ChannelUpdate::Started
            }
            (true, true) => {
                self.consecutive_frames += 1;
                ChannelUpdate::Continued {
                    frames: self.consecutive_frames,
                }
            }
            (true, false) => return self.close(frame.captured_at, io.sink),
        };

        if let Some(recording) = self.recording.as_mut() {
            if let Err(e) = recording.write(frame) {
                log::warn!("{} clip write failed: {:#}", self.kind, e);
            }
        }
        Ok(update)
    }

    fn begin(&mut self, frame: &Frame, clips: &mut dyn ClipFactory) {
        self.active = true;
        self.consecutive_frames = 1;
        if self.recording.is_none() {
            let path = self.temp_clip_path(clips.extension());
            match Recording::start(clips, self.kind, path, frame.width, frame.height) {
                Ok(recording) => self.recording = Some(recording),
                Err(e) => log::warn!("{} episode started without a clip: {:#}", self.kind, e),
            }
        }
        log::debug!("{} episode started", self.kind);
    }

    fn reset(&mut self) -> (u32, Option<Recording>) {
        let frames = self.consecutive_frames;
        self.active = false;
        self.consecutive_frames = 0;
        (frames, self.recording.take())
    }

    fn close(
        &mut self,
        confirmed_at: DateTime<Local>,
        sink: &mut dyn EpisodeSink,
    ) -> Result<ChannelUpdate> {
        let (frames, recording) = self.reset();
        let temp_path = recording.as_ref().map(|r| r.path().to_path_buf());
        let released = recording.map(Recording::release).transpose();

        if frames < self.threshold {
            if let Err(e) = &released {
                log::warn!("{} discarded clip not finalized: {:#}", self.kind, e);
            }
            if let Some(path) = temp_path {
                remove_temp_clip(&path);
            }
            log::debug!(
                "{} episode discarded after {} frame(s) (threshold {})",
                self.kind,
                frames,
                self.threshold
            );
            return Ok(ChannelUpdate::Discarded { frames });
        }

        let clip: RecordedClip = released?
            .ok_or_else(|| anyhow!("{} episode confirmed without a proof clip", self.kind))?;
        let event = sink.persist(self.kind, &clip.path, confirmed_at)?;
        log::info!(
            "{} confirmed after {} frame(s): record {} proof {}",
            self.kind,
            frames,
            event.record_id,
            event.proof_file
        );
        Ok(ChannelUpdate::Confirmed { frames, event })
    }

    /// Release any open recording and return to idle without persisting.
    ///
    /// A partial temporary clip is left on disk. Returns true if a recording
    /// was open.
    pub fn shutdown(&mut self) -> bool {
        let (frames, recording) = self.reset();
        match recording {
            Some(recording) => {
                let path = recording.path().to_path_buf();
                if let Err(e) = recording.release() {
                    log::warn!("{} clip {} not finalized: {:#}", self.kind, path.display(), e);
                }
                log::info!(
                    "{} episode interrupted after {} frame(s); partial clip {}",
                    self.kind,
                    frames,
                    path.display()
                );
                true
            }
            None => false,
        }
    }
}

fn remove_temp_clip(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", path.display(), e),
    }
}

// -------------------- Channel set --------------------

/// One channel per behaviour, indexed by `BehaviorKind::index`.
pub struct ChannelSet {
    channels: [EventChannel; BehaviorKind::COUNT],
}

impl ChannelSet {
    pub fn new(thresholds: &EpisodeThresholds, temp_dir: &Path) -> Self {
        Self {
            channels: BehaviorKind::ALL
                .map(|kind| EventChannel::new(kind, thresholds.for_kind(kind), temp_dir)),
        }
    }

    pub fn get(&self, kind: BehaviorKind) -> &EventChannel {
        &self.channels[kind.index()]
    }

    pub fn get_mut(&mut self, kind: BehaviorKind) -> &mut EventChannel {
        &mut self.channels[kind.index()]
    }

    /// Channels in update order.
    pub fn iter(&self) -> impl Iterator<Item = &EventChannel> {
        self.channels.iter()
    }

    pub fn any_recording(&self) -> bool {
        self.channels.iter().any(EventChannel::is_recording)
    }

    /// Shut every channel down. Returns how many recordings were open.
    pub fn shutdown(&mut self) -> usize {
        self.channels
            .iter_mut()
            .map(EventChannel::shutdown)
            .filter(|released| *released)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::tests::{ClipLog, MemoryClipFactory};
    use crate::recording::Y4mClipFactory;
    use std::sync::{Arc, Mutex};

    /// Sink that checks the clip was finalized before it is handed over.
    struct CheckingSink {
        clips: Arc<Mutex<ClipLog>>,
        persisted: Vec<(BehaviorKind, PathBuf)>,
        fail: bool,
    }

    impl CheckingSink {
        fn new(clips: Arc<Mutex<ClipLog>>) -> Self {
            Self {
                clips,
                persisted: Vec::new(),
                fail: false,
            }
        }
    }

    impl EpisodeSink for CheckingSink {
        fn persist(
            &mut self,
            kind: BehaviorKind,
            clip: &Path,
            confirmed_at: DateTime<Local>,
        ) -> Result<PersistedEvent> {
            assert!(self
                .clips
                .lock()
                .unwrap()
                .finished
                .iter()
                .any(|p| p == clip));
            if self.fail {
                anyhow::bail!("database unavailable");
            }
            self.persisted.push((kind, clip.to_path_buf()));
            Ok(PersistedEvent {
                record_id: self.persisted.len() as i64,
                kind,
                proof_file: "proof.mem".to_string(),
                proof_path: clip.to_path_buf(),
                lecture_hall_id: None,
                replicated: false,
                confirmed_at,
            })
        }
    }

    fn frame() -> Frame {
        Frame::filled(4, 2, [10, 20, 30]).unwrap()
    }

    fn feed(
        channel: &mut EventChannel,
        signals: &[bool],
        clips: &mut dyn ClipFactory,
        sink: &mut dyn EpisodeSink,
    ) -> Vec<ChannelUpdate> {
        let frame = frame();
        let mut io = ChannelIo { clips, sink };
        signals
            .iter()
            .map(|s| channel.observe(*s, &frame, &mut io).unwrap())
            .collect()
    }

    #[test]
    fn short_episode_is_discarded_and_clip_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut clips = Y4mClipFactory;
        let mut sink = CheckingSink::new(Arc::default());
        let mut channel = EventChannel::new(BehaviorKind::Leaning, 3, dir.path());

        let updates = feed(&mut channel, &[true, true], &mut clips, &mut sink);
        assert_eq!(updates, vec![ChannelUpdate::Started, ChannelUpdate::Continued { frames: 2 }]);
        let temp = channel.temp_clip_path("y4m");
        assert!(temp.exists());
        assert!(channel.is_recording());

        let updates = feed(&mut channel, &[false], &mut clips, &mut sink);
        assert_eq!(updates, vec![ChannelUpdate::Discarded { frames: 2 }]);
        assert!(!temp.exists());
        assert!(sink.persisted.is_empty());
        assert!(!channel.is_active());
        assert!(!channel.is_recording());
        assert_eq!(channel.consecutive_frames(), 0);
    }

    #[test]
    fn threshold_episode_is_released_then_persisted_once() {
        let mut clips = MemoryClipFactory::default();
        let mut sink = CheckingSink::new(Arc::clone(&clips.log));
        let mut channel = EventChannel::new(BehaviorKind::PassingPaper, 3, "tmp");

        let updates = feed(&mut channel, &[true, true, true, false, false], &mut clips, &mut sink);
        assert!(matches!(updates[3], ChannelUpdate::Confirmed { frames: 3, .. }));
        assert_eq!(updates[4], ChannelUpdate::Idle);
        assert_eq!(sink.persisted.len(), 1);
        assert_eq!(sink.persisted[0].1, PathBuf::from("tmp/output_passingpaper.mem"));

        let log = clips.log.lock().unwrap();
        assert_eq!(log.opened.len(), 1);
        assert_eq!(log.finished.len(), 1);
        // the closing frame is not part of the clip
        assert_eq!(log.frames[0].1, 3);
    }

    #[test]
    fn hand_raise_needs_five_frames() {
        let mut clips = MemoryClipFactory::default();
        let mut sink = CheckingSink::new(Arc::clone(&clips.log));
        let mut channel = EventChannel::new(BehaviorKind::HandRaise, 5, "tmp");

        let confirmed = feed(
            &mut channel,
            &[true, true, true, true, true, false],
            &mut clips,
            &mut sink,
        );
        assert!(matches!(confirmed[5], ChannelUpdate::Confirmed { frames: 5, .. }));

        let discarded = feed(&mut channel, &[true, true, true, true, false], &mut clips, &mut sink);
        assert_eq!(discarded[4], ChannelUpdate::Discarded { frames: 4 });
        assert_eq!(sink.persisted.len(), 1);
    }

    #[test]
    fn consecutive_episodes_never_overlap() {
        let mut clips = MemoryClipFactory::default();
        let mut sink = CheckingSink::new(Arc::clone(&clips.log));
        let mut channel = EventChannel::new(BehaviorKind::Mobile, 3, "tmp");

        feed(&mut channel, &[true, true, true, false], &mut clips, &mut sink);
        {
            let log = clips.log.lock().unwrap();
            assert_eq!((log.opened.len(), log.finished.len()), (1, 1));
        }
        feed(&mut channel, &[true], &mut clips, &mut sink);
        let log = clips.log.lock().unwrap();
        assert_eq!((log.opened.len(), log.finished.len()), (2, 1));
    }

    #[test]
    fn persistence_failure_still_returns_to_idle() {
        let mut clips = MemoryClipFactory::default();
        let mut sink = CheckingSink::new(Arc::clone(&clips.log));
        sink.fail = true;
        let mut channel = EventChannel::new(BehaviorKind::TurningBack, 3, "tmp");

        feed(&mut channel, &[true, true, true], &mut clips, &mut sink);
        let frame = frame();
        let mut io = ChannelIo {
            clips: &mut clips,
            sink: &mut sink,
        };
        assert!(channel.observe(false, &frame, &mut io).is_err());
        assert!(!channel.is_active());
        assert!(!channel.is_recording());
        assert_eq!(channel.consecutive_frames(), 0);

        // the next episode starts normally
        assert_eq!(channel.observe(true, &frame, &mut io).unwrap(), ChannelUpdate::Started);
    }

    #[test]
    fn shutdown_releases_open_recordings_once() {
        let mut clips = MemoryClipFactory::default();
        let mut sink = CheckingSink::new(Arc::clone(&clips.log));
        let mut set = ChannelSet::new(&EpisodeThresholds::default(), Path::new("tmp"));

        feed(set.get_mut(BehaviorKind::Leaning), &[true, true], &mut clips, &mut sink);
        assert!(set.any_recording());
        assert_eq!(set.shutdown(), 1);
        assert_eq!(set.shutdown(), 0);
        assert!(!set.any_recording());
        assert!(sink.persisted.is_empty());
        assert_eq!(clips.log.lock().unwrap().finished.len(), 1);
    }

    /// Factory whose device never opens.
    #[derive(Default)]
    struct UnavailableClips {
        attempts: u32,
    }

    impl ClipFactory for UnavailableClips {
        fn extension(&self) -> &'static str {
            "mem"
        }

        fn open(
            &mut self,
            path: &Path,
            _width: u32,
            _height: u32,
            _fps: u32,
        ) -> Result<Box<dyn crate::recording::ClipWriter>> {
            self.attempts += 1;
            anyhow::bail!("cannot open {}", path.display())
        }
    }

    #[test]
    fn clip_open_failure_never_confirms_and_retries_next_episode() {
        let mut clips = UnavailableClips::default();
        let mut sink = CheckingSink::new(Arc::default());
        let mut channel = EventChannel::new(BehaviorKind::Leaning, 3, Path::new("tmp"));
        let frame = frame();

        {
            let mut io = ChannelIo {
                clips: &mut clips,
                sink: &mut sink,
            };
            assert_eq!(channel.observe(true, &frame, &mut io).unwrap(), ChannelUpdate::Started);
            assert!(channel.is_active());
            assert!(!channel.is_recording());
            channel.observe(true, &frame, &mut io).unwrap();
            channel.observe(true, &frame, &mut io).unwrap();

            let err = channel.observe(false, &frame, &mut io).unwrap_err();
            assert!(err.to_string().contains("without a proof clip"));
            assert!(!channel.is_active());
            assert_eq!(channel.consecutive_frames(), 0);

            assert_eq!(channel.observe(true, &frame, &mut io).unwrap(), ChannelUpdate::Started);
            assert_eq!(
                channel.observe(false, &frame, &mut io).unwrap(),
                ChannelUpdate::Discarded { frames: 1 }
            );
            assert!(!channel.is_active());
        }
        assert_eq!(clips.attempts, 2);
        assert!(sink.persisted.is_empty());
    }

    #[test]
    fn set_uses_per_kind_thresholds() {
        let set = ChannelSet::new(&EpisodeThresholds::default(), Path::new("."));
        assert_eq!(set.get(BehaviorKind::HandRaise).threshold(), 5);
        let kinds: Vec<_> = set.iter().map(EventChannel::kind).collect();
        assert_eq!(kinds, BehaviorKind::ALL.to_vec());
    }
}
