//! Exam Invigilator
//!
//! This crate watches a live exam-room stream and turns per-frame pose and
//! object detections into debounced malpractice events, each backed by a proof
//! clip and a database record.
//!
//! # Architecture
//!
//! Per frame: capture -> inference (pose, objects) -> classifiers -> one boolean
//! signal per behaviour -> channel update -> frame appended to any open
//! recording -> on a confirmed episode, the persistence gateway.
//!
//! The five behaviour channels are logically simultaneous but are updated
//! strictly in sequence by the single frame loop; nothing in the core is shared
//! across threads except the optional concurrent inference step.
//!
//! # Module Structure
//!
//! - `frame`: captured RGB frames
//! - `ingest`: frame sources (synthetic, local video files)
//! - `detect`: pose / object collaborators and YOLO output decoding
//! - `classify`, `passing`: geometric behaviour rules
//! - `annotate`: overlay drawn on recorded frames
//! - `recording`: proof clip writers and the scoped recording guard
//! - `channel`: per-behaviour debounce + recording state machine
//! - `archive`, `storage`, `gateway`: persistence of confirmed episodes
//! - `monitor`: the frame loop orchestrator

use serde::{Deserialize, Serialize};

pub mod annotate;
pub mod archive;
pub mod channel;
pub mod classify;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gateway;
pub mod ingest;
pub mod monitor;
pub mod passing;
pub mod recording;
pub mod storage;
pub mod ui;

pub use archive::{ProofArchive, Replicator, ScpReplicator};
pub use channel::{ChannelIo, ChannelSet, ChannelUpdate, EpisodeSink, EventChannel};
pub use classify::{classify_frame, FrameSignals};
pub use config::{EpisodeThresholds, Geometry, MonitorConfig};
pub use detect::{
    FrameDetections, Keypoint, Landmark, ObjectBox, ObjectDetector, Pose, PoseEstimator,
};
pub use frame::Frame;
pub use gateway::{PersistedEvent, PersistenceGateway};
pub use ingest::{FileConfig, FileSource, FrameSource};
pub use monitor::{FrameReport, Monitor, RunSummary, StopReason};
pub use passing::{detect_passing_paper, Hand, PassingResult, WristContact};
pub use recording::{ClipFactory, ClipWriter, Recording, Y4mClipFactory};
pub use storage::{
    EventFilter, InMemoryMalpracticeStore, MalpracticeEvent, MalpracticeStore,
    NewMalpracticeEvent, SqliteMalpracticeStore,
};

// -------------------- Behaviour Kinds --------------------

/// The closed set of behaviours the monitor flags.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    Leaning,
    PassingPaper,
    TurningBack,
    HandRaise,
    Mobile,
}

impl BehaviorKind {
    pub const COUNT: usize = 5;

    /// Every kind, in the order channels are updated within a frame.
    pub const ALL: [BehaviorKind; BehaviorKind::COUNT] = [
        BehaviorKind::Leaning,
        BehaviorKind::PassingPaper,
        BehaviorKind::TurningBack,
        BehaviorKind::HandRaise,
        BehaviorKind::Mobile,
    ];

    pub fn index(self) -> usize {
        match self {
            BehaviorKind::Leaning => 0,
            BehaviorKind::PassingPaper => 1,
            BehaviorKind::TurningBack => 2,
            BehaviorKind::HandRaise => 3,
            BehaviorKind::Mobile => 4,
        }
    }

    /// Label stored in the `malpractice` column.
    pub fn label(self) -> &'static str {
        match self {
            BehaviorKind::Leaning => "Leaning",
            BehaviorKind::PassingPaper => "Passing Paper",
            BehaviorKind::TurningBack => "Turning Back",
            BehaviorKind::HandRaise => "Hand Raised",
            BehaviorKind::Mobile => "Mobile Phone Detected",
        }
    }

    /// File-name tag for temporary and proof clips.
    pub fn tag(self) -> &'static str {
        match self {
            BehaviorKind::Leaning => "leaning",
            BehaviorKind::PassingPaper => "passingpaper",
            BehaviorKind::TurningBack => "turningback",
            BehaviorKind::HandRaise => "handraise",
            BehaviorKind::Mobile => "mobiledetection",
        }
    }

    /// Minimum confirmed episode length in frames.
    pub fn default_threshold(self) -> u32 {
        match self {
            BehaviorKind::HandRaise => 5,
            _ => 3,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

impl std::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_update_order() {
        for (i, kind) in BehaviorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn labels_round_trip_and_tags_are_distinct() {
        let mut tags = std::collections::HashSet::new();
        for kind in BehaviorKind::ALL {
            assert_eq!(BehaviorKind::from_label(kind.label()), Some(kind));
            assert!(tags.insert(kind.tag()));
        }
        assert_eq!(BehaviorKind::from_label("Sleeping"), None);
    }

    #[test]
    fn hand_raise_needs_longer_episodes() {
        assert_eq!(BehaviorKind::HandRaise.default_threshold(), 5);
        assert_eq!(BehaviorKind::Mobile.default_threshold(), 3);
    }
}
