//! Persistence of confirmed episodes.
//!
//! For every confirmed episode the gateway, in order: names the proof file,
//! archives the clip, replicates it (distributed mode only), resolves the
//! lecture hall and inserts one unverified record. The first failing step
//! aborts the rest.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike};
use std::path::{Path, PathBuf};

use crate::archive::{ProofArchive, Replicator, ScpReplicator};
use crate::channel::EpisodeSink;
use crate::config::{LectureHallSettings, MonitorConfig};
use crate::storage::{MalpracticeStore, NewMalpracticeEvent, SqliteMalpracticeStore};
use crate::BehaviorKind;

const PROOF_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Outcome of persisting one confirmed episode.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedEvent {
    pub record_id: i64,
    pub kind: BehaviorKind,
    pub proof_file: String,
    pub proof_path: PathBuf,
    pub lecture_hall_id: Option<i64>,
    pub replicated: bool,
    pub confirmed_at: DateTime<Local>,
}

/// `<tag>_<YYYY-MM-DD_HH-MM-SS>.<ext>`
pub fn proof_file_name(kind: BehaviorKind, at: DateTime<Local>, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        kind.tag(),
        at.format(PROOF_TIMESTAMP_FORMAT),
        extension
    )
}

pub struct PersistenceGateway {
    archive: ProofArchive,
    store: Box<dyn MalpracticeStore>,
    replicator: Option<Box<dyn Replicator>>,
    hall: LectureHallSettings,
}

impl PersistenceGateway {
    pub fn new(
        archive: ProofArchive,
        store: Box<dyn MalpracticeStore>,
        hall: LectureHallSettings,
    ) -> Self {
        Self {
            archive,
            store,
            replicator: None,
            hall,
        }
    }

    /// SQLite store at `db_path`, archive at `media_dir`, scp replication when
    /// a remote host is configured.
    pub fn from_config(cfg: &MonitorConfig) -> Result<Self> {
        let store = SqliteMalpracticeStore::open(&cfg.db_path)?;
        let archive = ProofArchive::new(&cfg.media_dir)?;
        let mut gateway = Self::new(archive, Box::new(store), cfg.lecture_hall.clone());
        if let Some(remote) = &cfg.remote {
            let scp = ScpReplicator::new(remote.clone());
            log::info!("distributed mode: proofs replicated to {}", scp.destination());
            gateway = gateway.with_replicator(Box::new(scp));
        }
        Ok(gateway)
    }

    /// Enable distributed mode.
    pub fn with_replicator(mut self, replicator: Box<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn is_distributed(&self) -> bool {
        self.replicator.is_some()
    }

    pub fn store_mut(&mut self) -> &mut dyn MalpracticeStore {
        self.store.as_mut()
    }
}

impl EpisodeSink for PersistenceGateway {
    fn persist(
        &mut self,
        kind: BehaviorKind,
        clip: &Path,
        confirmed_at: DateTime<Local>,
    ) -> Result<PersistedEvent> {
        let extension = clip.extension().and_then(|e| e.to_str()).unwrap_or("y4m");
        let requested = proof_file_name(kind, confirmed_at, extension);

        let stored = self
            .archive
            .store(clip, &requested)
            .with_context(|| format!("failed to archive {} proof", kind))?;

        let replicated = match self.replicator.as_mut() {
            Some(replicator) => {
                replicator
                    .replicate(&stored.path, &stored.file_name)
                    .with_context(|| {
                        format!(
                            "failed to replicate {} to {}",
                            stored.file_name,
                            replicator.destination()
                        )
                    })?;
                true
            }
            None => false,
        };

        let lecture_hall_id = self
            .store
            .lecture_hall_id(&self.hall.name, &self.hall.building)?;
        if lecture_hall_id.is_none() {
            log::warn!(
                "lecture hall {} / {} not registered; recording event without hall",
                self.hall.name,
                self.hall.building
            );
        }

        let record_id = self
            .store
            .insert_event(&NewMalpracticeEvent {
                date: confirmed_at.date_naive(),
                time: confirmed_at.time().with_nanosecond(0).unwrap_or(confirmed_at.time()),
                malpractice: kind.label().to_string(),
                proof: stored.file_name.clone(),
                lecture_hall_id,
            })
            .with_context(|| format!("failed to record {} event", kind))?;

        Ok(PersistedEvent {
            record_id,
            kind,
            proof_file: stored.file_name,
            proof_path: stored.path,
            lecture_hall_id,
            replicated,
            confirmed_at,
        })
    }
}
