//! Durable proof storage and optional remote replication.
//!
//! Proof clips are copied into the media directory through a temporary file and
//! a rename, so a reader never sees a partially written proof.

use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::RemoteSettings;

const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredProof {
    pub file_name: String,
    pub path: PathBuf,
}

pub struct ProofArchive {
    root: PathBuf,
}

impl ProofArchive {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create media dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `src` into the archive as `file_name`, or as `stem-N.ext` when that
    /// name is already taken.
    pub fn store(&self, src: &Path, file_name: &str) -> Result<StoredProof> {
        let file_name = self.unique_name(file_name)?;
        let path = self.root.join(&file_name);
        let tmp_path = self.root.join(format!(".{}.part", file_name));

        let copied = fs::copy(src, &tmp_path)
            .with_context(|| format!("failed to copy clip {}", src.display()));
        if let Err(e) = copied {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        File::open(&tmp_path)?.sync_all()?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to move proof into {}", path.display()))?;

        Ok(StoredProof { file_name, path })
    }

    fn unique_name(&self, file_name: &str) -> Result<String> {
        sanitize_file_name(file_name)?;
        if !self.root.join(file_name).exists() {
            return Ok(file_name.to_string());
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (file_name, None),
        };
        for n in 1..=MAX_NAME_ATTEMPTS {
            let candidate = match ext {
                Some(ext) => format!("{}-{}.{}", stem, n, ext),
                None => format!("{}-{}", stem, n),
            };
            if !self.root.join(&candidate).exists() {
                return Ok(candidate);
            }
        }
        Err(anyhow!("no free proof name for {}", file_name))
    }
}

fn sanitize_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(anyhow!("invalid proof file name '{}'", name));
    }
    Ok(())
}

// -------------------- Replication --------------------

/// Copies archived proofs to a second host.
pub trait Replicator: Send {
    /// Human-readable destination for logs.
    fn destination(&self) -> String;

    fn replicate(&mut self, local: &Path, file_name: &str) -> Result<()>;
}

/// Replicates with the system `scp` client. Authentication must be
/// non-interactive (key or agent); password prompts are disabled.
pub struct ScpReplicator {
    settings: RemoteSettings,
    program: OsString,
}

impl ScpReplicator {
    pub fn new(settings: RemoteSettings) -> Self {
        Self {
            settings,
            program: OsString::from("scp"),
        }
    }

    /// Use another scp-compatible binary.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn remote_target(&self, file_name: &str) -> String {
        format!(
            "{}@{}:{}/media/{}",
            self.settings.user,
            self.settings.host,
            self.settings.remote_root.trim_end_matches('/'),
            file_name
        )
    }

    fn args(&self, local: &Path, file_name: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-q".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-P".into(),
            self.settings.port.to_string().into(),
        ];
        if let Some(identity) = &self.settings.identity_file {
            args.push("-i".into());
            args.push(identity.as_os_str().to_owned());
        }
        args.push(local.as_os_str().to_owned());
        args.push(self.remote_target(file_name).into());
        args
    }
}

impl Replicator for ScpReplicator {
    fn destination(&self) -> String {
        format!("{}@{}", self.settings.user, self.settings.host)
    }

    fn replicate(&mut self, local: &Path, file_name: &str) -> Result<()> {
        let output = Command::new(&self.program)
            .args(self.args(local, file_name))
            .output()
            .with_context(|| format!("failed to run {:?}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "scp to {} failed ({}): {}",
                self.destination(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteSettings {
        RemoteSettings {
            host: "10.0.0.3".to_string(),
            user: "invig".to_string(),
            port: 2222,
            remote_root: "AIInvigilator/".to_string(),
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
        }
    }

    #[test]
    fn stores_copy_under_requested_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output_leaning.y4m");
        fs::write(&src, b"clip").unwrap();
        let archive = ProofArchive::new(dir.path().join("media")).unwrap();

        let stored = archive.store(&src, "leaning_2024-03-14_10-15-42.y4m").unwrap();
        assert_eq!(stored.file_name, "leaning_2024-03-14_10-15-42.y4m");
        assert_eq!(fs::read(&stored.path).unwrap(), b"clip");
        assert!(src.exists());
    }

    #[test]
    fn name_collision_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.y4m");
        fs::write(&src, b"clip").unwrap();
        let archive = ProofArchive::new(dir.path().join("media")).unwrap();

        archive.store(&src, "mobiledetection_2024-03-14_10-15-42.y4m").unwrap();
        let second = archive
            .store(&src, "mobiledetection_2024-03-14_10-15-42.y4m")
            .unwrap();
        assert_eq!(second.file_name, "mobiledetection_2024-03-14_10-15-42-1.y4m");
        let leftovers: Vec<_> = fs::read_dir(archive.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_source_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ProofArchive::new(dir.path()).unwrap();
        assert!(archive.store(&dir.path().join("nope.y4m"), "x.y4m").is_err());
        assert!(archive.store(&dir.path().join("nope.y4m"), "../x.y4m").is_err());
    }

    #[test]
    fn scp_arguments_target_remote_media_dir() {
        let scp = ScpReplicator::new(remote());
        let args = scp.args(Path::new("media/a.y4m"), "a.y4m");
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-q",
                "-o",
                "BatchMode=yes",
                "-P",
                "2222",
                "-i",
                "/keys/id_ed25519",
                "media/a.y4m",
                "invig@10.0.0.3:AIInvigilator/media/a.y4m",
            ]
        );
    }

    #[test]
    fn failing_copy_program_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.y4m");
        fs::write(&src, b"clip").unwrap();
        let mut scp = ScpReplicator::new(remote()).with_program("/nonexistent/scp");
        assert!(scp.replicate(&src, "a.y4m").is_err());
    }
}
