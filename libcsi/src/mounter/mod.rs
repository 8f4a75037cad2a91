//! Mounter strategies.
//!
//! A [`Mounter`] presents one bucket prefix as a local directory by running
//! an external FUSE tool.  Backends differ only in the command line they
//! build and in how they hand credentials to the tool.
//!
//! | Name | Backend | Credentials |
//! |---|---|---|
//! | `s3fs` (default) | [`S3fsMounter`] | password file, mode 0600 |
//! | `rclone` | [`RcloneMounter`] | process environment |
//!
//! The backend is picked per volume by [`MounterFactory`]: the volume's own
//! choice first, then the process default.  Unknown names fall back to
//! `s3fs` instead of failing the mount.

pub mod rclone;
pub mod runner;
pub mod s3fs;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::S3Config;
use crate::error::CsiError;
use crate::metadata::VolumeRecord;

pub use rclone::RcloneMounter;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RecordingRunner, SystemRunner};
pub use s3fs::S3fsMounter;

/// Stage, unstage and mount hooks of one backend.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Prepare `staging` before any publish.  No-op for the FUSE backends.
    async fn stage(&self, staging: &Path) -> Result<(), CsiError>;

    /// Tear down what [`stage`](Mounter::stage) set up.
    async fn unstage(&self, staging: &Path) -> Result<(), CsiError>;

    /// Make the bucket prefix visible at `target`.
    async fn mount(&self, source: &Path, target: &Path) -> Result<(), CsiError>;
}

/// Per-publish mount options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub read_only: bool,
    /// Capability mount flags, passed to the tool verbatim.
    pub flags: Vec<String>,
}

/// The bucket prefix a mounter exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSource {
    pub bucket: String,
    pub prefix: String,
}

impl From<&VolumeRecord> for MountSource {
    fn from(record: &VolumeRecord) -> Self {
        Self {
            bucket: record.name.clone(),
            prefix: record.fs_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MounterKind {
    #[default]
    S3fs,
    Rclone,
}

impl MounterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "s3fs" => Some(Self::S3fs),
            "rclone" => Some(Self::Rclone),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3fs => "s3fs",
            Self::Rclone => "rclone",
        }
    }

    /// Pick a backend: `volume_choice`, then `default`, then `s3fs`.
    ///
    /// Empty names count as unset.  A name that is set but not recognized
    /// yields `s3fs` together with that name, so the caller can report it.
    pub fn resolve<'a>(
        volume_choice: Option<&'a str>,
        default: &'a str,
    ) -> (Self, Option<&'a str>) {
        let chosen = volume_choice
            .filter(|name| !name.is_empty())
            .or(Some(default).filter(|name| !name.is_empty()));
        match chosen {
            None => (Self::default(), None),
            Some(name) => match Self::from_name(name) {
                Some(kind) => (kind, None),
                None => (Self::default(), Some(name)),
            },
        }
    }
}

impl fmt::Display for MounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the mounter for a volume.
pub struct MounterFactory {
    runner: Arc<dyn CommandRunner>,
    credentials_dir: PathBuf,
    fallbacks: AtomicU64,
}

impl MounterFactory {
    pub fn new(runner: Arc<dyn CommandRunner>, credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            credentials_dir: credentials_dir.into(),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn build(
        &self,
        record: &VolumeRecord,
        config: &S3Config,
        options: MountOptions,
    ) -> Box<dyn Mounter> {
        let (kind, unknown) = MounterKind::resolve(record.mounter.as_deref(), &config.mounter);
        if let Some(name) = unknown {
            let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                volume_id = %record.name,
                mounter = name,
                fallback = %kind,
                total,
                "unknown mounter, using fallback",
            );
        }

        let source = MountSource::from(record);
        match kind {
            MounterKind::S3fs => Box::new(S3fsMounter::new(
                source,
                config.clone(),
                self.credentials_dir.clone(),
                options,
                self.runner.clone(),
            )),
            MounterKind::Rclone => Box::new(RcloneMounter::new(
                source,
                config.clone(),
                options,
                self.runner.clone(),
            )),
        }
    }

    /// How many builds fell back because the chosen mounter does not exist.
    ///
    /// Stage and publish each build a mounter, so one volume counts once per
    /// call.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for MounterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MounterFactory")
            .field("credentials_dir", &self.credentials_dir)
            .field("fallbacks", &self.fallback_count())
            .finish()
    }
}

/// Run a mount tool and turn a non-zero exit into [`CsiError::MountFailed`].
async fn run_mount_tool(
    runner: &dyn CommandRunner,
    cmd: &CommandSpec,
    target: &Path,
) -> Result<(), CsiError> {
    let failed = |reason: String| CsiError::MountFailed {
        path: target.display().to_string(),
        reason,
    };
    let output = runner
        .run(cmd)
        .await
        .map_err(|e| failed(format!("failed to start {}: {e}", cmd.program)))?;
    if !output.is_success() {
        let status = match output.code {
            Some(code) => format!("exit status {code}"),
            None => "killed by signal".to_owned(),
        };
        return Err(failed(format!(
            "{} {status}: {}",
            cmd.program,
            output.combined()
        )));
    }
    info!(command = %cmd, target = %target.display(), "mounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_precedence() {
        assert_eq!(MounterKind::resolve(None, ""), (MounterKind::S3fs, None));
        assert_eq!(
            MounterKind::resolve(None, "rclone"),
            (MounterKind::Rclone, None)
        );
        assert_eq!(
            MounterKind::resolve(Some("s3fs"), "rclone"),
            (MounterKind::S3fs, None)
        );
        assert_eq!(
            MounterKind::resolve(Some(""), "rclone"),
            (MounterKind::Rclone, None)
        );
    }

    #[test]
    fn unknown_names_fall_back_to_s3fs() {
        assert_eq!(
            MounterKind::resolve(Some("goofys"), "rclone"),
            (MounterKind::S3fs, Some("goofys"))
        );
        assert_eq!(
            MounterKind::resolve(None, "gcsfuse"),
            (MounterKind::S3fs, Some("gcsfuse"))
        );
    }

    #[test]
    fn factory_counts_fallbacks() {
        let factory = MounterFactory::new(Arc::new(RecordingRunner::new()), "/tmp");
        let cfg = S3Config::default();

        let record = VolumeRecord::new("vol-a", 1, Some("goofys".into()));
        factory.build(&record, &cfg, MountOptions::default());
        factory.build(&record, &cfg, MountOptions::default());
        assert_eq!(factory.fallback_count(), 2);

        let record = VolumeRecord::new("vol-b", 1, Some("rclone".into()));
        factory.build(&record, &cfg, MountOptions::default());
        assert_eq!(factory.fallback_count(), 2);
    }

    #[tokio::test]
    async fn factory_honours_volume_choice() {
        let runner = Arc::new(RecordingRunner::new());
        let factory = MounterFactory::new(runner.clone(), "/tmp");
        let cfg = S3Config {
            mounter: "s3fs".into(),
            ..Default::default()
        };
        let record = VolumeRecord::new("vol-a", 1, Some("rclone".into()));
        factory
            .build(&record, &cfg, MountOptions::default())
            .mount(Path::new("/staging"), Path::new("/target"))
            .await
            .unwrap();
        assert_eq!(runner.programs(), ["rclone"]);
    }
}
