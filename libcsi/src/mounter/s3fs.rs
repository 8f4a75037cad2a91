//! `s3fs` backend.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::{CommandRunner, CommandSpec, MountOptions, MountSource, Mounter, run_mount_tool};
use crate::config::S3Config;
use crate::error::CsiError;

pub const PROGRAM: &str = "s3fs";

/// File name of the s3fs password file inside the credentials directory.
pub const PASSWD_FILE: &str = ".passwd-s3fs";

const PASSWD_MODE: u32 = 0o600;

pub struct S3fsMounter {
    source: MountSource,
    config: S3Config,
    credentials_dir: PathBuf,
    options: MountOptions,
    runner: Arc<dyn CommandRunner>,
}

impl S3fsMounter {
    pub fn new(
        source: MountSource,
        config: S3Config,
        credentials_dir: PathBuf,
        options: MountOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            source,
            config,
            credentials_dir,
            options,
            runner,
        }
    }

    pub fn passwd_path(&self) -> PathBuf {
        self.credentials_dir.join(PASSWD_FILE)
    }

    /// (Re)write the password file, owner read/write only.
    async fn write_passwd(&self) -> std::io::Result<PathBuf> {
        let path = self.passwd_path();
        tokio::fs::create_dir_all(&self.credentials_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(PASSWD_MODE)
            .open(&path)
            .await?;
        file.write_all(
            format!(
                "{}:{}",
                self.config.access_key_id, self.config.secret_access_key
            )
            .as_bytes(),
        )
        .await?;
        file.flush().await?;
        // `mode` only applies on creation; an older file may be wider.
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(PASSWD_MODE)).await?;
        Ok(path)
    }

    fn command(&self, target: &Path, passwd: &Path) -> CommandSpec {
        let mut options = vec![
            format!("passwd_file={}", passwd.display()),
            "use_path_request_style".to_owned(),
        ];
        if !self.config.endpoint.is_empty() {
            options.push(format!("url={}", self.config.endpoint));
        }
        if !self.config.region.is_empty() {
            options.push(format!("endpoint={}", self.config.region));
        }
        options.push("allow_other".to_owned());
        options.push("mp_umask=000".to_owned());
        if self.options.read_only {
            options.push("ro".to_owned());
        }
        options.extend(self.options.flags.iter().cloned());

        options.into_iter().fold(
            CommandSpec::new(PROGRAM)
                .arg(format!("{}:/{}", self.source.bucket, self.source.prefix))
                .arg(target.display().to_string()),
            |cmd, option| cmd.arg("-o").arg(option),
        )
    }
}

#[async_trait]
impl Mounter for S3fsMounter {
    async fn stage(&self, staging: &Path) -> Result<(), CsiError> {
        debug!(path = %staging.display(), "s3fs needs no staging");
        Ok(())
    }

    async fn unstage(&self, _staging: &Path) -> Result<(), CsiError> {
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.source.bucket))]
    async fn mount(&self, _source: &Path, target: &Path) -> Result<(), CsiError> {
        let passwd = self
            .write_passwd()
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!("write {}: {e}", self.passwd_path().display()),
            })?;
        let cmd = self.command(target, &passwd);
        run_mount_tool(self.runner.as_ref(), &cmd, target).await
    }
}
