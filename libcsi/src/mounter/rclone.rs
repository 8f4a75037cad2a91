//! `rclone mount` backend.
//!
//! Credentials reach rclone through `AWS_ACCESS_KEY_ID` and
//! `AWS_SECRET_ACCESS_KEY` in its environment (`--s3-env-auth`), so nothing
//! is written to disk.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::{CommandRunner, CommandSpec, MountOptions, MountSource, Mounter, run_mount_tool};
use crate::config::S3Config;
use crate::error::CsiError;

pub const PROGRAM: &str = "rclone";

pub struct RcloneMounter {
    source: MountSource,
    config: S3Config,
    options: MountOptions,
    runner: Arc<dyn CommandRunner>,
}

impl RcloneMounter {
    pub fn new(
        source: MountSource,
        config: S3Config,
        options: MountOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            source,
            config,
            options,
            runner,
        }
    }

    fn command(&self, target: &Path) -> CommandSpec {
        let mut cmd = CommandSpec::new(PROGRAM)
            .arg("mount")
            .arg(format!(":s3:{}/{}", self.source.bucket, self.source.prefix))
            .arg(target.display().to_string())
            .arg("--daemon")
            .arg("--s3-provider=Other")
            .arg("--s3-env-auth");
        if !self.config.endpoint.is_empty() {
            cmd = cmd.arg(format!("--s3-endpoint={}", self.config.endpoint));
        }
        if !self.config.region.is_empty() {
            cmd = cmd.arg(format!("--s3-region={}", self.config.region));
        }
        cmd = cmd.args([
            "--allow-other",
            "--dir-perms=0777",
            "--file-perms=0666",
            "--vfs-cache-mode=writes",
        ]);
        if self.options.read_only {
            cmd = cmd.arg("--read-only");
        }
        for flag in &self.options.flags {
            cmd = cmd.arg(format!("--option={flag}"));
        }
        cmd.env("AWS_ACCESS_KEY_ID", self.config.access_key_id.as_str())
            .env("AWS_SECRET_ACCESS_KEY", self.config.secret_access_key.as_str())
    }
}

#[async_trait]
impl Mounter for RcloneMounter {
    async fn stage(&self, _staging: &Path) -> Result<(), CsiError> {
        Ok(())
    }

    async fn unstage(&self, _staging: &Path) -> Result<(), CsiError> {
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.source.bucket))]
    async fn mount(&self, _source: &Path, target: &Path) -> Result<(), CsiError> {
        run_mount_tool(self.runner.as_ref(), &self.command(target), target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounter::RecordingRunner;

    #[tokio::test]
    async fn mount_passes_credentials_in_env() {
        let runner = Arc::new(RecordingRunner::new());
        let m = RcloneMounter::new(
            MountSource {
                bucket: "vol-a".into(),
                prefix: "csi-fs".into(),
            },
            S3Config {
                endpoint: "https://s3.example.com".into(),
                region: "us-east-1".into(),
                access_key_id: "AKIA".into(),
                secret_access_key: "s3cr3t".into(),
                ..Default::default()
            },
            MountOptions {
                read_only: true,
                flags: vec!["uid=1000".into()],
            },
            runner.clone(),
        );

        m.mount(Path::new("/staging"), Path::new("/target"))
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, "rclone");
        assert_eq!(
            call.args,
            [
                "mount",
                ":s3:vol-a/csi-fs",
                "/target",
                "--daemon",
                "--s3-provider=Other",
                "--s3-env-auth",
                "--s3-endpoint=https://s3.example.com",
                "--s3-region=us-east-1",
                "--allow-other",
                "--dir-perms=0777",
                "--file-perms=0666",
                "--vfs-cache-mode=writes",
                "--read-only",
                "--option=uid=1000",
            ]
        );
        assert_eq!(
            call.env,
            [
                ("AWS_ACCESS_KEY_ID".to_owned(), "AKIA".to_owned()),
                ("AWS_SECRET_ACCESS_KEY".to_owned(), "s3cr3t".to_owned()),
            ]
        );
        assert!(!call.args.iter().any(|a| a.contains("s3cr3t")));
    }
}
