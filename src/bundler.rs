//! Bundling function sources with the external deno toolchain.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{DeployError, DeployResult};
use crate::toolchain::ToolchainHandle;

/// Self-contained, platform-loadable function bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact(Vec<u8>);

impl BundleArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundle the function at `entrypoint_uri` resolving imports through `import_map_uri`.
    async fn bundle(
        &self,
        entrypoint_uri: &str,
        import_map_uri: &str,
        cancel: &CancellationToken,
    ) -> DeployResult<BundleArtifact>;
}

/// Runs `deno bundle` as a subprocess, reading the bundle from stdout.
pub struct DenoBundler {
    toolchain: ToolchainHandle,
}

impl DenoBundler {
    pub fn new(toolchain: ToolchainHandle) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl Bundler for DenoBundler {
    #[instrument(skip(self, cancel))]
    async fn bundle(
        &self,
        entrypoint_uri: &str,
        import_map_uri: &str,
        cancel: &CancellationToken,
    ) -> DeployResult<BundleArtifact> {
        let child = Command::new(self.toolchain.path())
            .args([
                "bundle",
                "--quiet",
                "--import-map",
                import_map_uri,
                entrypoint_uri,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DeployError::BundlerSpawn)?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!("bundling cancelled");
                return Err(DeployError::Cancelled);
            }
            output = child.wait_with_output() => output.map_err(DeployError::BundlerSpawn)?,
        };

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            return Err(DeployError::Bundle {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        debug!(bytes = output.stdout.len(), "bundled function");
        Ok(BundleArtifact::new(output.stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    fn fake_deno(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("deno");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn stdout_becomes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let deno = fake_deno(dir.path(), r#"printf '%s|' "$@""#);
        let bundler = DenoBundler::new(ToolchainHandle::existing(deno));

        let artifact = bundler
            .bundle(
                "file:///p/supabase/functions/hello/index.ts",
                "file:///p/supabase/functions/import_map.json",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(artifact.into_bytes()).unwrap(),
            "bundle|--quiet|--import-map|file:///p/supabase/functions/import_map.json|file:///p/supabase/functions/hello/index.ts|"
        );
    }

    #[tokio::test]
    async fn non_zero_exit_wraps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let deno = fake_deno(dir.path(), "echo 'bundle failed' >&2\nexit 1");
        let bundler = DenoBundler::new(ToolchainHandle::existing(deno));

        let err = bundler
            .bundle("file:///a.ts", "file:///b.json", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Bundle { code: 1, .. }));
        assert_eq!(
            err.to_string(),
            "Error bundling function: exit status 1\nbundle failed\n"
        );
    }

    #[tokio::test]
    async fn stderr_without_newline_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let deno = fake_deno(dir.path(), "printf 'oops' >&2\nexit 3");
        let bundler = DenoBundler::new(ToolchainHandle::existing(deno));

        let err = bundler
            .bundle("file:///a.ts", "file:///b.json", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error bundling function: exit status 3\noops\n");
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let bundler = DenoBundler::new(ToolchainHandle::existing("/definitely/not/deno"));
        let err = bundler
            .bundle("file:///a.ts", "file:///b.json", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::BundlerSpawn(_)));
        assert!(err.to_string().starts_with("Error bundling function:"));
    }

    #[tokio::test]
    async fn cancellation_kills_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let deno = fake_deno(dir.path(), "sleep 30");
        let bundler = DenoBundler::new(ToolchainHandle::existing(deno));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = bundler
            .bundle("file:///a.ts", "file:///b.json", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
