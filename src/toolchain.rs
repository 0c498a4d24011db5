//! Lazy installation of the bundler toolchain.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ToolchainSettings;
use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;

/// Location of a usable deno executable.
///
/// Resolved once per batch and handed to every bundler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainHandle {
    path: PathBuf,
    installed: bool,
}

impl ToolchainHandle {
    /// Wrap an executable that is already present.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            installed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle was produced by a fresh download.
    pub const fn was_installed(&self) -> bool {
        self.installed
    }
}

fn deno_target() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Some("x86_64-unknown-linux-gnu"),
        ("linux", "aarch64") => Some("aarch64-unknown-linux-gnu"),
        ("macos", "x86_64") => Some("x86_64-apple-darwin"),
        ("macos", "aarch64") => Some("aarch64-apple-darwin"),
        ("windows", "x86_64") => Some("x86_64-pc-windows-msvc"),
        _ => None,
    }
}

fn archive_member() -> &'static str {
    if cfg!(windows) {
        "deno.exe"
    } else {
        "deno"
    }
}

pub struct Installer {
    client: reqwest::Client,
    settings: ToolchainSettings,
}

impl Installer {
    pub fn new(settings: ToolchainSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: ToolchainSettings) -> Self {
        Self { client, settings }
    }

    /// Release asset URL for the pinned version on this host.
    pub fn release_url(&self) -> DeployResult<String> {
        let target = deno_target().ok_or_else(|| {
            DeployError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!(
                    "no deno release for {}-{}",
                    std::env::consts::ARCH,
                    std::env::consts::OS
                ),
            ))
        })?;
        Ok(format!(
            "{}/denoland/deno/releases/download/v{}/deno-{}.zip",
            self.settings.release_host.trim_end_matches('/'),
            self.settings.version,
            target
        ))
    }

    /// Make sure the deno executable exists, downloading it if missing.
    #[instrument(skip_all, fields(path = %self.settings.deno_path.display()))]
    pub async fn ensure_installed(
        &self,
        fs: &dyn FileSystem,
        cancel: &CancellationToken,
    ) -> DeployResult<ToolchainHandle> {
        let path = &self.settings.deno_path;
        if fs.exists(path) {
            debug!("deno already installed");
            return Ok(ToolchainHandle::existing(path.clone()));
        }

        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)?;
        }

        let url = self.release_url()?;
        info!(%url, "downloading deno");
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DeployError::Cancelled),
            result = self.download(&url) => result?,
        };

        let binary = extract_member(&bytes, archive_member())?;
        fs.write(path, &binary, 0o755)?;
        info!(bytes = binary.len(), "installed deno");

        Ok(ToolchainHandle {
            path: path.clone(),
            installed: true,
        })
    }

    async fn download(&self, url: &str) -> DeployResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "supafn-cli")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::ToolchainDownload {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn extract_member(archive_bytes: &[u8], member: &str) -> DeployResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut file = archive.by_name(member)?;
    let mut out = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_end(&mut out)?;
    Ok(out)
}
