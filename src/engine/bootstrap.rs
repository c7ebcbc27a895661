use crate::definition::RemoteArchive;
use crate::engine::environment::Environment;
use crate::engine::extractor::Extractor;
use crate::engine::fetcher::{Fetch, FetchError};
use crate::engine::EngineSettings;
use crate::utils::{glob_files, path_exists};
use anyhow::Context;
use miette::Diagnostic;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const PATCH_PATTERN: &str = "*.diff";

/// Failures that leave the workspace unusable. None of them is retried.
#[derive(Debug, Diagnostic, Error)]
pub enum BootstrapError {
    #[error("failed to prepare workspace at {}", .path.display())]
    #[diagnostic(code(zigbox::bootstrap::workspace))]
    WorkspaceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to fetch {url}")]
    #[diagnostic(
        code(zigbox::bootstrap::fetch),
        help("check network access or place the archive in the workspace by hand")
    )]
    FetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to unpack {}", .archive.display())]
    #[diagnostic(
        code(zigbox::bootstrap::extract),
        help("delete the partially unpacked directory before running again")
    )]
    ExtractFailed {
        archive: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to apply patch {}: {detail}", .patch.display())]
    #[diagnostic(
        code(zigbox::bootstrap::patch),
        help("the source tree is now partially patched; remove it before running again")
    )]
    PatchApplyFailed { patch: PathBuf, detail: String },
}

/// Materialises the source tree and the toolchain, once per workspace.
#[derive(Debug)]
pub struct Bootstrapper {
    settings: Arc<EngineSettings>,
    fetcher: Box<dyn Fetch>,
    extractor: Extractor,
}

impl Bootstrapper {
    pub fn new(settings: Arc<EngineSettings>, fetcher: Box<dyn Fetch>) -> Self {
        Bootstrapper {
            settings,
            fetcher,
            extractor: Extractor::new(),
        }
    }

    pub async fn prepare(&self, environment: &Environment) -> Result<(), BootstrapError> {
        let ws = &self.settings.workspace;
        create_dir(ws.root()).await?;
        create_dir(&ws.results_dir()).await?;

        let source_root = ws.source_root();
        if !exists(&source_root).await? {
            self.install(&self.settings.source, &source_root).await?;
            self.apply_patches(environment).await?;
        }
        info!("busybox src init success.");

        let toolchain_root = ws.toolchain_root();
        if !exists(&toolchain_root).await? {
            self.install(&self.settings.toolchain, &toolchain_root).await?;
        }
        info!("zig init success.");

        Ok(())
    }

    /// Fetches and unpacks `archive`, then moves its top-level directory to `target`.
    async fn install(&self, archive: &RemoteArchive, target: &Path) -> Result<(), BootstrapError> {
        let ws = &self.settings.workspace;
        let download = ws.download_path(archive.file_name());

        self.fetcher
            .fetch(archive, &download)
            .await
            .map_err(|source| {
                if source.is_verification_failure() {
                    warn!("{} does not match its pinned digest", download.display());
                }
                BootstrapError::FetchFailed {
                    url: archive.url.clone(),
                    source,
                }
            })?;

        self.extractor
            .extract(&download, ws.root())
            .await
            .map_err(|source| BootstrapError::ExtractFailed {
                archive: download.clone(),
                source,
            })?;

        let unpacked = ws.root().join(&archive.unpacked_dir);
        tokio::fs::rename(&unpacked, target)
            .await
            .with_context(|| {
                format!(
                    "moving {} to {}",
                    unpacked.display(),
                    target.display()
                )
            })
            .map_err(|source| BootstrapError::ExtractFailed {
                archive: download,
                source,
            })?;

        Ok(())
    }

    async fn apply_patches(&self, environment: &Environment) -> Result<(), BootstrapError> {
        let patch_dir = &self.settings.patch_dir;
        if !exists(patch_dir).await? {
            warn!("patch directory {} not found, no patches applied", patch_dir.display());
            return Ok(());
        }

        let patches = glob_files(patch_dir, PATCH_PATTERN)
            .await
            .map_err(|source| BootstrapError::WorkspaceIo {
                path: patch_dir.clone(),
                source,
            })?;

        if patches.is_empty() {
            warn!("no patches found in {}", patch_dir.display());
        }

        for patch in patches {
            // patch runs inside the source tree, so relative paths would break
            let patch = tokio::fs::canonicalize(&patch).await.map_err(|source| {
                BootstrapError::WorkspaceIo {
                    path: patch.clone(),
                    source,
                }
            })?;

            info!("applying {}", patch.display());
            let ec = environment
                .run(&environment.patch(&patch))
                .await
                .map_err(|e| BootstrapError::PatchApplyFailed {
                    patch: patch.clone(),
                    detail: e.to_string(),
                })?;

            if !ec.success() {
                return Err(BootstrapError::PatchApplyFailed {
                    detail: match ec.code {
                        Some(code) => format!("exit code: {}", code),
                        None => "terminated by signal".to_string(),
                    },
                    patch,
                });
            }
        }

        Ok(())
    }
}

async fn exists(path: &Path) -> Result<bool, BootstrapError> {
    path_exists(path)
        .await
        .map_err(|source| BootstrapError::WorkspaceIo {
            path: path.to_path_buf(),
            source,
        })
}

async fn create_dir(path: &Path) -> Result<(), BootstrapError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BootstrapError::WorkspaceIo {
            path: path.to_path_buf(),
            source,
        })
}
