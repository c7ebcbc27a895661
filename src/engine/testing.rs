//! In-process stand-ins for `make`, `patch` and the network.

use crate::definition::RemoteArchive;
use crate::engine::environment::{Exit, Invocation, Runner};
use crate::engine::fetcher::{Fetch, FetchError};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SAMPLE_DEFCONFIG: &str = "#\n# Automatically generated make config: don't edit\n#\nCONFIG_HAVE_DOT_CONFIG=y\nCONFIG_SHA1_HWACCEL=y\nCONFIG_TC=y\n# CONFIG_FEATURE_SH_STANDALONE is not set\n";

/// Emulates the busybox build: `defconfig` writes `.config`, the compile writes the
/// binary. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    failing_targets: Vec<String>,
    failing_patches: Vec<String>,
    no_binary: bool,
}

impl FakeRunner {
    /// Compiles whose `CC` mentions `target` exit with code 2.
    pub fn failing_target(mut self, target: &str) -> Self {
        self.failing_targets.push(target.to_string());
        self
    }

    pub fn failing_patch(mut self, file_name: &str) -> Self {
        self.failing_patches.push(file_name.to_string());
        self
    }

    /// Compiles succeed without leaving a binary behind.
    pub fn without_binary(mut self) -> Self {
        self.no_binary = true;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations made against one build directory.
    pub fn calls_for(&self, build_dir: &Path) -> Vec<Invocation> {
        let out = build_dir.display().to_string();
        self.calls()
            .into_iter()
            .filter(|c| c.make_var("O") == Some(out.as_str()))
            .collect()
    }

    async fn make(&self, invocation: &Invocation) -> io::Result<Exit> {
        let out = invocation
            .make_var("O")
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "make without O="))?;

        if invocation.has_arg("defconfig") {
            tokio::fs::write(out.join(".config"), SAMPLE_DEFCONFIG).await?;
        } else if let Some(cc) = invocation.make_var("CC") {
            if self.failing_targets.iter().any(|t| cc.contains(t.as_str())) {
                return Ok(Exit { code: Some(2) });
            }

            if !self.no_binary {
                tokio::fs::write(out.join("busybox"), format!("ELF built with {}", cc)).await?;
            }
        }

        Ok(Exit { code: Some(0) })
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit> {
        self.calls.lock().unwrap().push(invocation.clone());

        match invocation.program.as_str() {
            "make" => self.make(invocation).await,
            "patch" => {
                let failing = self
                    .failing_patches
                    .iter()
                    .any(|p| invocation.args.iter().any(|a| a.ends_with(p.as_str())));
                Ok(Exit {
                    code: Some(if failing { 1 } else { 0 }),
                })
            }
            _ => Ok(Exit { code: Some(127) }),
        }
    }
}

/// Serves archives from a local directory, keyed by file name.
#[derive(Debug)]
pub struct LocalFetcher {
    dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(dir: &Path) -> Self {
        LocalFetcher {
            dir: dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl Fetch for LocalFetcher {
    async fn fetch(&self, archive: &RemoteArchive, path: &Path) -> Result<(), FetchError> {
        tokio::fs::copy(self.dir.join(archive.file_name()), path)
            .await
            .map(|_| ())
            .map_err(|e| FetchError::transfer(&archive.url, e))
    }
}

/// Behaves like an unreachable mirror.
#[derive(Debug)]
pub struct FailingFetcher;

#[async_trait]
impl Fetch for FailingFetcher {
    async fn fetch(&self, archive: &RemoteArchive, _path: &Path) -> Result<(), FetchError> {
        Err(FetchError::transfer(
            &archive.url,
            io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        ))
    }
}
