use crate::definition::{ArchitectureDescriptor, RemoteArchive};
use crate::engine::bootstrap::{BootstrapError, Bootstrapper};
use crate::engine::build_state::BuildOutcome;
use crate::engine::environment::{Environment, Runner, SystemRunner};
use crate::engine::fetcher::{Fetch, Fetcher};
use crate::engine::pipeline::{Pipeline, PipelineError};
use crate::engine::workspace::Workspace;
use crate::utils::path_exists;
use futures::stream::{self, StreamExt};
use miette::Diagnostic;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

pub mod bootstrap;
pub mod build_state;
pub mod environment;
pub mod extractor;
pub mod fetcher;
pub mod kconfig;
pub mod pipeline;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub const BUSYBOX_VERSION: &str = "busybox-1.37.0";
pub const ZIG_VERSION: &str = "zig-x86_64-linux-0.16.0-dev.1912+0cbaaa5eb";

pub fn default_busybox_url() -> String {
    format!("https://busybox.net/downloads/{}.tar.bz2", BUSYBOX_VERSION)
}

pub fn default_zig_url() -> String {
    format!("https://ziglang.org/builds/{}.tar.xz", ZIG_VERSION)
}

/// How many pipelines may run at once.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum Parallelism {
    #[default]
    Unbounded,
    Limit(usize),
}

impl Parallelism {
    fn limit_for(&self, units: usize) -> usize {
        match self {
            Parallelism::Unbounded => units.max(1),
            Parallelism::Limit(n) => (*n).max(1),
        }
    }
}

impl FromStr for Parallelism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unbounded" => Ok(Parallelism::Unbounded),
            "auto" => Ok(Parallelism::Limit(num_cpus::get())),
            n => match n.parse::<usize>() {
                Ok(0) => Err("parallelism must be at least 1".to_string()),
                Ok(n) => Ok(Parallelism::Limit(n)),
                Err(_) => Err(format!(
                    "expected `unbounded`, `auto` or a positive number, got `{}`",
                    n
                )),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workspace: Workspace,
    pub source: RemoteArchive,
    pub toolchain: RemoteArchive,
    pub patch_dir: PathBuf,
    pub parallelism: Parallelism,
}

impl EngineSettings {
    /// Defaults for a workspace rooted at `root`: pinned busybox and zig releases,
    /// patches from `./patch`, no concurrency bound.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        EngineSettings {
            workspace: Workspace::new(root),
            source: RemoteArchive::new(default_busybox_url(), BUSYBOX_VERSION),
            toolchain: RemoteArchive::new(default_zig_url(), ZIG_VERSION),
            patch_dir: PathBuf::from("patch"),
            parallelism: Parallelism::Unbounded,
        }
    }
}

/// Every architecture that failed in one run.
#[derive(Debug, Diagnostic, Error)]
#[diagnostic(code(zigbox::build::failed))]
pub struct EngineError {
    #[related]
    pub errors: Vec<PipelineError>,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Encountered {} errors:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\n\t{}", err)?;
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub built: Vec<(String, PathBuf)>,
    pub skipped: Vec<String>,
    pub failed: Vec<PipelineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self) -> Result<RunReport, EngineError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(EngineError {
                errors: self.failed,
            })
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    bootstrapper: Bootstrapper,
    pipeline: Pipeline,
    environment: Environment,
    pub settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::from_parts(settings, Box::new(Fetcher::new()), Arc::new(SystemRunner))
    }

    pub fn from_parts(
        settings: EngineSettings,
        fetcher: Box<dyn Fetch>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        let settings = Arc::from(settings);
        Engine {
            bootstrapper: Bootstrapper::new(settings.clone(), fetcher),
            pipeline: Pipeline::new(settings.clone()),
            environment: Environment::new(settings.clone(), runner),
            settings,
        }
    }

    /// Bootstraps the source tree and toolchain. Must finish before any build.
    pub async fn prepare_engine(&self) -> Result<(), BootstrapError> {
        self.bootstrapper.prepare(&self.environment).await
    }

    /// Bootstraps, then builds every descriptor whose build directory is missing.
    pub async fn run(&self, descriptors: &[ArchitectureDescriptor]) -> Result<RunReport, BootstrapError> {
        self.prepare_engine().await?;
        Ok(self.build_all(descriptors).await)
    }

    /// Builds all pending architectures concurrently. One failure never stops the others.
    pub async fn build_all(&self, descriptors: &[ArchitectureDescriptor]) -> RunReport {
        let started = Instant::now();
        let mut outcomes = vec![];
        let mut pending = vec![];

        for descriptor in descriptors {
            match self.is_built(descriptor).await {
                Ok(true) => {
                    info!("skip {}", descriptor.name());
                    outcomes.push(BuildOutcome::Skipped {
                        arch: descriptor.name().to_string(),
                    });
                }
                Ok(false) => pending.push(descriptor),
                Err(e) => outcomes.push(BuildOutcome::Failed(e)),
            }
        }

        let limit = self.settings.parallelism.limit_for(pending.len());
        info!(
            "building {} architectures, at most {} at a time",
            pending.len(),
            limit
        );

        let built: Vec<BuildOutcome> = stream::iter(pending)
            .map(|descriptor| self.build_arch(descriptor))
            .buffer_unordered(limit)
            .collect()
            .await;
        outcomes.extend(built);

        let mut report = RunReport::default();
        for outcome in outcomes {
            debug!("collected outcome for {}", outcome.arch());
            match outcome {
                BuildOutcome::Built {
                    arch,
                    artifact,
                    elapsed,
                } => {
                    info!("{} -> {} ({:.1?})", arch, artifact.display(), elapsed);
                    report.built.push((arch, artifact));
                }
                BuildOutcome::Skipped { arch } => report.skipped.push(arch),
                BuildOutcome::Failed(e) => {
                    error!("{}", e);
                    report.failed.push(e);
                }
            }
        }

        info!(
            "built {}, skipped {}, failed {} in {:.1?}",
            report.built.len(),
            report.skipped.len(),
            report.failed.len(),
            started.elapsed()
        );

        report
    }

    /// Existence of the build directory is the only completion signal.
    async fn is_built(&self, descriptor: &ArchitectureDescriptor) -> Result<bool, PipelineError> {
        let build_dir = self.settings.workspace.build_dir_for(descriptor);
        path_exists(&build_dir)
            .await
            .map_err(|source| PipelineError::BuildIo {
                arch: descriptor.name().to_string(),
                step: build_state::BuildStep::Prepare,
                source,
            })
    }

    pub async fn build_arch(&self, descriptor: &ArchitectureDescriptor) -> BuildOutcome {
        let started = Instant::now();
        match self.pipeline.run(descriptor, &self.environment).await {
            Ok(artifact) => BuildOutcome::Built {
                arch: descriptor.name().to_string(),
                artifact,
                elapsed: started.elapsed(),
            },
            Err(e) => BuildOutcome::Failed(e),
        }
    }
}
