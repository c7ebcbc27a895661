use crate::definition::{ArchitectureDescriptor, BINARY_NAME};
use crate::engine::build_state::{BuildState, BuildStep};
use crate::engine::environment::{Environment, Invocation};
use crate::engine::kconfig::patch_config;
use crate::engine::EngineSettings;
use miette::Diagnostic;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Compile command line kept in each build tree for inspection.
pub const COMMAND_RECORD: &str = "zigbox-command.txt";

const CFLAGS: &str = "CFLAGS=-Os -flto";
const AR: &str = "AR=zig ar";
// zig does not bundle a strip that understands every target
const SKIP_STRIP: &str = "SKIP_STRIP=y";

#[derive(Debug, Diagnostic, Error)]
pub enum PipelineError {
    #[error("{arch}: build directory {} already exists", .path.display())]
    #[diagnostic(
        code(zigbox::build::dir_exists),
        help("remove the directory to rebuild this architecture")
    )]
    BuildDirExists { arch: String, path: PathBuf },

    #[error("{arch}: {step} failed, {}", describe_exit(.exit_code))]
    #[diagnostic(code(zigbox::build::step_failed))]
    BuildStepFailed {
        arch: String,
        step: BuildStep,
        exit_code: Option<i32>,
    },

    #[error("{arch}: {step} failed")]
    #[diagnostic(code(zigbox::build::io))]
    BuildIo {
        arch: String,
        step: BuildStep,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn arch(&self) -> &str {
        match self {
            PipelineError::BuildDirExists { arch, .. } => arch,
            PipelineError::BuildStepFailed { arch, .. } => arch,
            PipelineError::BuildIo { arch, .. } => arch,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code: {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Runs configure, config patching, compile and collect for one architecture.
#[derive(Debug)]
pub struct Pipeline {
    settings: Arc<EngineSettings>,
}

impl Pipeline {
    pub fn new(settings: Arc<EngineSettings>) -> Pipeline {
        Pipeline { settings }
    }

    /// Returns the path of the collected artifact.
    pub async fn run(
        &self,
        descriptor: &ArchitectureDescriptor,
        environment: &Environment,
    ) -> Result<PathBuf, PipelineError> {
        let mut state = BuildState {
            started: Instant::now(),
            descriptor,
            build_dir: self.settings.workspace.build_dir_for(descriptor),
            step: BuildStep::Prepare,
        };

        let mut artifact = None;

        for step in BuildStep::steps() {
            debug!("{}: running step {}", descriptor.name(), step);
            state.step = step;

            match step {
                BuildStep::Prepare => self.prepare(&state).await?,
                BuildStep::Configure => {
                    let inv = environment.make(&state.build_dir, &["defconfig"]);
                    self.execute(&state, environment, &inv).await?;
                }
                BuildStep::PatchConfig => self.patch_config(&state).await?,
                BuildStep::Resolve => {
                    let inv = environment.make(&state.build_dir, &["oldconfig"]);
                    self.execute(&state, environment, &inv).await?;
                    info!("configure {} success", descriptor.name());
                }
                BuildStep::Compile => self.compile(&state, environment).await?,
                BuildStep::Collect => artifact = Some(self.collect(&state).await?),
            }
        }

        info!(
            "build {} success in {:.1?}",
            descriptor.name(),
            state.started.elapsed()
        );

        Ok(artifact.unwrap_or_else(|| self.settings.workspace.artifact_path_for(descriptor)))
    }

    fn io_error(state: &BuildState, source: io::Error) -> PipelineError {
        PipelineError::BuildIo {
            arch: state.descriptor.name().to_string(),
            step: state.step,
            source,
        }
    }

    async fn prepare(&self, state: &BuildState<'_>) -> Result<(), PipelineError> {
        match tokio::fs::create_dir(&state.build_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PipelineError::BuildDirExists {
                arch: state.descriptor.name().to_string(),
                path: state.build_dir.clone(),
            }),
            Err(e) => Err(Self::io_error(state, e)),
        }
    }

    async fn execute(
        &self,
        state: &BuildState<'_>,
        environment: &Environment,
        invocation: &Invocation,
    ) -> Result<(), PipelineError> {
        let ec = environment
            .run(invocation)
            .await
            .map_err(|e| Self::io_error(state, e))?;

        if !ec.success() {
            return Err(PipelineError::BuildStepFailed {
                arch: state.descriptor.name().to_string(),
                step: state.step,
                exit_code: ec.code,
            });
        }

        Ok(())
    }

    async fn patch_config(&self, state: &BuildState<'_>) -> Result<(), PipelineError> {
        let config_path = state.build_dir.join(".config");
        let config = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| Self::io_error(state, e))?;

        let (patched, report) = patch_config(&config);
        debug!(
            "{}: config edits applied {:?}, skipped {:?}, standalone shell appended: {}",
            state.descriptor.name(),
            report.applied,
            report.skipped,
            report.appended
        );

        tokio::fs::write(&config_path, patched)
            .await
            .map_err(|e| Self::io_error(state, e))
    }

    async fn compile(
        &self,
        state: &BuildState<'_>,
        environment: &Environment,
    ) -> Result<(), PipelineError> {
        let cc = format!("CC={}", state.descriptor.cc_command());
        let ld = format!("LD={}", state.descriptor.ld_command());
        let args = [cc.as_str(), CFLAGS, ld.as_str(), AR, SKIP_STRIP, "-j"];

        let inv = environment.make(&state.build_dir, &args);
        tokio::fs::write(state.build_dir.join(COMMAND_RECORD), format!("{}\n", inv))
            .await
            .map_err(|e| Self::io_error(state, e))?;

        self.execute(state, environment, &inv).await
    }

    async fn collect(&self, state: &BuildState<'_>) -> Result<PathBuf, PipelineError> {
        let results = self.settings.workspace.results_dir();
        let target = self.settings.workspace.artifact_path_for(state.descriptor);
        let staging = results.join(format!(".{}.tmp", state.descriptor.artifact_name()));

        tokio::fs::create_dir_all(&results)
            .await
            .map_err(|e| Self::io_error(state, e))?;
        tokio::fs::copy(state.build_dir.join(BINARY_NAME), &staging)
            .await
            .map_err(|e| Self::io_error(state, e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| Self::io_error(state, e))?;

        Ok(target)
    }
}
