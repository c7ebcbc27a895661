use crate::definition::ArchitectureDescriptor;
use crate::engine::pipeline::PipelineError;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum BuildStep {
    Prepare,
    Configure,
    PatchConfig,
    Resolve,
    Compile,
    Collect,
}

impl BuildStep {
    pub const fn steps() -> [BuildStep; 6] {
        [
            BuildStep::Prepare,
            BuildStep::Configure,
            BuildStep::PatchConfig,
            BuildStep::Resolve,
            BuildStep::Compile,
            BuildStep::Collect,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildStep::Prepare => "prepare",
            BuildStep::Configure => "defconfig",
            BuildStep::PatchConfig => "patch-config",
            BuildStep::Resolve => "oldconfig",
            BuildStep::Compile => "compile",
            BuildStep::Collect => "collect",
        }
    }
}

impl Display for BuildStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct BuildState<'a> {
    pub started: Instant,
    pub descriptor: &'a ArchitectureDescriptor,
    pub build_dir: PathBuf,
    pub step: BuildStep,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Built {
        arch: String,
        artifact: PathBuf,
        elapsed: Duration,
    },
    Skipped {
        arch: String,
    },
    Failed(PipelineError),
}

impl BuildOutcome {
    pub fn arch(&self) -> &str {
        match self {
            BuildOutcome::Built { arch, .. } => arch,
            BuildOutcome::Skipped { arch } => arch,
            BuildOutcome::Failed(e) => e.arch(),
        }
    }
}
