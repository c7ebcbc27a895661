use crate::definition::ArchitectureDescriptor;
use std::path::{Path, PathBuf};

pub const SOURCE_DIR: &str = "busybox-src";
pub const TOOLCHAIN_DIR: &str = "zig";
pub const RESULT_DIR: &str = "result";

/// Local build tree. Source and toolchain roots are written only while bootstrapping.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn toolchain_root(&self) -> PathBuf {
        self.root.join(TOOLCHAIN_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULT_DIR)
    }

    /// Where an archive is downloaded to.
    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn build_dir_for(&self, descriptor: &ArchitectureDescriptor) -> PathBuf {
        self.root.join(descriptor.name())
    }

    pub fn artifact_path_for(&self, descriptor: &ArchitectureDescriptor) -> PathBuf {
        self.results_dir().join(descriptor.artifact_name())
    }
}
