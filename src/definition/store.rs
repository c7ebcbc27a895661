use crate::definition::parsing::{parse_descriptor, InvalidDescriptor};
use crate::definition::ArchitectureDescriptor;
use crate::utils::{glob_files, path_exists};
use miette::Diagnostic;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DESCRIPTOR_EXTENSION: &str = "json5";

#[derive(Debug, Diagnostic, Error)]
pub enum DescriptorError {
    #[error("architecture config not found: {}", .path.display())]
    #[diagnostic(
        code(zigbox::config::not_found),
        help("create the file or drop the name from --arch")
    )]
    NotFound { path: PathBuf },

    #[error("architecture config is not a regular file: {}", .path.display())]
    #[diagnostic(code(zigbox::config::not_a_file))]
    NotRegularFile { path: PathBuf },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] InvalidDescriptor),

    #[error("architecture `{name}` is defined twice ({} and {})", .first.display(), .second.display())]
    #[diagnostic(code(zigbox::config::duplicate_name))]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed reading {}", .path.display())]
    #[diagnostic(code(zigbox::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Directory of `<name>.json5` architecture records.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DescriptorStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, DESCRIPTOR_EXTENSION))
    }

    /// Loads the requested architectures, or every record in the directory when
    /// `names` is `None`. Fails on the first bad record and on duplicate names.
    pub async fn load(
        &self,
        names: Option<&[String]>,
    ) -> Result<Vec<ArchitectureDescriptor>, DescriptorError> {
        let names = match names {
            Some(names) => names.to_vec(),
            None => self.discover().await?,
        };

        info!("Choose arch list: {:?}", names);

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut descriptors = Vec::with_capacity(names.len());

        for name in &names {
            let path = self.path_for(name);
            let descriptor = self.load_one(name).await?;

            if let Some(first) = seen.insert(descriptor.name().to_string(), path.clone()) {
                return Err(DescriptorError::DuplicateName {
                    name: descriptor.name().to_string(),
                    first,
                    second: path,
                });
            }

            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }

    /// Names of all records in the directory, sorted.
    pub async fn discover(&self) -> Result<Vec<String>, DescriptorError> {
        let pattern = format!("*.{}", DESCRIPTOR_EXTENSION);
        let files = glob_files(&self.dir, &pattern)
            .await
            .map_err(|source| DescriptorError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();

        debug!("found {} architecture configs in {}", names.len(), self.dir.display());
        Ok(names)
    }

    pub async fn load_one(&self, name: &str) -> Result<ArchitectureDescriptor, DescriptorError> {
        let path = self.path_for(name);
        let io_err = |source| DescriptorError::Io {
            path: path.clone(),
            source,
        };

        if !path_exists(&path).await.map_err(io_err)? {
            return Err(DescriptorError::NotFound { path });
        }

        if !tokio::fs::metadata(&path).await.map_err(io_err)?.is_file() {
            return Err(DescriptorError::NotRegularFile { path });
        }

        let text = tokio::fs::read_to_string(&path).await.map_err(io_err)?;
        let file_name = path
            .file_name()
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        Ok(parse_descriptor(name, &file_name, &text)?)
    }
}
