pub mod parsing;
pub mod store;

use std::fmt::{Display, Formatter};

/// Name of the binary produced by every build tree.
pub const BINARY_NAME: &str = "busybox";

/// Workspace entries that an architecture name must never shadow.
pub const RESERVED_NAMES: &[&str] = &["busybox-src", "zig", "result"];

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tar"];

/// One cross-compilation target.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchitectureDescriptor {
    name: String,
    target_triple: String,
    arch_option: Option<String>,
    lld_option: Option<String>,
}

impl ArchitectureDescriptor {
    pub fn new(name: impl Into<String>, target_triple: impl Into<String>) -> Self {
        ArchitectureDescriptor {
            name: name.into(),
            target_triple: target_triple.into(),
            arch_option: None,
            lld_option: None,
        }
    }

    pub fn with_arch_option(mut self, option: impl Into<String>) -> Self {
        self.arch_option = non_empty(option.into());
        self
    }

    pub fn with_lld_option(mut self, option: impl Into<String>) -> Self {
        self.lld_option = non_empty(option.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_triple(&self) -> &str {
        &self.target_triple
    }

    pub fn arch_option(&self) -> Option<&str> {
        self.arch_option.as_deref()
    }

    pub fn lld_option(&self) -> Option<&str> {
        self.lld_option.as_deref()
    }

    /// File name of the collected artifact, e.g. `arm64-busybox`.
    pub fn artifact_name(&self) -> String {
        format!("{}-{}", self.name, BINARY_NAME)
    }

    /// `CC` value handed to make.
    pub fn cc_command(&self) -> String {
        match &self.arch_option {
            Some(opt) => format!("zig cc -target {} {}", self.target_triple, opt),
            None => format!("zig cc -target {}", self.target_triple),
        }
    }

    /// `LD` value handed to make.
    pub fn ld_command(&self) -> String {
        match &self.lld_option {
            Some(opt) => format!("zig ld.lld {}", opt),
            None => "zig ld.lld".to_string(),
        }
    }
}

impl Display for ArchitectureDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.target_triple)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Checks that `name` can safely be used as a directory next to the workspace entries.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("architecture name must not be empty");
    }

    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err("architecture name must be a single path component");
    }

    if RESERVED_NAMES.contains(&name) {
        return Err("architecture name collides with a reserved workspace entry");
    }

    Ok(())
}

/// An archive fetched once into the workspace and unpacked in place.
#[derive(Debug, Clone)]
pub struct RemoteArchive {
    pub url: String,
    pub file_name: String,
    /// Top-level directory the archive unpacks to.
    pub unpacked_dir: String,
    pub verification: Verification,
}

impl RemoteArchive {
    pub fn new(url: impl Into<String>, unpacked_dir: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|x| !x.is_empty())
            .unwrap_or("download")
            .to_string();

        RemoteArchive {
            url,
            file_name,
            unpacked_dir: unpacked_dir.into(),
            verification: Verification::default(),
        }
    }

    /// Assumes the archive unpacks to a directory named like the file without its
    /// extension, which holds for both busybox and zig releases.
    pub fn from_url(url: impl Into<String>) -> Self {
        let mut archive = RemoteArchive::new(url, "");
        let stem = ARCHIVE_EXTENSIONS
            .iter()
            .find_map(|ext| archive.file_name.strip_suffix(ext))
            .unwrap_or(archive.file_name.as_str())
            .to_string();
        archive.unpacked_dir = stem;
        archive
    }

    pub fn with_sha256(mut self, sha256: Option<[u8; 32]>) -> Self {
        self.verification.sha256 = sha256;
        self
    }

    pub fn file_name(&self) -> &str {
        self.file_name.as_str()
    }
}

#[derive(Default, Debug, Clone)]
pub struct Verification {
    pub sha256: Option<[u8; 32]>,
}

/// Parses a hex encoded SHA-256 digest as given on the command line.
pub fn parse_sha256(input: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(input.trim()).map_err(|e| e.to_string())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_commands_append_options() {
        let plain = ArchitectureDescriptor::new("arm64", "aarch64-linux-musl");
        assert_eq!(plain.cc_command(), "zig cc -target aarch64-linux-musl");
        assert_eq!(plain.ld_command(), "zig ld.lld");

        let x86 = ArchitectureDescriptor::new("x86", "x86_64-linux-musl")
            .with_arch_option("-mno-sse")
            .with_lld_option("-m elf_x86_64");
        assert_eq!(x86.cc_command(), "zig cc -target x86_64-linux-musl -mno-sse");
        assert_eq!(x86.ld_command(), "zig ld.lld -m elf_x86_64");
        assert_eq!(x86.artifact_name(), "x86-busybox");
    }

    #[test]
    fn blank_options_are_dropped() {
        let desc = ArchitectureDescriptor::new("arm", "arm-linux-musleabi").with_arch_option("  ");
        assert_eq!(desc.arch_option(), None);
    }

    #[test]
    fn names_are_single_components() {
        assert!(validate_name("riscv64").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("result").is_err());
        assert!(validate_name("zig").is_err());
    }

    #[test]
    fn archive_file_name_comes_from_url() {
        let archive = RemoteArchive::new(
            "https://busybox.net/downloads/busybox-1.37.0.tar.bz2",
            "busybox-1.37.0",
        );
        assert_eq!(archive.file_name(), "busybox-1.37.0.tar.bz2");
    }

    #[test]
    fn unpacked_dir_follows_file_name() {
        let zig = RemoteArchive::from_url(
            "https://ziglang.org/builds/zig-x86_64-linux-0.16.0-dev.1912+0cbaaa5eb.tar.xz",
        );
        assert_eq!(zig.unpacked_dir, "zig-x86_64-linux-0.16.0-dev.1912+0cbaaa5eb");

        let bb = RemoteArchive::from_url("https://busybox.net/downloads/busybox-1.36.1.tar.bz2");
        assert_eq!(bb.unpacked_dir, "busybox-1.36.1");
    }

    #[test]
    fn sha256_parsing() {
        let hex = "00".repeat(32);
        assert_eq!(parse_sha256(&hex), Ok([0u8; 32]));
        assert!(parse_sha256("abcd").is_err());
        assert!(parse_sha256("zz").is_err());
    }
}
