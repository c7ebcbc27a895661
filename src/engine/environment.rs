use crate::engine::EngineSettings;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// A fully described external command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, OsString)>,
}

#[cfg(test)]
impl Invocation {
    /// Value of a `KEY=value` argument, as passed to make.
    pub fn make_var(&self, key: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| {
            arg.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|x| x == arg)
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Exit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl Exit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes invocations and reports how they exited.
#[async_trait]
pub trait Runner: Send + Sync + Debug {
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit>;
}

/// Spawns real child processes, inheriting stdio.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl Runner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit> {
        info!("run {}", invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.current_dir(&invocation.cwd);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut proc = cmd.spawn()?;
        let ec = proc.wait().await?;
        Ok(Exit { code: ec.code() })
    }
}

#[derive(Debug)]
pub struct Environment {
    settings: Arc<EngineSettings>,
    runner: Arc<dyn Runner>,
    search_path: Option<OsString>,
}

impl Environment {
    pub fn new(settings: Arc<EngineSettings>, runner: Arc<dyn Runner>) -> Self {
        let search_path = toolchain_search_path(&settings.workspace.toolchain_root());
        Environment {
            settings,
            runner,
            search_path,
        }
    }

    /// Builds a command running in `cwd` with the toolchain first on `PATH`.
    pub fn command(&self, cwd: &Path, name: &str, args: &[&str]) -> Invocation {
        let mut env = vec![];
        if let Some(path) = &self.search_path {
            env.push(("PATH".to_string(), path.clone()));
        }

        Invocation {
            program: name.to_string(),
            args: args.iter().map(|x| x.to_string()).collect(),
            cwd: cwd.to_path_buf(),
            env,
        }
    }

    /// `make O=<build_dir> ...` inside the source tree.
    pub fn make(&self, build_dir: &Path, args: &[&str]) -> Invocation {
        let out = format!("O={}", build_dir.display());
        let mut make_args: Vec<&str> = vec![out.as_str()];
        make_args.extend_from_slice(args);

        self.command(&self.settings.workspace.source_root(), "make", &make_args)
    }

    /// Applies one unified diff to the source tree.
    pub fn patch(&self, patch_file: &Path) -> Invocation {
        let file = patch_file.to_string_lossy();
        self.command(
            &self.settings.workspace.source_root(),
            "patch",
            &["-p1", "-i", file.as_ref()],
        )
    }

    pub async fn run(&self, invocation: &Invocation) -> io::Result<Exit> {
        self.runner.run(invocation).await
    }
}

fn toolchain_search_path(toolchain: &Path) -> Option<OsString> {
    let mut paths = vec![toolchain.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }

    match std::env::join_paths(paths) {
        Ok(joined) => Some(joined),
        Err(e) => {
            warn!(
                "cannot put {} on PATH ({}), relying on the inherited PATH",
                toolchain.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeRunner;

    fn environment() -> Environment {
        let settings = Arc::new(EngineSettings::new("/ws"));
        Environment::new(settings, Arc::new(FakeRunner::default()))
    }

    #[test]
    fn make_runs_in_source_tree_with_out_dir() {
        let env = environment();
        let inv = env.make(Path::new("/ws/arm64"), &["defconfig"]);

        assert_eq!(inv.program, "make");
        assert_eq!(inv.cwd, Path::new("/ws/busybox-src"));
        assert_eq!(inv.args, ["O=/ws/arm64", "defconfig"]);
        assert_eq!(inv.make_var("O"), Some("/ws/arm64"));
    }

    #[test]
    fn toolchain_leads_path() {
        let env = environment();
        let inv = env.command(Path::new("/"), "zig", &["version"]);
        let (_, path) = inv.env.iter().find(|(k, _)| k == "PATH").unwrap();
        let first = std::env::split_paths(path).next().unwrap();
        assert_eq!(first, Path::new("/ws/zig"));
    }

    #[test]
    fn patch_applies_with_strip_one() {
        let env = environment();
        let inv = env.patch(Path::new("/patches/01-tc.diff"));
        assert_eq!(inv.program, "patch");
        assert_eq!(inv.args, ["-p1", "-i", "/patches/01-tc.diff"]);
    }

    #[test]
    fn display_quotes_spaced_args() {
        let env = environment();
        let inv = env.make(Path::new("/ws/x86"), &["CC=zig cc -target x86_64-linux-musl", "-j"]);
        assert_eq!(
            inv.to_string(),
            "make O=/ws/x86 'CC=zig cc -target x86_64-linux-musl' -j"
        );
    }
}
