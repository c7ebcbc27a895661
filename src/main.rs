use crate::definition::store::DescriptorStore;
use crate::definition::{parse_sha256, RemoteArchive};
use crate::engine::{Engine, EngineSettings, Parallelism};
use clap::Parser;
use miette::IntoDiagnostic;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod definition;
mod engine;
mod utils;

/// Cross-compile busybox for many architectures with a single zig toolchain.
#[derive(Parser, Debug)]
#[command(name = "zigbox", version, about)]
struct Cli {
    /// Architectures to build. Defaults to every config in --arch-dir.
    #[arg(long = "arch", value_name = "NAME", num_args = 1..)]
    arch_list: Option<Vec<String>>,

    /// Directory holding `<name>.json5` architecture configs
    #[arg(long, env = "ZIGBOX_ARCH_DIR", default_value = "arch_info")]
    arch_dir: PathBuf,

    /// Build workspace
    #[arg(long, env = "ZIGBOX_WORKSPACE", default_value = "build-dir")]
    workspace: PathBuf,

    /// Directory of `*.diff` files applied to freshly unpacked sources
    #[arg(long, env = "ZIGBOX_PATCH_DIR", default_value = "patch")]
    patch_dir: PathBuf,

    #[arg(long, env = "ZIGBOX_BUSYBOX_URL")]
    busybox_url: Option<String>,

    /// Expected SHA-256 of the busybox archive, hex encoded
    #[arg(long, env = "ZIGBOX_BUSYBOX_SHA256", value_parser = parse_sha256)]
    busybox_sha256: Option<[u8; 32]>,

    #[arg(long, env = "ZIGBOX_ZIG_URL")]
    zig_url: Option<String>,

    /// Expected SHA-256 of the zig archive, hex encoded
    #[arg(long, env = "ZIGBOX_ZIG_SHA256", value_parser = parse_sha256)]
    zig_sha256: Option<[u8; 32]>,

    /// Concurrent builds: `unbounded`, `auto` (one per cpu) or a number
    #[arg(long, env = "ZIGBOX_MAX_PARALLEL", default_value = "unbounded")]
    max_parallel: Parallelism,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> miette::Result<EngineSettings> {
        let cwd = std::env::current_dir().into_diagnostic()?;
        let mut settings = EngineSettings::new(absolute(&cwd, &self.workspace));

        if let Some(url) = &self.busybox_url {
            settings.source = RemoteArchive::from_url(url.as_str());
        }
        settings.source = settings.source.with_sha256(self.busybox_sha256);

        if let Some(url) = &self.zig_url {
            settings.toolchain = RemoteArchive::from_url(url.as_str());
        }
        settings.toolchain = settings.toolchain.with_sha256(self.zig_sha256);

        settings.patch_dir = absolute(&cwd, &self.patch_dir);
        settings.parallelism = self.max_parallel;

        Ok(settings)
    }
}

/// make runs inside the source tree, so every path handed to it must be absolute.
fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "zigbox=debug" } else { "zigbox=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = DescriptorStore::new(&cli.arch_dir);
    let descriptors = store.load(cli.arch_list.as_deref()).await?;
    if descriptors.is_empty() {
        warn!("no architecture configs found in {}", store.dir().display());
    }
    for descriptor in &descriptors {
        info!("selected {}", descriptor);
    }

    let engine = Engine::new(cli.settings()?);
    info!("workspace: {}", engine.settings.workspace.root().display());

    let report = engine.run(&descriptors).await?;
    if report.is_success() {
        info!("all requested architectures are in {}", engine.settings.workspace.results_dir().display());
    }
    report.into_result()?;

    Ok(())
}
