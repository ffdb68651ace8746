//! Kmod RPC Server - varlink service publishing kernel module information.
//!
//! Answers `org.kernel.kmod.List` and `org.kernel.kmod.Info` on a single
//! address until SIGINT or SIGTERM.

mod activation;
mod handler;
mod reactor;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use handler::KmodDispatch;
use kmod_core::ipc::{VarlinkAddress, VarlinkService};
use kmod_core::{KernelProvider, ProviderPaths};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "kmod-rpc")]
#[command(about = "Varlink service publishing kernel module information")]
struct Args {
    /// Address to listen on, e.g. unix:/run/org.kernel.kmod
    address: Option<String>,

    /// Filesystem root holding proc, sys and lib/modules
    #[arg(long, default_value = "/")]
    root: PathBuf,

    /// Kernel release to read modules for (defaults to the running kernel)
    #[arg(long)]
    kernel_release: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let Some(address) = args.address.as_deref() else {
        eprintln!("Error: missing address.");
        return ExitCode::FAILURE;
    };

    match run(&args, address) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, address: &str) -> Result<()> {
    let address: VarlinkAddress = address.parse()?;

    let paths = match &args.kernel_release {
        Some(release) => ProviderPaths::for_release(&args.root, release),
        None => ProviderPaths::detect(&args.root).context("Failed to detect kernel release")?,
    };
    let provider = KernelProvider::new(paths);

    // Before the runtime exists, so no thread can catch the signals.
    let mask = signals::block_termination_signals().context("Failed to block signals")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(async move {
        let signal_channel =
            signals::SignalChannel::new(&mask).context("Failed to create signal descriptor")?;
        let dispatch = Arc::new(KmodDispatch::new(provider));

        let service = match activation::inherited_listener() {
            Some(fd) => VarlinkService::from_listener_fd(&address, fd, dispatch)?,
            None => VarlinkService::bind(&address, dispatch)
                .await
                .with_context(|| format!("Failed to listen on {}", address))?,
        };

        info!("Serving {} on {}", handler::INTERFACE.name, address);
        reactor::run(service, signal_channel).await
    })
}
