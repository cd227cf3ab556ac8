use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use capture_core::{CaptureConfig, CaptureLoop, DeviceBackend};
use clap::Parser;
use shared::domain::ImageRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transfer_core::{HttpSwapApi, TransferManager};
use workflow::{load_settings, WorkflowRuntime, WorkflowState};

mod commands;
mod render;
mod synthetic;

use commands::Command;

#[derive(Parser, Debug)]
#[command(
    about = "Headless face-swap workflow driven from the terminal",
    long_about = "Headless face-swap workflow driven from the terminal.\n\n\
        This binary ships no hardware camera backend. Without --synthetic-camera \
        no device is found and only the two-image swap flow runs."
)]
struct Args {
    /// Settings file; defaults to ./swapface.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Swap service base URL, overriding file and environment.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    fps: Option<u32>,
    /// Use a generated camera that always shows one face. This is the only
    /// way to run the camera flow from this binary.
    #[arg(long)]
    synthetic_camera: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    settings.validate().context("invalid command line settings")?;
    let api_url = settings.api_url()?;
    info!(api_url = %api_url, synthetic_camera = args.synthetic_camera, "starting swapface");

    let registry = ImageRegistry::new();
    let transfers = TransferManager::new(Arc::new(HttpSwapApi::new(api_url.as_str())), registry);
    let capture = capture_loop(settings.capture_config(), args.synthetic_camera);

    let (runtime, handle) = WorkflowRuntime::new(settings.workflow_config(), transfers, capture);
    let mut run = tokio::spawn(runtime.run());

    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            println!("{}", render::describe(&snapshot));
            if snapshot.state == WorkflowState::Terminated || snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle.shutdown();
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => {
                        handle.shutdown();
                        break;
                    }
                    Ok(command) => {
                        command.send(&handle);
                    }
                    Err(err) => warn!("{err}"),
                }
            }
            finished = &mut run => {
                printer.abort();
                return finished.context("workflow task panicked")?;
            }
        }
    }

    let finished = run.await.context("workflow task panicked")?;
    printer.abort();
    finished
}

/// Without the synthetic camera there is no backend, so detection always
/// resolves to "no device" and the detector is never loaded.
fn capture_loop(config: CaptureConfig, synthetic_camera: bool) -> CaptureLoop {
    let backends: Vec<Arc<dyn DeviceBackend>> = if synthetic_camera {
        vec![Arc::new(synthetic::SyntheticBackend)]
    } else {
        Vec::new()
    };
    CaptureLoop::new(
        config,
        backends,
        Arc::new(synthetic::SyntheticDetectors),
        Arc::new(synthetic::EmbeddedClassifier),
    )
}
