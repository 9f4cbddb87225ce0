//! 🪺 NEST - hosted engine setup console.

use anyhow::{bail, Context};
use clap::Parser;
use nest_core::download::{self, DownloadRequest, TransferStatus};
use nest_core::engine_config::{self, BootMode};
use nest_core::ha_status::{self, CommandHaClient};
use nest_core::vm_conf;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub mod cli;
pub mod setup;
pub mod tui;

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    nest_core::logging::init(cli.log_file.clone());

    match &cli.command {
        // No subcommand = launch the console page (default)
        None => {
            log::info!("🪺 Launching hosted engine setup page...");
            let status_line = engine_status_line(&cli.vm_conf);
            match tui::run(&cli, status_line)? {
                tui::PageOutcome::RunSetup(answers) => setup::launch(&answers),
                tui::PageOutcome::Quit => Ok(()),
            }
        }
        Some(cli::Command::Status) => {
            if !vm_conf::is_configured(&cli.vm_conf) {
                println!("Hosted engine not configured");
                return Ok(());
            }
            let status = ha_status::engine_status(&CommandHaClient::new())
                .context("engine HA status query failed")?;
            println!("{}", status);
            Ok(())
        }
        Some(cli::Command::Configure { pxe, image }) => {
            run_configure(&cli, *pxe, image.as_deref())
        }
    }
}

fn engine_status_line(vm_conf_path: &Path) -> String {
    if !vm_conf::is_configured(vm_conf_path) {
        return "Hosted engine not configured".to_string();
    }
    match ha_status::engine_status(&CommandHaClient::new()) {
        Ok(status) => status.to_string(),
        Err(err) => {
            log::warn!("engine HA status query failed: {:?}", err);
            err.to_string()
        }
    }
}

/// Scripting-mode twin of the page's Setup action: same validation and
/// download path, progress in the log instead of a gauge.
fn run_configure(cli: &cli::Cli, pxe: bool, image: Option<&str>) -> anyhow::Result<()> {
    let answers = cli.answers_path();

    if pxe {
        engine_config::write_answers(&answers, &BootMode::Pxe)?;
        log::info!("Answer file written to {}", answers.display());
        return Ok(());
    }

    let image = image.context("--image or --pxe is required")?;
    let local = Path::new(image);
    if local.exists() {
        let mode = engine_config::classify_image(local)?;
        engine_config::write_answers(&answers, &mode)?;
        log::info!("Answer file written to {}", answers.display());
        return Ok(());
    }

    fs::create_dir_all(&cli.setup_dir)
        .with_context(|| format!("Failed to create setup dir {}", cli.setup_dir.display()))?;

    let target = download::target_path(image, &cli.setup_dir)?;
    if target.exists() {
        // Already downloaded earlier; reuse it without another transfer.
        let mode = engine_config::classify_image(&target)?;
        engine_config::write_answers(&answers, &mode)?;
        log::info!("Answer file written to {}", answers.display());
        return Ok(());
    }

    log::info!("⬇️ Downloading {} to {}", image, cli.setup_dir.display());
    let request = DownloadRequest::new(image.to_string(), cli.setup_dir.clone(), answers.clone());
    let (progress_tx, progress_rx) = mpsc::channel();
    let (completion_tx, completion_rx) = mpsc::channel();
    let handle = download::spawn(request, progress_tx, completion_tx);

    let mut failure = None;
    let mut last_log: Option<Instant> = None;
    for snapshot in progress_rx {
        match snapshot.status {
            TransferStatus::InProgress => {
                // Log at most every 250 ms to keep the log readable.
                let due = last_log
                    .map(|at| at.elapsed() >= Duration::from_millis(250))
                    .unwrap_or(true);
                if due {
                    let rate = download::format_rate(snapshot.speed_bytes_per_sec);
                    match snapshot.percent() {
                        Some(percent) => log::info!("⬇️ {}% ({})", percent, rate),
                        None => log::info!(
                            "⬇️ {} ({})",
                            download::format_bytes(snapshot.bytes_downloaded),
                            rate
                        ),
                    }
                    last_log = Some(Instant::now());
                }
            }
            TransferStatus::Failed => failure = snapshot.last_error.clone(),
            _ => {}
        }
    }
    handle.join();

    match completion_rx.try_recv() {
        Ok(downloaded) => {
            log::info!("✅ Engine image stored at {}", downloaded.path.display());
            log::info!("Answer file written to {}", answers.display());
            Ok(())
        }
        Err(_) => bail!(failure.unwrap_or_else(|| "download failed".to_string())),
    }
}
