//! bugcast agent
//!
//! Records the screen and the network activity of this process for a bug report
//! until Ctrl+C or a time limit, then saves both artifacts and optionally uploads
//! them to the configured URL.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use bugcast::capture::{FfmpegDevices, FfmpegSettings};
use bugcast::logging::init_logging;
use bugcast::network::{HttpListener, RecordingClient};
use bugcast::upload::HttpUploader;
use bugcast::{BugReportSession, Config, SessionState, UploadCallbacks, UploadReport};

/// Interval between probe requests
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for ffmpeg to finalize the video
const VIDEO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    audio: bool,
    duration: Option<Duration>,
    name: Option<String>,
    upload: bool,
    probe: Option<String>,
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(cli) = parse_args(&args)? else {
        print_help();
        return Ok(());
    };

    let _log_guard = init_logging()?;
    info!("bugcast agent starting...");

    let mut config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path());
    if cli.audio {
        config.recording.audio_enabled = true;
    }

    let runtime = tokio::runtime::Runtime::new()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping recording...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to install Ctrl+C handler")?;

    runtime.block_on(run(config, cli, shutdown_rx))
}

async fn run(config: Config, cli: CliArgs, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let out_dir = cli.out.clone().unwrap_or_else(|| config.download_dir());
    let listener = HttpListener::global();
    let devices = Arc::new(FfmpegDevices::new(FfmpegSettings::from_config(&config.capture)));
    let mut session = BugReportSession::new(&config, Arc::new(listener.clone()), devices);

    let mut status_rx = session.subscribe();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => debug!("Session event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    session.start().await;
    if !session.screen().is_recording() {
        warn!("Screen is not being recorded; only network activity will be captured");
    }

    let probe = cli
        .probe
        .clone()
        .map(|url| tokio::spawn(poll_probe(RecordingClient::new(listener.clone()), url)));

    match cli.duration {
        Some(limit) => info!("Recording for {}s (Ctrl+C stops early)", limit.as_secs()),
        None => info!("Recording... press Ctrl+C to stop"),
    }

    let time_limit = async {
        match cli.duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = shutdown_rx.wait_for(|stop| *stop) => {}
        _ = time_limit => info!("Recording time limit reached"),
    }

    if let Some(probe) = probe {
        probe.abort();
    }

    let name = cli.name.as_deref();
    if let Err(e) = session.stop(name, name) {
        error!("Failed to stop recording cleanly: {}", e);
    }

    match tokio::time::timeout(VIDEO_TIMEOUT, session.wait_until_ready()).await {
        Ok(Ok(video)) => info!("Video ready: {} ({} bytes)", video.file_name(), video.len()),
        Ok(Err(e)) => warn!("{}", e),
        Err(_) => warn!("Timed out waiting for the video after {:?}", VIDEO_TIMEOUT),
    }

    let saved = session.download_all(&out_dir).await;
    if saved.is_empty() {
        warn!("Nothing was recorded");
    }
    for path in &saved {
        println!("{}", path.display());
    }

    if cli.upload {
        match HttpUploader::from_config(&config) {
            Some(uploader) => {
                let hook = |report: &UploadReport<bool, bool>| -> Result<()> {
                    info!(
                        "Upload finished (video: {:?}, requests: {:?})",
                        report.video, report.network
                    );
                    Ok(())
                };
                session
                    .upload_all(
                        UploadCallbacks::new(Some(&uploader), Some(&uploader)),
                        Some(&hook),
                    )
                    .await?;
            }
            None => warn!("--upload given but upload.upload_url is not configured"),
        }
    }

    if session.state() != SessionState::Idle {
        session.teardown();
    }

    info!("bugcast agent stopped");
    Ok(())
}

/// Request `url` periodically through the recording client
async fn poll_probe(client: RecordingClient, url: String) {
    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    loop {
        interval.tick().await;
        match client.get(&url).await {
            Ok(response) => debug!("Probe {} -> {}", url, response.status),
            Err(e) => warn!("Probe {} failed: {}", url, e),
        }
    }
}

/// Parse arguments; `None` means help was requested
fn parse_args(args: &[String]) -> Result<Option<CliArgs>> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--audio" | "-a" => cli.audio = true,
            "--upload" | "-u" => cli.upload = true,
            "--duration" | "-d" => {
                let value = iter.next().context("--duration needs a value")?;
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid duration: {}", value))?;
                cli.duration = Some(Duration::from_secs(secs));
            }
            "--name" | "-n" => {
                cli.name = Some(iter.next().context("--name needs a value")?.clone());
            }
            "--probe" => {
                cli.probe = Some(iter.next().context("--probe needs a URL")?.clone());
            }
            "--out" | "-o" => {
                cli.out = Some(PathBuf::from(iter.next().context("--out needs a directory")?));
            }
            other => bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(Some(cli))
}

fn print_help() {
    println!("bugcast - record network activity and the screen for a bug report");
    println!();
    println!("USAGE:");
    println!("    bugcast [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -a, --audio            Record the microphone with the screen");
    println!("    -d, --duration SECS    Stop automatically after SECS seconds");
    println!("    -n, --name NAME        File name (without extension) for both artifacts");
    println!("    -u, --upload           Upload artifacts to upload.upload_url");
    println!("        --probe URL        Request URL every 2s so it shows up in the log");
    println!("    -o, --out DIR          Download directory (default: output.download_dir)");
    println!("    -h, --help             Print help information");
    println!();
    println!("Recording stops on Ctrl+C or when the duration elapses.");
    println!("Logs are written to $BUGCAST_LOG_PATH or the platform log directory.");
}
