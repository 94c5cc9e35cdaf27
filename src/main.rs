use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use pyro_envdev::api::{ApiClient, SequenceApi};
use pyro_envdev::config::{self, Config};
use pyro_envdev::downloader::{DownloadOptions, SequenceDownloader, SequenceOutcome};
use pyro_envdev::utils::{self, Bbox, DEFAULT_CONFIDENCE, DEFAULT_JITTER_RATIO};
use pyro_envdev::{dataset, ledger};
use std::collections::HashSet;
use std::path::PathBuf;

/// Development tooling for the wildfire alert platform
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(long, global = true, env = "PYRO_ENVDEV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download sequences and record their cameras in the ledger
    Download {
        /// Sequence ids to download
        #[arg(required = true)]
        sequence_ids: Vec<i64>,
        /// Directory receiving one folder per sequence
        #[arg(long)]
        target_dir: Option<PathBuf>,
        /// Camera ledger CSV
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Detections fetched per sequence
        #[arg(long)]
        limit: Option<u32>,
        /// Newest detections first
        #[arg(long, default_value_t = false)]
        desc: bool,
        /// Download sequences whose folder already exists
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Add cameras to the ledger without downloading anything
    SyncLedger {
        #[arg(required = true)]
        camera_ids: Vec<i64>,
        /// Camera ledger CSV
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Download and extract the sample dataset
    FetchSamples,
    /// Print the boxes of a prediction file
    Predictions { file: PathBuf },
    /// Print a jittered synthetic box for a detection azimuth
    Jitter {
        #[arg(long, allow_negative_numbers = true)]
        azimuth: f64,
        #[arg(long, allow_negative_numbers = true)]
        center: f64,
        #[arg(long)]
        fov: f64,
        #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
        conf: f64,
        #[arg(long, default_value_t = DEFAULT_JITTER_RATIO)]
        jitter_ratio: f64,
    },
    /// Issue a streaming token for a camera
    CameraToken { camera_id: i64 },
}

async fn run_app(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Download {
            sequence_ids,
            target_dir,
            ledger,
            limit,
            desc,
            force,
        } => {
            let target_dir = target_dir.unwrap_or_else(|| config.download.target_dir.clone());
            let ledger_path = ledger.unwrap_or_else(|| config.download.ledger_path.clone());
            let mut options = DownloadOptions::from(&config.download);
            if let Some(limit) = limit {
                options.limit = limit;
            }
            options.descending |= desc;
            options.force |= force;

            let client = ApiClient::connect(&config.api).await?;
            let cameras = client.fetch_cameras().await?;
            info!("{} cameras known to the API", cameras.len());

            let http = client.http().clone();
            let downloader = SequenceDownloader::new(client, http, options);
            let report = downloader
                .download_sequences(&sequence_ids, &target_dir, &cameras, &ledger_path)
                .await?;

            for (sequence_id, outcome) in &report.outcomes {
                match outcome {
                    SequenceOutcome::Downloaded {
                        folder,
                        images_written,
                        images_failed,
                        ..
                    } => println!(
                        "{}\tdownloaded\t{}\t{} images, {} failed",
                        sequence_id,
                        folder.display(),
                        images_written,
                        images_failed
                    ),
                    SequenceOutcome::AlreadyPresent { folder } => {
                        println!("{}\tpresent\t{}", sequence_id, folder.display())
                    }
                    SequenceOutcome::Failed { reason } => {
                        println!("{}\tfailed\t{}", sequence_id, reason)
                    }
                }
            }
            if let Some(outcome) = &report.ledger {
                println!(
                    "ledger: {} cameras added, {} unknown",
                    outcome.inserted_count(),
                    outcome.missing().len()
                );
            }
        }
        Command::SyncLedger { camera_ids, ledger } => {
            let ledger_path = ledger.unwrap_or_else(|| config.download.ledger_path.clone());
            let client = ApiClient::connect(&config.api).await?;
            let cameras = client.fetch_cameras().await?;

            let used: HashSet<i64> = camera_ids.into_iter().collect();
            let outcome = ledger::reconcile(&used, &cameras, &ledger_path)?;
            println!(
                "{}: {} cameras added, {} unknown",
                ledger_path.display(),
                outcome.inserted_count(),
                outcome.missing().len()
            );
        }
        Command::FetchSamples => {
            let http = reqwest::Client::new();
            let dir = dataset::fetch_sample_dataset(&http, &config.dataset).await?;
            println!("{}", dir.display());
        }
        Command::Predictions { file } => {
            let boxes = utils::read_pred_file(&file);
            if boxes.is_empty() {
                warn!("No predictions in {}", file.display());
            }
            for Bbox {
                x_min,
                y_min,
                x_max,
                y_max,
                confidence,
            } in boxes
            {
                println!("{} {} {} {} {}", x_min, y_min, x_max, y_max, confidence);
            }
        }
        Command::Jitter {
            azimuth,
            center,
            fov,
            conf,
            jitter_ratio,
        } => {
            let bbox = utils::generate_bbox_with_jitter(azimuth, center, fov, conf, jitter_ratio);
            println!("{}", utils::format_bbox_payload(&[bbox]));
        }
        Command::CameraToken { camera_id } => {
            let client = ApiClient::connect(&config.api).await?;
            println!("{}", client.camera_token(camera_id).await?);
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref()).and_then(|mut config| {
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    // Create a tokio runtime in the current thread
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app(cli, config)) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
