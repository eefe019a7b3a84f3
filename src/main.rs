//! fieldtrack - command-line driver for the capture and delivery pipeline.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use fieldtrack::config::{AppConfig, DEFAULT_CONFIG_PATH, TOKEN_ENV};
use fieldtrack::error::AppError;
use fieldtrack::models::{PhotoItem, Position};
use fieldtrack::services::distance::{distance, distance_between};
use fieldtrack::services::{
    geotag, BackgroundSync, CaptureService, CredentialStore, PositionSampler, ReplayProvider,
    SqliteKeyValueStore, StaticCredentials, StoredCredentials, SubmitOutcome, SyncProgress,
    UploadQueue, Uplink,
};

#[derive(Parser)]
#[command(name = "fieldtrack")]
#[command(about = "Report positions and photo evidence to the collector", long_about = None)]
struct Args {
    /// Configuration file (defaults are used if it does not exist)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Great-circle distance between two coordinates in meters
    #[command(allow_negative_numbers = true)]
    Distance {
        lat1: f64,
        lng1: f64,
        lat2: f64,
        lng2: f64,
    },
    /// Upload photos; failed transfers are queued for retry
    Upload {
        /// Image files to upload, sent one after the other
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        session: String,
        #[arg(long)]
        route: String,
        /// Uploading user (defaults to the configured worker id)
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Geotag the photos with the first point of a recorded track
        #[arg(long)]
        track: Option<PathBuf>,
    },
    /// Retry every queued upload once
    Drain,
    /// List queued uploads
    Queue,
    /// Remove queued uploads without delivering them
    Drop {
        #[arg(required_unless_present = "all")]
        id: Option<Uuid>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Store the collector token
    Login {
        #[arg(required_unless_present = "clear")]
        token: Option<String>,
        /// Forget the stored token
        #[arg(long, conflicts_with = "token")]
        clear: bool,
    },
    /// Replay a recorded track and push every position to the collector
    Track {
        /// JSON-lines file with one {"lat", "lng", "accuracy"} object per line
        file: PathBuf,
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
    /// Drain the queue periodically until interrupted
    Sync,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match AppConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error creating runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args.command, config)) {
        log::debug!("Command failed: {:?}", e);
        eprintln!("Error: {}", e.user_message());
        process::exit(1);
    }
}

async fn run(command: Command, config: AppConfig) -> Result<(), AppError> {
    match command {
        Command::Distance {
            lat1,
            lng1,
            lat2,
            lng2,
        } => {
            println!("{:.2} m", distance_between(lat1, lng1, lat2, lng2));
            Ok(())
        }
        Command::Upload {
            files,
            session,
            route,
            user,
            description,
            track,
        } => {
            upload(
                &config,
                files,
                UploadArgs {
                    session,
                    route,
                    user,
                    description,
                    track,
                },
            )
            .await
        }
        Command::Drain => {
            let service = capture_service(&config)?;
            let report = service.retry_pending().await?;
            println!(
                "Delivered {}, failed {}, remaining {}",
                report.delivered, report.failed, report.remaining
            );
            Ok(())
        }
        Command::Queue => list_queue(&config).await,
        Command::Drop { id, all } => {
            let queue = open_queue(&config)?;
            if all {
                println!("Dropped {} queued photos", queue.clear().await?);
            } else if let Some(id) = id {
                if queue.remove(id).await? {
                    println!("Dropped {}", id);
                } else {
                    return Err(AppError::InvalidInput(format!("No queued photo {}", id)));
                }
            }
            Ok(())
        }
        Command::Login { token, clear } => {
            let credentials = StoredCredentials::new(open_store(&config)?);
            if clear {
                credentials.clear()?;
                println!("Token removed");
            } else if let Some(token) = token {
                credentials.save_token(token.trim())?;
                println!("Token saved");
            }
            Ok(())
        }
        Command::Track { file, interval_ms } => track(&config, &file, interval_ms).await,
        Command::Sync => sync(&config).await,
    }
}

struct UploadArgs {
    session: String,
    route: String,
    user: Option<String>,
    description: Option<String>,
    track: Option<PathBuf>,
}

async fn upload(config: &AppConfig, files: Vec<PathBuf>, args: UploadArgs) -> Result<(), AppError> {
    let user = match args.user {
        Some(user) => user,
        None => config.require_worker_id()?.to_string(),
    };

    let sampler = match &args.track {
        Some(path) => Some(PositionSampler::new(ReplayProvider::from_file(
            path,
            Duration::from_millis(100),
        )?)),
        None => None,
    };

    let mut items = Vec::with_capacity(files.len());
    for path in &files {
        let mut item = PhotoItem::from_file(path, &args.session, &args.route, &user)?;
        if let Some(description) = &args.description {
            item = item.with_description(description.clone());
        }
        if let Some(sampler) = &sampler {
            item = geotag(item, sampler, &config.sampler).await;
        }
        items.push(item);
    }

    let service = capture_service(config)?;
    let results = service
        .submit_photos(items, |progress| {
            if progress.current > 0 {
                log::info!("Upload progress: {}/{}", progress.current, progress.total);
            }
        })
        .await;

    for (path, result) in files.iter().zip(results) {
        match result? {
            SubmitOutcome::Delivered(uploaded) => {
                println!("{}: uploaded as {} ({})", path.display(), uploaded.photo_id, uploaded.url)
            }
            SubmitOutcome::Queued { id, reason } => {
                println!("{}: queued as {} ({})", path.display(), id, reason)
            }
            SubmitOutcome::Rejected(failure) => {
                println!("{}: rejected ({})", path.display(), failure)
            }
        }
    }
    Ok(())
}

async fn list_queue(config: &AppConfig) -> Result<(), AppError> {
    let entries = open_queue(config)?.entries().await?;
    if entries.is_empty() {
        println!("No pending uploads");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {}  queued {}  attempts {}{}",
            entry.id(),
            entry.status().as_str(),
            entry.queued_at.format("%Y-%m-%d %H:%M:%S"),
            entry.attempt_count,
            entry
                .last_error
                .as_deref()
                .map(|e| format!("  last error: {}", e))
                .unwrap_or_default()
        );
    }
    println!("{} pending", entries.len());
    Ok(())
}

#[derive(Default)]
struct TrackStats {
    last: Option<Position>,
    samples: usize,
    meters: f64,
}

async fn track(config: &AppConfig, file: &Path, interval_ms: u64) -> Result<(), AppError> {
    let worker_id = config.require_worker_id()?.to_string();
    let provider = ReplayProvider::from_file(file, Duration::from_millis(interval_ms))?;
    let sampler =
        PositionSampler::new(provider).with_forwarder(worker_id, Arc::new(build_uplink(config)?));

    let stats = Arc::new(Mutex::new(TrackStats::default()));
    let sink = stats.clone();
    let handle = sampler.start(
        config.sampler,
        move |position| {
            if let Ok(mut stats) = sink.lock() {
                if let Some(last) = &stats.last {
                    stats.meters += distance(last, &position);
                }
                stats.samples += 1;
                println!(
                    "{:.6}, {:.6} (±{:.0} m)  total {:.1} m",
                    position.lat, position.lng, position.accuracy, stats.meters
                );
                stats.last = Some(position);
            }
        },
        |e| eprintln!("Location error: {}", e),
    );

    tokio::select! {
        _ = handle.finished() => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping location watch");
            handle.stop();
        }
    }

    // let in-flight position pushes settle
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Ok(stats) = stats.lock() {
        println!("{} samples, {:.1} m travelled", stats.samples, stats.meters);
    }
    Ok(())
}

async fn sync(config: &AppConfig) -> Result<(), AppError> {
    let service = Arc::new(capture_service(config)?);
    let sync = BackgroundSync::new();
    let mut progress = sync.subscribe();

    sync.start(service, config.drain_interval());

    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*progress.borrow_and_update() {
                    SyncProgress::Draining { pending } if *pending > 0 => {
                        println!("Draining {} queued photos", pending)
                    }
                    SyncProgress::Finished(report) if report.delivered + report.failed > 0 => {
                        println!(
                            "Delivered {}, failed {}, remaining {}",
                            report.delivered, report.failed, report.remaining
                        )
                    }
                    SyncProgress::Failed(e) => eprintln!("Drain failed: {}", e),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                sync.stop();
                break;
            }
        }
    }

    sync.join().await;
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<SqliteKeyValueStore, AppError> {
    SqliteKeyValueStore::open(&config.storage.database_path)
}

fn open_queue(config: &AppConfig) -> Result<UploadQueue, AppError> {
    Ok(UploadQueue::new(open_store(config)?))
}

fn credentials(config: &AppConfig) -> Result<Arc<dyn CredentialStore>, AppError> {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            log::debug!("Using collector token from {}", TOKEN_ENV);
            Ok(Arc::new(StaticCredentials::new(token.trim())))
        }
        _ => Ok(Arc::new(StoredCredentials::new(open_store(config)?))),
    }
}

fn build_uplink(config: &AppConfig) -> Result<Uplink, AppError> {
    Ok(Uplink::new(config.uplink_config(), credentials(config)?)?)
}

fn capture_service(config: &AppConfig) -> Result<CaptureService<Uplink>, AppError> {
    Ok(CaptureService::new(
        build_uplink(config)?,
        Arc::new(open_queue(config)?),
    ))
}
