//! Process supervisor: loads config, merges it with persisted checkpoints,
//! wires the entry and progress-update queues, spawns one Puller per log
//! plus the Sink and progress-writer tasks, and drains everything in
//! dependency order on shutdown. Modeled on `automations::server::serve`'s
//! `tokio::select!`-driven run loop, split across several cooperating tasks
//! instead of one.

use crate::cancellation::Cancellation;
use crate::client::HttpCtLogClient;
use crate::config::{parse_config, Args, LogConfigLine};
use crate::parser::PassthroughParser;
use crate::progress::ProgressStore;
use crate::puller::{self, PullerConfig};
use crate::seen_set::SeenSet;
use crate::shard::ShardWriter;
use crate::sink::Sink;
use anyhow::Context;
use tokio::sync::mpsc;

/// Raises the process's open-file-descriptor limit to at least `min`: each
/// shard file and each pooled database connection holds one descriptor open
/// for the process lifetime, and the number of shards is unbounded.
#[cfg(unix)]
fn raise_fd_limit(min: u64) {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, fully-initialized `rlimit` the kernel only
    // ever reads from or overwrites in place.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        tracing::warn!("failed to read RLIMIT_NOFILE; leaving it unchanged");
        return;
    }
    if limit.rlim_cur >= min {
        return;
    }
    let target = if limit.rlim_max == libc::RLIM_INFINITY {
        min
    } else {
        min.min(limit.rlim_max)
    };
    limit.rlim_cur = target;
    // SAFETY: same as above; `limit` was just read back from the kernel.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        tracing::warn!(target, "failed to raise RLIMIT_NOFILE");
    } else {
        tracing::info!(target, "raised RLIMIT_NOFILE");
    }
}

#[cfg(not(unix))]
fn raise_fd_limit(_min: u64) {}

/// Waits for any of the shutdown signals treated as "stop cleanly": Ctrl-C,
/// SIGTERM, and SIGABRT. The process aborts mid-line during initialization
/// only; once running it drains.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut abrt =
        signal(SignalKind::from_raw(libc::SIGABRT)).expect("failed to install SIGABRT handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
        _ = abrt.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// The seen-set DSN used when neither `--seen-set-url` nor
/// `CTSYNC_SEEN_SET_URL` is given: `user=ctdownloader dbname=ctdownload`,
/// reached over the local Unix-socket path on Linux and over localhost
/// elsewhere — the same `runtime.GOOS` branch the original Go
/// implementation used to pick a connection string with no operator input.
#[cfg(target_os = "linux")]
fn default_seen_set_url() -> String {
    "postgres://ctdownloader@/ctdownload?host=/var/run/postgresql".to_string()
}

#[cfg(not(target_os = "linux"))]
fn default_seen_set_url() -> String {
    "postgres://ctdownloader@localhost/ctdownload".to_string()
}

/// Resolves the PostgreSQL seen-set URL: `--seen-set-url` or
/// `CTSYNC_SEEN_SET_URL` (clap's `env` attribute already folds the latter
/// into `Args::seen_set_url`) override the runtime-derived default; no
/// flag is required to start the process.
fn resolve_seen_set_url(args: &Args) -> String {
    args.seen_set_url
        .clone()
        .unwrap_or_else(default_seen_set_url)
}

/// Runs the full pipeline to completion: start to clean shutdown.
pub async fn run(args: Args) -> anyhow::Result<()> {
    raise_fd_limit(100_000);

    let config_contents = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading config file {}", args.config.display()))?;
    let logs: Vec<LogConfigLine> = parse_config(&config_contents)?;
    anyhow::ensure!(!logs.is_empty(), "config file {} has no logs", args.config.display());

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let progress = ProgressStore::open(&args.db)
        .await
        .with_context(|| format!("opening progress store {}", args.db.display()))?;

    let mut checkpoints = Vec::with_capacity(logs.len());
    for log in &logs {
        let checkpoint = progress
            .load_or_init(&log.name, &log.url, log.starting_index)
            .await
            .with_context(|| format!("loading checkpoint for log {}", log.name))?;
        checkpoints.push(checkpoint);
    }

    let seen_set_url = resolve_seen_set_url(&args);
    let seen_set = SeenSet::connect(&seen_set_url)
        .await
        .context("connecting to the seen-set database")?;

    let cancellation = Cancellation::new();

    // Entry queue: bounded at at-least-one-slot-per-log, so one Puller
    // backing off never starves the others of a queue slot.
    let (entry_tx, entry_rx) = mpsc::channel(logs.len().max(1));
    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<(String, i64)>();

    let sink_handle = tokio::spawn(run_sink(seen_set, args.output_dir.clone(), entry_rx));
    let progress_handle = tokio::spawn(run_progress_writer(progress, progress_rx));

    let mut puller_handles = Vec::with_capacity(logs.len());
    for (log, checkpoint) in logs.into_iter().zip(checkpoints.into_iter()) {
        let client = HttpCtLogClient::new(log.name.clone(), log.url.clone());
        let parser = PassthroughParser;
        let cfg = PullerConfig {
            name: log.name.clone(),
            batch_size: log.batch_size.max(1) as u64,
            parallel_fetch: args.fetchers.max(1),
            num_match: args.matchers.max(1),
        };
        let cancellation = cancellation.clone();
        let entry_tx = entry_tx.clone();
        let progress_tx = progress_tx.clone();
        let checkpoint = checkpoint.last_index.max(0) as u64;

        puller_handles.push(tokio::spawn(async move {
            puller::run(
                cfg,
                client,
                parser,
                cancellation,
                checkpoint,
                move |entry| {
                    let entry_tx = entry_tx.clone();
                    async move {
                        let _ = entry_tx.send(entry).await;
                    }
                },
                move |name, idx| {
                    let progress_tx = progress_tx.clone();
                    async move {
                        let _ = progress_tx.send((name, idx as i64));
                    }
                },
            )
            .await;
        }));
    }
    // The Sink and progress writer each hold one sender clone keyed off the
    // Puller loop above; drop the originals so the channels close once every
    // Puller has exited.
    drop(entry_tx);
    drop(progress_tx);

    let signal_cancellation = cancellation.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received; draining");
        signal_cancellation.set();
    });

    for handle in puller_handles {
        let _ = handle.await;
    }

    sink_handle.await.context("sink task panicked")??;
    progress_handle
        .await
        .context("progress writer task panicked")??;

    Ok(())
}

/// Owns the Sink for the process lifetime: the single consumer of the entry
/// queue. Flushes on a timer in addition to the size/time trigger inside
/// `Sink::offer`, so a log with a slow trickle of entries still lands on
/// disk within `FLUSH_INTERVAL`, and performs one final flush once the
/// queue closes.
async fn run_sink(
    seen_set: SeenSet,
    output_dir: std::path::PathBuf,
    mut entry_rx: mpsc::Receiver<crate::cert::LogEntry>,
) -> anyhow::Result<()> {
    let mut sink = Sink::new(seen_set, ShardWriter::new(output_dir));
    let mut ticker = tokio::time::interval(crate::sink::FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            entry = entry_rx.recv() => {
                match entry {
                    Some(entry) => {
                        sink.offer(entry).await.context("offering entry to sink")?;
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                sink.flush().await.context("periodic sink flush")?;
            }
        }
    }

    sink.flush().await.context("final sink flush")?;
    Ok(())
}

/// Owns the `ProgressStore` for the process lifetime: the single writer.
/// Applies updates as they arrive and closes the store once every Puller
/// has dropped its sender.
async fn run_progress_writer(
    progress: ProgressStore,
    mut progress_rx: mpsc::UnboundedReceiver<(String, i64)>,
) -> anyhow::Result<()> {
    while let Some((name, last_index)) = progress_rx.recv().await {
        if let Err(err) = progress.apply_update(&name, last_index).await {
            tracing::error!(log = %name, error = %err, "failed to persist checkpoint");
        }
    }
    progress.close().await;
    Ok(())
}
