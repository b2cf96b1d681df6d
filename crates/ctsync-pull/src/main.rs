use clap::Parser;
use ctsync_pull::config::Args;
use ctsync_pull::supervisor;

fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if args.gomaxprocs > 0 {
        builder.worker_threads(args.gomaxprocs);
    }
    let runtime = builder.enable_all().build()?;

    let task = runtime.spawn(async move { supervisor::run(args).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}
