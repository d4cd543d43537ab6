use clap::Parser;
use log::{error, info, warn};
use std::sync::atomic::Ordering;
use tcplens::configuration::config::Args;
use tcplens::host::replay::TraceReplay;
use tcplens::{Collector, Exporter};

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    info!("tcplens v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    info!("Importing configuration");
    let config = args.load_config().unwrap_or_else(|e| {
        error!("Unable to import configuration: {}", e);
        std::process::exit(1);
    });
    info!("Configuration imported successfully");

    let replay = TraceReplay::open(&args.trace).unwrap_or_else(|e| {
        error!("{}, exiting...", e);
        std::process::exit(1);
    });

    let mut exporter = Exporter::from_config(&config).unwrap_or_else(|e| {
        error!("Unable to create the exporter: {}, exiting...", e);
        std::process::exit(1);
    });

    let grace = config.poll_timeout();
    let mut collector = Collector::new(config);
    let (dispatcher, mut consumer) = collector.attach().unwrap_or_else(|e| {
        error!("Unable to attach the collector: {}, exiting...", e);
        std::process::exit(1);
    });

    let running = collector.running_flag();
    let signal = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        running.store(false, Ordering::SeqCst);
    });

    let running = collector.running_flag();
    let producer = tokio::task::spawn_blocking(move || replay.replay(&dispatcher, &running));

    let consumer = tokio::task::spawn_blocking(move || {
        let totals = collector.run(&mut consumer, &mut exporter);
        if let Err(e) = exporter.flush() {
            error!("Unable to flush exporter output: {}", e);
        }
        (totals, exporter.totals())
    });

    // The consumer returns on stop or once the trace is exhausted; the
    // producer may still be blocked reading an interactive source.
    match consumer.await {
        Ok((_, exported)) => info!(
            "Exported {} records, {} filtered out, {} failed",
            exported.written, exported.filtered, exported.failed
        ),
        Err(e) => {
            error!("Error joining at the end of execution: {:?}", e);
            std::process::exit(1);
        }
    }
    signal.abort();

    match tokio::time::timeout(grace, producer).await {
        Ok(Ok(Ok(summary))) => info!(
            "Trace replay done: {} events dispatched, {} malformed lines",
            summary.dispatched, summary.malformed
        ),
        Ok(Ok(Err(e))) => error!("Trace replay failed: {}", e),
        Ok(Err(e)) => error!("Error joining the trace replay: {:?}", e),
        Err(_) => {
            warn!("Trace source still blocked on input, not waiting for it");
            // Dropping the runtime would wait on the blocked reader.
            std::process::exit(0);
        }
    }
}
