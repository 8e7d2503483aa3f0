use std::sync::Arc;
use std::time::Duration;

use stocksync_core::connectivity::spawn_reachability_checker;
use stocksync_core::services::decode_records;
use stocksync_core::{Business, ConnectivityMonitor};
use tokio::sync::mpsc;

use crate::commands::common::{finish, format_business_lines, CliContext};
use crate::error::CliError;

pub async fn run_watch(interval_secs: u64, context: &CliContext) -> Result<(), CliError> {
    if interval_secs == 0 {
        return Err(CliError::Config(
            "--interval must be at least one second".to_string(),
        ));
    }
    if context.offline {
        return Err(CliError::OfflineMode("watch"));
    }

    let service = context.open_service().await?;
    let Some(engine) = service.engine().cloned() else {
        return Err(CliError::OfflineMode("watch"));
    };

    let (events_tx, events_rx) = mpsc::channel(16);
    let checker = spawn_reachability_checker(
        Arc::clone(engine.remote()),
        Duration::from_secs(interval_secs),
        events_tx,
    );
    let monitor = ConnectivityMonitor::new(engine).spawn(events_rx);

    let mut businesses = service.watch_businesses().await?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    println!("Watching businesses, press Ctrl-C to stop");

    let result = loop {
        tokio::select! {
            signal = &mut shutdown => break signal.map_err(CliError::from),
            snapshot = businesses.next() => {
                let Some(documents) = snapshot else {
                    break Ok(());
                };
                match decode_records::<Business>(documents) {
                    Ok(list) => print_snapshot(&list),
                    Err(error) => break Err(error.into()),
                }
            }
        }
    };

    businesses.cancel();
    checker.abort();
    match monitor.await {
        Ok(stats) => tracing::info!(
            "Watch stopped after {} reconnects and {} syncs",
            stats.transitions,
            stats.syncs_started
        ),
        Err(error) => tracing::warn!("Connectivity monitor failed: {error}"),
    }

    finish(&service).await?;
    result
}

fn print_snapshot(businesses: &[Business]) {
    println!("-- {} businesses", businesses.len());
    for line in format_business_lines(businesses) {
        println!("{line}");
    }
}
