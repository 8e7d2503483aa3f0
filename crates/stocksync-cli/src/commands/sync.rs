use stocksync_core::{Collection, CollectionReport, LocalStore, SyncEngine};

use crate::commands::common::{format_report_lines, CliContext};
use crate::error::CliError;

pub async fn run_sync(
    collection: Option<Collection>,
    as_json: bool,
    context: &CliContext,
) -> Result<(), CliError> {
    if context.offline {
        return Err(CliError::OfflineMode("sync"));
    }

    let store = LocalStore::open(&context.db_path).await?;
    let engine = context.engine(store.clone())?;
    let reports = execute_sync(&engine, collection).await;
    store.close().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for line in format_report_lines(&reports) {
            println!("{line}");
        }
    }

    let aborted = reports
        .iter()
        .filter_map(|report| {
            report
                .aborted
                .as_ref()
                .map(|reason| format!("{}: {reason}", report.collection))
        })
        .collect::<Vec<_>>();
    if !aborted.is_empty() {
        return Err(CliError::SyncIncomplete(aborted.join("; ")));
    }
    Ok(())
}

pub async fn execute_sync(
    engine: &SyncEngine,
    collection: Option<Collection>,
) -> Vec<CollectionReport> {
    match collection {
        Some(collection) => vec![engine.sync_collection(collection).await],
        None => engine.sync_all().await.collections,
    }
}
