use serde::Serialize;
use stocksync_core::remote::RemoteStore;
use stocksync_core::{Collection, CouchClient, LocalStore, NetworkStatus, Query};

use crate::commands::common::CliContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub db_path: String,
    pub remote_url: Option<String>,
    pub database: Option<String>,
    /// `reachable`, `unreachable` or `offline`
    pub remote: String,
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Serialize)]
pub struct CollectionStatus {
    pub collection: Collection,
    pub documents: usize,
    pub pending_deletions: usize,
}

pub async fn run_status(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let status = collect_status(context).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Local store: {}", status.db_path);
    match (&status.remote_url, &status.database) {
        (Some(url), Some(database)) => {
            println!("Remote:      {url} ({database}) is {}", status.remote);
        }
        _ => println!("Remote:      {}", status.remote),
    }
    for collection in &status.collections {
        println!(
            "{:<12} {} documents, {} deletions waiting to sync",
            collection.collection, collection.documents, collection.pending_deletions
        );
    }
    Ok(())
}

pub async fn collect_status(context: &CliContext) -> Result<StatusItem, CliError> {
    let store = LocalStore::open(&context.db_path).await?;
    let mut collections = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        collections.push(CollectionStatus {
            collection,
            documents: store.find(collection, &Query::all()).await?.len(),
            pending_deletions: store.pending_deletions(collection).await?.len(),
        });
    }
    store.close().await?;

    let (remote_url, database, remote) = if context.offline {
        (None, None, "offline".to_string())
    } else {
        let config = context.remote_config()?;
        let client = CouchClient::new(&config)?;
        let status = if client.ping().await {
            NetworkStatus::Reachable
        } else {
            NetworkStatus::Unreachable
        };
        (Some(config.url), Some(config.database), status.to_string())
    };

    Ok(StatusItem {
        db_path: context.db_path.display().to_string(),
        remote_url,
        database,
        remote,
        collections,
    })
}
