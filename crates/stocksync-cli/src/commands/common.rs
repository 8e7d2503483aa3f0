use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use stocksync_core::config::resolve_remote_config;
use stocksync_core::{
    Article, Business, Collection, CollectionReport, CouchClient, InventoryService, LocalStore,
    Platform, Query, Record, RemoteConfig, SyncEngine,
};

use crate::cli::Cli;
use crate::error::CliError;

pub const DB_PATH_ENV: &str = "STOCKSYNC_DB_PATH";
pub const CONFIG_PATH_ENV: &str = "STOCKSYNC_CONFIG";

/// Paths and flags shared by every command
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub platform: Option<Platform>,
    pub offline: bool,
}

impl CliContext {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            db_path: resolve_db_path(cli.db_path.clone()),
            config_path: resolve_config_path(cli.config.clone()),
            platform: cli.platform.map(Into::into),
            offline: cli.offline,
        }
    }

    pub fn remote_config(&self) -> Result<RemoteConfig, CliError> {
        Ok(resolve_remote_config(Some(&self.config_path), self.platform)?)
    }

    pub fn engine(&self, store: LocalStore) -> Result<SyncEngine, CliError> {
        let config = self.remote_config()?;
        let client = CouchClient::new(&config)?;
        tracing::debug!("Remote is {} (database {})", config.url, config.database);
        Ok(SyncEngine::new(store, Arc::new(client)))
    }

    /// Open the local store and attach a sync engine unless running offline.
    pub async fn open_service(&self) -> Result<InventoryService, CliError> {
        let store = LocalStore::open(&self.db_path).await?;
        if self.offline {
            return Ok(InventoryService::local(store));
        }
        Ok(InventoryService::with_sync(self.engine(store)?))
    }
}

/// Wait for the syncs a command triggered, then close the store.
///
/// Local changes are already durable, so sync problems are only reported.
pub async fn finish(service: &InventoryService) -> Result<(), CliError> {
    for report in service.wait_for_background_sync().await {
        if let Some(reason) = &report.aborted {
            eprintln!(
                "Saved locally; {} not synced yet ({reason})",
                report.collection
            );
        } else if !report.is_clean() {
            eprintln!("Saved locally; {}", summarize_report(&report));
        }
    }
    service.store().close().await?;
    Ok(())
}

/// Find a record by exact id or by a unique id prefix.
pub async fn resolve_record<R: Record>(store: &LocalStore, query: &str) -> Result<R, CliError> {
    let query = normalize_identifier(query)?;
    if let Some(document) = store.get(R::COLLECTION, &query).await? {
        return Ok(R::from_document(document)?);
    }

    let mut matching = store
        .find(R::COLLECTION, &Query::all())
        .await?
        .into_iter()
        .filter(|document| document.id.starts_with(&query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::NotFound {
            kind: record_kind(R::COLLECTION),
            query,
        }),
        1 => Ok(R::from_document(matching.remove(0))?),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|document| document.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

const fn record_kind(collection: Collection) -> &'static str {
    match collection {
        Collection::Businesses => "Business",
        Collection::Articles => "Article",
    }
}

pub fn resolve_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ").trim().to_string();
    if name.is_empty() {
        return Err(CliError::EmptyName);
    }
    Ok(name)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyId);
    }
    Ok(trimmed.to_string())
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_business_lines(businesses: &[Business]) -> Vec<String> {
    businesses
        .iter()
        .map(|business| format!("{:<13}  {}", short_id(&business.id), business.name))
        .collect()
}

pub fn format_article_lines(articles: &[Article]) -> Vec<String> {
    articles
        .iter()
        .map(|article| {
            format!(
                "{:<13}  {:<30}  qty {:>6}  {:>10.2}",
                short_id(&article.id),
                article.name,
                article.qty,
                article.selling_price
            )
        })
        .collect()
}

pub fn summarize_report(report: &CollectionReport) -> String {
    let mut summary = format!(
        "{}: pulled {}, removed {}, pushed {}, unchanged {}, tombstoned {}",
        report.collection,
        report.pulled,
        report.removed,
        report.pushed,
        report.unchanged,
        report.tombstoned
    );
    if !report.conflicts.is_empty() {
        summary.push_str(&format!(", conflicts {}", report.conflicts.len()));
    }
    if !report.failures.is_empty() {
        summary.push_str(&format!(", failed {}", report.failures.len()));
    }
    if let Some(reason) = &report.aborted {
        summary.push_str(&format!(", aborted ({reason})"));
    }
    if report.deferred {
        summary.push_str(", joined a running sync");
    }
    summary
}

pub fn format_report_lines(reports: &[CollectionReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        lines.push(summarize_report(report));
        for failure in &report.failures {
            lines.push(format!(
                "  {} {} failed: {}",
                failure.phase, failure.id, failure.error
            ));
        }
        for id in &report.conflicts {
            lines.push(format!("  {id} skipped after repeated conflicts"));
        }
    }
    lines
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stocksync")
        .join("stocksync.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stocksync")
        .join("config.json")
}
