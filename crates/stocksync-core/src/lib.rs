//! stocksync-core - Core library for Stocksync
//!
//! This crate contains the document models, the `SQLite`-backed local store
//! with live queries, the CouchDB-compatible remote client and the sync engine
//! that reconciles the two. Interfaces (currently the CLI) build on
//! [`services::InventoryService`].

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{Platform, RemoteConfig};
pub use connectivity::{ConnectivityMonitor, NetworkStatus};
pub use db::{LocalStore, Query, SortOrder, Subscription};
pub use error::{Error, Result};
pub use models::{Article, ArticleChanges, Business, Collection, Document, Record};
pub use remote::{CouchClient, MemoryRemote, RemoteStore};
pub use services::InventoryService;
pub use sync::{CollectionReport, SyncEngine, SyncReport};
