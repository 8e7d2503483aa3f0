use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use stocksync_core::{Collection, Platform};

#[derive(Parser)]
#[command(name = "stocksync")]
#[command(about = "Track businesses and their stock, online or offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Platform class used to pick the default remote URL
    #[arg(long, global = true, value_enum)]
    pub platform: Option<PlatformArg>,

    /// Work on the local store only; nothing is sent to the remote
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage businesses
    Business {
        #[command(subcommand)]
        command: BusinessCommands,
    },
    /// Manage the articles of a business
    Article {
        #[command(subcommand)]
        command: ArticleCommands,
    },
    /// Reconcile the local store with the remote
    Sync {
        /// Only sync this collection
        #[arg(long, value_enum)]
        collection: Option<CollectionArg>,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show remote reachability and queued local changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow the business list and sync whenever the remote comes back
    Watch {
        /// Seconds between reachability checks
        #[arg(long, default_value = "5", value_name = "SECONDS")]
        interval: u64,
    },
    /// Inspect or write the remote configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum BusinessCommands {
    /// Create a business
    #[command(alias = "new")]
    Add {
        /// Business name
        name: Vec<String>,
    },
    /// List businesses by name
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a business
    Rename {
        /// Business ID or unique ID prefix
        id: String,
        /// New name
        name: Vec<String>,
    },
    /// Delete a business and all of its articles
    Delete {
        /// Business ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ArticleCommands {
    /// Add an article to a business
    #[command(alias = "new")]
    Add {
        /// Business ID or unique ID prefix
        business: String,
        /// Article name
        name: String,
        /// Quantity in stock
        #[arg(long, default_value = "0")]
        qty: i64,
        /// Selling price
        #[arg(long, default_value = "0")]
        price: f64,
    },
    /// List the articles of a business by name
    List {
        /// Business ID or unique ID prefix
        business: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change an article
    Update {
        /// Article ID or unique ID prefix
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New quantity
        #[arg(long)]
        qty: Option<i64>,
        /// New selling price
        #[arg(long)]
        price: Option<f64>,
    },
    /// Delete an article
    Delete {
        /// Article ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved remote configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write values to the config file, keeping the ones not given
    Init {
        /// Remote base URL
        #[arg(long, value_name = "URL")]
        url: Option<String>,
        /// Remote database name prefix
        #[arg(long, value_name = "NAME")]
        database: Option<String>,
        /// Remote user
        #[arg(long, value_name = "USER")]
        username: Option<String>,
        /// Remote password
        #[arg(long, value_name = "PASSWORD")]
        password: Option<String>,
        /// Per-request timeout for remote calls
        #[arg(long, value_name = "SECONDS")]
        request_timeout_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PlatformArg {
    Android,
    Ios,
    Other,
}

impl From<PlatformArg> for Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::Android => Self::Android,
            PlatformArg::Ios => Self::Ios,
            PlatformArg::Other => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CollectionArg {
    Businesses,
    Articles,
}

impl From<CollectionArg> for Collection {
    fn from(value: CollectionArg) -> Self {
        match value {
            CollectionArg::Businesses => Self::Businesses,
            CollectionArg::Articles => Self::Articles,
        }
    }
}
