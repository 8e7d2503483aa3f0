//! Local store for Stocksync

mod connection;
mod live;
mod migrations;
mod query;
mod store;

pub use connection::LocalStore;
pub use live::{Subscription, SubscriptionHandle};
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use query::{Query, SortOrder};
