//! Application services built on the local store and sync engine

mod inventory;

pub use inventory::{decode_records, InventoryService};
