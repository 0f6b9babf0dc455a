//! wardrobe-ledger: a CSV-backed record store for a wardrobe inventory and
//! spending tracker, served over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod records;
pub mod schema;
pub mod store;
pub mod summary;
pub mod transition;

pub use api::{build_router, AppState};
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use records::{Collection, Record};
pub use store::{Session, Store};
