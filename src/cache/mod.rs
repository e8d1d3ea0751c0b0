//! Caching subsystem.
//!
//! Three caches, consulted in this order by the gateway:
//!
//! - [`result::ResultCache`]: outputs keyed by service version and input
//!   digest. A hit answers the request without touching a document.
//!
//! - [`workbook::WorkbookCache`]: loaded documents, one per service, held
//!   inside the per-service guard. Backed by distributed snapshots in the
//!   shared store.
//!
//! - [`tables::TableCache`]: rows fetched for remote-table sheets, consulted
//!   while a document is being built.

pub mod result;
pub mod tables;
pub mod workbook;

pub use result::{CachedResult, ResultCache, ResultCacheConfig, result_key};
pub use tables::{DEFAULT_TABLE_TTL, HttpTableFetcher, TableCache, TableFetcher, parse_table};
pub use workbook::{WorkbookCache, WorkbookCacheConfig, snapshot_key};
