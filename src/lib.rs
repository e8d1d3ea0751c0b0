//! Cellgate - cached, concurrency-safe gateway for spreadsheet calculations
//!
//! A published *service* pairs a spreadsheet document with declared input
//! cells and output cells or ranges. Callers send named inputs; the gateway
//! writes them into the document, recalculates through an external
//! [`CalcEngine`], and returns the outputs.
//!
//! The gateway makes repeated, concurrent calls cheap and safe:
//!
//! - identical requests are answered from the [`ResultCache`]
//! - loaded documents are reused through the [`WorkbookCache`], backed by
//!   snapshots in a [`SharedStore`]
//! - one request at a time touches a given document ([`ServiceGuard`])
//! - callers are rate limited per service with a sliding window
//! - usage counters are batched before they reach the store
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cellgate::{
//!     CalcRequest, Cellgate, InputDef, InputType, MemoryCatalog, MemoryEngine, OutputDef,
//!     ServiceDefinition,
//! };
//!
//! #[tokio::main]
//! async fn main() -> cellgate::Result<()> {
//!     let engine = MemoryEngine::new().with_recalc(|wb| {
//!         let total = wb.number("Sheet1", "A1")? * wb.number("Sheet1", "A2")?;
//!         wb.set_value("Sheet1", "B1", total)
//!     });
//!
//!     let catalog = Arc::new(MemoryCatalog::new());
//!     catalog.publish(
//!         ServiceDefinition::new("order", r#"{"sheets": [{"name": "Sheet1"}]}"#)
//!             .input(InputDef::new("price", "Sheet1!A1", InputType::Number).mandatory())
//!             .input(InputDef::new("qty", "Sheet1!A2", InputType::Number).mandatory())
//!             .output(OutputDef::new("total", "Sheet1!B1")),
//!     )?;
//!
//!     let gateway = Cellgate::builder()
//!         .catalog(catalog)
//!         .engine(Arc::new(engine))
//!         .build()?;
//!
//!     let response = gateway
//!         .calculate(CalcRequest::new("order").input("price", 2.5).input("qty", 4))
//!         .await?;
//!     println!("{:?}", response.output("total"));
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod guard;
pub mod limiter;
pub mod normalize;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use analytics::{
    AnalyticsBatcher, AnalyticsConfig, AnalyticsIncrement, AnalyticsSink, StoreAnalyticsSink,
};
pub use cache::{
    CachedResult, HttpTableFetcher, ResultCache, ResultCacheConfig, TableCache, TableFetcher,
    WorkbookCache, WorkbookCacheConfig,
};
pub use catalog::{MemoryCatalog, ServiceCatalog};
pub use config::Config;
pub use engine::{CalcEngine, MemoryEngine, MemoryWorkbook, RemoteTable, Workbook};
pub use error::{CellgateError, ErrorResponse, Result, ValidationIssue};
pub use gateway::{CalcGateway, Cellgate, CellgateBuilder};
pub use guard::{ServiceGuard, ServiceLock};
pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use normalize::normalize_inputs;
pub use store::{MemoryStore, SharedStore, WindowCount};
pub use tasks::BackgroundTasks;

// Re-export all types
pub use types::{
    CalcRequest, CalcResponse, CellAddress, CellRef, CellValue, InputDef, InputSet, InputType,
    NamedValue, OutputDef, OutputFormat, OutputResult, OutputValue, ResponseMetadata,
    ServiceDefinition, ServiceRateLimit, TableData,
};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
