//! Public types for the Cellgate API.

mod address;
mod input;
mod request;
mod service;
mod value;

pub use address::{CellAddress, CellRef};
pub use input::InputSet;
pub use request::{
    CalcRequest, CalcResponse, NamedValue, OutputFormat, OutputResult, RESERVED_QUERY_PARAMS,
    ResponseMetadata,
};
pub use service::{InputDef, InputType, OutputDef, ServiceDefinition, ServiceRateLimit};
pub use value::{CellValue, OutputValue, TableData};
