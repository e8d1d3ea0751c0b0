//! Gateway implementation

mod builder;
mod calc;

pub use builder::{Cellgate, CellgateBuilder};
pub use calc::CalcGateway;
