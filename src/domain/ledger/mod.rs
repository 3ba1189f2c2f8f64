// ============================================================================
// Stock Ledger - single controlled entry point for stock counters
// ============================================================================

pub mod errors;
pub mod stock_ledger;
pub mod value_objects;

pub use errors::*;
pub use stock_ledger::*;
pub use value_objects::*;
