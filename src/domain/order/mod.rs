// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (Order, OrderItem, OrderStatus and its transition table)
// - Commands (PlaceOrder, TransitionOrder, OrderFilter)
// - Errors (OrderError)
// - Manager (OrderLifecycleManager: creation and transitions)
//
// ============================================================================

pub mod commands;
pub mod errors;
pub mod manager;
pub mod value_objects;

pub use commands::*;
pub use errors::*;
pub use manager::*;
pub use value_objects::*;
