// ============================================================================
// Fulfillment Engine
// ============================================================================
//
// Order-fulfillment and inventory-reservation workflow engine.
//
// Layers:
// - domain/    - Stock ledger, order + delivery lifecycles, action tokens
// - store/     - Transactional persistence contract (memory + PostgreSQL)
// - messaging/ - Post-commit notification fan-out
// - engine/    - Facade running one transaction per external call
//
// ============================================================================

pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod utils;

pub use engine::FulfillmentEngine;
