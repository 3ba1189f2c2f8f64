// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each component has its own subdirectory with value objects, commands,
// errors and the component itself:
// - ledger   - StockLedger, the only writer of stock counters
// - order    - OrderLifecycleManager
// - delivery - DeliveryLifecycleManager
// - token    - ActionTokenService
//
// Components never open or commit transactions; they work inside the
// caller's `UnitOfWork`.
//
// ============================================================================

pub mod delivery;
pub mod errors;
pub mod identity;
pub mod ledger;
pub mod order;
pub mod token;
