//! Smart Order Router.
//!
//! Applies the routing-rule set to each order, selects the best fresh LP
//! (or a partial-hedge split) and appends every decision, with its
//! inputs, to a durable audit trail. Preview shares the decision path
//! with zero side effects.

pub mod audit;
pub mod error;
pub mod router;

pub use audit::AuditTrail;
pub use error::{RouterError, RouterResult};
pub use router::{Decision, InternalLeg, RoutedLeg, RoutingOutcome, SmartOrderRouter};
