//! Routing-rule persistence.
//!
//! A priority-ordered relation of `RoutingRule` rows in SQLite. Every
//! mutation revalidates the rule set for semantic conflicts before it
//! commits; lookups read an immutable snapshot swapped by pointer.

pub mod error;
pub mod store;

pub use error::{RuleStoreError, RulesResult};
pub use store::{RuleSpec, RuleStore};
