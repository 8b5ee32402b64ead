//! Error handling for Stripeset
//!
//! Errors fall into two groups with different propagation rules:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Stripeset Error Taxonomy                    │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │  Absorbed by voting          │  Short-circuit the operation  │
//! │  ┌────────────────────────┐  │  ┌─────────────────────────┐  │
//! │  │ • NodeUnreachable      │  │  │ • QuorumInfeasible      │  │
//! │  │ • per-node NodeErrno   │  │  │ • LockUnavailable       │  │
//! │  └────────────────────────┘  │  │ • MetadataFetchFailure  │  │
//! │  escalate only when no reply │  │ • ReconciliationFailure │  │
//! │  group reaches quorum        │  └─────────────────────────┘  │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │  Ambient: Configuration, Io, Internal, NotInitialized        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation reports exactly one error on its terminal transition.
//! Lock and metadata errors are also handed to the next operation queued
//! on the same lock.

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{StripesetError, StripesetResult};

#[cfg(test)]
mod tests;
