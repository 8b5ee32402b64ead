//! Core error types for Stripeset

use thiserror::Error;

use crate::mask::NodeMask;
use crate::types::NodeErrno;

/// Error type for erasure-set operations
///
/// Errors are `Clone` because one failure is delivered both to the caller
/// of the failing operation and to operations queued behind it on a lock.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StripesetError {
    // Node selection
    #[error("Insufficient nodes for request: have {available}, need {required} (eligible {eligible})")]
    QuorumInfeasible {
        available: u32,
        required: u32,
        eligible: NodeMask,
    },

    // Transport
    #[error("Nodes unreachable: {nodes}")]
    NodeUnreachable { nodes: NodeMask },

    // Locking
    #[error("Lock unavailable on '{target}': {reason}")]
    LockUnavailable { target: String, reason: String },

    // Voting
    #[error("No reply group reached quorum: {replies} replies in {groups} groups, minimum {minimum}")]
    ReconciliationFailure {
        replies: u32,
        groups: usize,
        minimum: u32,
    },

    #[error("Nodes agreed on failure: {errno}")]
    NodeFailure { errno: NodeErrno },

    // Version/size tracking
    #[error("Failed to fetch size and version of '{target}': {reason}")]
    MetadataFetchFailure { target: String, reason: String },

    // Configuration
    #[error("Configuration error in {component}: {message}")]
    Configuration { component: String, message: String },

    // Ambient
    #[error("IO error during {operation}: {message}")]
    Io { operation: String, message: String },

    #[error("Not initialized: {component}")]
    NotInitialized { component: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StripesetError {
    /// Errors that are handed to the next waiter of a lock the failing
    /// operation held.
    pub fn propagates_to_waiters(&self) -> bool {
        matches!(
            self,
            StripesetError::LockUnavailable { .. } | StripesetError::MetadataFetchFailure { .. }
        )
    }

    /// Node-level transport failure
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StripesetError::NodeUnreachable { .. })
    }
}

pub type StripesetResult<T> = std::result::Result<T, StripesetError>;
