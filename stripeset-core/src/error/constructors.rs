//! Constructor helpers for StripesetError

use super::types::StripesetError;

impl StripesetError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use stripeset_core::error::StripesetError;
    ///
    /// let err = StripesetError::configuration("set.fragments", "must not exceed set.nodes");
    /// assert!(err.to_string().contains("set.fragments"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        StripesetError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error with detailed context
    pub fn invalid_config<T: std::fmt::Display>(field: &str, value: T, reason: &str) -> Self {
        StripesetError::Configuration {
            component: field.to_string(),
            message: format!("Invalid value '{}': {}", value, reason),
        }
    }

    pub fn lock_unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        StripesetError::LockUnavailable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn metadata_fetch(target: impl Into<String>, reason: impl Into<String>) -> Self {
        StripesetError::MetadataFetchFailure {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StripesetError::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StripesetError::Internal {
            message: message.into(),
        }
    }

    /// Create a service unavailable error
    pub fn not_initialized(component: &str) -> Self {
        StripesetError::NotInitialized {
            component: component.to_string(),
        }
    }
}
