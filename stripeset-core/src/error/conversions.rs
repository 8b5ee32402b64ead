//! Error conversion implementations for StripesetError

use super::types::StripesetError;

impl From<std::io::Error> for StripesetError {
    fn from(err: std::io::Error) -> Self {
        StripesetError::Io {
            operation: "io".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for StripesetError {
    fn from(err: toml::de::Error) -> Self {
        StripesetError::Configuration {
            component: "toml".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for StripesetError {
    fn from(err: toml::ser::Error) -> Self {
        StripesetError::Configuration {
            component: "toml".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StripesetError {
    fn from(err: serde_json::Error) -> Self {
        StripesetError::Internal {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<std::num::ParseIntError> for StripesetError {
    fn from(err: std::num::ParseIntError) -> Self {
        StripesetError::Configuration {
            component: "numeric_value".to_string(),
            message: format!("Invalid numeric value: {}", err),
        }
    }
}

impl From<tokio::runtime::TryCurrentError> for StripesetError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        StripesetError::NotInitialized {
            component: format!("tokio runtime ({})", err),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for StripesetError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        StripesetError::Internal {
            message: "Operation dropped before reporting an outcome".to_string(),
        }
    }
}
