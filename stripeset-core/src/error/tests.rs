//! Tests for error conversions and classification

use super::StripesetError;
use crate::mask::NodeMask;
use crate::types::NodeErrno;

#[test]
fn test_waiter_propagation_classes() {
    assert!(StripesetError::lock_unavailable("/a", "pool exhausted").propagates_to_waiters());
    assert!(StripesetError::metadata_fetch("/a", "timeout").propagates_to_waiters());
    assert!(!StripesetError::NodeFailure {
        errno: NodeErrno::NotFound
    }
    .propagates_to_waiters());
    assert!(!StripesetError::QuorumInfeasible {
        available: 1,
        required: 3,
        eligible: NodeMask::from_bits(0b1),
    }
    .propagates_to_waiters());
}

#[test]
fn test_toml_error_conversion() {
    fn parse() -> Result<toml::Value, StripesetError> {
        Ok(toml::from_str::<toml::Value>("nodes = [")?)
    }

    match parse() {
        Err(StripesetError::Configuration { component, .. }) => assert_eq!(component, "toml"),
        other => panic!("Expected configuration error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oneshot_recv_error_conversion() {
    async fn wait() -> Result<u32, StripesetError> {
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        drop(tx);
        Ok(rx.await?)
    }

    match wait().await {
        Err(StripesetError::Internal { message }) => assert!(message.contains("dropped")),
        other => panic!("Expected internal error, got {:?}", other),
    }
}

#[test]
fn test_unreachable_display_uses_mask() {
    let err = StripesetError::NodeUnreachable {
        nodes: NodeMask::from_bits(0b100),
    };
    assert!(err.is_unreachable());
    assert_eq!(err.to_string(), "Nodes unreachable: 0x4");
}
