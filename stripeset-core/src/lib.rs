//! Stripeset core
//!
//! Dispatch, quorum voting, cooperative distributed locking and the
//! operation state machine of an erasure-coded storage set. An operation
//! issued once is fanned out to the set's nodes, the replies are voted into
//! one answer, and operations on the same object share distributed locks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stripeset_core::{
//!     backend::Backends, config::StripesetConfig, fops::FopSpec, inode::Loc,
//!     set::ErasureSet, sim::SimCluster, types::ObjectId,
//! };
//!
//! # async fn demo() -> stripeset_core::error::StripesetResult<()> {
//! let config = StripesetConfig::default();
//! let cluster = Arc::new(SimCluster::new(config.set.nodes));
//! let set = ErasureSet::new(&config, Backends::shared(cluster))?;
//!
//! let inode = set.inodes().get_or_create(ObjectId::new());
//! let answer = FopSpec::stat()
//!     .fop(&set)
//!     .loc(Loc::new("/file", inode))
//!     .submit()
//!     .wait()
//!     .await?;
//! println!("good nodes: {}", answer.good);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fop;
pub mod fops;
pub mod inode;
mod join;
pub mod lock;
pub mod manager;
pub mod mask;
pub mod observability;
pub mod reconcile;
pub mod select;
pub mod set;
pub mod sim;
pub mod size_version;
pub mod types;

pub use error::{StripesetError, StripesetResult};
pub use fop::{ContextUpdates, DispatchPolicy, Fop, FopAnswer, FopHandle, Minimum};
pub use manager::{FopHandler, State, Step};
pub use mask::NodeMask;
pub use set::ErasureSet;
