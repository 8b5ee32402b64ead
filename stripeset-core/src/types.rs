//! Shared types exchanged with node collaborators

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::mask::NodeMask;

/// Stable identity of a stored object (inode), the same on every node
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        ObjectId(Uuid::new_v4())
    }

    pub const fn nil() -> Self {
        ObjectId(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity a request is issued with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const ROOT: Credentials = Credentials { uid: 0, gid: 0 };

    pub const fn new(uid: u32, gid: u32) -> Self {
        Credentials { uid, gid }
    }
}

/// Object reference handed to collaborators
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub path: String,
}

/// Authoritative size and version of an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAttr {
    pub size: u64,
    pub version: u64,
}

/// Per-node failure class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeErrno {
    /// The node could not be reached or did not answer in time
    NotConnected,
    NotFound,
    Exists,
    Access,
    NoSpace,
    Stale,
    Io,
    Other(i32),
}

impl fmt::Display for NodeErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErrno::NotConnected => write!(f, "node not connected"),
            NodeErrno::NotFound => write!(f, "no such object"),
            NodeErrno::Exists => write!(f, "object exists"),
            NodeErrno::Access => write!(f, "permission denied"),
            NodeErrno::NoSpace => write!(f, "no space left"),
            NodeErrno::Stale => write!(f, "stale handle"),
            NodeErrno::Io => write!(f, "i/o error"),
            NodeErrno::Other(code) => write!(f, "error {}", code),
        }
    }
}

/// Successful node reply payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyValue {
    pub result: i64,
    pub attr: Option<ObjectAttr>,
    #[serde(skip)]
    pub payload: Option<Bytes>,
}

impl ReplyValue {
    pub fn ok(result: i64) -> Self {
        ReplyValue {
            result,
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, attr: ObjectAttr) -> Self {
        self.attr = Some(attr);
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Outcome delivered by a node for one dispatched request
pub type NodeOutcome = Result<ReplyValue, NodeErrno>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeReply {
    pub node: usize,
    pub outcome: NodeOutcome,
}

impl NodeReply {
    pub fn is_unreachable(&self) -> bool {
        matches!(self.outcome, Err(NodeErrno::NotConnected))
    }
}

/// Node-specific operation body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    Lookup,
    Stat,
    Read { offset: u64, len: u64 },
    Write { offset: u64, data: Bytes },
    Truncate { size: u64 },
    Create { name: String },
    Unlink { name: String },
    Rename { from: String, to: String },
    Flush,
}

impl RequestBody {
    pub fn name(&self) -> &'static str {
        match self {
            RequestBody::Lookup => "lookup",
            RequestBody::Stat => "stat",
            RequestBody::Read { .. } => "read",
            RequestBody::Write { .. } => "write",
            RequestBody::Truncate { .. } => "truncate",
            RequestBody::Create { .. } => "create",
            RequestBody::Unlink { .. } => "unlink",
            RequestBody::Rename { .. } => "rename",
            RequestBody::Flush => "flush",
        }
    }
}

/// Request sent to one node
#[derive(Clone, Debug)]
pub struct NodeRequest {
    pub fop: u64,
    pub target: Option<ObjectRef>,
    pub body: RequestBody,
    pub creds: Credentials,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    /// Whole-object lock
    Inode,
    /// Lock on one name inside a directory
    Entry,
}

/// What a distributed lock protects
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockTarget {
    pub kind: LockKind,
    pub object: ObjectRef,
    pub name: Option<String>,
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.object.path, name),
            None => write!(f, "{}", self.object.path),
        }
    }
}

/// Version/size increment applied atomically on the nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeVersionDelta {
    pub version: u64,
    pub size: i64,
}

/// Size/version as fetched, with the nodes that agreed on it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchedAttr {
    pub attr: ObjectAttr,
    pub good: NodeMask,
}

/// Repair request for one object or open file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealRequest {
    pub object: ObjectRef,
    /// Repair through an open file rather than by path
    pub by_fd: bool,
    pub nodes: NodeMask,
}

/// Outcome of a repair as reported by the healer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealReport {
    pub mask: NodeMask,
    pub good: NodeMask,
    pub bad: NodeMask,
}

impl HealReport {
    /// Nodes repaired by this heal
    pub fn healed(&self) -> u32 {
        (self.mask & !(self.good | self.bad)).count()
    }

    /// Nodes that needed repair
    pub fn needed(&self) -> u32 {
        (self.mask & !self.good).count()
    }
}
