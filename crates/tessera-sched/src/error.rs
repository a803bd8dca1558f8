//! Error types for scheduling, ghost exchange, and partitioning

use tessera_types::NodeId;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the distributed layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Blocking factors must multiply to the node count
    #[error("blocking {blocking:?} covers {product} blocks, fleet has {nodes} compute nodes")]
    BlockingMismatch {
        blocking: Vec<u32>,
        product: u64,
        nodes: u32,
    },

    /// Blocking arity must match the relation's dimensionality
    #[error("blocking has {blocking} axes, relation has {dims}")]
    BlockingArity { blocking: usize, dims: usize },

    /// Paired ghost endpoints disagree about the buffer size
    #[error("ghost buffer size mismatch on {key}: local {local} bytes, peer {peer} bytes")]
    GhostSizeMismatch { key: String, local: usize, peer: usize },

    /// Both ends of a channel direction were claimed twice
    #[error("ghost channel endpoint {key} claimed twice")]
    EndpointTaken { key: String },

    /// Control-plane serialization failure
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A compute node dropped out of the fleet
    #[error("{0} disconnected")]
    NodeGone(NodeId),

    /// Errors bubbling up from the store
    #[error(transparent)]
    Store(#[from] tessera_store::Error),
}
