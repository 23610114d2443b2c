// Gossip overlay modules
pub mod dedup;       // Forward-once message cache
pub mod node;        // Peer connection manager and receive pipeline
pub mod protocol;    // 8-byte frames and the identity handshake
pub mod registry;    // Bootstrap registry service
pub mod seed_client; // One-shot roster fetch from the registry

pub use node::{NodeError, PeerNode};
