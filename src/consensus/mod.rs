// Fork-choice modules
pub mod selfish; // Withholding strategy state machine
pub mod tree;    // Layered block tree and longest-chain resolution

pub use tree::{BlockTree, Insert, TreeError};
