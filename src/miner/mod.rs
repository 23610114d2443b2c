pub mod miner;

pub use miner::{MinerParams, run};
