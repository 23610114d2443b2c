/// Genesis block id. There is no genesis record; only its id is known.
pub const GENESIS_ID: u16 = 0x9E1C;

/// Every wire message is exactly this many bytes
pub const BLOCK_BYTES: usize = 8;

/// Sentinel that starts the mining epoch, framed like a block
pub const START_MINING: [u8; BLOCK_BYTES] = *b"START-MN";

/// Blocks whose timestamp deviates more than this from local time are rejected
pub const MAX_CLOCK_SKEW_SECS: u64 = 3600;

/// Maximum size of the identity handshake ("ip:port" as UTF-8)
pub const IDENTITY_MAX_BYTES: usize = 4096;

/// How many roster peers a starting node dials
pub const DIAL_FANOUT: usize = 2;

/// Listener accept backlog
pub const LISTEN_BACKLOG: i32 = 5;

/// Capacity of the fan-out broadcast channel
pub const BROADCAST_CAPACITY: usize = 256;

/// Registry snapshot written on SIGINT
pub const CLIENT_LIST_FILE: &str = "client_list.json";

/// Per-peer log of accepted inbound messages
pub fn output_file_name(port: u16) -> String {
    format!("outputfile_{port}.txt")
}
