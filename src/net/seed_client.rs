// Bootstrap client.
//
// One-shot exchange with the registry: open, announce our identity, read
// the serialized roster of everyone registered before us, close. The
// registry records us after replying, so our own entry is never in the
// response.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::net::node::NodeError;

/// node_id "ip:port" -> (ip, port)
pub type Roster = HashMap<String, (String, u16)>;

pub async fn fetch_roster(seed_addr: &str, identity: &str) -> Result<Roster, NodeError> {
    let unreachable = |source| NodeError::RegistryUnavailable {
        addr: seed_addr.to_string(),
        source,
    };

    let mut stream = TcpStream::connect(seed_addr).await.map_err(unreachable)?;
    stream
        .write_all(identity.as_bytes())
        .await
        .map_err(unreachable)?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.map_err(unreachable)?;
    Ok(serde_json::from_slice(&raw)?)
}
