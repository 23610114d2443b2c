// Bootstrap registry.
//
// Keeps the map of every peer that has announced itself and hands each
// newcomer the roster as it stood before them. Registrations are handled
// one at a time; a peer talks to the registry exactly once, at startup.

use std::future::Future;
use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::IDENTITY_MAX_BYTES;
use crate::net::seed_client::Roster;

#[derive(Debug, Default)]
pub struct Registry {
    peers: Roster,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn snapshot(&self) -> &Roster {
        &self.peers
    }

    /// Accept registrations until `shutdown` resolves, then hand back the
    /// final peer map for the caller to persist.
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> Roster
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return self.peers,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(e) = self.register(stream).await {
                            eprintln!("[seed] registration failed: {e}");
                        }
                    }
                    Err(e) => eprintln!("[seed] accept failed: {e}"),
                },
            }
        }
    }

    async fn register(&mut self, mut stream: TcpStream) -> io::Result<()> {
        let mut tmp = vec![0u8; IDENTITY_MAX_BYTES];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        let identity = String::from_utf8(tmp[..n].to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "identity is not UTF-8"))?;
        let (ip, port) = parse_identity(&identity)?;

        // reply before recording, so a peer never sees itself
        let roster = serde_json::to_vec(&self.peers)?;
        stream.write_all(&roster).await?;

        eprintln!("[seed] registered {identity}");
        self.peers.entry(identity).or_insert((ip, port));
        Ok(())
    }
}

fn parse_identity(identity: &str) -> io::Result<(String, u16)> {
    let bad = || io::Error::new(io::ErrorKind::InvalidData, "identity is not ip:port");
    let (ip, port) = identity.rsplit_once(':').ok_or_else(bad)?;
    let port: u16 = port.parse().map_err(|_| bad())?;
    Ok((ip.to_string(), port))
}
