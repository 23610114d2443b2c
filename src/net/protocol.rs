// Wire protocol.
//
// The first message on every TCP session is the sender's "ip:port"
// identity as UTF-8, up to 4096 bytes. Everything after that is a fixed
// 8-byte frame: a block record or the START-MINING sentinel. Frames are
// read by accumulating bytes until exactly 8 are buffered, so partial
// reads and coalesced writes both resolve to whole messages.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{BLOCK_BYTES, IDENTITY_MAX_BYTES};
use crate::primitives::block::RawBlock;

pub struct MessageStream {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl MessageStream {
    pub fn new(stream: TcpStream) -> Self {
        MessageStream {
            stream,
            buf: Vec::new(),
        }
    }

    /// Send our identity as the opening message of the session
    pub async fn send_identity(&mut self, identity: &str) -> io::Result<()> {
        self.stream.write_all(identity.as_bytes()).await
    }

    /// Read the peer's opening identity message. Returns None when the
    /// peer closed without sending one.
    pub async fn recv_identity(&mut self) -> io::Result<Option<String>> {
        let mut tmp = vec![0u8; IDENTITY_MAX_BYTES];
        let n = self.stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(None);
        }
        let identity = String::from_utf8(tmp[..n].to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "identity is not UTF-8"))?;
        Ok(Some(identity))
    }

    pub async fn send(&mut self, frame: &RawBlock) -> io::Result<()> {
        self.stream.write_all(frame).await
    }

    /// Receive the next 8-byte frame. Returns None on clean close.
    pub async fn recv(&mut self) -> io::Result<Option<RawBlock>> {
        loop {
            if self.buf.len() >= BLOCK_BYTES {
                let mut frame = [0u8; BLOCK_BYTES];
                frame.copy_from_slice(&self.buf[..BLOCK_BYTES]);
                self.buf.drain(..BLOCK_BYTES);
                return Ok(Some(frame));
            }

            let mut tmp = [0u8; 512];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (dialed, accepted)
    }

    #[tokio::test]
    async fn test_identity_handshake() {
        let (a, b) = socket_pair().await;
        let mut a = MessageStream::new(a);
        let mut b = MessageStream::new(b);

        a.send_identity("127.0.0.1:9001").await.unwrap();
        let got = b.recv_identity().await.unwrap();
        assert_eq!(got.as_deref(), Some("127.0.0.1:9001"));
    }

    #[tokio::test]
    async fn test_frame_reassembled_from_partial_writes() {
        let (a, b) = socket_pair().await;
        let mut reader = MessageStream::new(b);

        let frame = *b"START-MN";
        let (_, mut w) = a.into_split();
        tokio::spawn(async move {
            w.write_all(&frame[..3]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            w.write_all(&frame[3..]).await.unwrap();
        });

        assert_eq!(reader.recv().await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_coalesced_frames_split_apart() {
        let (a, b) = socket_pair().await;
        let mut reader = MessageStream::new(b);

        let f1 = [1u8; 8];
        let f2 = [2u8; 8];
        let mut joined = Vec::new();
        joined.extend_from_slice(&f1);
        joined.extend_from_slice(&f2);
        let (_, mut w) = a.into_split();
        w.write_all(&joined).await.unwrap();

        assert_eq!(reader.recv().await.unwrap(), Some(f1));
        assert_eq!(reader.recv().await.unwrap(), Some(f2));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (a, b) = socket_pair().await;
        let mut reader = MessageStream::new(b);
        drop(a);
        assert_eq!(reader.recv().await.unwrap(), None);
    }
}
