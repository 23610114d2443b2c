use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, broadcast};

use crate::config::{BROADCAST_CAPACITY, DIAL_FANOUT, LISTEN_BACKLOG, START_MINING, output_file_name};
use crate::consensus::selfish::SelfishState;
use crate::consensus::tree::{BlockTree, Insert};
use crate::miner::MinerParams;
use crate::net::dedup::SeenCache;
use crate::net::protocol::MessageStream;
use crate::net::seed_client::Roster;
use crate::primitives::block::{Block, RawBlock};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("bootstrap registry unreachable at {addr}: {source}")]
    RegistryUnavailable {
        addr: String,
        source: std::io::Error,
    },
    #[error("registry sent an unreadable roster: {0}")]
    BadRoster(#[from] serde_json::Error),
}

/// Frame fanned out to every connection task. `origin` is the connection
/// the frame arrived on, None for locally produced frames; the owning
/// task skips its own origin so a message is never echoed to its sender.
#[derive(Debug, Clone, Copy)]
pub struct OutboundFrame {
    pub bytes: RawBlock,
    pub origin: Option<u64>,
}

/// Everything the message mutex guards. Every receive path takes this
/// lock before consulting the cache and releases it before any socket
/// write.
pub struct ChainState {
    pub seen: SeenCache,
    pub tree: BlockTree,
    pub selfish: Option<SelfishState>,
    output: std::fs::File,
}

impl ChainState {
    fn log_accepted(&mut self, peer: &str, raw: &RawBlock) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let _ = writeln!(self.output, "{now:.6}:{peer}->{}", hex::encode(raw));
    }
}

pub struct PeerNode {
    /// Our "ip:port" identity, sent first on every session
    pub identity: String,
    pub chain: Arc<Mutex<ChainState>>,
    /// conn_id -> peer identity, for the live neighbor set
    pub neighbors: Arc<Mutex<HashMap<u64, String>>>,
    outbound_tx: broadcast::Sender<OutboundFrame>,
    /// Raised after a NewTip insertion; the miner consumes it once per wakeup
    pub tip_signal: Arc<Notify>,
    miner_started: AtomicBool,
    miner: std::sync::Mutex<Option<MinerParams>>,
    next_conn_id: AtomicU64,
}

impl PeerNode {
    pub fn new(
        ip: &str,
        port: u16,
        selfish: bool,
        miner: MinerParams,
        output_dir: &Path,
    ) -> std::io::Result<Arc<Self>> {
        let output = std::fs::File::create(output_dir.join(output_file_name(port)))?;
        let (outbound_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Arc::new(PeerNode {
            identity: format!("{ip}:{port}"),
            chain: Arc::new(Mutex::new(ChainState {
                seen: SeenCache::new(),
                tree: BlockTree::new(),
                selfish: selfish.then(SelfishState::new),
                output,
            })),
            neighbors: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            tip_signal: Arc::new(Notify::new()),
            miner_started: AtomicBool::new(false),
            miner: std::sync::Mutex::new(Some(miner)),
            next_conn_id: AtomicU64::new(0),
        }))
    }

    pub fn mining_started(&self) -> bool {
        self.miner_started.load(Ordering::SeqCst)
    }

    /// Accept peers forever. Each accepted session gets its own task.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(self.clone(), stream, None));
                }
                Err(e) => eprintln!("[p2p] accept failed: {e}"),
            }
        }
    }

    /// Dial up to two roster peers sampled uniformly without replacement.
    /// The overlay is built once at startup and does not heal.
    pub async fn connect_roster(self: &Arc<Self>, roster: &Roster) {
        use rand::seq::SliceRandom;

        let entries: Vec<(&String, &(String, u16))> = roster.iter().collect();
        let picked: Vec<_> = entries
            .choose_multiple(&mut rand::thread_rng(), DIAL_FANOUT)
            .collect();
        for (peer_id, (ip, port)) in picked {
            match TcpStream::connect((ip.as_str(), *port)).await {
                Ok(stream) => {
                    eprintln!("[p2p] {} -> {peer_id}", self.identity);
                    tokio::spawn(handle_connection(
                        self.clone(),
                        stream,
                        Some((*peer_id).clone()),
                    ));
                }
                Err(e) => eprintln!("[p2p] dial {peer_id} failed: {e}"),
            }
        }
    }

    /// Record the roster at the top of the output file, as a header for
    /// the message log that follows.
    pub async fn log_roster(&self, roster: &Roster) {
        let mut chain = self.chain.lock().await;
        for peer_id in roster.keys() {
            let _ = writeln!(chain.output, "{peer_id}");
        }
    }

    pub fn broadcast(&self, bytes: RawBlock, origin: Option<u64>) {
        // no receivers just means no neighbors yet
        let _ = self.outbound_tx.send(OutboundFrame { bytes, origin });
    }

    /// Start the mining task. Only the first call does anything.
    pub fn start_mining(self: &Arc<Self>) {
        if self.miner_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(params) = self.miner.lock().unwrap().take() {
            tokio::spawn(crate::miner::run(self.clone(), params));
        }
    }

    /// Synthesize the START-MINING sentinel: mark it seen, start our own
    /// miner, and gossip it so the epoch begins across the graph.
    pub async fn kickoff(self: &Arc<Self>) {
        {
            let mut chain = self.chain.lock().await;
            chain.seen.observe(&START_MINING);
        }
        self.start_mining();
        self.broadcast(START_MINING, None);
        eprintln!("[p2p] {} kicked off the mining epoch", self.identity);
    }

    /// One inbound frame from connection `conn_id`. Takes the message
    /// mutex, updates cache/tree/strategy, releases it, then fans out.
    pub async fn handle_inbound(self: &Arc<Self>, conn_id: u64, peer: &str, frame: RawBlock) {
        let mut chain = self.chain.lock().await;
        if chain.seen.observe(&frame) {
            return;
        }
        chain.log_accepted(peer, &frame);

        if frame == START_MINING {
            drop(chain);
            self.start_mining();
            self.broadcast(frame, Some(conn_id));
            return;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let outcome = {
            let ChainState { tree, selfish, .. } = &mut *chain;
            match tree.try_insert(&frame, now) {
                Ok(Insert::NewTip { layer }) => match selfish.as_mut() {
                    Some(state) => Ok(state.on_honest_tip(layer, tree)),
                    None => Ok((true, Vec::new())),
                },
                Ok(Insert::Extended { .. }) => Ok((false, Vec::new())),
                Err(e) => Err(e),
            }
        };
        drop(chain);

        match outcome {
            Ok((restart, publish)) => {
                // forward the accepted block to everyone but its origin,
                // then any withheld blocks the strategy decided to release
                self.broadcast(frame, Some(conn_id));
                for raw in publish {
                    self.broadcast(raw, None);
                }
                if restart {
                    self.tip_signal.notify_one();
                }
            }
            Err(e) => eprintln!("[gossip] {peer}: dropped block: {e}"),
        }
    }

    /// Produce one block on timer expiry: choose the parent, mark the
    /// frame seen, run it through the tree or the strategy, and return
    /// whatever should be broadcast.
    pub async fn produce_block(&self, nonce: u16) -> Vec<RawBlock> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut chain = self.chain.lock().await;
        let ChainState { seen, tree, selfish, .. } = &mut *chain;

        let (prev_id, layer) = match selfish.as_ref() {
            Some(state) => state.mine_parent(tree),
            None => tree.prev_id_to_mine_on(),
        };
        let raw = Block {
            prev_id,
            nonce,
            timestamp: now as u32,
        }
        .encode();
        seen.observe(&raw);
        eprintln!("[miner] generated {} at layer {layer}", hex::encode(raw));

        match selfish.as_mut() {
            Some(state) => state.on_mined(raw, layer, tree).into_iter().collect(),
            None => {
                tree.place(raw, layer);
                vec![raw]
            }
        }
    }

    /// Longest-chain statistics printed on SIGINT. A selfish peer first
    /// places its still-withheld blocks so the report sees the whole
    /// fork structure.
    pub async fn final_report(&self) -> String {
        let mut chain = self.chain.lock().await;
        let ChainState { tree, selfish, .. } = &mut *chain;
        if let Some(state) = selfish.as_ref() {
            state.merge_remaining(tree);
        }
        let longest = tree.longest_chain();
        let mut report = format!(
            "Total blocks: {}, Blocks in longest chain: {}",
            tree.total_blocks(),
            longest.len()
        );
        if let Some(state) = selfish.as_ref() {
            report.push_str(&format!(
                "\nSelfish-miner blocks in longest chain: {}",
                state.blocks_on_chain(&longest)
            ));
        }
        report
    }
}

/// Build the reuse-address listener the peer and the registry share.
pub fn bind_listener(addr: &str) -> Result<TcpListener, NodeError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let bind_err = |source| NodeError::Bind {
        addr: addr.to_string(),
        source,
    };

    let parsed: SocketAddr = addr.parse().map_err(|_| {
        bind_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "listen address is not ip:port",
        ))
    })?;
    let socket = Socket::new(Domain::for_address(parsed), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&parsed.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    TcpListener::from_std(socket.into()).map_err(bind_err)
}

/// One task per live neighbor: exchange identities, then race inbound
/// frames against the local fan-out. Any socket error drops this one
/// peer; the node keeps running.
async fn handle_connection(node: Arc<PeerNode>, stream: TcpStream, dialed: Option<String>) {
    let mut s = MessageStream::new(stream);

    let peer = match dialed {
        Some(peer_id) => {
            if let Err(e) = s.send_identity(&node.identity).await {
                eprintln!("[p2p] handshake with {peer_id} failed: {e}");
                return;
            }
            peer_id
        }
        None => match s.recv_identity().await {
            Ok(Some(peer_id)) => peer_id,
            Ok(None) => return,
            Err(e) => {
                eprintln!("[p2p] inbound handshake failed: {e}");
                return;
            }
        },
    };

    let conn_id = node.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let mut outbound_rx = node.outbound_tx.subscribe();
    node.neighbors.lock().await.insert(conn_id, peer.clone());
    eprintln!("[p2p] {peer} connected");

    loop {
        tokio::select! {
            inbound = s.recv() => match inbound {
                Ok(Some(frame)) => node.handle_inbound(conn_id, &peer, frame).await,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("[p2p] {peer}: read failed: {e}");
                    break;
                }
            },
            fanned = outbound_rx.recv() => match fanned {
                Ok(frame) => {
                    if frame.origin != Some(conn_id)
                        && let Err(e) = s.send(&frame.bytes).await
                    {
                        eprintln!("[p2p] {peer}: write failed: {e}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("[p2p] {peer}: fan-out lagged, {n} frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    node.neighbors.lock().await.remove(&conn_id);
    eprintln!("[p2p] {peer} disconnected");
}
