//! The peer overlay: one connection per known member, broadcast fan-out,
//! and a periodic liveness sweep.
//!
//! Grounded on `original_source/consensus/pkg/engine/consensus_messaging.py`'s
//! `Peer` class and `consensus_node.py`'s `ConsensusNode.check_on_peers`, and
//! on the broadcast-task-per-peer shape of
//! `examples/alissonlinneker-nova-protocol/protocol/src/network/gossip.rs`.
//! Each peer gets its own long-lived connect-and-ping task (mirroring the
//! original's per-peer `Peer.connect`/ping loop); broadcasting fans a
//! message out to every peer concurrently via `futures::future::join_all`
//! rather than the original's thread-per-send, the natural async
//! equivalent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{PEER_CHECK_INTERVAL, PEER_RPC_PORT, PING_THRESHOLD};
use crate::messages::{Envelope, PeerRequest, PeerResponse};
use crate::types::Key;

/// Length-prefixed bincode frame: a u32 big-endian length followed by the
/// bincode-encoded payload. Used for both requests and responses.
async fn write_frame<T: serde::Serialize>(
    stream: &mut TcpStream,
    value: &T,
) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let bytes = bincode::serialize(value).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

async fn read_frame<T: serde::de::DeserializeOwned>(stream: &mut TcpStream) -> std::io::Result<T> {
    use tokio::io::AsyncReadExt;
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn send_request(addr: &str, request: &PeerRequest) -> std::io::Result<PeerResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, request).await?;
    read_frame(&mut stream).await
}

#[derive(Debug, Clone)]
struct PeerAddr {
    key: Key,
    addr: String,
}

/// Owns the address book, a shared liveness table, and the inbound channel
/// that delivers decoded `Envelope`s to the driver loop.
pub struct PeerOverlay {
    peers: Vec<PeerAddr>,
    liveness: Arc<RwLock<HashMap<Key, bool>>>,
    inbound_tx: mpsc::Sender<Envelope>,
}

impl PeerOverlay {
    /// Builds the overlay and spawns the inbound listener plus one
    /// check-and-ping task per peer. Returns the overlay handle and the
    /// receiving half of the inbound channel.
    pub fn spawn(
        self_key: Key,
        listen_port: u16,
        members: &[Key],
        member_ips: &[String],
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let peers: Vec<PeerAddr> = members
            .iter()
            .zip(member_ips.iter())
            .filter(|(key, _)| **key != self_key)
            .map(|(key, ip)| PeerAddr {
                key: key.clone(),
                addr: format!("{ip}:{PEER_RPC_PORT}"),
            })
            .collect();

        let liveness = Arc::new(RwLock::new(
            peers.iter().map(|p| (p.key.clone(), false)).collect(),
        ));

        tokio::spawn(listen(listen_port, inbound_tx.clone()));

        for peer in &peers {
            tokio::spawn(liveness_loop(peer.clone(), Arc::clone(&liveness)));
        }

        (
            Self {
                peers,
                liveness,
                inbound_tx,
            },
            inbound_rx,
        )
    }

    pub fn online(&self, key: &Key) -> bool {
        self.liveness.read().get(key).copied().unwrap_or(false)
    }

    pub fn online_count(&self) -> usize {
        self.liveness.read().values().filter(|v| **v).count()
    }

    /// Sends `envelope` to every known peer concurrently, logging (but not
    /// failing on) individual delivery errors — a missed peer is simply
    /// unreachable this round, not a broadcast failure.
    pub async fn broadcast(&self, envelope: &Envelope) {
        let sends = self.peers.iter().map(|peer| {
            let addr = peer.addr.clone();
            let request = PeerRequest::Message(envelope.clone());
            async move {
                if let Err(e) = send_request(&addr, &request).await {
                    debug!(peer = %addr, error = %e, "broadcast delivery failed");
                }
            }
        });
        join_all(sends).await;
    }

    pub async fn send_to(&self, key: &Key, envelope: &Envelope) -> std::io::Result<()> {
        let Some(peer) = self.peers.iter().find(|p| &p.key == key) else {
            return Ok(());
        };
        send_request(&peer.addr, &PeerRequest::Message(envelope.clone())).await?;
        Ok(())
    }
}

/// Accepts inbound peer connections, decodes one frame per connection, and
/// forwards `Message` envelopes to the driver over `inbound_tx`. `Ping`
/// requests are acknowledged without being forwarded — liveness is tracked
/// by the requester's own `liveness_loop`, not the responder.
async fn listen(port: u16, inbound_tx: mpsc::Sender<Envelope>) {
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, port, "peer overlay failed to bind listen port");
            return;
        }
    };
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            continue;
        };
        let inbound_tx = inbound_tx.clone();
        tokio::spawn(async move {
            let request: PeerRequest = match read_frame(&mut stream).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "failed to decode inbound peer frame");
                    return;
                }
            };
            match request {
                PeerRequest::Message(envelope) => {
                    let _ = write_frame(&mut stream, &PeerResponse::Ack).await;
                    let _ = inbound_tx.send(envelope).await;
                }
                PeerRequest::Ping => {
                    let _ = write_frame(&mut stream, &PeerResponse::Ack).await;
                }
            }
        });
    }
}

/// Pings `peer` on `PEER_CHECK_INTERVAL`, flipping its liveness bit based
/// on whether the ping round-trips. A peer that hasn't round-tripped
/// within `PING_THRESHOLD` is considered offline even between pings.
async fn liveness_loop(peer: PeerAddr, liveness: Arc<RwLock<HashMap<Key, bool>>>) {
    let mut last_ok = tokio::time::Instant::now() - PING_THRESHOLD;
    loop {
        tokio::time::sleep(PEER_CHECK_INTERVAL).await;
        match send_request(&peer.addr, &PeerRequest::Ping).await {
            Ok(PeerResponse::Ack) => {
                last_ok = tokio::time::Instant::now();
                liveness.write().insert(peer.key.clone(), true);
            }
            Err(_) => {
                if last_ok.elapsed() > PING_THRESHOLD {
                    liveness.write().insert(peer.key.clone(), false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_excludes_self() {
        let self_key = Key::from("self");
        let members = vec![self_key.clone(), Key::from("a"), Key::from("b")];
        let ips = vec!["127.0.0.1".to_string(), "127.0.0.2".to_string(), "127.0.0.3".to_string()];
        let filtered: Vec<Key> = members
            .iter()
            .zip(ips.iter())
            .filter(|(k, _)| **k != self_key)
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(filtered, vec![Key::from("a"), Key::from("b")]);
    }
}
