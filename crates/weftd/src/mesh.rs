//! In-process mesh router.
//!
//! Connects any number of local allocators over bounded tokio
//! channels. No real networking happens; this backs single-process
//! deployments and the multi-peer tests, where the configurable drop
//! probability simulates a lossy network. Delivery is best-effort by
//! construction: a full inbound queue drops the message, exactly like
//! the wire would.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use weft_proto::defaults::{GOSSIP_INTERVAL_SECS, MESH_CHANNEL_SIZE};
use weft_proto::error::{WeftError, WeftResult};
use weft_proto::peer::PeerName;

use crate::gossip::{Gossip, Gossiper};

#[derive(Debug)]
enum MeshMessage {
    Unicast { src: PeerName, payload: Bytes },
    Broadcast { payload: Bytes },
}

struct PeerSlot {
    tx: mpsc::Sender<MeshMessage>,
    /// Parked until `serve` claims it.
    rx: Option<mpsc::Receiver<MeshMessage>>,
    gossiper: Option<Arc<dyn Gossiper>>,
}

struct RouterShared {
    peers: RwLock<BTreeMap<PeerName, PeerSlot>>,
    /// Probability of dropping any unicast or broadcast delivery.
    loss: f64,
    rng: StdMutex<StdRng>,
}

impl RouterShared {
    fn lose_message(&self) -> bool {
        if self.loss <= 0.0 {
            return false;
        }
        self.rng
            .lock()
            .expect("mesh rng lock poisoned")
            .gen_bool(self.loss)
    }
}

/// The router itself. Cheap to clone; all clones share the peer table.
#[derive(Clone)]
pub struct MeshRouter {
    shared: Arc<RouterShared>,
}

impl MeshRouter {
    pub fn new(loss: f64, seed: u64) -> MeshRouter {
        assert!((0.0..=1.0).contains(&loss));
        MeshRouter {
            shared: Arc::new(RouterShared {
                peers: RwLock::new(BTreeMap::new()),
                loss,
                rng: StdMutex::new(StdRng::seed_from_u64(seed)),
            }),
        }
    }

    /// Register a peer and return its outbound side. Call `serve` with
    /// the peer's [`Gossiper`] to start inbound delivery.
    pub async fn connect(&self, name: PeerName) -> MeshLink {
        let (tx, rx) = mpsc::channel(MESH_CHANNEL_SIZE);
        let mut peers = self.shared.peers.write().await;
        let prev = peers.insert(
            name,
            PeerSlot {
                tx,
                rx: Some(rx),
                gossiper: None,
            },
        );
        assert!(prev.is_none(), "peer {name} connected twice");
        info!(%name, "peer connected to mesh");
        MeshLink {
            name,
            shared: self.shared.clone(),
        }
    }

    /// Start delivering inbound messages for `name` to `gossiper`.
    pub async fn serve(
        &self,
        name: PeerName,
        gossiper: Arc<dyn Gossiper>,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = {
            let mut peers = self.shared.peers.write().await;
            let slot = peers.get_mut(&name).expect("serving an unconnected peer");
            slot.gossiper = Some(gossiper.clone());
            slot.rx.take().expect("peer already being served")
        };
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let res = match msg {
                    MeshMessage::Unicast { src, payload } => {
                        gossiper.on_gossip_unicast(src, payload).await
                    }
                    MeshMessage::Broadcast { payload } => {
                        gossiper.on_gossip_broadcast(payload).await
                    }
                };
                if let Err(e) = res {
                    debug!(%name, error = %e, "gossiper rejected a delivery");
                }
            }
            debug!(%name, "mesh delivery loop ended");
        })
    }

    /// Remove a peer. In-flight messages to it are dropped and its
    /// delivery loop ends once drained.
    pub async fn disconnect(&self, name: PeerName) {
        self.shared.peers.write().await.remove(&name);
        info!(%name, "peer disconnected from mesh");
    }

    /// One round of full-state exchange: every served peer's state is
    /// handed to every other served peer, bypassing loss. This is the
    /// anti-entropy repair; tests call it directly to converge.
    pub async fn sweep(&self) {
        let gossipers: Vec<(PeerName, Arc<dyn Gossiper>)> = {
            let peers = self.shared.peers.read().await;
            peers
                .iter()
                .filter_map(|(n, s)| s.gossiper.clone().map(|g| (*n, g)))
                .collect()
        };
        for (src, g) in &gossipers {
            let Some(state) = g.gossip().await else { continue };
            for (dst, h) in &gossipers {
                if dst == src {
                    continue;
                }
                if let Err(e) = h.on_gossip(state.frame()).await {
                    debug!(%src, %dst, error = %e, "state exchange rejected");
                }
            }
        }
    }

    /// Periodic sweeps for long-running deployments.
    pub fn start_gossip_timer(&self) -> tokio::task::JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(GOSSIP_INTERVAL_SECS));
            tick.tick().await; // the first tick fires immediately
            loop {
                tick.tick().await;
                router.sweep().await;
            }
        })
    }
}

/// One peer's handle onto the router; the allocator's [`Gossip`].
pub struct MeshLink {
    name: PeerName,
    shared: Arc<RouterShared>,
}

#[async_trait::async_trait]
impl Gossip for MeshLink {
    async fn gossip_unicast(&self, dst: PeerName, payload: Bytes) -> WeftResult<()> {
        if self.shared.lose_message() {
            debug!(src = %self.name, %dst, "mesh dropped a unicast");
            return Ok(());
        }
        let tx = {
            let peers = self.shared.peers.read().await;
            peers.get(&dst).map(|s| s.tx.clone())
        };
        match tx {
            Some(tx) => {
                if tx
                    .try_send(MeshMessage::Unicast {
                        src: self.name,
                        payload,
                    })
                    .is_err()
                {
                    debug!(%dst, "mesh queue full, unicast dropped");
                }
            }
            None => debug!(%dst, "unicast to unknown peer dropped"),
        }
        Ok(())
    }

    async fn gossip_broadcast(&self, payload: Bytes) -> WeftResult<()> {
        let targets: Vec<(PeerName, mpsc::Sender<MeshMessage>)> = {
            let peers = self.shared.peers.read().await;
            peers
                .iter()
                .filter(|(n, _)| **n != self.name)
                .map(|(n, s)| (*n, s.tx.clone()))
                .collect()
        };
        for (dst, tx) in targets {
            if self.shared.lose_message() {
                debug!(src = %self.name, %dst, "mesh dropped a broadcast delivery");
                continue;
            }
            if tx
                .try_send(MeshMessage::Broadcast {
                    payload: payload.clone(),
                })
                .is_err()
            {
                debug!(%dst, "mesh queue full, broadcast delivery dropped");
            }
        }
        Ok(())
    }

    async fn leader_elect(&self) -> WeftResult<PeerName> {
        let peers = self.shared.peers.read().await;
        // Highest name wins; every connected peer sees the same table
        // and so picks the same winner.
        peers.keys().max().copied().ok_or(WeftError::Stopped)
    }
}
