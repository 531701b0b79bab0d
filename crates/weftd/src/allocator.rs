//! The allocation coordinator.
//!
//! One tokio task owns the ring, the space set and the ownership
//! table outright. Everything else, client calls and gossip
//! deliveries alike, goes through a bounded command channel and is
//! processed strictly in submission order, so no lock ever guards the
//! allocation state.
//!
//! Operations that cannot complete yet (no free space, ring not
//! bootstrapped) are parked and retried whenever the ring or the
//! spaces change. After every command the coordinator re-checks its
//! core invariant (the space set covers exactly the ring ranges we
//! own), refreshes the free counts it gossips, and expires due
//! tombstones.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use weft_core::{Ring, Space, SpaceSet};
use weft_proto::address::{Address, Range};
use weft_proto::defaults::COMMAND_CHANNEL_SIZE;
use weft_proto::error::{WeftError, WeftResult};
use weft_proto::message::{decode_frame, encode_frame, MessageKind};
use weft_proto::peer::PeerName;

use crate::config::Config;
use crate::gossip::{Gossip, Gossiper, GossipState};
use crate::ops::{PendingAllocate, PendingClaim};
use crate::status::{ClaimStatus, EntryStatus, Status};

/// Injectable time source, unix seconds.
pub type Clock = Box<dyn Fn() -> i64 + Send>;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

enum Command {
    Allocate {
        ident: String,
        reply: oneshot::Sender<WeftResult<Address>>,
    },
    Claim {
        ident: String,
        addr: Address,
        reply: oneshot::Sender<WeftResult<()>>,
    },
    Free {
        ident: String,
        addr: Address,
        reply: oneshot::Sender<WeftResult<()>>,
    },
    ContainerDied {
        ident: String,
    },
    CancelAllocate {
        ident: String,
    },
    CancelClaim {
        ident: String,
        addr: Address,
    },
    GossipUnicast {
        src: PeerName,
        payload: Bytes,
    },
    GossipBroadcast {
        payload: Bytes,
    },
    Gossip {
        reply: oneshot::Sender<Option<GossipState>>,
    },
    TombstonePeer {
        peer: PeerName,
        reply: oneshot::Sender<WeftResult<()>>,
    },
    ListPeers {
        reply: oneshot::Sender<Vec<PeerName>>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The actor state. Built with [`Allocator::new`], consumed by
/// [`Allocator::spawn`].
pub struct Allocator {
    name: PeerName,
    universe: Range,
    ring: Ring,
    spaces: SpaceSet,
    /// Who holds which addresses. An ident may hold several.
    owned: HashMap<String, Vec<Address>>,
    pending_allocates: Vec<PendingAllocate>,
    pending_claims: Vec<PendingClaim>,
    gossip: Arc<dyn Gossip>,
    now: Clock,
    rng: StdRng,
    tombstone_timeout: i64,
    shutting_down: bool,
}

impl Allocator {
    pub fn new(config: Config, gossip: Arc<dyn Gossip>) -> Allocator {
        Self::with_clock(config, gossip, Box::new(unix_now))
    }

    /// Like `new` but with an injected clock, for deterministic
    /// tombstone handling in tests.
    pub fn with_clock(config: Config, gossip: Arc<dyn Gossip>, now: Clock) -> Allocator {
        let universe = config.allocation_range();
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Allocator {
            name: config.peer_name,
            universe,
            ring: Ring::new(universe.start, universe.end, config.peer_name),
            spaces: SpaceSet::new(),
            owned: HashMap::new(),
            pending_allocates: Vec::new(),
            pending_claims: Vec::new(),
            gossip,
            now,
            rng,
            tombstone_timeout: config.tombstone_timeout,
            shutting_down: false,
        }
    }

    /// Start the coordinator task and return the client handle.
    pub fn spawn(self) -> AllocatorHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let name = self.name;
        tokio::spawn(self.run(rx));
        AllocatorHandle { tx, name }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!(peer = %self.name, universe = %self.universe, "coordinator started");
        while let Some(cmd) = rx.recv().await {
            if let Command::Shutdown { reply } = cmd {
                self.handle_shutdown(reply).await;
                break;
            }
            self.handle_command(cmd).await;
            self.housekeep().await;
        }
        debug!(peer = %self.name, "coordinator stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Allocate { ident, reply } => self.handle_allocate(ident, reply).await,
            Command::Claim { ident, addr, reply } => self.handle_claim(ident, addr, reply).await,
            Command::Free { ident, addr, reply } => {
                let _ = reply.send(self.free_addr(&ident, addr));
            }
            Command::ContainerDied { ident } => self.handle_container_died(ident),
            Command::CancelAllocate { ident } => {
                self.pending_allocates
                    .retain(|op| !(op.ident == ident && op.is_cancelled()));
            }
            Command::CancelClaim { ident, addr } => {
                self.pending_claims
                    .retain(|op| !(op.ident == ident && op.addr == addr && op.is_cancelled()));
            }
            Command::GossipUnicast { src, payload } => self.handle_gossip(Some(src), payload).await,
            Command::GossipBroadcast { payload } => self.handle_gossip(None, payload).await,
            Command::Gossip { reply } => {
                let state = if self.ring.is_empty() || self.shutting_down {
                    None
                } else {
                    Some(GossipState::new(self.ring_frame()))
                };
                let _ = reply.send(state);
            }
            Command::TombstonePeer { peer, reply } => {
                let _ = reply.send(self.handle_tombstone_peer(peer).await);
            }
            Command::ListPeers { reply } => {
                let _ = reply.send(self.ring.peer_names().into_iter().collect());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { .. } => unreachable!("handled in the run loop"),
        }
    }

    // Runs after every command. Expiring a tombstone hands us the dead
    // peer's territory, so parked ops get another chance.
    async fn housekeep(&mut self) {
        let now = (self.now)();
        if self.ring.expire_tombstones(now) {
            info!(peer = %self.name, "expired tombstones");
            self.consider_new_spaces();
            self.try_pending_ops().await;
        }
        self.assert_invariants();
        self.report_free();
    }

    async fn handle_allocate(
        &mut self,
        ident: String,
        reply: oneshot::Sender<WeftResult<Address>>,
    ) {
        if self.shutting_down {
            let _ = reply.send(Err(WeftError::ShuttingDown));
            return;
        }
        // Allocation is idempotent per ident.
        if let Some(&addr) = self.owned.get(&ident).and_then(|a| a.first()) {
            debug!(%ident, %addr, "allocate: ident already holds an address");
            let _ = reply.send(Ok(addr));
            return;
        }
        self.elect_leader_if_necessary().await;
        let op = PendingAllocate::new(ident, reply);
        if let Some(op) = self.try_allocate(op).await {
            self.pending_allocates.push(op);
        }
    }

    async fn handle_claim(
        &mut self,
        ident: String,
        addr: Address,
        reply: oneshot::Sender<WeftResult<()>>,
    ) {
        if self.shutting_down {
            let _ = reply.send(Err(WeftError::ShuttingDown));
            return;
        }
        if !self.universe.contains(addr) {
            // Not an address we administer; trust the caller to manage
            // it on their own.
            info!(%ident, %addr, "claim outside the universe, nothing to do");
            let _ = reply.send(Ok(()));
            return;
        }
        self.elect_leader_if_necessary().await;
        let op = PendingClaim::new(ident, addr, reply);
        if let Some(op) = self.try_claim(op) {
            self.pending_claims.push(op);
        }
    }

    /// Try to satisfy an allocate. Returns the op back when it must
    /// stay parked.
    async fn try_allocate(&mut self, op: PendingAllocate) -> Option<PendingAllocate> {
        if self.ring.is_empty() {
            // Bootstrap is in flight; the ring broadcast will wake us.
            return Some(op);
        }
        if let Some(addr) = self.spaces.allocate() {
            debug!(ident = %op.ident, %addr, "allocated");
            self.owned.entry(op.ident.clone()).or_default().push(addr);
            op.finish(Ok(addr));
            return None;
        }
        if self.ring.peer_names().iter().all(|p| *p == self.name) {
            // We hold the whole universe and it is full; nobody can
            // ever donate.
            op.finish(Err(WeftError::SpaceExhausted));
            return None;
        }
        match self.ring.choose_peer_to_ask_for_space(&mut self.rng) {
            Ok(donor) => {
                debug!(%donor, ident = %op.ident, "out of space, asking for a donation");
                let frame = encode_frame(MessageKind::SpaceRequest, &[]);
                if let Err(e) = self.gossip.gossip_unicast(donor, frame).await {
                    warn!(error = %e, "space request failed to send");
                }
            }
            Err(_) => debug!(ident = %op.ident, "no peer reports free space, parking"),
        }
        Some(op)
    }

    /// Try to satisfy a claim. Returns the op back when the ring has
    /// not settled yet.
    fn try_claim(&mut self, op: PendingClaim) -> Option<PendingClaim> {
        let owner = if self.ring.is_empty() {
            PeerName::UNKNOWN
        } else {
            self.ring.owner(op.addr)
        };
        if owner == PeerName::UNKNOWN {
            return Some(op);
        }
        if owner != self.name {
            op.finish(Err(WeftError::OwnedByPeer { peer: owner }));
            return None;
        }
        if let Some(existing) = self.ident_owning(op.addr) {
            if existing == op.ident {
                op.finish(Ok(()));
            } else {
                let ident = existing.to_string();
                op.finish(Err(WeftError::AddressInUse { ident }));
            }
            return None;
        }
        match self.spaces.claim(op.addr) {
            Ok(()) => {
                debug!(ident = %op.ident, addr = %op.addr, "claimed");
                self.owned
                    .entry(op.ident.clone())
                    .or_default()
                    .push(op.addr);
                op.finish(Ok(()));
            }
            Err(e) => op.finish(Err(e)),
        }
        None
    }

    fn free_addr(&mut self, ident: &str, addr: Address) -> WeftResult<()> {
        let not_found = || WeftError::NoMatchingAddress {
            ident: ident.to_string(),
        };
        let addrs = self.owned.get_mut(ident).ok_or_else(not_found)?;
        let pos = addrs.iter().position(|a| *a == addr).ok_or_else(not_found)?;
        addrs.remove(pos);
        if addrs.is_empty() {
            self.owned.remove(ident);
        }
        debug!(%ident, %addr, "freed");
        self.spaces.free(addr)
    }

    fn handle_container_died(&mut self, ident: String) {
        if let Some(addrs) = self.owned.remove(&ident) {
            for addr in addrs {
                match self.spaces.free(addr) {
                    Ok(()) => info!(%ident, %addr, "released address of dead container"),
                    Err(e) => warn!(%ident, %addr, error = %e, "failed to release address"),
                }
            }
        }
        self.cancel_ops_for(&ident);
    }

    fn cancel_ops_for(&mut self, ident: &str) {
        let allocs = std::mem::take(&mut self.pending_allocates);
        for op in allocs {
            if op.ident == ident {
                op.finish(Err(WeftError::Cancelled));
            } else {
                self.pending_allocates.push(op);
            }
        }
        let claims = std::mem::take(&mut self.pending_claims);
        for op in claims {
            if op.ident == ident {
                op.finish(Err(WeftError::Cancelled));
            } else {
                self.pending_claims.push(op);
            }
        }
    }

    async fn handle_gossip(&mut self, src: Option<PeerName>, payload: Bytes) {
        if self.shutting_down {
            return;
        }
        match decode_frame(&payload) {
            Err(e) => warn!(error = %e, "dropping malformed gossip frame"),
            Ok((MessageKind::SpaceRequest, _)) => match src {
                Some(src) => self.donate_space(src).await,
                None => warn!("space request arrived as a broadcast, ignoring"),
            },
            Ok((MessageKind::LeaderElected, _)) => self.handle_leader_elected().await,
            Ok((MessageKind::RingUpdate, body)) => self.handle_ring_update(src, &body).await,
        }
    }

    async fn handle_ring_update(&mut self, src: Option<PeerName>, body: &[u8]) {
        let update = match Ring::decode(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "dropping undecodable ring update");
                return;
            }
        };
        match self.ring.merge(update) {
            Ok(changed) => {
                if changed {
                    self.consider_new_spaces();
                }
                // Retry parked ops on every ring we accept, echo or
                // not: a lost space request gets re-sent when the next
                // gossip round brings the donor back into view.
                self.try_pending_ops().await;
            }
            Err(e @ (WeftError::NewerVersion | WeftError::EntryInMyRange)) => {
                // The sender is behind on a range we own; push our
                // view back so it can reconcile.
                debug!(error = %e, "gossiped ring conflicts with ours");
                if let Some(src) = src {
                    let frame = self.ring_frame();
                    let _ = self.gossip.gossip_unicast(src, frame).await;
                }
            }
            Err(e) => debug!(error = %e, "rejected gossiped ring"),
        }
    }

    async fn donate_space(&mut self, to: PeerName) {
        if !self.ring.is_empty() {
            if let Some(donation) = self.spaces.give_up_space() {
                info!(%to, range = %donation, "donating range");
                self.ring
                    .grant_range_to_host(donation.start, donation.end, to);
            } else {
                debug!(%to, "asked for space but have none to spare");
            }
        }
        // Reply with our ring either way; the requester at least
        // learns where the free space is not.
        let frame = self.ring_frame();
        let _ = self.gossip.gossip_unicast(to, frame).await;
    }

    async fn handle_leader_elected(&mut self) {
        if self.ring.is_empty() {
            info!(peer = %self.name, "elected leader, claiming the universe");
            self.ring.claim_for_peers(&[self.name]);
            self.consider_new_spaces();
        }
        // Re-broadcasting an already-claimed ring is harmless and
        // covers the case where our first broadcast was lost.
        self.broadcast_ring().await;
        self.try_pending_ops().await;
    }

    async fn elect_leader_if_necessary(&mut self) {
        if !self.ring.is_empty() {
            return;
        }
        match self.gossip.leader_elect().await {
            Ok(winner) if winner == self.name => {
                info!(peer = %self.name, "won leader election, claiming the universe");
                self.ring.claim_for_peers(&[self.name]);
                self.consider_new_spaces();
                self.broadcast_ring().await;
            }
            Ok(winner) => {
                debug!(%winner, "deferring bootstrap to elected leader");
                let frame = encode_frame(MessageKind::LeaderElected, &[]);
                let _ = self.gossip.gossip_unicast(winner, frame).await;
            }
            Err(e) => warn!(error = %e, "leader election failed"),
        }
    }

    async fn handle_tombstone_peer(&mut self, peer: PeerName) -> WeftResult<()> {
        if peer == self.name {
            return Err(WeftError::InvalidPeerName(
                "cannot tombstone ourselves".to_string(),
            ));
        }
        let now = (self.now)();
        self.ring.tombstone_peer(peer, self.tombstone_timeout, now)?;
        info!(%peer, "tombstoned peer");
        // Ownership of the dead peer's ranges falls to the preceding
        // live entries right away; the tombstones only block stale
        // gossip from resurrecting it.
        self.consider_new_spaces();
        self.broadcast_ring().await;
        self.try_pending_ops().await;
        Ok(())
    }

    async fn handle_shutdown(&mut self, reply: oneshot::Sender<()>) {
        info!(peer = %self.name, "allocator shutting down");
        self.shutting_down = true;
        for op in std::mem::take(&mut self.pending_allocates) {
            op.finish(Err(WeftError::ShuttingDown));
        }
        for op in std::mem::take(&mut self.pending_claims) {
            op.finish(Err(WeftError::ShuttingDown));
        }
        let now = (self.now)();
        if self
            .ring
            .tombstone_peer(self.name, self.tombstone_timeout, now)
            .is_ok()
        {
            self.broadcast_ring().await;
        }
        self.spaces = SpaceSet::new();
        let _ = reply.send(());
    }

    // Retry parked ops, claims first since they target specific
    // addresses. The allocate pass stops at the first op that still
    // cannot proceed; retrying the rest would only send more begging
    // unicasts for the same shortage.
    async fn try_pending_ops(&mut self) {
        let claims = std::mem::take(&mut self.pending_claims);
        for op in claims {
            if op.is_cancelled() {
                debug!(ident = %op.ident, "dropping cancelled claim");
                continue;
            }
            if let Some(op) = self.try_claim(op) {
                self.pending_claims.push(op);
            }
        }
        let mut allocs = std::mem::take(&mut self.pending_allocates).into_iter();
        while let Some(op) = allocs.next() {
            if op.is_cancelled() {
                debug!(ident = %op.ident, "dropping cancelled allocate");
                continue;
            }
            if let Some(op) = self.try_allocate(op).await {
                self.pending_allocates.push(op);
                self.pending_allocates.extend(allocs);
                break;
            }
        }
    }

    /// Add spaces for any ring range we own but do not track yet.
    fn consider_new_spaces(&mut self) {
        for r in self.ring.owned_ranges() {
            let gaps = self.spaces.uncovered(&r);
            for gap in gaps {
                info!(peer = %self.name, range = %gap, "taking ownership of range");
                self.spaces.add_space(Space::new(gap.start, gap.size()));
            }
        }
    }

    /// Feed actual free counts back into the ring so other peers can
    /// target their space requests.
    fn report_free(&mut self) {
        let spans = self.ring.owned_entry_spans();
        for (token, pieces) in spans {
            let free = pieces
                .iter()
                .map(|p| self.spaces.num_free_addresses_in_range(p))
                .sum();
            self.ring.report_free(token, free);
        }
    }

    // The space set must mirror the ring exactly: same territory, no
    // more, no less. Anything else means addresses can leak or double
    // allocate, so this is a panic, not an error.
    fn assert_invariants(&self) {
        let owned = coalesce(self.ring.owned_ranges());
        let have = coalesce(self.spaces.spaces().iter().map(|s| s.range()).collect());
        assert_eq!(owned, have, "space set out of step with the ring");
    }

    fn ident_owning(&self, addr: Address) -> Option<&str> {
        self.owned
            .iter()
            .find(|(_, addrs)| addrs.contains(&addr))
            .map(|(ident, _)| ident.as_str())
    }

    fn ring_frame(&self) -> Bytes {
        encode_frame(MessageKind::RingUpdate, &self.ring.encode())
    }

    async fn broadcast_ring(&mut self) {
        let frame = self.ring_frame();
        if let Err(e) = self.gossip.gossip_broadcast(frame).await {
            warn!(error = %e, "ring broadcast failed");
        }
    }

    fn status(&self) -> Status {
        Status {
            peer: self.name,
            universe: self.universe,
            entries: self
                .ring
                .entries()
                .iter()
                .map(|e| EntryStatus {
                    token: e.token,
                    peer: e.peer,
                    version: e.version,
                    tombstone: e.tombstone,
                    free: e.free,
                })
                .collect(),
            local_free: self.spaces.num_free_addresses(),
            remote_free: self.ring.total_remote_free(),
            owned_addresses: self.owned.values().map(Vec::len).sum(),
            pending_allocates: self
                .pending_allocates
                .iter()
                .map(|op| op.ident.clone())
                .collect(),
            pending_claims: self
                .pending_claims
                .iter()
                .map(|op| ClaimStatus {
                    ident: op.ident.clone(),
                    addr: op.addr,
                })
                .collect(),
        }
    }
}

/// Merge adjacent ranges; input must be sorted and disjoint.
fn coalesce(ranges: Vec<Range>) -> Vec<Range> {
    let mut out: Vec<Range> = Vec::new();
    for r in ranges {
        match out.last_mut() {
            Some(last) if last.end == r.start => last.end = r.end,
            _ => out.push(r),
        }
    }
    out
}

/// Cheap, cloneable client to a running coordinator. Also the
/// [`Gossiper`] the transport delivers into.
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<Command>,
    name: PeerName,
}

impl AllocatorHandle {
    pub fn peer_name(&self) -> PeerName {
        self.name
    }

    /// Get an address for `ident`, waiting as long as it takes.
    pub async fn allocate(&self, ident: &str) -> WeftResult<Address> {
        self.allocate_with_cancel(ident, std::future::pending()).await
    }

    /// Get an address for `ident`, giving up when `cancel` completes.
    /// A cancelled request is unparked on the coordinator; if it had
    /// already completed, the address stays with `ident` and a later
    /// allocate returns it.
    pub async fn allocate_with_cancel(
        &self,
        ident: &str,
        cancel: impl Future<Output = ()> + Send,
    ) -> WeftResult<Address> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Allocate {
                ident: ident.to_string(),
                reply,
            })
            .await
            .map_err(|_| WeftError::Stopped)?;
        tokio::pin!(cancel);
        tokio::select! {
            res = rx => res.map_err(|_| WeftError::Stopped)?,
            _ = &mut cancel => {
                let _ = self
                    .tx
                    .send(Command::CancelAllocate { ident: ident.to_string() })
                    .await;
                Err(WeftError::Cancelled)
            }
        }
    }

    /// Assign a specific address to `ident`.
    pub async fn claim(&self, ident: &str, addr: Address) -> WeftResult<()> {
        self.claim_with_cancel(ident, addr, std::future::pending())
            .await
    }

    pub async fn claim_with_cancel(
        &self,
        ident: &str,
        addr: Address,
        cancel: impl Future<Output = ()> + Send,
    ) -> WeftResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Claim {
                ident: ident.to_string(),
                addr,
                reply,
            })
            .await
            .map_err(|_| WeftError::Stopped)?;
        tokio::pin!(cancel);
        tokio::select! {
            res = rx => res.map_err(|_| WeftError::Stopped)?,
            _ = &mut cancel => {
                let _ = self
                    .tx
                    .send(Command::CancelClaim { ident: ident.to_string(), addr })
                    .await;
                Err(WeftError::Cancelled)
            }
        }
    }

    pub async fn free(&self, ident: &str, addr: Address) -> WeftResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Free {
                ident: ident.to_string(),
                addr,
                reply,
            })
            .await
            .map_err(|_| WeftError::Stopped)?;
        rx.await.map_err(|_| WeftError::Stopped)?
    }

    /// Release everything `ident` holds and retire its parked ops.
    /// Fire-and-forget; failures are logged by the coordinator.
    pub async fn container_died(&self, ident: &str) -> WeftResult<()> {
        self.tx
            .send(Command::ContainerDied {
                ident: ident.to_string(),
            })
            .await
            .map_err(|_| WeftError::Stopped)
    }

    /// Declare another peer dead, freeing its ranges for reuse after
    /// the tombstone timeout.
    pub async fn tombstone_peer(&self, peer: PeerName) -> WeftResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::TombstonePeer { peer, reply })
            .await
            .map_err(|_| WeftError::Stopped)?;
        rx.await.map_err(|_| WeftError::Stopped)?
    }

    pub async fn list_peers(&self) -> WeftResult<Vec<PeerName>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ListPeers { reply })
            .await
            .map_err(|_| WeftError::Stopped)?;
        rx.await.map_err(|_| WeftError::Stopped)
    }

    pub async fn status(&self) -> WeftResult<Status> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| WeftError::Stopped)?;
        rx.await.map_err(|_| WeftError::Stopped)
    }

    /// Tombstone ourselves, broadcast the farewell and stop the
    /// coordinator. Outstanding and future requests fail with
    /// `ShuttingDown`.
    pub async fn shutdown(&self) -> WeftResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| WeftError::Stopped)?;
        rx.await.map_err(|_| WeftError::Stopped)
    }
}

#[async_trait::async_trait]
impl Gossiper for AllocatorHandle {
    async fn on_gossip_unicast(&self, src: PeerName, payload: Bytes) -> WeftResult<()> {
        self.tx
            .send(Command::GossipUnicast { src, payload })
            .await
            .map_err(|_| WeftError::Stopped)
    }

    async fn on_gossip_broadcast(&self, payload: Bytes) -> WeftResult<()> {
        self.tx
            .send(Command::GossipBroadcast { payload })
            .await
            .map_err(|_| WeftError::Stopped)
    }

    async fn on_gossip(&self, payload: Bytes) -> WeftResult<()> {
        // Periodic state exchanges carry the same ring updates as
        // broadcasts.
        self.on_gossip_broadcast(payload).await
    }

    async fn gossip(&self) -> Option<GossipState> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Gossip { reply }).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}
