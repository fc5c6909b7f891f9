//! The protocol engine.
//!
//! One task owns the registry, every deal pool, every reveal round and the
//! timers. It is fed by a single bounded inbox carrying network messages,
//! API commands, timer events and delivery failures, and handles them one
//! at a time:
//!
//! ```text
//! Inbound --forwarder--> Input::Network -----+
//! TimeVault ------------> Input::Command -----+--> inbox --> Engine::run
//! TimerService ---------> Input::Timer -------+
//! deliver --------------> Input::Undelivered -+
//!
//! Engine --> Outbox --deliver--> Transport
//! ```
//!
//! Handlers never await. Outbound messages go through the [`Outbox`] so a
//! slow peer cannot stall the engine.
//!
//! Handler errors caused by peers (bad deals, unknown secrets, forged
//! sources) are logged and dropped; only errors caused by a local command
//! are returned, through that command's reply channel.

use std::collections::HashMap;
use std::time::Duration;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use timevault_crypto::deal::Deal;
use timevault_crypto::group::{self, KeyPair};
use timevault_crypto::poly::ShareSet;
use timevault_transport::messages::{RevInit, RevShare, SecConf, SecInit};
use timevault_transport::{Inbound, Message, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Thresholds;
use crate::outbox::Outbox;
use crate::pool::Insertion;
use crate::registry::{SecretId, SecretRegistry, SecretState, SecretStatus};
use crate::timer::{TimerKey, TimerService};
use crate::{Result, VaultError};

/// Everything the engine reacts to.
pub enum Input {
    /// A decoded message from roster index `from`.
    Network {
        /// Transport-level sender.
        from: u32,
        /// The message.
        msg: Message,
    },
    /// A request from the local API.
    Command(Command),
    /// A timer fired.
    Timer(TimerKey),
    /// A queued broadcast reached no peer.
    Undelivered {
        /// The message.
        msg: Message,
        /// Why it failed.
        error: TransportError,
    },
}

/// Requests from [`TimeVault`](crate::TimeVault).
pub enum Command {
    /// Start a new DKG; reply with the SecretId and joint public point once
    /// the joint secret is formed.
    Seal {
        /// Time-to-live of the secret.
        duration: Duration,
        /// Reply channel.
        reply: oneshot::Sender<Result<(SecretId, EdwardsPoint)>>,
    },
    /// Reconstruct the joint secret of an expired secret.
    Open {
        /// Secret to open.
        sid: SecretId,
        /// Reply channel.
        reply: oneshot::Sender<Result<Scalar>>,
    },
    /// Snapshot one registry entry.
    Status {
        /// Secret to inspect.
        sid: SecretId,
        /// Reply channel.
        reply: oneshot::Sender<Result<SecretStatus>>,
    },
    /// Stop the engine, cancelling every waiter.
    Shutdown,
}

/// A local `open` collecting shares.
struct Reveal {
    attempt: u64,
    shares: ShareSet,
    waiters: Vec<oneshot::Sender<Result<Scalar>>>,
}

/// Engine state. Lives on its own task, see [`Engine::run`].
pub struct Engine {
    outbox: Outbox,
    index: u32,
    thresholds: Thresholds,
    reveal_timeout: Duration,
    registry: SecretRegistry,
    timers: TimerService,
    next_seq: u64,
    next_attempt: u64,
    ready_waiters: HashMap<SecretId, Vec<oneshot::Sender<Result<(SecretId, EdwardsPoint)>>>>,
    reveals: HashMap<SecretId, Reveal>,
}

impl Engine {
    /// Build the engine for node `index`. `inbox` is the sending half of the
    /// engine's own inbox, used by the timers.
    pub fn new(
        index: u32,
        keys: KeyPair,
        thresholds: Thresholds,
        roster: Vec<EdwardsPoint>,
        reveal_timeout: Duration,
        inbox: mpsc::Sender<Input>,
        outbox: Outbox,
    ) -> Self {
        Self {
            outbox,
            index,
            thresholds,
            reveal_timeout,
            registry: SecretRegistry::new(keys, index, thresholds, roster),
            timers: TimerService::new(inbox),
            next_seq: 0,
            next_attempt: 0,
            ready_waiters: HashMap::new(),
            reveals: HashMap::new(),
        }
    }

    /// Process inputs until shutdown or until every sender is gone, then
    /// abort the `background` tasks feeding and draining the engine.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Input>,
        background: Vec<JoinHandle<()>>,
    ) {
        tracing::info!(
            node = self.index,
            cohort = self.thresholds.cohort,
            reconstruct = self.thresholds.reconstruct,
            verify = self.thresholds.verify,
            "engine started"
        );

        while let Some(input) = inbox.recv().await {
            match input {
                Input::Network { from, msg } => self.handle_message(from, msg),
                Input::Command(Command::Shutdown) => break,
                Input::Command(command) => self.handle_command(command),
                Input::Timer(key) => self.handle_timer(key),
                Input::Undelivered { msg, error } => self.on_undelivered(msg, error),
            }
        }

        for task in background {
            task.abort();
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.timers.cancel_all();
        let mut cancelled = 0usize;
        for (_, waiters) in self.ready_waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(VaultError::Cancelled));
                cancelled += 1;
            }
        }
        for (_, reveal) in self.reveals.drain() {
            for waiter in reveal.waiters {
                let _ = waiter.send(Err(VaultError::Cancelled));
                cancelled += 1;
            }
        }
        tracing::info!(
            node = self.index,
            secrets = self.registry.len(),
            cancelled,
            "engine stopped"
        );
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    fn handle_message(&mut self, from: u32, msg: Message) {
        if msg.src_index() != from {
            tracing::warn!(
                node = self.index,
                from,
                claimed = msg.src_index(),
                kind = msg.kind(),
                "source index mismatch, dropping"
            );
            return;
        }
        let sid = match SecretId::parse(msg.sid()) {
            Ok(sid) => sid,
            Err(e) => {
                tracing::warn!(node = self.index, from, error = %e, "bad secret id, dropping");
                return;
            }
        };

        match msg {
            Message::SecInit(m) => self.on_sec_init(from, sid, m),
            Message::SecConf(_) => self.on_sec_conf(from, sid),
            Message::RevInit(_) => self.on_rev_init(from, sid),
            Message::RevShare(m) => self.on_rev_share(from, sid, m),
        }
    }

    fn on_sec_init(&mut self, from: u32, sid: SecretId, msg: SecInit) {
        if msg.duration_ms == 0 {
            tracing::warn!(node = self.index, from, sid = %sid, "zero duration, dropping");
            return;
        }
        let duration = Duration::from_millis(msg.duration_ms);
        match self.registry.get_or_create(&sid, duration) {
            Ok(entry) if entry.state() == SecretState::Failed => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(node = self.index, sid = %sid, error = %e, "cannot register secret");
                return;
            }
        }

        if let Err(e) = self.deal_once(&sid) {
            tracing::warn!(node = self.index, sid = %sid, error = %e, "own deal not sent");
        }
        self.offer_deal(&sid, from, &msg.deal);
    }

    fn on_sec_conf(&mut self, from: u32, sid: SecretId) {
        match self.registry.confirm(&sid, from) {
            Ok(count) => {
                tracing::debug!(
                    node = self.index,
                    sid = %sid,
                    from,
                    progress = %format!("{count}/{}", self.thresholds.cohort),
                    "confirmation recorded"
                );
                if count == self.thresholds.cohort {
                    tracing::info!(node = self.index, sid = %sid, "secret confirmed by whole cohort");
                }
            }
            Err(e) => {
                tracing::warn!(node = self.index, from, error = %e, "confirmation for unknown secret");
            }
        }
    }

    fn on_rev_init(&mut self, from: u32, sid: SecretId) {
        let entry = match self.registry.get_mut(&sid) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(node = self.index, from, error = %e, "reveal request for unknown secret");
                return;
            }
        };
        if !entry.is_expired() {
            entry.defer_reveal(from);
            tracing::debug!(node = self.index, sid = %sid, from, "reveal request deferred until expiry");
            return;
        }
        self.send_share(&sid, from);
    }

    fn on_rev_share(&mut self, from: u32, sid: SecretId, msg: RevShare) {
        let Some(reveal) = self.reveals.get_mut(&sid) else {
            tracing::debug!(node = self.index, sid = %sid, from, "share without pending open, dropping");
            return;
        };
        let shared = match self.registry.get(&sid).map(|e| e.shared()) {
            Ok(Some(shared)) => shared,
            _ => return,
        };
        if msg.share_index != from {
            tracing::warn!(node = self.index, sid = %sid, from, share_index = msg.share_index, "share index mismatch, dropping");
            return;
        }
        let share = match group::scalar_from_bytes(&msg.share) {
            Ok(share) if shared.verify_share(msg.share_index, &share) => share,
            _ => {
                tracing::warn!(node = self.index, sid = %sid, from, "invalid share, dropping");
                return;
            }
        };
        if !reveal.shares.insert(msg.share_index, share) {
            tracing::debug!(node = self.index, sid = %sid, from, "duplicate share");
            return;
        }
        tracing::debug!(
            node = self.index,
            sid = %sid,
            from,
            progress = %format!("{}/{}", reveal.shares.len(), reveal.shares.threshold()),
            "share collected"
        );
        if reveal.shares.is_complete() {
            self.finish_reveal(&sid);
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Seal { duration, reply } => self.seal(duration, reply),
            Command::Open { sid, reply } => self.open(sid, reply),
            Command::Status { sid, reply } => {
                let _ = reply.send(self.registry.get(&sid).map(|e| e.status()));
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn seal(
        &mut self,
        duration: Duration,
        reply: oneshot::Sender<Result<(SecretId, EdwardsPoint)>>,
    ) {
        let sid = SecretId::new(self.index, self.next_seq);
        self.next_seq += 1;

        if let Err(e) = self.registry.get_or_create(&sid, duration) {
            let _ = reply.send(Err(e));
            return;
        }
        tracing::info!(node = self.index, sid = %sid, ?duration, "sealing");
        self.ready_waiters.entry(sid.clone()).or_default().push(reply);

        if let Err(e) = self.deal_once(&sid) {
            tracing::warn!(node = self.index, sid = %sid, error = %e, "seal aborted");
            let _ = self.registry.mark_failed(&sid);
            self.notify_ready(&sid, Err(e));
        }
    }

    fn open(&mut self, sid: SecretId, reply: oneshot::Sender<Result<Scalar>>) {
        let entry = match self.registry.get(&sid) {
            Ok(entry) => entry,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if let Some(x) = entry.reconstructed() {
            let _ = reply.send(Ok(*x));
            return;
        }
        if entry.state() == SecretState::Failed {
            let _ = reply.send(Err(VaultError::CryptoFailure(format!(
                "DKG for {sid} failed"
            ))));
            return;
        }
        if !entry.is_expired() {
            let _ = reply.send(Err(VaultError::NotYetExpired(sid.to_string())));
            return;
        }
        let Some(shared) = entry.shared() else {
            let _ = reply.send(Err(VaultError::CryptoFailure(format!(
                "no share held for {sid}"
            ))));
            return;
        };
        let own_index = shared.index();
        let own_share = *shared.share();

        if let Some(reveal) = self.reveals.get_mut(&sid) {
            reveal.waiters.push(reply);
            tracing::debug!(node = self.index, sid = %sid, "open joins pending reveal, re-requesting shares");
            self.request_shares(&sid);
            return;
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let mut shares = ShareSet::new(self.thresholds.reconstruct);
        shares.insert(own_index, own_share);
        self.reveals.insert(
            sid.clone(),
            Reveal {
                attempt,
                shares,
                waiters: vec![reply],
            },
        );
        let _ = self.registry.mark_revealing(&sid);
        tracing::info!(node = self.index, sid = %sid, attempt, "opening");

        if self.thresholds.reconstruct == 1 {
            self.finish_reveal(&sid);
            return;
        }
        self.timers
            .arm(TimerKey::RevealDeadline(sid.clone(), attempt), self.reveal_timeout);
        self.request_shares(&sid);
    }

    fn request_shares(&self, sid: &SecretId) {
        self.outbox.broadcast(Message::RevInit(RevInit {
            src_index: self.index,
            sid: sid.to_string(),
        }));
    }

    // ------------------------------------------------------------------
    // Delivery failures
    // ------------------------------------------------------------------

    fn on_undelivered(&mut self, msg: Message, error: TransportError) {
        let sid = match SecretId::parse(msg.sid()) {
            Ok(sid) => sid,
            Err(_) => return,
        };
        let err = VaultError::from(error);
        match msg {
            // Only a sealer waits on its own deal.
            Message::SecInit(_) if self.ready_waiters.contains_key(&sid) => {
                tracing::warn!(node = self.index, sid = %sid, error = %err, "seal aborted");
                let _ = self.registry.mark_failed(&sid);
                self.notify_ready(&sid, Err(err));
            }
            Message::RevInit(_) => {
                let Some(reveal) = self.reveals.remove(&sid) else {
                    return;
                };
                tracing::warn!(node = self.index, sid = %sid, error = %err, "reveal request not sent");
                self.timers
                    .disarm(&TimerKey::RevealDeadline(sid.clone(), reveal.attempt));
                let _ = self.registry.abandon_reveal(&sid);
                for waiter in reveal.waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn handle_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Expired(sid) => self.on_expired(sid),
            TimerKey::RevealDeadline(sid, attempt) => self.on_reveal_deadline(sid, attempt),
        }
    }

    fn on_expired(&mut self, sid: SecretId) {
        let pending = match self.registry.mark_expired(&sid) {
            Ok(true) => match self.registry.get_mut(&sid) {
                Ok(entry) => entry.take_pending_reveals(),
                Err(_) => return,
            },
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(node = self.index, error = %e, "timer for unknown secret");
                return;
            }
        };
        tracing::info!(node = self.index, sid = %sid, deferred = pending.len(), "secret expired");
        for requester in pending {
            self.send_share(&sid, requester);
        }
    }

    fn on_reveal_deadline(&mut self, sid: SecretId, attempt: u64) {
        let stale = self
            .reveals
            .get(&sid)
            .map_or(true, |reveal| reveal.attempt != attempt);
        if stale {
            return;
        }
        let Some(reveal) = self.reveals.remove(&sid) else {
            return;
        };
        let _ = self.registry.abandon_reveal(&sid);
        tracing::warn!(
            node = self.index,
            sid = %sid,
            have = reveal.shares.len(),
            need = reveal.shares.threshold(),
            "reveal timed out"
        );
        for waiter in reveal.waiters {
            let _ = waiter.send(Err(VaultError::ReconstructionFailed {
                sid: sid.to_string(),
                have: reveal.shares.len(),
                need: reveal.shares.threshold(),
            }));
        }
    }

    // ------------------------------------------------------------------
    // DKG
    // ------------------------------------------------------------------

    /// Construct, queue and store this node's deal for `sid`, once.
    ///
    /// The own deal is offered to the pool right after it is queued, so a
    /// later delivery failure cannot leave the node dealt but without it.
    fn deal_once(&mut self, sid: &SecretId) -> Result<()> {
        let entry = self.registry.get_mut(sid)?;
        if entry.has_dealt() {
            return Ok(());
        }
        entry.set_dealt();
        let duration = entry.duration();

        let deal = Deal::construct(
            self.registry.keys(),
            self.index,
            self.thresholds.reconstruct,
            self.registry.roster(),
            sid.as_bytes(),
            &mut OsRng,
        )?;
        tracing::debug!(node = self.index, sid = %sid, fingerprint = %deal.fingerprint(), "deal constructed");
        let bytes = deal.to_bytes();

        let msg = Message::SecInit(SecInit {
            src_index: self.index,
            sid: sid.to_string(),
            deal: bytes.clone(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
        if self.thresholds.cohort > 1 {
            self.outbox.broadcast(msg);
        }
        self.offer_deal(sid, self.index, &bytes);
        Ok(())
    }

    fn offer_deal(&mut self, sid: &SecretId, from: u32, bytes: &[u8]) {
        let entry = match self.registry.get_mut(sid) {
            Ok(entry) => entry,
            Err(_) => return,
        };
        let insertion = entry.pool_mut().insert(from, bytes);
        match insertion {
            Insertion::Accepted { count, complete } => {
                tracing::debug!(
                    node = self.index,
                    sid = %sid,
                    dealer = from,
                    progress = %format!("{count}/{}", self.thresholds.verify),
                    "deal accepted"
                );
                if complete {
                    self.complete_dkg(sid);
                }
            }
            Insertion::Duplicate => {
                tracing::debug!(node = self.index, sid = %sid, dealer = from, "duplicate deal ignored");
            }
            Insertion::Rejected(reason) => {
                tracing::warn!(node = self.index, sid = %sid, dealer = from, %reason, "deal rejected");
            }
        }
    }

    fn complete_dkg(&mut self, sid: &SecretId) {
        let outcome = self
            .registry
            .get(sid)
            .and_then(|entry| entry.pool().shared_secret());
        let shared = match outcome {
            Ok(shared) => shared,
            Err(e) => {
                tracing::warn!(node = self.index, sid = %sid, error = %e, "joint secret not formed");
                let _ = self.registry.mark_failed(sid);
                self.notify_ready(sid, Err(e));
                return;
            }
        };
        let joint = shared.secret_commit();
        if let Err(e) = self.registry.mark_ready(sid, shared) {
            tracing::warn!(node = self.index, sid = %sid, error = %e, "secret not marked ready");
            return;
        }
        let duration = match self.registry.get(sid) {
            Ok(entry) => entry.duration(),
            Err(_) => return,
        };
        tracing::info!(
            node = self.index,
            sid = %sid,
            joint = %hex::encode(group::point_to_bytes(&joint)),
            "joint secret formed"
        );

        self.timers.arm(TimerKey::Expired(sid.clone()), duration);
        self.notify_ready(sid, Ok((sid.clone(), joint)));

        if self.thresholds.cohort > 1 {
            let msg = Message::SecConf(SecConf {
                src_index: self.index,
                sid: sid.to_string(),
            });
            self.outbox.broadcast(msg);
        }
    }

    fn notify_ready(&mut self, sid: &SecretId, outcome: Result<(SecretId, EdwardsPoint)>) {
        for waiter in self.ready_waiters.remove(sid).unwrap_or_default() {
            let _ = waiter.send(outcome.clone());
        }
    }

    // ------------------------------------------------------------------
    // Reveal
    // ------------------------------------------------------------------

    fn send_share(&self, sid: &SecretId, to: u32) {
        if to == self.index {
            return;
        }
        let Ok(Some(shared)) = self.registry.get(sid).map(|e| e.shared()) else {
            return;
        };
        let msg = Message::RevShare(RevShare {
            src_index: self.index,
            sid: sid.to_string(),
            share_index: shared.index(),
            share: group::scalar_to_bytes(shared.share()),
        });
        self.outbox.send_to(to, msg);
        tracing::debug!(node = self.index, sid = %sid, to, "share revealed");
    }

    fn finish_reveal(&mut self, sid: &SecretId) {
        let Some(reveal) = self.reveals.remove(sid) else {
            return;
        };
        self.timers
            .disarm(&TimerKey::RevealDeadline(sid.clone(), reveal.attempt));

        let joint = self.registry.get(sid).ok().and_then(|e| e.joint_public());
        let outcome = match reveal.shares.reconstruct() {
            Ok(x) if Some(EdwardsPoint::mul_base(&x)) == joint => Ok(x),
            Ok(_) => Err(VaultError::CryptoFailure(format!(
                "reconstructed secret for {sid} does not match joint public point"
            ))),
            Err(e) => Err(VaultError::from(e)),
        };
        match &outcome {
            Ok(x) => {
                let _ = self.registry.mark_reconstructed(sid, *x);
                tracing::info!(node = self.index, sid = %sid, "secret reconstructed");
            }
            Err(e) => {
                let _ = self.registry.abandon_reveal(sid);
                tracing::warn!(node = self.index, sid = %sid, error = %e, "reconstruction failed");
            }
        }
        for waiter in reveal.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Pump decoded frames from `inbound` into the engine inbox.
///
/// Frames that fail to decode are dropped. Stops when the inbound channel or
/// the engine inbox closes.
pub async fn forward_inbound(index: u32, mut inbound: Inbound, inbox: mpsc::Sender<Input>) {
    while let Some((from, decoded)) = inbound.recv().await {
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(node = index, from, error = %e, "undecodable frame, dropping");
                continue;
            }
        };
        if inbox.send(Input::Network { from, msg }).await.is_err() {
            tracing::debug!(node = index, "engine inbox closed, forwarder stopping");
            return;
        }
    }
}
