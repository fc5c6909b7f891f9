//! Secret registry: one entry per DKG instance.
//!
//! Entries are created on the first local `seal` or the first inbound
//! `SecInit` naming a SecretId, are never re-initialized, and live until the
//! engine shuts down. The registry is owned by the engine task.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use timevault_crypto::deal::{Receiver, SharedSecret, MAX_CONTEXT_LEN};
use timevault_crypto::group::KeyPair;
use zeroize::Zeroize;

use crate::config::Thresholds;
use crate::pool::DealPool;
use crate::{Result, VaultError};

/// Scheme tag at the front of every generated SecretId.
pub const SCHEME_TAG: &str = "TVSS";

/// Printable identifier of one DKG instance.
///
/// Generated ids have the form `TVSS_<index>_<seq>`; ids received from peers
/// are accepted as long as they are printable ASCII and short enough to
/// serve as deal context.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretId(String);

impl SecretId {
    /// The id of the `seq`-th secret sealed by node `index`.
    pub fn new(index: u32, seq: u64) -> Self {
        Self(format!("{SCHEME_TAG}_{index}_{seq}"))
    }

    /// Validate an id received from the network or a caller.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_CONTEXT_LEN {
            return Err(VaultError::InvalidArgument(format!(
                "secret id length {} out of range",
                raw.len()
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(VaultError::InvalidArgument(
                "secret id must be printable ASCII".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as deal context bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SecretId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lifecycle state of a secret at one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretState {
    /// Collecting deals.
    Dealing,
    /// Joint secret formed, timer running.
    Ready,
    /// Duration elapsed; shares may be revealed.
    Expired,
    /// A local `open` is collecting shares.
    Revealing,
    /// The joint secret has been reconstructed and cached.
    Reconstructed,
    /// The DKG could not produce a joint secret.
    Failed,
}

impl fmt::Display for SecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretState::Dealing => write!(f, "dealing"),
            SecretState::Ready => write!(f, "ready"),
            SecretState::Expired => write!(f, "expired"),
            SecretState::Revealing => write!(f, "revealing"),
            SecretState::Reconstructed => write!(f, "reconstructed"),
            SecretState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one registry entry, as returned by `TimeVault::status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretStatus {
    /// The secret.
    pub sid: SecretId,
    /// Current state.
    pub state: SecretState,
    /// Accepted deals.
    pub deals: usize,
    /// Distinct confirmation sources, including this node.
    pub confirmations: usize,
    /// Whether the duration has elapsed here.
    pub expired: bool,
    /// Time-to-live fixed by the first creator.
    pub duration: Duration,
}

/// Registry entry for one SecretId.
pub struct Secret {
    sid: SecretId,
    duration: Duration,
    pool: DealPool,
    dealt: bool,
    shared: Option<SharedSecret>,
    confirmations: BTreeSet<u32>,
    expired: bool,
    state: SecretState,
    pending_reveals: BTreeSet<u32>,
    reconstructed: Option<Scalar>,
}

impl Secret {
    /// Time-to-live, counted from the moment the joint secret is formed.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Current state.
    pub fn state(&self) -> SecretState {
        self.state
    }

    /// Whether the duration has elapsed at this node. Never reverts.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// This node's view of the joint secret, once formed.
    pub fn shared(&self) -> Option<&SharedSecret> {
        self.shared.as_ref()
    }

    /// The joint public point, once formed.
    pub fn joint_public(&self) -> Option<EdwardsPoint> {
        self.shared.as_ref().map(SharedSecret::secret_commit)
    }

    /// The cached reconstructed joint secret.
    pub fn reconstructed(&self) -> Option<&Scalar> {
        self.reconstructed.as_ref()
    }

    /// Whether this node has broadcast its own deal.
    pub fn has_dealt(&self) -> bool {
        self.dealt
    }

    pub(crate) fn set_dealt(&mut self) {
        self.dealt = true;
    }

    /// The deal pool.
    pub fn pool(&self) -> &DealPool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut DealPool {
        &mut self.pool
    }

    /// Number of distinct confirmation sources.
    pub fn confirmations(&self) -> usize {
        self.confirmations.len()
    }

    /// Remember a reveal request that arrived before expiry.
    pub(crate) fn defer_reveal(&mut self, requester: u32) {
        self.pending_reveals.insert(requester);
    }

    /// Take every deferred reveal request.
    pub(crate) fn take_pending_reveals(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending_reveals).into_iter().collect()
    }

    /// Snapshot for callers outside the engine.
    pub fn status(&self) -> SecretStatus {
        SecretStatus {
            sid: self.sid.clone(),
            state: self.state,
            deals: self.pool.len(),
            confirmations: self.confirmations.len(),
            expired: self.expired,
            duration: self.duration,
        }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Some(x) = self.reconstructed.as_mut() {
            x.zeroize();
        }
    }
}

/// SecretId to lifecycle state.
pub struct SecretRegistry {
    keys: KeyPair,
    index: u32,
    thresholds: Thresholds,
    roster: Vec<EdwardsPoint>,
    entries: HashMap<SecretId, Secret>,
}

impl SecretRegistry {
    /// Create an empty registry for node `index` of `roster`.
    pub fn new(
        keys: KeyPair,
        index: u32,
        thresholds: Thresholds,
        roster: Vec<EdwardsPoint>,
    ) -> Self {
        Self {
            keys,
            index,
            thresholds,
            roster,
            entries: HashMap::new(),
        }
    }

    /// This node's long-term key pair.
    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Long-term public keys of the cohort, by index.
    pub fn roster(&self) -> &[EdwardsPoint] {
        &self.roster
    }

    /// Number of known secrets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no secret is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an existing entry.
    pub fn get(&self, sid: &SecretId) -> Result<&Secret> {
        self.entries
            .get(sid)
            .ok_or_else(|| VaultError::UnknownSecret(sid.to_string()))
    }

    /// Look up an existing entry for mutation.
    pub fn get_mut(&mut self, sid: &SecretId) -> Result<&mut Secret> {
        self.entries
            .get_mut(sid)
            .ok_or_else(|| VaultError::UnknownSecret(sid.to_string()))
    }

    /// Return the entry for `sid`, creating it if needed.
    ///
    /// The first caller fixes the duration; a later, different duration is
    /// ignored.
    pub fn get_or_create(&mut self, sid: &SecretId, duration: Duration) -> Result<&mut Secret> {
        if !self.entries.contains_key(sid) {
            let receiver = Receiver::new(
                self.keys.clone(),
                self.index,
                self.thresholds.reconstruct,
                self.roster.clone(),
                sid.as_bytes(),
            )?;
            let mut confirmations = BTreeSet::new();
            confirmations.insert(self.index);
            let entry = Secret {
                sid: sid.clone(),
                duration,
                pool: DealPool::new(receiver, self.thresholds.verify),
                dealt: false,
                shared: None,
                confirmations,
                expired: false,
                state: SecretState::Dealing,
                pending_reveals: BTreeSet::new(),
                reconstructed: None,
            };
            tracing::debug!(node = self.index, sid = %sid, ?duration, "secret registered");
            self.entries.insert(sid.clone(), entry);
        }

        let index = self.index;
        let entry = self.get_mut(sid)?;
        if entry.duration != duration {
            tracing::debug!(
                node = index,
                sid = %sid,
                kept = ?entry.duration,
                ignored = ?duration,
                "conflicting duration ignored"
            );
        }
        Ok(entry)
    }

    /// Store the joint secret: `Dealing -> Ready`.
    pub fn mark_ready(&mut self, sid: &SecretId, shared: SharedSecret) -> Result<()> {
        let entry = self.get_mut(sid)?;
        if entry.state != SecretState::Dealing || entry.shared.is_some() {
            return Err(VaultError::InvalidArgument(format!(
                "{sid} cannot become ready from {}",
                entry.state
            )));
        }
        entry.shared = Some(shared);
        entry.state = SecretState::Ready;
        Ok(())
    }

    /// Flip the expired flag: `Ready -> Expired`. Returns `false` if the
    /// flag was already set.
    pub fn mark_expired(&mut self, sid: &SecretId) -> Result<bool> {
        let entry = self.get_mut(sid)?;
        if entry.expired {
            return Ok(false);
        }
        entry.expired = true;
        if entry.state == SecretState::Ready {
            entry.state = SecretState::Expired;
        }
        Ok(true)
    }

    /// Record a confirmation from `from`. Returns the number of distinct sources.
    pub fn confirm(&mut self, sid: &SecretId, from: u32) -> Result<usize> {
        let entry = self.get_mut(sid)?;
        entry.confirmations.insert(from);
        Ok(entry.confirmations.len())
    }

    /// `Expired -> Revealing`.
    pub fn mark_revealing(&mut self, sid: &SecretId) -> Result<()> {
        let entry = self.get_mut(sid)?;
        if entry.state == SecretState::Expired {
            entry.state = SecretState::Revealing;
        }
        Ok(())
    }

    /// `Revealing -> Expired`, after a reveal round gave up.
    pub fn abandon_reveal(&mut self, sid: &SecretId) -> Result<()> {
        let entry = self.get_mut(sid)?;
        if entry.state == SecretState::Revealing {
            entry.state = SecretState::Expired;
        }
        Ok(())
    }

    /// Cache the reconstructed joint secret: `Revealing -> Reconstructed`.
    pub fn mark_reconstructed(&mut self, sid: &SecretId, secret: Scalar) -> Result<()> {
        let entry = self.get_mut(sid)?;
        entry.reconstructed = Some(secret);
        entry.state = SecretState::Reconstructed;
        Ok(())
    }

    /// The DKG cannot complete: `Dealing -> Failed`.
    pub fn mark_failed(&mut self, sid: &SecretId) -> Result<()> {
        let entry = self.get_mut(sid)?;
        entry.state = SecretState::Failed;
        Ok(())
    }
}
