//! Per-secret deal buffer.
//!
//! Wraps the crypto [`Receiver`] with the bookkeeping the engine needs: at
//! most one accepted deal per dealer, a sticky rejection list, and a
//! completion predicate that fires exactly once, when the number of accepted
//! deals reaches the verification threshold R.

use std::collections::BTreeSet;

use timevault_crypto::deal::{Deal, Receiver, SharedSecret};

use crate::Result;

/// Outcome of offering a deal to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The deal verified and was stored.
    Accepted {
        /// Accepted deals after this one.
        count: usize,
        /// True only for the insertion that reached the quorum.
        complete: bool,
    },
    /// A deal from this dealer was already accepted; nothing changed.
    Duplicate,
    /// The deal (or an earlier one from this dealer) failed verification.
    Rejected(String),
}

/// Deal accumulator for one DKG instance.
pub struct DealPool {
    receiver: Receiver,
    rejected: BTreeSet<u32>,
    quorum: usize,
    completed: bool,
}

impl DealPool {
    /// Create a pool that completes at `quorum` accepted deals.
    pub fn new(receiver: Receiver, quorum: usize) -> Self {
        Self {
            receiver,
            rejected: BTreeSet::new(),
            quorum,
            completed: false,
        }
    }

    /// Offer the deal `bytes` received from roster index `from`.
    pub fn insert(&mut self, from: u32, bytes: &[u8]) -> Insertion {
        if self.rejected.contains(&from) {
            return Insertion::Rejected(format!("dealer {from} previously rejected"));
        }
        if self.receiver.has_deal(from) {
            return Insertion::Duplicate;
        }

        let deal = match Deal::from_bytes(bytes) {
            Ok(deal) => deal,
            Err(e) => return self.reject(from, e.to_string()),
        };
        if deal.dealer() != from {
            return self.reject(
                from,
                format!("deal names dealer {} but arrived from {from}", deal.dealer()),
            );
        }
        match self.receiver.add_deal(&deal) {
            Ok(count) => {
                let complete = !self.completed && count >= self.quorum;
                if complete {
                    self.completed = true;
                }
                Insertion::Accepted { count, complete }
            }
            Err(e) => self.reject(from, e.to_string()),
        }
    }

    fn reject(&mut self, from: u32, reason: String) -> Insertion {
        self.rejected.insert(from);
        Insertion::Rejected(reason)
    }

    /// Number of accepted deals.
    pub fn len(&self) -> usize {
        self.receiver.deal_count()
    }

    /// Whether no deal has been accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the completion predicate has fired.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Combine the accepted deals into this node's share of the joint secret.
    pub fn shared_secret(&self) -> Result<SharedSecret> {
        Ok(self.receiver.produce_shared_secret()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::edwards::EdwardsPoint;
    use rand::rngs::OsRng;
    use timevault_crypto::group::KeyPair;

    struct Fixture {
        keys: Vec<KeyPair>,
        roster: Vec<EdwardsPoint>,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let keys: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate(&mut OsRng)).collect();
            let roster = keys.iter().map(|k| *k.public()).collect();
            Self { keys, roster }
        }

        fn pool(&self, index: u32, threshold: usize, quorum: usize) -> DealPool {
            let receiver = Receiver::new(
                self.keys[index as usize].clone(),
                index,
                threshold,
                self.roster.clone(),
                b"TVSS_0_0",
            )
            .expect("receiver");
            DealPool::new(receiver, quorum)
        }

        fn deal(&self, dealer: u32, threshold: usize) -> Vec<u8> {
            Deal::construct(
                &self.keys[dealer as usize],
                dealer,
                threshold,
                &self.roster,
                b"TVSS_0_0",
                &mut OsRng,
            )
            .expect("deal")
            .to_bytes()
        }
    }

    #[test]
    fn test_completion_fires_once() {
        let fx = Fixture::new(3);
        let mut pool = fx.pool(0, 2, 3);
        assert_eq!(
            pool.insert(0, &fx.deal(0, 2)),
            Insertion::Accepted { count: 1, complete: false }
        );
        assert_eq!(
            pool.insert(1, &fx.deal(1, 2)),
            Insertion::Accepted { count: 2, complete: false }
        );
        assert_eq!(
            pool.insert(2, &fx.deal(2, 2)),
            Insertion::Accepted { count: 3, complete: true }
        );
        assert!(pool.is_complete());
        let shared = pool.shared_secret().expect("shared secret");
        assert_eq!(shared.index(), 0);
    }

    #[test]
    fn test_duplicate_leaves_count_unchanged() {
        let fx = Fixture::new(2);
        let mut pool = fx.pool(1, 2, 2);
        let deal = fx.deal(0, 2);
        assert!(matches!(pool.insert(0, &deal), Insertion::Accepted { .. }));
        assert_eq!(pool.insert(0, &deal), Insertion::Duplicate);
        assert_eq!(pool.insert(0, &fx.deal(0, 2)), Insertion::Duplicate);
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_complete());
    }

    #[test]
    fn test_rejection_is_sticky() {
        let fx = Fixture::new(3);
        let mut pool = fx.pool(0, 3, 3);
        assert!(matches!(pool.insert(1, b"garbage"), Insertion::Rejected(_)));
        assert!(matches!(
            pool.insert(1, &fx.deal(1, 3)),
            Insertion::Rejected(_)
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_deal_relayed_by_wrong_sender_rejected() {
        let fx = Fixture::new(3);
        let mut pool = fx.pool(0, 3, 3);
        assert!(matches!(
            pool.insert(2, &fx.deal(1, 3)),
            Insertion::Rejected(_)
        ));
        // The honest dealer is unaffected.
        assert!(matches!(
            pool.insert(1, &fx.deal(1, 3)),
            Insertion::Accepted { count: 1, .. }
        ));
    }

    #[test]
    fn test_wrong_threshold_rejected() {
        let fx = Fixture::new(3);
        let mut pool = fx.pool(0, 3, 3);
        assert!(matches!(
            pool.insert(1, &fx.deal(1, 2)),
            Insertion::Rejected(_)
        ));
    }
}
