//! Verifiable deals and the joint shared secret.
//!
//! Every participant of a DKG instance acts as a dealer exactly once. A
//! [`Deal`] carries the dealer's Feldman commitments, one encrypted share
//! per roster member and a Schnorr signature by the dealer's long-term key.
//!
//! ## Share encryption
//!
//! ```text
//! eph        = fresh key pair per deal
//! shared_j   = eph.secret * pk_j  (= sk_j * eph.public)
//! key_j      = BLAKE3::derive_key("TimeVault v1 deal-share-key",
//!                  shared_j || eph.public || pk_j || LE32(j))
//! ct_j       = ChaCha20-Poly1305(key_j, nonce = 0, f(j + 1), aad = context)
//! ```
//!
//! ## Encoding
//!
//! ```text
//! BE32 dealer || BE32 threshold || BE32 n || BE32 len(context) || context
//!   || threshold * point || point eph || n * (32 + 16) ct || 64 signature
//! ```
//!
//! The signature covers everything before it.

use std::collections::BTreeMap;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::blake3::{self, contexts};
use crate::chacha20::{self, NONCE_SIZE, TAG_SIZE};
use crate::group::{self, KeyPair, POINT_SIZE, SCALAR_SIZE};
use crate::poly::{PublicPoly, SecretPoly};
use crate::schnorr::{self, Signature, SIGNATURE_SIZE};
use crate::{CryptoError, Result};

/// Size of one encrypted share.
pub const ENCRYPTED_SHARE_SIZE: usize = SCALAR_SIZE + TAG_SIZE;

/// Largest cohort a deal may describe.
pub const MAX_COHORT: usize = 1024;

/// Longest context (SecretId) a deal may carry.
pub const MAX_CONTEXT_LEN: usize = 256;

const SHARE_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// One dealer's contribution to a DKG instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deal {
    dealer: u32,
    context: Vec<u8>,
    public: PublicPoly,
    ephemeral: EdwardsPoint,
    shares: Vec<Vec<u8>>,
    signature: Signature,
}

impl Deal {
    /// Construct and sign a deal.
    ///
    /// # Arguments
    ///
    /// * `dealer_keys` - The dealer's long-term key pair
    /// * `dealer` - The dealer's roster index
    /// * `threshold` - Reconstruction threshold (polynomial degree + 1)
    /// * `roster` - Long-term public keys of all participants, by index
    /// * `context` - Binds the deal to one DKG instance (the SecretId)
    pub fn construct<R: RngCore + CryptoRng>(
        dealer_keys: &KeyPair,
        dealer: u32,
        threshold: usize,
        roster: &[EdwardsPoint],
        context: &[u8],
        rng: &mut R,
    ) -> Result<Self> {
        check_shape(dealer, threshold, roster.len(), context.len())?;
        if roster[dealer as usize] != *dealer_keys.public() {
            return Err(CryptoError::InvalidDeal(format!(
                "dealer key does not match roster entry {dealer}"
            )));
        }

        let poly = SecretPoly::random(threshold, rng)?;
        let ephemeral = KeyPair::generate(rng);

        let mut shares = Vec::with_capacity(roster.len());
        for (j, recipient) in roster.iter().enumerate() {
            let j = j as u32;
            let shared = ephemeral.secret() * recipient;
            let key = share_key(&shared, ephemeral.public(), recipient, j);
            let share = poly.eval(j);
            shares.push(chacha20::encrypt(
                &key,
                &SHARE_NONCE,
                &group::scalar_to_bytes(&share),
                context,
            )?);
        }

        let public = poly.commit();
        let transcript = transcript(dealer, context, &public, ephemeral.public(), &shares);
        let signature = schnorr::sign(dealer_keys, &transcript, rng);
        Ok(Self {
            dealer,
            context: context.to_vec(),
            public,
            ephemeral: *ephemeral.public(),
            shares,
            signature,
        })
    }

    /// The dealer's roster index.
    pub fn dealer(&self) -> u32 {
        self.dealer
    }

    /// The DKG instance this deal belongs to.
    pub fn context(&self) -> &[u8] {
        &self.context
    }

    /// The dealer's Feldman commitments.
    pub fn public(&self) -> &PublicPoly {
        &self.public
    }

    /// Number of roster members the deal has shares for.
    pub fn cohort_size(&self) -> usize {
        self.shares.len()
    }

    /// Serialize to the canonical byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.signed_bytes();
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    /// Parse the canonical byte layout.
    ///
    /// Only structure and encodings are checked here; the signature and the
    /// shares are verified by [`Receiver::verify`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let dealer = reader.u32()?;
        let threshold = reader.u32()? as usize;
        let n = reader.u32()? as usize;
        let context_len = reader.u32()? as usize;
        check_shape(dealer, threshold, n, context_len)?;
        let context = reader.take(context_len)?.to_vec();

        let mut commits = Vec::with_capacity(threshold);
        for _ in 0..threshold {
            commits.push(group::point_from_bytes(reader.take(POINT_SIZE)?)?);
        }
        let ephemeral = group::point_from_bytes(reader.take(POINT_SIZE)?)?;
        let mut shares = Vec::with_capacity(n);
        for _ in 0..n {
            shares.push(reader.take(ENCRYPTED_SHARE_SIZE)?.to_vec());
        }
        let signature = Signature::from_bytes(reader.take(SIGNATURE_SIZE)?)?;
        reader.finish()?;

        Ok(Self {
            dealer,
            context,
            public: PublicPoly::new(commits)?,
            ephemeral,
            shares,
            signature,
        })
    }

    fn signed_bytes(&self) -> Vec<u8> {
        transcript(
            self.dealer,
            &self.context,
            &self.public,
            &self.ephemeral,
            &self.shares,
        )
    }

    /// Fingerprint of the signed transcript, for logging.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::derive_key(contexts::DEAL_TRANSCRIPT, &self.signed_bytes());
        hex::encode(&digest[..8])
    }
}

fn check_shape(dealer: u32, threshold: usize, n: usize, context_len: usize) -> Result<()> {
    if n == 0 || n > MAX_COHORT {
        return Err(CryptoError::InvalidDeal(format!("cohort size {n} out of range")));
    }
    if threshold == 0 || threshold > n {
        return Err(CryptoError::InvalidDeal(format!(
            "threshold {threshold} invalid for cohort of {n}"
        )));
    }
    if dealer as usize >= n {
        return Err(CryptoError::InvalidDeal(format!(
            "dealer index {dealer} outside cohort of {n}"
        )));
    }
    if context_len > MAX_CONTEXT_LEN {
        return Err(CryptoError::InvalidDeal(format!(
            "context too long: {context_len} bytes"
        )));
    }
    Ok(())
}

fn transcript(
    dealer: u32,
    context: &[u8],
    public: &PublicPoly,
    ephemeral: &EdwardsPoint,
    shares: &[Vec<u8>],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        16 + context.len()
            + POINT_SIZE * (public.threshold() + 1)
            + ENCRYPTED_SHARE_SIZE * shares.len(),
    );
    out.extend_from_slice(&dealer.to_be_bytes());
    out.extend_from_slice(&(public.threshold() as u32).to_be_bytes());
    out.extend_from_slice(&(shares.len() as u32).to_be_bytes());
    out.extend_from_slice(&(context.len() as u32).to_be_bytes());
    out.extend_from_slice(context);
    for commit in public.commits() {
        out.extend_from_slice(&group::point_to_bytes(commit));
    }
    out.extend_from_slice(&group::point_to_bytes(ephemeral));
    for share in shares {
        out.extend_from_slice(share);
    }
    out
}

fn share_key(
    shared: &EdwardsPoint,
    ephemeral: &EdwardsPoint,
    recipient: &EdwardsPoint,
    index: u32,
) -> [u8; 32] {
    let shared = group::point_to_bytes(shared);
    let ephemeral = group::point_to_bytes(ephemeral);
    let recipient = group::point_to_bytes(recipient);
    let index = index.to_le_bytes();
    let material = blake3::encode_multi_field(&[&shared, &ephemeral, &recipient, &index]);
    blake3::derive_key(contexts::DEAL_SHARE_KEY, &material)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CryptoError::InvalidDeal("truncated deal".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(CryptoError::InvalidDeal(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// The joint output of a completed DKG, from one participant's view.
#[derive(Clone)]
pub struct SharedSecret {
    index: u32,
    share: Scalar,
    public: PublicPoly,
}

impl SharedSecret {
    /// This participant's share index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// This participant's private share of the joint secret.
    pub fn share(&self) -> &Scalar {
        &self.share
    }

    /// The joint public polynomial.
    pub fn public(&self) -> &PublicPoly {
        &self.public
    }

    /// The joint public point `X = x * G`.
    pub fn secret_commit(&self) -> EdwardsPoint {
        self.public.secret_commit()
    }

    /// Check a peer's revealed share against the joint public polynomial.
    pub fn verify_share(&self, index: u32, share: &Scalar) -> bool {
        self.public.check(index, share)
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("index", &self.index)
            .field(
                "public",
                &hex::encode(group::point_to_bytes(&self.secret_commit())),
            )
            .finish_non_exhaustive()
    }
}

/// Verifies inbound deals for one DKG instance and accumulates the
/// decrypted shares.
pub struct Receiver {
    keys: KeyPair,
    index: u32,
    threshold: usize,
    roster: Vec<EdwardsPoint>,
    context: Vec<u8>,
    accepted: BTreeMap<u32, (Scalar, PublicPoly)>,
}

impl Receiver {
    /// Create a receiver for participant `index`.
    pub fn new(
        keys: KeyPair,
        index: u32,
        threshold: usize,
        roster: Vec<EdwardsPoint>,
        context: &[u8],
    ) -> Result<Self> {
        check_shape(index, threshold, roster.len(), context.len())?;
        if roster[index as usize] != *keys.public() {
            return Err(CryptoError::InvalidInput(format!(
                "own key does not match roster entry {index}"
            )));
        }
        Ok(Self {
            keys,
            index,
            threshold,
            roster,
            context: context.to_vec(),
            accepted: BTreeMap::new(),
        })
    }

    /// Verify a deal and return this participant's decrypted share.
    ///
    /// Checks, in order: shape against the roster, context, dealer signature,
    /// share decryption and the Feldman equation for the decrypted share.
    pub fn verify(&self, deal: &Deal) -> Result<Scalar> {
        if deal.shares.len() != self.roster.len() {
            return Err(CryptoError::InvalidDeal(format!(
                "deal has {} shares, cohort has {}",
                deal.shares.len(),
                self.roster.len()
            )));
        }
        if deal.public.threshold() != self.threshold {
            return Err(CryptoError::InvalidDeal(format!(
                "deal threshold {} differs from {}",
                deal.public.threshold(),
                self.threshold
            )));
        }
        if deal.context != self.context {
            return Err(CryptoError::InvalidDeal("context mismatch".to_string()));
        }
        let dealer_key = self
            .roster
            .get(deal.dealer as usize)
            .ok_or_else(|| CryptoError::InvalidDeal(format!("unknown dealer {}", deal.dealer)))?;
        schnorr::verify(dealer_key, &deal.signed_bytes(), &deal.signature)?;

        let shared = self.keys.secret() * deal.ephemeral;
        let key = share_key(&shared, &deal.ephemeral, self.keys.public(), self.index);
        let plaintext = chacha20::decrypt(
            &key,
            &SHARE_NONCE,
            &deal.shares[self.index as usize],
            &self.context,
        )?;
        let share = group::scalar_from_bytes(&plaintext)?;
        if !deal.public.check(self.index, &share) {
            return Err(CryptoError::InvalidShare(self.index));
        }
        Ok(share)
    }

    /// Verify and accumulate a deal. Returns the number of accepted deals.
    ///
    /// # Errors
    ///
    /// Fails if the dealer was already accepted or the deal does not verify.
    pub fn add_deal(&mut self, deal: &Deal) -> Result<usize> {
        if self.accepted.contains_key(&deal.dealer) {
            return Err(CryptoError::InvalidDeal(format!(
                "dealer {} already accepted",
                deal.dealer
            )));
        }
        let share = self.verify(deal)?;
        self.accepted
            .insert(deal.dealer, (share, deal.public.clone()));
        Ok(self.accepted.len())
    }

    /// Number of accepted deals.
    pub fn deal_count(&self) -> usize {
        self.accepted.len()
    }

    /// Whether a deal from `dealer` was accepted.
    pub fn has_deal(&self, dealer: u32) -> bool {
        self.accepted.contains_key(&dealer)
    }

    /// Sum the accepted deals into this participant's view of the joint secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InsufficientShares`] if fewer than `threshold`
    /// deals have been accepted.
    pub fn produce_shared_secret(&self) -> Result<SharedSecret> {
        if self.accepted.len() < self.threshold {
            return Err(CryptoError::InsufficientShares {
                available: self.accepted.len(),
                required: self.threshold,
            });
        }
        let mut deals = self.accepted.values();
        let (first_share, first_public) = deals
            .next()
            .ok_or(CryptoError::InsufficientShares {
                available: 0,
                required: self.threshold,
            })?;
        let mut share = *first_share;
        let mut public = first_public.clone();
        for (s, p) in deals {
            share += s;
            public = public.add(p)?;
        }
        Ok(SharedSecret {
            index: self.index,
            share,
            public,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poly::lagrange_interpolate;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    fn cohort(n: usize) -> (Vec<KeyPair>, Vec<EdwardsPoint>) {
        let keys: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate(&mut OsRng)).collect();
        let roster = keys.iter().map(|k| *k.public()).collect();
        (keys, roster)
    }

    fn run_dkg(n: usize, t: usize) -> Vec<SharedSecret> {
        let (keys, roster) = cohort(n);
        let deals: Vec<Deal> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                Deal::construct(k, i as u32, t, &roster, b"TVSS_0_0", &mut OsRng).expect("deal")
            })
            .collect();
        keys.iter()
            .enumerate()
            .map(|(i, k)| {
                let mut receiver =
                    Receiver::new(k.clone(), i as u32, t, roster.clone(), b"TVSS_0_0")
                        .expect("receiver");
                for deal in &deals {
                    let wire = Deal::from_bytes(&deal.to_bytes()).expect("decode");
                    receiver.add_deal(&wire).expect("add deal");
                }
                receiver.produce_shared_secret().expect("shared secret")
            })
            .collect()
    }

    #[test]
    fn test_deal_bytes_roundtrip() {
        let (keys, roster) = cohort(3);
        let deal =
            Deal::construct(&keys[1], 1, 2, &roster, b"TVSS_1_0", &mut OsRng).expect("deal");
        let restored = Deal::from_bytes(&deal.to_bytes()).expect("decode");
        assert_eq!(restored, deal);
        assert_eq!(restored.dealer(), 1);
        assert_eq!(restored.cohort_size(), 3);
    }

    #[test]
    fn test_truncated_deal_rejected() {
        let (keys, roster) = cohort(3);
        let deal =
            Deal::construct(&keys[0], 0, 3, &roster, b"TVSS_0_0", &mut OsRng).expect("deal");
        let bytes = deal.to_bytes();
        assert!(Deal::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(Deal::from_bytes(&extended).is_err());
    }

    #[test]
    fn test_dealer_key_must_match_roster() {
        let (keys, roster) = cohort(3);
        let result = Deal::construct(&keys[0], 1, 2, &roster, b"ctx", &mut OsRng);
        assert!(result.is_err());
    }

    #[test]
    fn test_forged_dealer_index_rejected() {
        let (keys, roster) = cohort(3);
        let deal =
            Deal::construct(&keys[0], 0, 3, &roster, b"TVSS_0_0", &mut OsRng).expect("deal");
        let mut bytes = deal.to_bytes();
        bytes[3] = 2; // claim to be dealer 2
        let forged = Deal::from_bytes(&bytes).expect("decode");
        let receiver =
            Receiver::new(keys[1].clone(), 1, 3, roster, b"TVSS_0_0").expect("receiver");
        assert!(matches!(
            receiver.verify(&forged),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn test_context_mismatch_rejected() {
        let (keys, roster) = cohort(2);
        let deal =
            Deal::construct(&keys[0], 0, 2, &roster, b"TVSS_0_0", &mut OsRng).expect("deal");
        let receiver =
            Receiver::new(keys[1].clone(), 1, 2, roster, b"TVSS_0_1").expect("receiver");
        assert!(receiver.verify(&deal).is_err());
    }

    #[test]
    fn test_duplicate_dealer_rejected() {
        let (keys, roster) = cohort(2);
        let deal =
            Deal::construct(&keys[0], 0, 2, &roster, b"ctx", &mut OsRng).expect("deal");
        let mut receiver = Receiver::new(keys[1].clone(), 1, 2, roster, b"ctx").expect("receiver");
        assert_eq!(receiver.add_deal(&deal).expect("first"), 1);
        assert!(receiver.add_deal(&deal).is_err());
        assert_eq!(receiver.deal_count(), 1);
        assert!(receiver.has_deal(0));
    }

    #[test]
    fn test_shared_secret_needs_threshold_deals() {
        let (keys, roster) = cohort(3);
        let deal =
            Deal::construct(&keys[0], 0, 2, &roster, b"ctx", &mut OsRng).expect("deal");
        let mut receiver = Receiver::new(keys[2].clone(), 2, 2, roster, b"ctx").expect("receiver");
        receiver.add_deal(&deal).expect("add");
        assert!(matches!(
            receiver.produce_shared_secret(),
            Err(CryptoError::InsufficientShares { available: 1, required: 2 })
        ));
    }

    #[test]
    fn test_dkg_shares_reconstruct_joint_secret() {
        let secrets = run_dkg(5, 3);
        let joint = secrets[0].secret_commit();
        let shares: Vec<(u32, Scalar)> = secrets
            .iter()
            .skip(1)
            .take(3)
            .map(|s| (s.index(), *s.share()))
            .collect();
        let x = lagrange_interpolate(&shares).expect("interpolate");
        assert_eq!(EdwardsPoint::mul_base(&x), joint);
        for s in &secrets {
            assert!(secrets[0].verify_share(s.index(), s.share()));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_joint_public_point_agrees(
            (n, t) in (1usize..=16).prop_flat_map(|n| (Just(n), 1..=n))
        ) {
            let secrets = run_dkg(n, t);
            let joint = secrets[0].secret_commit();
            for s in &secrets {
                prop_assert_eq!(s.secret_commit(), joint);
            }
        }
    }
}
