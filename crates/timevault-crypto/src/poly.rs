//! Secret polynomials, Feldman commitments and Lagrange interpolation.
//!
//! A dealer samples a [`SecretPoly`] `f` of degree `t - 1`; its
//! [`PublicPoly`] is the vector of commitments `C_k = a_k * G`. Participant
//! `i` receives `f(i + 1)` and checks it with `f(i + 1) * G == sum_k C_k * (i + 1)^k`.
//! Any `t` distinct evaluations recover `f(0)` by Lagrange interpolation.

use std::collections::BTreeMap;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::group::index_scalar;
use crate::{CryptoError, Result};

/// A secret polynomial with `threshold` coefficients.
#[derive(Clone)]
pub struct SecretPoly {
    coeffs: Vec<Scalar>,
}

impl SecretPoly {
    /// Sample a random polynomial of degree `threshold - 1`.
    pub fn random<R: RngCore + CryptoRng>(threshold: usize, rng: &mut R) -> Result<Self> {
        if threshold == 0 {
            return Err(CryptoError::InvalidInput(
                "threshold must be at least 1".to_string(),
            ));
        }
        let coeffs = (0..threshold).map(|_| Scalar::random(rng)).collect();
        Ok(Self { coeffs })
    }

    /// Number of coefficients (the reconstruction threshold).
    pub fn threshold(&self) -> usize {
        self.coeffs.len()
    }

    /// The shared secret `f(0)`.
    pub fn secret(&self) -> Scalar {
        self.coeffs[0]
    }

    /// Evaluate the share of participant `index`.
    pub fn eval(&self, index: u32) -> Scalar {
        let x = index_scalar(index);
        self.coeffs
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coeff| acc * x + coeff)
    }

    /// Commit to every coefficient.
    pub fn commit(&self) -> PublicPoly {
        PublicPoly {
            commits: self.coeffs.iter().map(EdwardsPoint::mul_base).collect(),
        }
    }
}

impl Drop for SecretPoly {
    fn drop(&mut self) {
        self.coeffs.zeroize();
    }
}

/// Feldman commitments to a [`SecretPoly`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicPoly {
    commits: Vec<EdwardsPoint>,
}

impl PublicPoly {
    /// Wrap decoded commitments.
    pub fn new(commits: Vec<EdwardsPoint>) -> Result<Self> {
        if commits.is_empty() {
            return Err(CryptoError::InvalidInput(
                "public polynomial needs at least one commitment".to_string(),
            ));
        }
        Ok(Self { commits })
    }

    /// Number of commitments (the reconstruction threshold).
    pub fn threshold(&self) -> usize {
        self.commits.len()
    }

    /// The commitments, constant term first.
    pub fn commits(&self) -> &[EdwardsPoint] {
        &self.commits
    }

    /// Commitment to the secret: `f(0) * G`.
    pub fn secret_commit(&self) -> EdwardsPoint {
        self.commits[0]
    }

    /// Evaluate the public share of participant `index`: `f(index + 1) * G`.
    pub fn eval(&self, index: u32) -> EdwardsPoint {
        let x = index_scalar(index);
        self.commits
            .iter()
            .rev()
            .fold(EdwardsPoint::identity(), |acc, commit| acc * x + commit)
    }

    /// Check that `share` is the evaluation at `index`.
    pub fn check(&self, index: u32, share: &Scalar) -> bool {
        EdwardsPoint::mul_base(share) == self.eval(index)
    }

    /// Coefficient-wise sum of two public polynomials.
    pub fn add(&self, other: &PublicPoly) -> Result<PublicPoly> {
        if self.threshold() != other.threshold() {
            return Err(CryptoError::InvalidInput(format!(
                "threshold mismatch: {} vs {}",
                self.threshold(),
                other.threshold()
            )));
        }
        let commits = self
            .commits
            .iter()
            .zip(&other.commits)
            .map(|(a, b)| a + b)
            .collect();
        Ok(PublicPoly { commits })
    }
}

/// Interpolate `f(0)` from `(index, f(index + 1))` pairs.
///
/// # Errors
///
/// Returns [`CryptoError::InsufficientShares`] for an empty input and
/// [`CryptoError::InvalidInput`] for duplicate indices.
pub fn lagrange_interpolate(shares: &[(u32, Scalar)]) -> Result<Scalar> {
    if shares.is_empty() {
        return Err(CryptoError::InsufficientShares {
            available: 0,
            required: 1,
        });
    }

    let mut seen = std::collections::BTreeSet::new();
    for (index, _) in shares {
        if !seen.insert(*index) {
            return Err(CryptoError::InvalidInput(format!(
                "duplicate share index {index}"
            )));
        }
    }

    let mut secret = Scalar::ZERO;
    for (i, (index_i, share_i)) in shares.iter().enumerate() {
        let x_i = index_scalar(*index_i);
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for (j, (index_j, _)) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            let x_j = index_scalar(*index_j);
            numerator *= x_j;
            denominator *= x_j - x_i;
        }
        secret += share_i * numerator * denominator.invert();
    }
    Ok(secret)
}

/// Accumulator of private shares during reconstruction.
///
/// Holds at most one share per participant index.
#[derive(Clone)]
pub struct ShareSet {
    threshold: usize,
    shares: BTreeMap<u32, Scalar>,
}

impl ShareSet {
    /// Create an empty accumulator that completes at `threshold` shares.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            shares: BTreeMap::new(),
        }
    }

    /// Insert a share; returns `false` if `index` is already present.
    pub fn insert(&mut self, index: u32, share: Scalar) -> bool {
        if self.shares.contains_key(&index) {
            return false;
        }
        self.shares.insert(index, share);
        true
    }

    /// Number of distinct shares collected.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether no share has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// The reconstruction threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether enough shares are present to reconstruct.
    pub fn is_complete(&self) -> bool {
        self.shares.len() >= self.threshold
    }

    /// Reconstruct the secret from the first `threshold` shares.
    pub fn reconstruct(&self) -> Result<Scalar> {
        if !self.is_complete() {
            return Err(CryptoError::InsufficientShares {
                available: self.shares.len(),
                required: self.threshold,
            });
        }
        let subset: Vec<(u32, Scalar)> = self
            .shares
            .iter()
            .take(self.threshold)
            .map(|(i, s)| (*i, *s))
            .collect();
        lagrange_interpolate(&subset)
    }
}

impl Drop for ShareSet {
    fn drop(&mut self) {
        for share in self.shares.values_mut() {
            share.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_public_eval_matches_secret_eval() {
        let poly = SecretPoly::random(3, &mut OsRng).expect("poly");
        let public = poly.commit();
        for i in 0..5 {
            assert!(public.check(i, &poly.eval(i)));
        }
        assert_eq!(public.secret_commit(), EdwardsPoint::mul_base(&poly.secret()));
    }

    #[test]
    fn test_wrong_share_fails_check() {
        let poly = SecretPoly::random(3, &mut OsRng).expect("poly");
        let public = poly.commit();
        assert!(!public.check(1, &poly.eval(2)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(SecretPoly::random(0, &mut OsRng).is_err());
    }

    #[test]
    fn test_public_poly_add() {
        let a = SecretPoly::random(2, &mut OsRng).expect("poly");
        let b = SecretPoly::random(2, &mut OsRng).expect("poly");
        let sum = a.commit().add(&b.commit()).expect("add");
        assert!(sum.check(3, &(a.eval(3) + b.eval(3))));
    }

    #[test]
    fn test_public_poly_add_mismatch() {
        let a = SecretPoly::random(2, &mut OsRng).expect("poly");
        let b = SecretPoly::random(3, &mut OsRng).expect("poly");
        assert!(a.commit().add(&b.commit()).is_err());
    }

    #[test]
    fn test_interpolate_duplicate_rejected() {
        let s = Scalar::ONE;
        assert!(lagrange_interpolate(&[(1, s), (1, s)]).is_err());
    }

    #[test]
    fn test_share_set_dedupes() {
        let mut set = ShareSet::new(2);
        assert!(set.insert(0, Scalar::ONE));
        assert!(!set.insert(0, Scalar::ZERO));
        assert_eq!(set.len(), 1);
        assert!(!set.is_complete());
        assert!(set.reconstruct().is_err());
    }

    #[test]
    fn test_share_set_reconstructs() {
        let poly = SecretPoly::random(3, &mut OsRng).expect("poly");
        let mut set = ShareSet::new(3);
        for i in [4, 0, 2] {
            set.insert(i, poly.eval(i));
        }
        assert!(set.is_complete());
        assert_eq!(set.reconstruct().expect("reconstruct"), poly.secret());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_any_t_shares_reconstruct(
            (n, t, picks) in (1u32..=16)
                .prop_flat_map(|n| (Just(n), 1..=n))
                .prop_flat_map(|(n, t)| {
                    (Just(n), Just(t), proptest::sample::subsequence((0..n).collect::<Vec<_>>(), t as usize))
                })
        ) {
            let poly = SecretPoly::random(t as usize, &mut OsRng).expect("poly");
            prop_assert!(picks.len() == t as usize && t <= n);
            let shares: Vec<(u32, Scalar)> = picks.iter().map(|&i| (i, poly.eval(i))).collect();
            prop_assert_eq!(lagrange_interpolate(&shares).expect("interpolate"), poly.secret());
        }
    }
}
