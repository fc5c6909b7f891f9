//! Engine configuration.
//!
//! Loaded from the `[vault]` table of the daemon's TOML file or built in
//! code. Threshold values left unset default to the cohort size, so the
//! default cohort needs every node for both dealing and reconstruction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// How long an `open` waits for shares before giving up.
    #[serde(default = "default_reveal_timeout_ms")]
    pub reveal_timeout_ms: u64,
    /// Capacity of the engine inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Threshold parameters.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// Threshold parameters as configured. `None` means "cohort size".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// T: shares needed to reconstruct (polynomial degree + 1).
    #[serde(default)]
    pub reconstruct: Option<usize>,
    /// R: verified deals needed to complete a DKG.
    #[serde(default)]
    pub verify: Option<usize>,
}

/// Threshold parameters resolved against a cohort of `cohort` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// T.
    pub reconstruct: usize,
    /// R.
    pub verify: usize,
    /// N.
    pub cohort: usize,
}

/// Inbox slots reserved per cohort member, one per protocol message kind.
pub const INBOX_SLOTS_PER_MEMBER: usize = 4;

/// Smallest inbox accepted for a cohort of `cohort` nodes.
pub fn min_inbox_capacity(cohort: usize) -> usize {
    cohort.saturating_mul(INBOX_SLOTS_PER_MEMBER)
}

fn default_reveal_timeout_ms() -> u64 {
    10_000
}

fn default_inbox_capacity() -> usize {
    256
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            reveal_timeout_ms: default_reveal_timeout_ms(),
            inbox_capacity: default_inbox_capacity(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl VaultConfig {
    /// The reveal timeout as a [`Duration`].
    pub fn reveal_timeout(&self) -> Duration {
        Duration::from_millis(self.reveal_timeout_ms)
    }

    /// Check the settings that do not depend on the cohort.
    pub fn validate(&self) -> Result<()> {
        if self.reveal_timeout_ms == 0 {
            return Err(VaultError::InvalidArgument(
                "reveal_timeout_ms must be positive".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(VaultError::InvalidArgument(
                "inbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check every setting against a cohort of `cohort` nodes and resolve
    /// the thresholds.
    pub fn validate_for(&self, cohort: usize) -> Result<Thresholds> {
        self.validate()?;
        let thresholds = self.thresholds.resolve(cohort)?;
        let min = min_inbox_capacity(cohort);
        if self.inbox_capacity < min {
            return Err(VaultError::InvalidArgument(format!(
                "inbox_capacity {} below {min} for a cohort of {cohort}",
                self.inbox_capacity
            )));
        }
        Ok(thresholds)
    }
}

impl ThresholdConfig {
    /// Resolve against a cohort of `cohort` nodes, enforcing `1 <= T <= R <= N`.
    pub fn resolve(&self, cohort: usize) -> Result<Thresholds> {
        if cohort == 0 {
            return Err(VaultError::InvalidArgument("empty cohort".to_string()));
        }
        let verify = self.verify.unwrap_or(cohort);
        let reconstruct = self.reconstruct.unwrap_or(verify);
        if reconstruct == 0 || reconstruct > verify || verify > cohort {
            return Err(VaultError::InvalidArgument(format!(
                "thresholds must satisfy 1 <= T <= R <= N, got T={reconstruct} R={verify} N={cohort}"
            )));
        }
        Ok(Thresholds {
            reconstruct,
            verify,
            cohort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_to_cohort() {
        let t = ThresholdConfig::default().resolve(5).expect("resolve");
        assert_eq!(
            t,
            Thresholds {
                reconstruct: 5,
                verify: 5,
                cohort: 5
            }
        );
    }

    #[test]
    fn test_reconstruct_defaults_to_verify() {
        let cfg = ThresholdConfig {
            reconstruct: None,
            verify: Some(3),
        };
        let t = cfg.resolve(5).expect("resolve");
        assert_eq!((t.reconstruct, t.verify), (3, 3));
    }

    #[test]
    fn test_ordering_enforced() {
        let bad = [
            (Some(0), Some(3)),
            (Some(4), Some(3)),
            (Some(2), Some(6)),
        ];
        for (reconstruct, verify) in bad {
            let cfg = ThresholdConfig {
                reconstruct,
                verify,
            };
            assert!(cfg.resolve(5).is_err(), "{cfg:?} should be rejected");
        }
        assert!(ThresholdConfig::default().resolve(0).is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let cfg: VaultConfig = toml::from_str(
            r#"
            reveal_timeout_ms = 2500

            [thresholds]
            reconstruct = 2
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.reveal_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.inbox_capacity, 256);
        assert_eq!(cfg.thresholds.reconstruct, Some(2));
        assert_eq!(cfg.thresholds.verify, None);
        cfg.validate().expect("valid");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = VaultConfig {
            reveal_timeout_ms: 0,
            ..VaultConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inbox_capacity_scales_with_cohort() {
        assert_eq!(min_inbox_capacity(5), 20);
        let cfg = VaultConfig {
            inbox_capacity: 19,
            ..VaultConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert!(matches!(
            cfg.validate_for(5),
            Err(VaultError::InvalidArgument(_))
        ));
        let t = cfg.validate_for(4).expect("16 slots suffice for 4 nodes");
        assert_eq!(t.cohort, 4);
        assert!(VaultConfig::default().validate_for(64).is_ok());
        assert!(VaultConfig::default().validate_for(65).is_err());
    }
}
