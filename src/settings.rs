//! Rule sets for the pool and the active/pending settings epoch
//!
//! A queued rule set only goes live after the draw that is open at queue
//! time has resolved, so a wager is always priced with the rules that were
//! active when it was accepted.

use crate::errors::{ValidationError, WagerResult};
use crate::types::{Amount, Identity};
use serde::{Deserialize, Serialize};

/// One complete rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Random values are reduced modulo this before comparing to the chance
    pub random_modulus: u64,
    pub min_chance: u64,
    pub max_chance: u64,
    /// Share of the pool paid to a winner, in percent
    pub win_rate_pct: u8,
    /// Share of the non-winning remainder paid to the owner, in percent
    pub fee_rate_pct: u8,
    /// Minimum wager as a percent of the pool balance
    pub min_bet_pct: u8,
    /// Adapter allowed to deliver randomness for draws opened under these rules
    pub oracle_identity: Identity,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            random_modulus: 10_000,
            min_chance: 10,
            max_chance: 1_000,
            win_rate_pct: 90,
            fee_rate_pct: 90,
            min_bet_pct: 1,
            oracle_identity: Identity::new("randomizer"),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> WagerResult<()> {
        if self.random_modulus == 0 {
            return Err(invalid("random_modulus must be greater than zero"));
        }
        if self.min_chance > self.max_chance {
            return Err(invalid(format!(
                "min_chance {} exceeds max_chance {}",
                self.min_chance, self.max_chance
            )));
        }
        if self.win_rate_pct > 100 {
            return Err(invalid(format!("win_rate_pct {} exceeds 100", self.win_rate_pct)));
        }
        if self.fee_rate_pct > 100 {
            return Err(invalid(format!("fee_rate_pct {} exceeds 100", self.fee_rate_pct)));
        }
        if self.min_bet_pct > 100 {
            return Err(invalid(format!("min_bet_pct {} exceeds 100", self.min_bet_pct)));
        }
        if self.oracle_identity.is_empty() {
            return Err(invalid("oracle_identity must not be empty"));
        }
        Ok(())
    }

    /// Smallest wager accepted against `balance` (floor division)
    pub fn minimum_wager(&self, balance: Amount) -> Amount {
        crate::payout::percent_of(balance, self.min_bet_pct)
    }
}

fn invalid(reason: impl Into<String>) -> crate::errors::WagerError {
    ValidationError::InvalidSettings(reason.into()).into()
}

/// Active rules plus at most one queued update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsStore {
    active: Settings,
    pending: Option<Settings>,
}

impl SettingsStore {
    pub fn new(active: Settings) -> WagerResult<Self> {
        active.validate()?;
        Ok(Self {
            active,
            pending: None,
        })
    }

    pub fn active(&self) -> &Settings {
        &self.active
    }

    pub fn pending(&self) -> Option<&Settings> {
        self.pending.as_ref()
    }

    /// Validate and queue; replaces any update queued earlier.
    pub fn queue_update(&mut self, new_settings: Settings) -> WagerResult<()> {
        new_settings.validate()?;
        self.pending = Some(new_settings);
        Ok(())
    }

    /// Make the queued update live. Returns the promoted rules, if any.
    pub fn promote_pending(&mut self) -> Option<&Settings> {
        let next = self.pending.take()?;
        self.active = next;
        Some(&self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_chance_range() {
        let settings = Settings {
            min_chance: 200,
            max_chance: 100,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.reason(), "invalid settings");
    }

    #[test]
    fn test_rejects_rates_over_100() {
        for settings in [
            Settings { win_rate_pct: 101, ..Settings::default() },
            Settings { fee_rate_pct: 150, ..Settings::default() },
            Settings { min_bet_pct: 101, ..Settings::default() },
            Settings { random_modulus: 0, ..Settings::default() },
        ] {
            assert!(settings.validate().is_err());
        }
    }

    #[test]
    fn test_minimum_wager_floors() {
        let settings = Settings::default();
        assert_eq!(settings.minimum_wager(1000), 10);
        assert_eq!(settings.minimum_wager(1099), 10);
        assert_eq!(settings.minimum_wager(50), 0);
    }

    #[test]
    fn test_minimum_wager_exact_for_huge_balance() {
        let settings = Settings {
            min_bet_pct: 50,
            ..Settings::default()
        };
        assert_eq!(settings.minimum_wager(u128::MAX), u128::MAX / 2);
        assert_eq!(settings.minimum_wager(u128::MAX - 1), u128::MAX / 2);
    }

    #[test]
    fn test_queue_and_promote() {
        let mut store = SettingsStore::new(Settings::default()).unwrap();
        assert!(store.pending().is_none());
        assert!(store.promote_pending().is_none());

        let next = Settings {
            win_rate_pct: 50,
            ..Settings::default()
        };
        store.queue_update(next.clone()).unwrap();
        assert_eq!(store.active(), &Settings::default());
        assert_eq!(store.pending(), Some(&next));

        assert_eq!(store.promote_pending(), Some(&next));
        assert_eq!(store.active(), &next);
        assert!(store.pending().is_none());
    }

    #[test]
    fn test_invalid_update_leaves_pending_untouched() {
        let mut store = SettingsStore::new(Settings::default()).unwrap();
        let bad = Settings {
            min_chance: 5,
            max_chance: 1,
            ..Settings::default()
        };
        assert!(store.queue_update(bad).is_err());
        assert!(store.pending().is_none());
    }
}
