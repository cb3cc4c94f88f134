//! Pool ledger: spendable balance, stop flag and owner
//!
//! Outgoing transfers are tallied per recipient in `disbursed` so payouts,
//! owner fees and refunds can be audited after the fact.

use crate::errors::{StateError, ValidationError, WagerError, WagerResult};
use crate::types::{Amount, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLedger {
    balance: Amount,
    stopped: bool,
    owner: Identity,
    #[serde(default)]
    disbursed: HashMap<Identity, Amount>,
}

impl PoolLedger {
    pub fn new(owner: Identity) -> Self {
        Self {
            balance: 0,
            stopped: false,
            owner,
            disbursed: HashMap::new(),
        }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn disbursed_to(&self, who: &Identity) -> Amount {
        self.disbursed.get(who).copied().unwrap_or(0)
    }

    /// Administrative top-up of the pool.
    pub fn credit(&mut self, amount: Amount) -> WagerResult<Amount> {
        if amount == 0 {
            return Err(ValidationError::ZeroCredit.into());
        }
        if self.stopped {
            return Err(StateError::Stopped.into());
        }
        self.add(amount)
    }

    /// Takes a wager into the pool. Not gated by the stop flag: the engine
    /// checks that before opening a draw.
    pub(crate) fn accept_wager(&mut self, amount: Amount) -> WagerResult<Amount> {
        self.add(amount)
    }

    /// Moves `amount` out of the pool to `to`.
    pub(crate) fn debit(&mut self, to: &Identity, amount: Amount) -> WagerResult<Amount> {
        let remaining = self.balance.checked_sub(amount).ok_or_else(|| {
            WagerError::Internal(format!(
                "debit of {} exceeds pool balance {}",
                amount, self.balance
            ))
        })?;
        self.balance = remaining;
        if amount > 0 {
            *self.disbursed.entry(to.clone()).or_insert(0) += amount;
        }
        Ok(self.balance)
    }

    pub(crate) fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub(crate) fn set_owner(&mut self, owner: Identity) -> Identity {
        std::mem::replace(&mut self.owner, owner)
    }

    fn add(&mut self, amount: Amount) -> WagerResult<Amount> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| WagerError::Internal("pool balance overflow".to_string()))?;
        Ok(self.balance)
    }
}
