//! Chance and payout arithmetic
//!
//! Pure functions: the same settings snapshot, balances, wager and random
//! value always produce the same split. All divisions floor.

use crate::settings::Settings;
use crate::types::{Amount, DrawOutcome};
use serde::{Deserialize, Serialize};

/// Ledger effect of one resolved draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    pub outcome: DrawOutcome,
    pub chance: u64,
    /// Pool holdings including the wager
    pub total_balance: Amount,
    /// Paid to the wagerer
    pub win_amount: Amount,
    /// Paid to the owner
    pub owner_cut: Amount,
    /// Pool balance after the draw
    pub remainder: Amount,
    /// Whether the stop-mode full drain was applied
    pub drained: bool,
}

/// Chance of winning for `wagered` against `balance_before`, clipped to
/// `max_chance`.
pub fn chance_of_winning(settings: &Settings, balance_before: Amount, wagered: Amount) -> u64 {
    let spread = settings.max_chance.saturating_sub(settings.min_chance);
    if balance_before == 0 || wagered >= balance_before {
        // ratio >= 1 always reaches the cap
        return settings.max_chance;
    }
    let bonus = mul_div_floor(wagered, spread as Amount, balance_before);
    let bonus = u64::try_from(bonus).unwrap_or(u64::MAX);
    settings
        .min_chance
        .saturating_add(bonus)
        .min(settings.max_chance)
}

/// `random_value mod random_modulus <= chance`
pub fn is_win(settings: &Settings, random_value: u128, chance: u64) -> bool {
    let roll = random_value % settings.random_modulus.max(1) as u128;
    roll <= chance as u128
}

/// Computes the outcome and the full split for one draw.
pub fn compute(
    settings: &Settings,
    balance_before: Amount,
    wagered: Amount,
    random_value: u128,
    stopped_at_resolution: bool,
) -> PayoutSplit {
    let total_balance = balance_before.saturating_add(wagered);
    let chance = chance_of_winning(settings, balance_before, wagered);

    if stopped_at_resolution {
        return PayoutSplit {
            outcome: DrawOutcome::Win,
            chance,
            total_balance,
            win_amount: total_balance,
            owner_cut: 0,
            remainder: 0,
            drained: true,
        };
    }

    if !is_win(settings, random_value, chance) {
        return PayoutSplit {
            outcome: DrawOutcome::Loss,
            chance,
            total_balance,
            win_amount: 0,
            owner_cut: 0,
            remainder: total_balance,
            drained: false,
        };
    }

    let win_amount = percent_of(total_balance, settings.win_rate_pct);
    let fee_value = total_balance - win_amount;
    let owner_cut = percent_of(fee_value, settings.fee_rate_pct);

    PayoutSplit {
        outcome: DrawOutcome::Win,
        chance,
        total_balance,
        win_amount,
        owner_cut,
        remainder: fee_value - owner_cut,
        drained: false,
    }
}

/// floor(amount * pct / 100) without overflow, for `pct <= 100`
pub(crate) fn percent_of(amount: Amount, pct: u8) -> Amount {
    mul_div_floor(amount, pct as Amount, 100)
}

/// floor(a * b / d), exact for any `b <= d`.
fn mul_div_floor(a: Amount, b: Amount, d: Amount) -> Amount {
    if let Some(product) = a.checked_mul(b) {
        return product / d;
    }
    let (q, r) = (a / d, a % d);
    // q * b <= a, so only the r * b term needs wide arithmetic
    q * b + mul_div_small(r, b, d)
}

/// floor(r * b / d) for r < d, via shift-and-add keeping the running
/// remainder below d.
fn mul_div_small(r: Amount, b: Amount, d: Amount) -> Amount {
    let mut quotient: Amount = 0;
    let mut rem: Amount = 0;
    for bit in (0..Amount::BITS - b.leading_zeros()).rev() {
        quotient <<= 1;
        if rem >= d - rem {
            rem -= d - rem;
            quotient += 1;
        } else {
            rem <<= 1;
        }
        if (b >> bit) & 1 == 1 {
            if rem >= d - r {
                rem -= d - r;
                quotient += 1;
            } else {
                rem += r;
            }
        }
    }
    quotient
}
