//! Wagerpool - shared-pool wagering engine
//!
//! Wagerers stake against a common pool. Each wager opens a single draw that
//! waits for an external randomness oracle; the draw resolves into a loss
//! (the stake stays in the pool) or a win (most of the pool goes to the
//! wagerer, a fee to the owner). A draw the oracle never answers can be
//! recovered by anyone after a timeout.

pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod factory;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod payout;
pub mod recovery;
pub mod settings;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, OracleKind, WagerPoolConfig};
pub use engine::{DrawSession, EngineSnapshot, EngineState, Resolution, WagerPool};
pub use errors::{ErrorKind, WagerError, WagerResult};
pub use events::PoolEvent;
pub use factory::{OracleHandle, PoolFactory};
pub use oracle::{OracleRegistry, RandomnessConsumer, RandomnessOracle};
pub use payout::PayoutSplit;
pub use recovery::RecoveryWatchdog;
pub use settings::Settings;
pub use types::{Amount, DrawOutcome, Identity, OpenDraw, RequestId, Timestamp};
