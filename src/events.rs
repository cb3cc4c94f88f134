//! Engine events for downstream consumers (notifiers, dashboards, loggers)
//!
//! Published on a broadcast channel; a slow subscriber lags and skips rather
//! than holding up the engine.

use crate::settings::Settings;
use crate::types::{Amount, Identity, RequestId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    PoolCredited {
        amount: Amount,
        new_total: Amount,
    },
    WagerPlaced {
        wagerer: Identity,
        amount: Amount,
        request_id: RequestId,
        new_total: Amount,
    },
    DrawLost {
        wager_amount: Amount,
        draw_count: u64,
        new_total: Amount,
    },
    DrawWon {
        winner: Identity,
        win_amount: Amount,
        owner_cut: Amount,
        draw_count: u64,
        new_total: Amount,
        drained: bool,
    },
    DrawRecovered {
        wagerer: Identity,
        refunded: Amount,
        new_total: Amount,
    },
    SettingsQueued {
        settings: Settings,
    },
    SettingsPromoted {
        settings: Settings,
    },
    StoppedChanged {
        stopped: bool,
    },
    OwnerTransferred {
        previous: Identity,
        new: Identity,
    },
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::PoolCredited { .. } => "pool_credited",
            PoolEvent::WagerPlaced { .. } => "wager_placed",
            PoolEvent::DrawLost { .. } => "draw_lost",
            PoolEvent::DrawWon { .. } => "draw_won",
            PoolEvent::DrawRecovered { .. } => "draw_recovered",
            PoolEvent::SettingsQueued { .. } => "settings_queued",
            PoolEvent::SettingsPromoted { .. } => "settings_promoted",
            PoolEvent::StoppedChanged { .. } => "stopped_changed",
            PoolEvent::OwnerTransferred { .. } => "owner_transferred",
        }
    }
}

/// Fan-out publisher for [`PoolEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PoolEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
