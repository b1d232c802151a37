//! Operator and admin notifications
//!
//! The engine emits structured [`Event`]s; a [`Notifier`] decides how they
//! are delivered. Delivery failures are logged by the caller and never
//! affect trading decisions.

pub mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

use crate::error::NotifyError;
use crate::oms::RejectReason;
use crate::scheduler::report::CycleReport;
use crate::scheduler::window::TimeWindow;
use crate::types::{HaltCause, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The person running the ladders
    Operator,
    /// Maintainer; receives diagnostics as well
    Admin,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Operator => write!(f, "operator"),
            Channel::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Login {
        account_id: String,
        success: bool,
    },
    OrderSubmitted {
        ladder_id: String,
        instrument: String,
        tier_id: String,
        side: Side,
        price: f64,
        quantity: i64,
    },
    OrderRejected {
        ladder_id: String,
        tier_id: String,
        side: Side,
        reason: RejectReason,
    },
    OrderFailed {
        ladder_id: String,
        side: Side,
        detail: String,
    },
    HaltEngaged {
        ladder_id: String,
        side: Side,
        cause: HaltCause,
    },
    DriftExcess {
        ladder_id: String,
        tier_id: String,
        raw_difference: i64,
        threshold: i64,
    },
    FillDetected {
        ladder_id: String,
        instrument: String,
        change: i64,
        quantity: i64,
    },
    DailyReset {
        ladder_id: String,
        date: NaiveDate,
    },
    BlackoutEntered {
        window: TimeWindow,
    },
    BlackoutExited,
    ActuatorLost,
    SessionLost,
    CycleSummary(Box<CycleReport>),
}

impl Event {
    /// Default audience of the event
    pub fn channel(&self) -> Channel {
        match self {
            Event::OrderRejected { .. } | Event::OrderFailed { .. } | Event::DriftExcess { .. } => {
                Channel::Admin
            }
            _ => Channel::Operator,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Login { .. } => "login",
            Event::OrderSubmitted { .. } => "order_submitted",
            Event::OrderRejected { .. } => "order_rejected",
            Event::OrderFailed { .. } => "order_failed",
            Event::HaltEngaged { .. } => "halt_engaged",
            Event::DriftExcess { .. } => "drift_excess",
            Event::FillDetected { .. } => "fill_detected",
            Event::DailyReset { .. } => "daily_reset",
            Event::BlackoutEntered { .. } => "blackout_entered",
            Event::BlackoutExited => "blackout_exited",
            Event::ActuatorLost => "actuator_lost",
            Event::SessionLost => "session_lost",
            Event::CycleSummary(_) => "cycle_summary",
        }
    }

    /// Whether the event reports a problem
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Event::Login { success: false, .. }
                | Event::OrderFailed { .. }
                | Event::HaltEngaged { .. }
                | Event::DriftExcess { .. }
                | Event::ActuatorLost
                | Event::SessionLost
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Login {
                account_id,
                success: true,
            } => write!(f, "Logged in: {}", account_id),
            Event::Login {
                account_id,
                success: false,
            } => write!(f, "Login failed: {}", account_id),
            Event::OrderSubmitted {
                ladder_id,
                instrument,
                tier_id,
                side,
                price,
                quantity,
            } => write!(
                f,
                "[{}] {} {} x{} @ {:.2} submitted (tier {})",
                ladder_id, side, instrument, quantity, price, tier_id
            ),
            Event::OrderRejected {
                ladder_id,
                tier_id,
                side,
                reason,
            } => write!(f, "[{}] {} rejected at tier {}: {}", ladder_id, side, tier_id, reason),
            Event::OrderFailed {
                ladder_id,
                side,
                detail,
            } => write!(f, "[{}] {} order failed: {}", ladder_id, side, detail),
            Event::HaltEngaged {
                ladder_id,
                side,
                cause,
            } => write!(f, "[{}] {} halted: {}", ladder_id, side, cause),
            Event::DriftExcess {
                ladder_id,
                tier_id,
                raw_difference,
                threshold,
            } => write!(
                f,
                "[{}] holdings differ from tier {} by {:+} (threshold {})",
                ladder_id, tier_id, raw_difference, threshold
            ),
            Event::FillDetected {
                ladder_id,
                instrument,
                change,
                quantity,
            } => write!(
                f,
                "[{}] {} holding changed by {:+}, now {}",
                ladder_id, instrument, change, quantity
            ),
            Event::DailyReset { ladder_id, date } => {
                write!(f, "[{}] daily statistics reset for {}", ladder_id, date)
            }
            Event::BlackoutEntered { window } => {
                write!(f, "Blackout {} started, trading suspended", window)
            }
            Event::BlackoutExited => write!(f, "Blackout over, trading resumed"),
            Event::ActuatorLost => write!(f, "Trading terminal not available, sweep aborted"),
            Event::SessionLost => write!(f, "Trading session lost, reconnecting"),
            Event::CycleSummary(report) => write!(f, "{}", report),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: Channel, event: &Event) -> Result<(), NotifyError>;
}

/// Writes events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: Channel, event: &Event) -> Result<(), NotifyError> {
        if event.is_alert() {
            warn!(channel = %channel, kind = event.kind(), "{}", event);
        } else {
            info!(channel = %channel, kind = event.kind(), "{}", event);
        }
        Ok(())
    }
}

/// Keeps every event in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<(Channel, Event)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Channel, Event)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|(_, e)| e.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, channel: Channel, event: &Event) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel, event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        let rejected = Event::OrderRejected {
            ladder_id: "L1".to_string(),
            tier_id: "B".to_string(),
            side: Side::Buy,
            reason: RejectReason::ZeroQuantity,
        };
        assert_eq!(rejected.channel(), Channel::Admin);
        assert_eq!(Event::BlackoutExited.channel(), Channel::Operator);
        assert!(Event::SessionLost.is_alert());
        assert!(!Event::BlackoutExited.is_alert());
    }

    #[test]
    fn test_messages() {
        let halt = Event::HaltEngaged {
            ladder_id: "L1".to_string(),
            side: Side::Sell,
            cause: HaltCause::PriceDeviation,
        };
        assert_eq!(halt.to_string(), "[L1] sell halted: order price too far from market");

        let drift = Event::DriftExcess {
            ladder_id: "L1".to_string(),
            tier_id: "C".to_string(),
            raw_difference: -60,
            threshold: 50,
        };
        assert_eq!(
            drift.to_string(),
            "[L1] holdings differ from tier C by -60 (threshold 50)"
        );
    }

    #[tokio::test]
    async fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier
            .notify(Channel::Operator, &Event::BlackoutExited)
            .await
            .unwrap();
        notifier
            .notify(Channel::Admin, &Event::SessionLost)
            .await
            .unwrap();
        assert_eq!(notifier.kinds(), vec!["blackout_exited", "session_lost"]);
        assert_eq!(notifier.count("session_lost"), 1);
        notifier.clear();
        assert!(notifier.events().is_empty());
    }
}
