//! Alert state machine for the print a printer is currently tracking.
//!
//! ```text
//!            raise                 acknowledge(mute=false) / clear
//!  Normal ─────────► Alerting ─────────────────────────────────► Acknowledged
//!    ▲                 │  ▲                                           │
//!    │                 │  └──────────── raise ─────────────────────────┘
//!    │   acknowledge(mute=true)
//!    │                 ▼
//!    │               Muted ── clear / acknowledge(mute=false) ──► Acknowledged
//!    │
//!    └──── print start (a fresh ActivePrint always begins in Normal)
//! ```
//!
//! Raising while already alerting refreshes the timestamp and drops any
//! acknowledgment. A muted acknowledgment records that a human saw the alert
//! but keeps `alerted_at` set so notification tracking is unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert sub-state of an active print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlertState {
    /// No alert raised, or a fresh print.
    #[default]
    Normal,
    /// A failure alert is raised and nobody has acknowledged it.
    Alerting { alerted_at: DateTime<Utc> },
    /// Alert raised, then acknowledged without clearing it.
    Muted {
        alerted_at: DateTime<Utc>,
        acknowledged_at: DateTime<Utc>,
    },
    /// Alert acknowledged and cleared.
    Acknowledged { acknowledged_at: DateTime<Utc> },
}

/// What an alert operation actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// Nothing to act on: the printer is not tracking a print.
    NoActivePrint,
    /// Alert raised; `refreshed` when an alert was already raised.
    Raised {
        alerted_at: DateTime<Utc>,
        refreshed: bool,
    },
    /// Acknowledgment recorded. `had_alert` is false for a permissive
    /// acknowledgment of a printer that was not alerting.
    Acknowledged {
        acknowledged_at: DateTime<Utc>,
        muted: bool,
        had_alert: bool,
    },
    /// Alert flag reset and acknowledgment recorded.
    Cleared {
        acknowledged_at: DateTime<Utc>,
        had_alert: bool,
    },
}

impl Transition {
    /// Whether the operation changed any alert field.
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::NoActivePrint)
    }
}

impl AlertState {
    /// When the current alert was raised, if one is outstanding.
    pub fn alerted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AlertState::Alerting { alerted_at } | AlertState::Muted { alerted_at, .. } => {
                Some(*alerted_at)
            }
            AlertState::Normal | AlertState::Acknowledged { .. } => None,
        }
    }

    /// When the alert was last acknowledged.
    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AlertState::Muted {
                acknowledged_at, ..
            }
            | AlertState::Acknowledged { acknowledged_at } => Some(*acknowledged_at),
            AlertState::Normal | AlertState::Alerting { .. } => None,
        }
    }

    /// An alert is outstanding (acknowledged or not).
    pub fn is_alerting(&self) -> bool {
        self.alerted_at().is_some()
    }

    /// An alert is outstanding and nobody has seen it yet.
    pub fn awaiting_acknowledgment(&self) -> bool {
        matches!(self, AlertState::Alerting { .. })
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Normal => "normal",
            AlertState::Alerting { .. } => "alerting",
            AlertState::Muted { .. } => "muted",
            AlertState::Acknowledged { .. } => "acknowledged",
        }
    }

    /// Raise (or refresh) the alert. Clears any acknowledgment.
    pub fn raise(&mut self, now: DateTime<Utc>) -> Transition {
        let refreshed = self.is_alerting();
        *self = AlertState::Alerting { alerted_at: now };
        Transition::Raised {
            alerted_at: now,
            refreshed,
        }
    }

    /// Record an acknowledgment.
    ///
    /// Unmuted acknowledgment also clears the alert in the same step; muted
    /// acknowledgment keeps `alerted_at` as it was.
    pub fn acknowledge(&mut self, now: DateTime<Utc>, mute: bool) -> Transition {
        let had_alert = self.is_alerting();
        if !mute {
            *self = AlertState::Acknowledged {
                acknowledged_at: now,
            };
        } else {
            *self = match self.alerted_at() {
                Some(alerted_at) => AlertState::Muted {
                    alerted_at,
                    acknowledged_at: now,
                },
                None => AlertState::Acknowledged {
                    acknowledged_at: now,
                },
            };
        }
        Transition::Acknowledged {
            acknowledged_at: now,
            muted: mute,
            had_alert,
        }
    }

    /// Reset the alert flag and stamp the acknowledgment.
    pub fn clear(&mut self, now: DateTime<Utc>) -> Transition {
        let had_alert = self.is_alerting();
        *self = AlertState::Acknowledged {
            acknowledged_at: now,
        };
        Transition::Cleared {
            acknowledged_at: now,
            had_alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_raise_from_normal() {
        let mut state = AlertState::Normal;
        let transition = state.raise(t(0));

        assert_eq!(state.alerted_at(), Some(t(0)));
        assert_eq!(state.acknowledged_at(), None);
        assert_eq!(
            transition,
            Transition::Raised {
                alerted_at: t(0),
                refreshed: false
            }
        );
    }

    #[test]
    fn test_raise_is_idempotent_and_refreshes() {
        let mut state = AlertState::Normal;
        state.raise(t(0));
        state.acknowledge(t(1), true);
        assert_eq!(state.acknowledged_at(), Some(t(1)));

        let transition = state.raise(t(2));
        assert_eq!(state, AlertState::Alerting { alerted_at: t(2) });
        assert!(matches!(transition, Transition::Raised { refreshed: true, .. }));
    }

    #[test]
    fn test_unmuted_acknowledge_clears_alert() {
        let mut state = AlertState::Alerting { alerted_at: t(0) };
        state.acknowledge(t(3), false);

        assert_eq!(state.alerted_at(), None);
        assert_eq!(state.acknowledged_at(), Some(t(3)));
        assert!(!state.is_alerting());
    }

    #[test]
    fn test_muted_acknowledge_keeps_alert() {
        let mut state = AlertState::Alerting { alerted_at: t(0) };
        let transition = state.acknowledge(t(3), true);

        assert_eq!(state.alerted_at(), Some(t(0)));
        assert_eq!(state.acknowledged_at(), Some(t(3)));
        assert!(state.is_alerting());
        assert!(!state.awaiting_acknowledgment());
        assert_eq!(
            transition,
            Transition::Acknowledged {
                acknowledged_at: t(3),
                muted: true,
                had_alert: true
            }
        );
    }

    #[test]
    fn test_acknowledge_without_alert_is_explicit() {
        let mut state = AlertState::Normal;
        let transition = state.acknowledge(t(1), true);

        assert_eq!(state, AlertState::Acknowledged { acknowledged_at: t(1) });
        assert!(matches!(
            transition,
            Transition::Acknowledged { had_alert: false, .. }
        ));
    }

    #[test]
    fn test_clear() {
        let mut state = AlertState::Muted {
            alerted_at: t(0),
            acknowledged_at: t(1),
        };
        let transition = state.clear(t(5));

        assert_eq!(state, AlertState::Acknowledged { acknowledged_at: t(5) });
        assert_eq!(
            transition,
            Transition::Cleared {
                acknowledged_at: t(5),
                had_alert: true
            }
        );
    }

    #[test]
    fn test_serde_tagging() {
        let state = AlertState::Alerting {
            alerted_at: t(0) + Duration::seconds(1),
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["state"], "alerting");

        let back: AlertState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
