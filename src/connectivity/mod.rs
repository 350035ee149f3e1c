//! Connectivity tracking.
//!
//! A small state machine decides when replay starts and stops:
//!
//! ```text
//! Offline ──Online──▶ OnlineSyncing ──SyncFinished──▶ OnlineIdle
//!    ▲                      │                            │
//!    └──────Offline─────────┴────────────Offline─────────┘
//! ```
//!
//! [`StateMachine`] is pure; [`monitor`] drives it from network events and
//! owns the sync task, and [`probe`] samples a health URL to produce those
//! events.

pub mod monitor;
pub mod probe;

pub use monitor::{ConnectivityMonitor, MonitorHandle};
pub use probe::{ConnectivityProbe, HttpProbe, ProbeResult};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Offline,
    OnlineSyncing,
    OnlineIdle,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::OnlineSyncing => "online_syncing",
            Self::OnlineIdle => "online_idle",
        }
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse link speed, slowest first. `Unknown` sorts last so an
/// unmeasured link never blocks a sync.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Slow2g => "slow-2g",
            Self::TwoG => "2g",
            Self::ThreeG => "3g",
            Self::FourG => "4g",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest measurement of the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionQuality {
    pub effective_type: EffectiveType,
    pub metered: bool,
    pub rtt_ms: Option<u64>,
}

/// When an automatic sync may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub suppress_on_metered: bool,
    pub min_effective_type: EffectiveType,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            suppress_on_metered: false,
            min_effective_type: EffectiveType::Slow2g,
        }
    }
}

impl SyncPolicy {
    #[must_use]
    pub fn allows(&self, quality: &ConnectionQuality) -> bool {
        if self.suppress_on_metered && quality.metered {
            return false;
        }
        quality.effective_type >= self.min_effective_type
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
    SyncFinished,
    /// The user asked for a sync; bypasses the policy.
    SyncRequested,
    Quality(ConnectionQuality),
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    StartSync,
    AbortSync,
    NoOp,
}

/// Pure connectivity state machine.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
    policy: SyncPolicy,
    quality: ConnectionQuality,
    /// Online, but the policy held the sync back.
    deferred: bool,
}

impl StateMachine {
    #[must_use]
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            state: ConnectionState::Offline,
            policy,
            quality: ConnectionQuality::default(),
            deferred: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn quality(&self) -> ConnectionQuality {
        self.quality
    }

    /// Whether a sync is waiting for better conditions.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Apply one event and return the resulting action.
    pub fn apply(&mut self, event: ConnectivityEvent) -> MonitorAction {
        use ConnectionState::{Offline, OnlineIdle, OnlineSyncing};
        use ConnectivityEvent as E;

        match (self.state, event) {
            (_, E::Quality(quality)) => {
                self.quality = quality;
                if self.state == OnlineIdle && self.deferred && self.policy.allows(&quality) {
                    self.deferred = false;
                    self.state = OnlineSyncing;
                    MonitorAction::StartSync
                } else {
                    MonitorAction::NoOp
                }
            }
            (Offline, E::Online) => {
                if self.policy.allows(&self.quality) {
                    self.state = OnlineSyncing;
                    MonitorAction::StartSync
                } else {
                    self.deferred = true;
                    self.state = OnlineIdle;
                    MonitorAction::NoOp
                }
            }
            (OnlineSyncing, E::Offline) => {
                self.state = Offline;
                MonitorAction::AbortSync
            }
            (_, E::Offline) => {
                self.state = Offline;
                self.deferred = false;
                MonitorAction::NoOp
            }
            (OnlineSyncing, E::SyncFinished) => {
                self.state = OnlineIdle;
                MonitorAction::NoOp
            }
            (OnlineIdle, E::SyncRequested) => {
                self.deferred = false;
                self.state = OnlineSyncing;
                MonitorAction::StartSync
            }
            _ => MonitorAction::NoOp,
        }
    }
}
