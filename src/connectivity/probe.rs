//! Reachability sampling.
//!
//! A probe checks whether the backend answers at all and how long it takes.
//! The sampler turns successive probe results into connectivity events:
//! `Online`/`Offline` only on change, and a `Quality` sample every time the
//! backend is reachable.

use super::{ConnectionQuality, ConnectivityEvent, EffectiveType};
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Probe timeout. A slower answer counts as unreachable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable { rtt: Duration },
    Unreachable,
}

pub trait ConnectivityProbe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = ProbeResult> + Send;
}

/// Probes a health URL with a plain GET. Any HTTP response counts as
/// reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe `health_url`, falling back to the executor endpoint.
    ///
    /// # Errors
    ///
    /// Returns a config error if neither is set.
    pub fn from_settings(settings: &QueueSettings) -> Result<Self> {
        settings
            .health_url
            .as_deref()
            .or(settings.endpoint.as_deref())
            .map(Self::new)
            .ok_or_else(|| {
                Error::Config("No health_url or endpoint configured to probe".into())
            })
    }
}

impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> ProbeResult {
        let start = Instant::now();
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => {
                let rtt = start.elapsed();
                trace!(url = %self.url, status = %response.status(), ?rtt, "Probe answered");
                ProbeResult::Reachable { rtt }
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Probe failed");
                ProbeResult::Unreachable
            }
        }
    }
}

/// Map a round-trip time onto an effective connection type.
#[must_use]
pub fn effective_type_for_rtt(rtt: Duration) -> EffectiveType {
    match rtt.as_millis() {
        ms if ms > 2000 => EffectiveType::Slow2g,
        ms if ms > 1400 => EffectiveType::TwoG,
        ms if ms > 270 => EffectiveType::ThreeG,
        _ => EffectiveType::FourG,
    }
}

/// Events produced by one probe result. `last` tracks reachability between
/// samples so `Online`/`Offline` are only sent on change.
pub fn sample_events(
    result: ProbeResult,
    metered: bool,
    last: &mut Option<bool>,
) -> Vec<ConnectivityEvent> {
    let mut events = Vec::new();
    match result {
        ProbeResult::Reachable { rtt } => {
            events.push(ConnectivityEvent::Quality(ConnectionQuality {
                effective_type: effective_type_for_rtt(rtt),
                metered,
                rtt_ms: Some(u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX)),
            }));
            if *last != Some(true) {
                events.push(ConnectivityEvent::Online);
            }
            *last = Some(true);
        }
        ProbeResult::Unreachable => {
            if *last != Some(false) {
                events.push(ConnectivityEvent::Offline);
            }
            *last = Some(false);
        }
    }
    events
}

/// Probe every `interval` and forward the resulting events to `tx`.
///
/// Stops when `shutdown` is cancelled or the receiver is dropped.
pub fn spawn_sampler<P: ConnectivityProbe>(
    probe: P,
    interval: Duration,
    metered: bool,
    tx: mpsc::Sender<ConnectivityEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                () = shutdown.cancelled() => break,
                result = probe.probe() => result,
            };

            for event in sample_events(result, metered, &mut last) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        debug!("Connectivity sampler stopped");
    })
}
