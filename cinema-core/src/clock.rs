//! Server Clock Estimation
//!
//! Playback goals are expressed against the server's clock, so every client
//! needs a `server_now()` it can trust without trusting the local wall
//! clock. Each probe round-trips the time endpoint and estimates the offset
//! as `server_reported - (send + recv) / 2`; recent estimates are averaged.
//!
//! Accuracy in the low hundreds of milliseconds is plenty: the convergence
//! loop tolerates several seconds of drift.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Number of offset samples to keep for averaging
const OFFSET_SAMPLE_COUNT: usize = 5;

/// How often to re-probe to correct for drift
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Probe timeouts are short: a slow answer is a bad sample anyway
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from the time source. None of these are fatal to sync; a failed
/// probe just leaves the previous estimate in place.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Local wall clock as unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Offset estimate between the server's clock and ours.
#[derive(Debug, Default)]
pub struct ServerClock {
    /// Recent offset samples in seconds (server minus local)
    samples: Vec<f64>,
    /// Cached average offset
    offset_secs: f64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe's offset estimate.
    pub fn add_sample(&mut self, offset_secs: f64) {
        if self.samples.len() >= OFFSET_SAMPLE_COUNT {
            self.samples.remove(0);
        }
        self.samples.push(offset_secs);
        self.offset_secs = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
    }

    /// Current offset estimate in seconds. Zero until the first probe lands,
    /// i.e. `now()` degrades to the local clock rather than blocking.
    pub fn offset_secs(&self) -> f64 {
        self.offset_secs
    }

    pub fn has_estimate(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Best estimate of "now" on the server's clock, unix seconds.
    pub fn now(&self) -> f64 {
        unix_now() + self.offset_secs
    }
}

/// Shared read-mostly clock estimate. One per application instance; every
/// convergence loop reads the same one.
pub type SharedServerClock = Arc<RwLock<ServerClock>>;

pub fn new_shared_clock() -> SharedServerClock {
    Arc::new(RwLock::new(ServerClock::new()))
}

/// One round trip against the time endpoint.
struct TimeProbe {
    http: reqwest::Client,
    url: String,
}

impl TimeProbe {
    fn new(base_url: &str) -> Result<Self, ClockError> {
        let http = reqwest::Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/api/time", base_url.trim_end_matches('/')),
        })
    }

    /// Returns the estimated offset (server minus local) in seconds.
    async fn probe(&self) -> Result<f64, ClockError> {
        let sent = unix_now();
        let server: f64 = self.http.get(&self.url).send().await?.json().await?;
        let received = unix_now();
        Ok(server - (sent + received) / 2.0)
    }
}

/// Owns the shared clock and a background refresh task. Dropping the source
/// stops the task; the last estimate stays readable through any clones of
/// the shared clock.
pub struct ServerTimeSource {
    clock: SharedServerClock,
    refresh_cancel: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ServerTimeSource {
    /// Start probing `{base_url}/api/time`. The first probe is issued
    /// immediately; callers can use `now()` straight away and get the local
    /// clock until an estimate exists.
    pub fn start(base_url: &str) -> Result<Self, ClockError> {
        let probe = TimeProbe::new(base_url)?;
        let clock = new_shared_clock();
        let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();

        let clock_clone = Arc::clone(&clock);
        tokio::spawn(async move {
            debug!("Time source refresh loop started");
            loop {
                match probe.probe().await {
                    Ok(offset) => {
                        let mut clock = clock_clone.write();
                        clock.add_sample(offset);
                        debug!(
                            "Clock probe: offset={:+.3}s, avg={:+.3}s",
                            offset,
                            clock.offset_secs()
                        );
                    }
                    // A stale offset beats no offset; keep what we have.
                    Err(e) => warn!("Clock probe failed, keeping last estimate: {}", e),
                }

                tokio::select! {
                    _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
                    _ = &mut cancel_rx => {
                        debug!("Time source refresh loop cancelled");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            clock,
            refresh_cancel: Some(cancel_tx),
        })
    }

    /// The shared estimate, for handing to convergence loops.
    pub fn clock(&self) -> SharedServerClock {
        Arc::clone(&self.clock)
    }

    /// Best estimate of "now" on the server's clock, unix seconds.
    pub fn now(&self) -> f64 {
        self.clock.read().now()
    }
}

impl Drop for ServerTimeSource {
    fn drop(&mut self) {
        if let Some(tx) = self.refresh_cancel.take() {
            let _ = tx.send(());
        }
    }
}
