//! Tiered wall-clock acquisition: GPS first, then a list of SNTP hosts.
//!
//! ```text
//! Unsynced -> SyncingFast -> (fix) ---------------------> Synced
//!                 \-> (timeout) SyncingFallback -> (host ok) -> Synced
//!                                              \-> (all hosts exhausted) -> Unsynced
//! Synced -> SyncingFast again once now >= next_resync_deadline
//! ```
//!
//! Exhausting every source is a soft failure: the clock keeps running on its
//! previous value and scheduling continues.

use crate::clock::WallClock;
use crate::gps::FastTimeSource;
use crate::locator::{maidenhead, Locator};
use crate::ntp::NetworkTimeClient;
use crate::status::SyncSource;
use crate::types::{format_hhmmss, Epoch};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Anything at or below this (1971-01-01) is an unset clock, not a time.
pub const EPOCH_SANITY_FLOOR: Epoch = 31_536_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Unsynced,
    SyncingFast,
    SyncingFallback,
    Synced,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub gps_timeout: Duration,
    pub ntp_hosts: Vec<String>,
    pub attempts_per_host: u32,
    pub attempt_timeout: Duration,
    pub resync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gps_timeout: Duration::from_secs(10),
            ntp_hosts: [
                "pool.ntp.org",
                "time.nist.gov",
                "time.google.com",
                "europe.pool.ntp.org",
                "ntp1.inrim.it",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            attempts_per_host: 3,
            attempt_timeout: Duration::from_secs(5),
            resync_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub phase: SyncPhase,
    pub last_sync_epoch: Option<Epoch>,
    pub last_sync_source: SyncSource,
    pub last_attempt_epoch: Option<Epoch>,
    pub next_resync_deadline: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Gps {
        epoch: Epoch,
        jump_ms: i64,
        locator: Locator,
    },
    Network {
        epoch: Epoch,
        jump_ms: i64,
        host: String,
        attempts: u32,
    },
    /// Every source failed; the clock was left alone.
    Exhausted { attempts: u32 },
}

impl SyncOutcome {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        !matches!(self, SyncOutcome::Exhausted { .. })
    }

    #[must_use]
    pub fn source(&self) -> SyncSource {
        match self {
            SyncOutcome::Gps { .. } => SyncSource::Gps,
            SyncOutcome::Network { .. } => SyncSource::Network,
            SyncOutcome::Exhausted { .. } => SyncSource::None,
        }
    }
}

pub struct TimeSyncChain<G, N> {
    config: SyncConfig,
    clock: WallClock,
    gps: G,
    ntp: N,
    state: SyncState,
}

impl<G, N> TimeSyncChain<G, N>
where
    G: FastTimeSource,
    N: NetworkTimeClient,
{
    pub fn new(config: SyncConfig, clock: WallClock, gps: G, ntp: N) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            gps,
            ntp,
            state: SyncState {
                phase: SyncPhase::Unsynced,
                last_sync_epoch: None,
                last_sync_source: SyncSource::None,
                last_attempt_epoch: None,
                // Due immediately until the first attempt completes.
                next_resync_deadline: now,
            },
        }
    }

    #[must_use]
    pub fn now(&self) -> Epoch {
        self.clock.now()
    }

    #[must_use]
    pub fn clock(&self) -> &WallClock {
        &self.clock
    }

    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn resync_due(&self) -> bool {
        self.clock.now() >= self.state.next_resync_deadline
    }

    /// Worst-case duration of one full attempt through every tier.
    #[must_use]
    pub fn worst_case_duration(&self) -> Duration {
        let rounds = self.config.ntp_hosts.len() as u32 * self.config.attempts_per_host;
        self.config.gps_timeout + self.config.attempt_timeout * rounds
    }

    /// Run the whole chain once and record the attempt.
    pub async fn sync(&mut self) -> SyncOutcome {
        self.state.phase = SyncPhase::SyncingFast;
        let outcome = match self.try_fast(self.config.gps_timeout).await {
            Some(outcome) => outcome,
            None => {
                self.state.phase = SyncPhase::SyncingFallback;
                self.try_fallback(None).await
            }
        };
        self.complete_attempt(&outcome);
        outcome
    }

    /// Like [`sync`](Self::sync) but finishes within `budget`.
    ///
    /// The GPS wait is cut so that one full SNTP round still fits; when the
    /// budget cannot cover that, GPS is skipped. SNTP rounds are clamped to
    /// what is left and stop at the deadline. A run that ends without a time
    /// counts as failed and still moves the resync deadline.
    pub async fn sync_within(&mut self, budget: Duration) -> SyncOutcome {
        let deadline = Instant::now() + budget;
        self.state.phase = SyncPhase::SyncingFast;
        let fast_limit = budget
            .saturating_sub(self.config.attempt_timeout)
            .min(self.config.gps_timeout);
        let fast = if fast_limit.is_zero() {
            debug!(?budget, "No room for GPS in re-sync budget, going straight to SNTP");
            None
        } else {
            self.try_fast(fast_limit).await
        };
        let outcome = match fast {
            Some(outcome) => outcome,
            None => {
                self.state.phase = SyncPhase::SyncingFallback;
                self.try_fallback(Some(deadline)).await
            }
        };
        self.complete_attempt(&outcome);
        outcome
    }

    async fn try_fast(&mut self, limit: Duration) -> Option<SyncOutcome> {
        info!("Trying GPS time (timeout {:?})", limit);
        let Some(fix) = self.gps.acquire_fix(limit).await else {
            info!("No valid GPS fix within timeout");
            return None;
        };
        if fix.epoch <= EPOCH_SANITY_FLOOR {
            warn!(epoch = fix.epoch, "GPS fix carries an implausible time, ignoring");
            return None;
        }
        let jump_ms = self.clock.set_epoch(fix.epoch);
        let locator = maidenhead(fix.lat, fix.lon);
        info!(
            "GPS time synced: {} (jump {} ms), locator {}",
            format_hhmmss(fix.epoch),
            jump_ms,
            locator
        );
        Some(SyncOutcome::Gps {
            epoch: fix.epoch,
            jump_ms,
            locator,
        })
    }

    /// Walk the host list. With a `deadline`, each round gets at most the
    /// time left and the walk ends once none is left.
    async fn try_fallback(&mut self, deadline: Option<Instant>) -> SyncOutcome {
        let mut attempts = 0;
        for host in &self.config.ntp_hosts {
            info!("Trying SNTP server {}", host);
            for round in 1..=self.config.attempts_per_host {
                let limit = match deadline {
                    Some(deadline) => deadline
                        .saturating_duration_since(Instant::now())
                        .min(self.config.attempt_timeout),
                    None => self.config.attempt_timeout,
                };
                if limit.is_zero() {
                    warn!(attempts, "Time re-sync budget exhausted");
                    return SyncOutcome::Exhausted { attempts };
                }
                attempts += 1;
                match self.ntp.sync(host, limit).await {
                    Ok(epoch) if epoch > EPOCH_SANITY_FLOOR => {
                        let jump_ms = self.clock.set_epoch(epoch);
                        info!(
                            "SNTP time synced from {}: {} (jump {} ms)",
                            host,
                            format_hhmmss(epoch),
                            jump_ms
                        );
                        return SyncOutcome::Network {
                            epoch,
                            jump_ms,
                            host: host.clone(),
                            attempts,
                        };
                    }
                    Ok(epoch) => warn!(host = %host, round, epoch, "SNTP reply before sanity floor"),
                    Err(e) => warn!(host = %host, round, "SNTP attempt failed: {}", e),
                }
            }
        }
        warn!(attempts, "All SNTP servers failed, keeping previous clock");
        SyncOutcome::Exhausted { attempts }
    }

    fn complete_attempt(&mut self, outcome: &SyncOutcome) {
        let now = self.clock.now();
        self.state.last_attempt_epoch = Some(now);
        self.state.next_resync_deadline = now + self.config.resync_interval.as_secs() as i64;
        if outcome.is_synced() {
            self.state.phase = SyncPhase::Synced;
            self.state.last_sync_epoch = Some(now);
            self.state.last_sync_source = outcome.source();
        } else {
            self.state.phase = SyncPhase::Unsynced;
        }
    }
}
