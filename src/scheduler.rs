//! Slot-aligned transmit cycle.
//!
//! One call to [`TxScheduler::run_cycle`] walks
//! `Idle -> Armed -> CountingDown -> WarmingUp -> Transmitting -> Idle`
//! for a single slot. An interrupt or calibration request during the
//! countdown, warm-up or transmission abandons the attempt; the next cycle
//! starts again from slot alignment.

use crate::band::{BandIndex, BandTable};
use crate::clock::WallClock;
use crate::control::{ControlState, Schedule};
use crate::encoder::SymbolEncoder;
use crate::gps::FastTimeSource;
use crate::hardware::{power_down, Synthesizer};
use crate::ntp::NetworkTimeClient;
use crate::session::{TxCounter, TxFrame, TxOutcome, TxResult, TxSession};
use crate::status::{BeaconPhase, StatusBoard};
use crate::timesync::{SyncOutcome, TimeSyncChain};
use crate::types::{format_hhmmss, time_of_day, Epoch, SECONDS_PER_MINUTE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Lookahead tolerated beyond one interval before a pending slot is treated
/// as the product of a clock jump.
pub const SLOT_SECONDS: i64 = 120;

/// Minute of the next even-minute slot strictly after `minute`.
///
/// Minutes 58 and 59 give 60, the top of the next hour.
#[must_use]
pub const fn next_slot_minute(minute: u8) -> u8 {
    if minute % 2 == 0 {
        minute + 2
    } else {
        minute + 1
    }
}

/// Epoch of the next even-minute slot after `now`.
#[must_use]
pub fn next_slot_epoch(now: Epoch) -> Epoch {
    let (_, minute, second) = time_of_day(now);
    let hour_start = now - i64::from(second) - i64::from(minute) * SECONDS_PER_MINUTE;
    hour_start + i64::from(next_slot_minute(minute)) * SECONDS_PER_MINUTE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long before the slot the output is tuned and keyed.
    pub warm_up_lead: Duration,
    pub poll_interval: Duration,
    /// Kept free between a re-sync and the next warm-up.
    pub resync_margin: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            warm_up_lead: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            resync_margin: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub interval_seconds: i64,
    pub next_tx_epoch: Epoch,
    pub band_index: BandIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub cycles: u32,
    pub transmissions_completed: u32,
    pub transmissions_aborted: u32,
    pub countdowns_interrupted: u32,
    pub slots_skipped: u32,
    pub realignments: u32,
    pub resyncs_attempted: u32,
    pub resyncs_failed: u32,
    pub resyncs_deferred: u32,
    pub last_delta_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The slot was keyed; the session result says whether it ran to the end.
    Transmitted(TxOutcome),
    /// Abandoned before the first symbol.
    Interrupted { phase: BeaconPhase, remaining_seconds: i64 },
    /// Nothing was sent: no band enabled, or warm-up failed.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub band_index: BandIndex,
    pub slot_epoch: Epoch,
    pub outcome: CycleOutcome,
    /// Set when a periodic re-sync ran after the attempt.
    pub sync: Option<SyncOutcome>,
}

enum Countdown {
    Ready(TxFrame),
    Interrupted { phase: BeaconPhase, remaining_seconds: i64 },
    Skipped(String),
}

#[derive(Debug)]
pub struct TxScheduler {
    config: SchedulerConfig,
    bands: BandTable,
    state: ScheduleState,
    armed: bool,
    phase: BeaconPhase,
    stats: SchedulerStats,
}

impl TxScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig, bands: BandTable) -> Self {
        let band_index = bands.first_enabled();
        Self {
            config,
            bands,
            state: ScheduleState {
                interval_seconds: Schedule::default().interval_seconds(),
                next_tx_epoch: 0,
                band_index,
            },
            armed: false,
            phase: BeaconPhase::Idle,
            stats: SchedulerStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    #[must_use]
    pub fn phase(&self) -> BeaconPhase {
        self.phase
    }

    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    #[must_use]
    pub fn bands(&self) -> &BandTable {
        &self.bands
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Compute the next slot from `now` and the current interval.
    pub fn arm(&mut self, now: Epoch, schedule: Schedule) -> Epoch {
        self.state.interval_seconds = schedule.interval_seconds();
        self.state.next_tx_epoch = next_slot_epoch(now);
        self.armed = true;
        self.phase = BeaconPhase::Armed;
        self.stats.realignments += 1;
        info!(
            "Next TX at {} UTC (in {} s) on {}, every {} min",
            format_hhmmss(self.state.next_tx_epoch),
            self.state.next_tx_epoch - now,
            self.band_name(),
            self.state.interval_seconds / SECONDS_PER_MINUTE
        );
        self.state.next_tx_epoch
    }

    /// Drop the pending slot; the next cycle realigns.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.phase = BeaconPhase::Idle;
    }

    /// Pending slot already passed, or unreasonably far ahead.
    #[must_use]
    pub fn slot_is_stale(&self, now: Epoch) -> bool {
        let next = self.state.next_tx_epoch;
        next <= now || next > now + self.state.interval_seconds + SLOT_SECONDS
    }

    /// Pick up band edits from the control surface. If the current band was
    /// disabled, move on to the next enabled one.
    pub fn refresh_bands(&mut self, control: &ControlState) {
        let enabled = control.enabled_bands();
        if enabled == self.bands.enabled() {
            return;
        }
        self.bands.set_enabled(enabled);
        if !enabled.is_empty() && !enabled.contains(self.state.band_index) {
            self.state.band_index = self.bands.next_enabled(self.state.band_index);
        }
        info!(bands = ?enabled.indices().collect::<Vec<_>>(), "Enabled bands changed");
    }

    /// Run one slot: align, count down, warm up, transmit, advance, re-sync.
    pub async fn run_cycle<G, N, S, E>(
        &mut self,
        chain: &mut TimeSyncChain<G, N>,
        synth: &mut S,
        session: &TxSession<'_, E>,
        control: &ControlState,
        status: &StatusBoard,
    ) -> CycleReport
    where
        G: FastTimeSource,
        N: NetworkTimeClient,
        S: Synthesizer,
        E: SymbolEncoder,
    {
        self.stats.cycles += 1;
        self.refresh_bands(control);

        let now = chain.now();
        if control.take_realign() || !self.armed || self.slot_is_stale(now) {
            if self.armed {
                info!(
                    "Realigning: pending slot {} no longer valid at {}",
                    format_hhmmss(self.state.next_tx_epoch),
                    format_hhmmss(now)
                );
            }
            self.arm(now, control.schedule());
        }
        self.publish_slot(status, now);

        let band_index = self.state.band_index;
        let slot_epoch = self.state.next_tx_epoch;
        let outcome = match self.count_down(chain.clock(), synth, session, control, status).await {
            Countdown::Ready(frame) => self.transmit(synth, session, &frame, status).await,
            Countdown::Interrupted {
                phase,
                remaining_seconds,
            } => {
                self.stats.countdowns_interrupted += 1;
                info!("Countdown interrupted during {:?} with {} s left", phase, remaining_seconds);
                CycleOutcome::Interrupted {
                    phase,
                    remaining_seconds,
                }
            }
            Countdown::Skipped(reason) => {
                self.stats.slots_skipped += 1;
                warn!("Slot {} skipped: {}", format_hhmmss(slot_epoch), reason);
                status.update(|s| s.last_error = Some(reason.clone()));
                CycleOutcome::Skipped(reason)
            }
        };

        let interrupted = control.take_interrupt()
            || matches!(outcome, CycleOutcome::Interrupted { .. })
            || matches!(outcome, CycleOutcome::Transmitted(tx) if tx.result == TxResult::Aborted);
        self.advance(interrupted);
        status.update(|s| {
            s.phase = BeaconPhase::Idle;
            s.operating_frequency = None;
            s.transmissions_completed = self.stats.transmissions_completed;
            s.transmissions_aborted = self.stats.transmissions_aborted;
        });

        let sync = if control.should_abort() || control.shutdown_requested() {
            None
        } else {
            self.resync(chain, status).await
        };

        CycleReport {
            band_index,
            slot_epoch,
            outcome,
            sync,
        }
    }

    async fn count_down<S, E>(
        &mut self,
        clock: &WallClock,
        synth: &mut S,
        session: &TxSession<'_, E>,
        control: &ControlState,
        status: &StatusBoard,
    ) -> Countdown
    where
        S: Synthesizer,
        E: SymbolEncoder,
    {
        let slot_ms = self.state.next_tx_epoch * 1000;
        let slot_at = clock.instant_at(self.state.next_tx_epoch);
        let lead_ms = self.config.warm_up_lead.as_millis() as i64;
        let has_band = !self.bands.enabled().is_empty();

        self.phase = BeaconPhase::CountingDown;
        let mut frame = None;
        let mut warm_up_started = false;
        let mut last_report = None;
        let mut tick = Instant::now();

        loop {
            let remaining_ms = slot_ms - clock.now_millis();
            let remaining_seconds = (remaining_ms.max(0) + 999) / 1000;

            if control.should_abort() {
                if warm_up_started {
                    power_down(synth);
                }
                return Countdown::Interrupted {
                    phase: self.phase,
                    remaining_seconds,
                };
            }
            if remaining_ms <= 0 {
                break;
            }

            if last_report != Some(remaining_seconds) {
                last_report = Some(remaining_seconds);
                debug!(remaining_seconds, "Counting down");
                let phase = self.phase;
                status.update(|s| {
                    s.phase = phase;
                    s.remaining_seconds = remaining_seconds;
                });
            }

            if has_band && !warm_up_started && remaining_ms <= lead_ms {
                warm_up_started = true;
                self.phase = BeaconPhase::WarmingUp;
                match session.warm_up(synth, &self.bands, self.state.band_index) {
                    Ok(prepared) => {
                        let frequency = prepared.operating_frequency;
                        status.update(|s| {
                            s.phase = BeaconPhase::WarmingUp;
                            s.operating_frequency = Some(frequency);
                        });
                        frame = Some(prepared);
                    }
                    Err(e) => {
                        power_down(synth);
                        return Countdown::Skipped(format!("warm-up failed: {}", e));
                    }
                }
            }

            tick += self.config.poll_interval;
            sleep_until(tick.min(slot_at)).await;
        }

        if !has_band {
            return Countdown::Skipped("no band enabled".to_string());
        }
        match frame {
            Some(frame) => Countdown::Ready(frame),
            // Slot reached without a warm-up pass; do it late rather than miss it.
            None => match session.warm_up(synth, &self.bands, self.state.band_index) {
                Ok(frame) => Countdown::Ready(frame),
                Err(e) => {
                    power_down(synth);
                    Countdown::Skipped(format!("warm-up failed: {}", e))
                }
            },
        }
    }

    async fn transmit<S, E>(
        &mut self,
        synth: &mut S,
        session: &TxSession<'_, E>,
        frame: &TxFrame,
        status: &StatusBoard,
    ) -> CycleOutcome
    where
        S: Synthesizer,
        E: SymbolEncoder,
    {
        self.phase = BeaconPhase::Transmitting;
        let frequency = frame.operating_frequency;
        status.update(|s| {
            s.phase = BeaconPhase::Transmitting;
            s.remaining_seconds = 0;
            s.operating_frequency = Some(frequency);
        });

        let mut counter = TxCounter::start(status.tx_seconds());
        let result = session.run(synth, frame).await;
        counter.stop();

        match result {
            Ok(outcome) => {
                match outcome.result {
                    TxResult::Completed => {
                        self.stats.transmissions_completed += 1;
                        self.stats.last_delta_ms = Some(outcome.delta_ms);
                    }
                    TxResult::Aborted => self.stats.transmissions_aborted += 1,
                }
                CycleOutcome::Transmitted(outcome)
            }
            Err(e) => {
                self.stats.slots_skipped += 1;
                let reason = format!("transmission failed: {}", e);
                warn!("{}", reason);
                status.update(|s| s.last_error = Some(reason.clone()));
                CycleOutcome::Skipped(reason)
            }
        }
    }

    /// Post-attempt bookkeeping, the same whether the slot was used or not.
    fn advance(&mut self, interrupted: bool) {
        self.state.next_tx_epoch += self.state.interval_seconds;
        let previous = self.state.band_index;
        self.state.band_index = self.bands.next_enabled(previous);
        if previous != self.state.band_index {
            debug!(from = previous, to = self.state.band_index, "Band advanced");
        }
        if interrupted {
            self.disarm();
        } else {
            self.phase = BeaconPhase::Idle;
        }
    }

    /// Periodic re-sync, bounded so it can never eat into the next warm-up.
    async fn resync<G, N>(&mut self, chain: &mut TimeSyncChain<G, N>, status: &StatusBoard) -> Option<SyncOutcome>
    where
        G: FastTimeSource,
        N: NetworkTimeClient,
    {
        if !chain.resync_due() {
            return None;
        }
        let reserved = (self.config.warm_up_lead + self.config.resync_margin).as_millis() as i64;
        let budget_ms = if self.armed {
            self.state.next_tx_epoch * 1000 - reserved - chain.clock().now_millis()
        } else {
            // Realigning anyway; the next slot is at least a minute out.
            SECONDS_PER_MINUTE * 1000 - reserved
        };
        if budget_ms <= 0 {
            self.stats.resyncs_deferred += 1;
            debug!("Re-sync due but no time before next warm-up, deferring");
            return None;
        }

        self.stats.resyncs_attempted += 1;
        info!("Periodic time re-sync (budget {} ms)", budget_ms);
        let outcome = chain.sync_within(Duration::from_millis(budget_ms as u64)).await;
        if !outcome.is_synced() {
            self.stats.resyncs_failed += 1;
        }
        status.record_sync(chain.state(), &outcome);
        Some(outcome)
    }

    fn band_name(&self) -> &'static str {
        self.bands.band(self.state.band_index).map_or("?", |b| b.name)
    }

    fn publish_slot(&self, status: &StatusBoard, now: Epoch) {
        let state = self.state;
        let band = self.bands.band(state.band_index).copied();
        status.update(|s| {
            s.phase = BeaconPhase::Armed;
            s.band_index = state.band_index;
            s.band_name = band.map(|b| b.name.to_string()).unwrap_or_default();
            s.reference_frequency = band.map(|b| b.reference()).unwrap_or_default();
            s.operating_frequency = None;
            s.interval_seconds = state.interval_seconds;
            s.next_tx_epoch = state.next_tx_epoch;
            s.remaining_seconds = state.next_tx_epoch - now;
        });
    }
}
