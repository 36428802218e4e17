//! Symbol-paced transmission of one frame.

use crate::band::{BandIndex, BandTable};
use crate::control::ControlState;
use crate::encoder::{EncodeError, Identity, SymbolBuffer, SymbolEncoder};
use crate::hardware::{power_down, HardwareError, Synthesizer};
use crate::status::TxSeconds;
use crate::types::Frequency;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// 8192 / 12000 s, rounded to whole milliseconds.
pub const SYMBOL_PERIOD_MS: u64 = 683;
/// How far ahead of its tick each tone after the first is written.
pub const DWELL_CORRECTION_MS: u64 = 1;
/// 12000 / 8192 Hz in hundredths.
pub const TONE_SPACING_CENTIHERTZ: u64 = 146;
/// 162 symbols at the nominal period.
pub const REFERENCE_DURATION_MS: u64 = 110_646;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTiming {
    pub symbol_period: Duration,
    pub dwell_correction: Duration,
    pub tone_spacing: Frequency,
    pub reference_duration: Duration,
}

impl TxTiming {
    /// Offset from the frame start at which the session wakes after keying
    /// symbol `sent - 1` of `count`.
    ///
    /// Wake-ups sit on a fixed grid of symbol periods, so latency in one
    /// symbol never carries into the next. Each intermediate wake-up comes
    /// `dwell_correction` early so the following tone write lands on its
    /// tick; the last one is exact and ends the frame at the reference
    /// duration.
    #[must_use]
    pub fn wake_offset(&self, sent: usize, count: usize) -> Duration {
        let tick = self.symbol_period * sent as u32;
        if sent < count {
            tick.saturating_sub(self.dwell_correction)
        } else {
            tick
        }
    }
}

impl Default for TxTiming {
    fn default() -> Self {
        Self {
            symbol_period: Duration::from_millis(SYMBOL_PERIOD_MS),
            dwell_correction: Duration::from_millis(DWELL_CORRECTION_MS),
            tone_spacing: Frequency::from_centihertz(TONE_SPACING_CENTIHERTZ),
            reference_duration: Duration::from_millis(REFERENCE_DURATION_MS),
        }
    }
}

/// One transmission attempt. Built fresh per slot and dropped afterwards.
#[derive(Debug, Clone)]
pub struct TxFrame {
    pub band_index: usize,
    pub operating_frequency: Frequency,
    pub symbols: SymbolBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxResult {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub result: TxResult,
    pub elapsed_ms: u64,
    pub symbols_sent: usize,
    /// Measured minus reference duration; diagnostic only.
    pub delta_ms: i64,
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("message encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("synthesizer error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("band {0} has no usable sub-band range")]
    NoUsableBand(BandIndex),
}

/// Seconds-on-air counter for the status surface.
///
/// Runs as its own task so the value keeps moving while the symbol loop
/// sleeps. Each tick wakes status readers. Stopping is idempotent and also
/// happens on drop.
#[derive(Debug)]
pub struct TxCounter {
    seconds: TxSeconds,
    handle: Option<JoinHandle<()>>,
}

impl TxCounter {
    #[must_use]
    pub fn start(seconds: TxSeconds) -> Self {
        seconds.reset();
        let counter = seconds.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                counter.increment();
            }
        });
        Self {
            seconds,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn seconds(&self) -> u32 {
        self.seconds.get()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.seconds.reset();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TxCounter {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct TxSession<'a, E> {
    encoder: &'a E,
    identity: &'a Identity,
    timing: TxTiming,
    control: &'a ControlState,
}

impl<'a, E: SymbolEncoder> TxSession<'a, E> {
    pub fn new(encoder: &'a E, identity: &'a Identity, timing: TxTiming, control: &'a ControlState) -> Self {
        Self {
            encoder,
            identity,
            timing,
            control,
        }
    }

    /// Encode the configured message into a frame on `operating_frequency`.
    ///
    /// The encoder is called exactly once per attempt.
    pub fn prepare(&self, band_index: usize, operating_frequency: Frequency) -> Result<TxFrame, TxError> {
        let identity = self.identity;
        info!(
            callsign = %identity.callsign,
            locator = %identity.locator,
            power_dbm = identity.power_dbm(),
            "Encoding message"
        );
        let symbols = self
            .encoder
            .encode(&identity.callsign, &identity.locator, identity.power_dbm())?;
        Ok(TxFrame {
            band_index,
            operating_frequency,
            symbols,
        })
    }

    /// Stabilization step ahead of the slot: draw a fresh operating
    /// frequency, encode the message, tune to the base tone and key the
    /// output. Returns the frame to hand to [`run`](Self::run).
    pub fn warm_up<S: Synthesizer>(
        &self,
        synth: &mut S,
        bands: &BandTable,
        band_index: BandIndex,
    ) -> Result<TxFrame, TxError> {
        let hz = bands
            .random_frequency(band_index)
            .ok_or(TxError::NoUsableBand(band_index))?;
        let frame = self.prepare(band_index, Frequency::from_hz(hz))?;

        synth.set_frequency(frame.operating_frequency)?;
        if let Err(e) = synth.set_power(true) {
            power_down(synth);
            return Err(e.into());
        }
        info!(
            band = bands.band(band_index).map_or("?", |b| b.name),
            "Warm-up: output on at {}",
            frame.operating_frequency
        );
        Ok(frame)
    }

    /// Key the frame symbol by symbol.
    ///
    /// Between symbols the interrupt and calibration flags are polled; either
    /// one ends the transmission at once. The output is powered down on every
    /// exit path.
    pub async fn run<S: Synthesizer>(&self, synth: &mut S, frame: &TxFrame) -> Result<TxOutcome, TxError> {
        let result = self.key_symbols(synth, frame).await;
        let keyed_off = synth.set_power(false);
        let outcome = result?;
        keyed_off?;

        match outcome.result {
            TxResult::Completed => info!(
                "TX complete: {} ms ({:+} ms vs reference {} ms)",
                outcome.elapsed_ms,
                outcome.delta_ms,
                self.timing.reference_duration.as_millis()
            ),
            TxResult::Aborted => warn!(
                "TX aborted after {} of {} symbols ({} ms)",
                outcome.symbols_sent,
                frame.symbols.len(),
                outcome.elapsed_ms
            ),
        }
        Ok(outcome)
    }

    async fn key_symbols<S: Synthesizer>(&self, synth: &mut S, frame: &TxFrame) -> Result<TxOutcome, TxError> {
        info!("TX start: {} symbols at {}", frame.symbols.len(), frame.operating_frequency);
        synth.set_power(true)?;
        let started = Instant::now();
        let count = frame.symbols.len();
        let mut sent = 0;
        let mut result = TxResult::Completed;

        for &symbol in &frame.symbols {
            let tone = frame
                .operating_frequency
                .offset_by(self.timing.tone_spacing, symbol);
            synth.set_frequency(tone)?;
            sent += 1;
            sleep_until(started + self.timing.wake_offset(sent, count)).await;

            if self.control.should_abort() {
                debug!(symbol = sent, "Abort requested during TX");
                result = TxResult::Aborted;
                break;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(TxOutcome {
            result,
            elapsed_ms,
            symbols_sent: sent,
            delta_ms: elapsed_ms as i64 - self.timing.reference_duration.as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusBoard;

    #[test]
    fn test_wake_offsets_follow_symbol_grid() {
        let timing = TxTiming::default();
        assert_eq!(timing.wake_offset(1, 162), Duration::from_millis(682));
        assert_eq!(timing.wake_offset(100, 162), Duration::from_millis(100 * 683 - 1));
        assert_eq!(timing.wake_offset(162, 162), Duration::from_millis(REFERENCE_DURATION_MS));
        assert_eq!(SYMBOL_PERIOD_MS * 162, REFERENCE_DURATION_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_counts_and_stops() {
        let board = StatusBoard::default();
        let seconds = board.tx_seconds();
        let mut counter = TxCounter::start(board.tx_seconds());
        assert_eq!(counter.seconds(), 0);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(counter.seconds(), 3);

        counter.stop();
        counter.stop();
        assert!(!counter.is_running());
        assert_eq!(seconds.get(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(seconds.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_ticks_wake_status_readers() {
        let board = StatusBoard::default();
        let mut reader = board.subscribe();
        let _counter = TxCounter::start(board.tx_seconds());
        let start = Instant::now();

        let status = reader.changed().await.unwrap();
        assert_eq!(status.tx_elapsed_seconds, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let status = reader.changed().await.unwrap();
        assert_eq!(status.tx_elapsed_seconds, 2);
    }
}
