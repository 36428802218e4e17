//! Status surface: what the operator UI shows.

use crate::timesync::{SyncOutcome, SyncState};
use crate::types::{Epoch, Frequency};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeaconPhase {
    #[default]
    Idle,
    Armed,
    CountingDown,
    WarmingUp,
    Transmitting,
    Calibrating,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncSource {
    Gps,
    Network,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconStatus {
    pub phase: BeaconPhase,
    pub remaining_seconds: i64,
    pub tx_elapsed_seconds: u32,
    pub band_index: usize,
    pub band_name: String,
    pub reference_frequency: Frequency,
    pub operating_frequency: Option<Frequency>,
    pub interval_seconds: i64,
    pub next_tx_epoch: Epoch,
    pub callsign: String,
    pub locator: String,
    pub power_dbm: u8,
    pub power_mw: u32,
    pub sync_source: SyncSource,
    pub last_sync_epoch: Option<Epoch>,
    pub next_resync_epoch: Epoch,
    pub calibration_frequency: Option<Frequency>,
    pub correction_ppb: i32,
    pub transmissions_completed: u32,
    pub transmissions_aborted: u32,
    pub last_error: Option<String>,
}

/// Publishes [`BeaconStatus`] snapshots.
///
/// The controller owns the board and replaces fields through [`update`].
/// The transmit-seconds counter is written by the auxiliary counter task and
/// merged into the snapshot at read time.
///
/// [`update`]: StatusBoard::update
#[derive(Debug)]
pub struct StatusBoard {
    sender: Arc<watch::Sender<BeaconStatus>>,
    tx_seconds: Arc<AtomicU32>,
}

impl StatusBoard {
    #[must_use]
    pub fn new(initial: BeaconStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
            tx_seconds: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn update<F: FnOnce(&mut BeaconStatus)>(&self, apply: F) {
        self.sender.send_modify(apply);
    }

    #[must_use]
    pub fn subscribe(&self) -> StatusReader {
        StatusReader {
            receiver: self.sender.subscribe(),
            tx_seconds: Arc::clone(&self.tx_seconds),
        }
    }

    /// Counter shared with the transmit-seconds task.
    #[must_use]
    pub fn tx_seconds(&self) -> TxSeconds {
        TxSeconds {
            seconds: Arc::clone(&self.tx_seconds),
            sender: Arc::clone(&self.sender),
        }
    }

    /// Publish the result of a time-sync attempt.
    ///
    /// A failed attempt shows no sync source and keeps an error visible until
    /// the next success; the clock itself keeps running on its previous value.
    pub fn record_sync(&self, state: &SyncState, outcome: &SyncOutcome) {
        self.update(|s| {
            s.last_sync_epoch = state.last_sync_epoch;
            s.next_resync_epoch = state.next_resync_deadline;
            s.sync_source = outcome.source();
            match outcome {
                SyncOutcome::Exhausted { attempts } => {
                    s.last_error = Some(format!(
                        "time sync failed after {} attempts, running on unsynchronized clock",
                        attempts
                    ));
                }
                _ => {
                    if s.last_error.as_deref().is_some_and(|e| e.starts_with("time sync failed")) {
                        s.last_error = None;
                    }
                }
            }
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> BeaconStatus {
        let mut status = self.sender.borrow().clone();
        status.tx_elapsed_seconds = self.tx_seconds.load(Ordering::Relaxed);
        status
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(BeaconStatus::default())
    }
}

/// Write side of the transmit-seconds counter.
///
/// Every change is also published on the status channel, so monitors see
/// the count move during a transmission.
#[derive(Debug, Clone)]
pub struct TxSeconds {
    seconds: Arc<AtomicU32>,
    sender: Arc<watch::Sender<BeaconStatus>>,
}

impl TxSeconds {
    #[must_use]
    pub fn get(&self) -> u32 {
        self.seconds.load(Ordering::Relaxed)
    }

    pub fn increment(&self) -> u32 {
        let seconds = self.seconds.fetch_add(1, Ordering::Relaxed) + 1;
        self.sender.send_modify(|s| s.tx_elapsed_seconds = seconds);
        seconds
    }

    pub fn reset(&self) {
        if self.seconds.swap(0, Ordering::Relaxed) != 0 {
            self.sender.send_modify(|s| s.tx_elapsed_seconds = 0);
        }
    }
}

/// Read side handed to the control surface.
#[derive(Debug, Clone)]
pub struct StatusReader {
    receiver: watch::Receiver<BeaconStatus>,
    tx_seconds: Arc<AtomicU32>,
}

impl StatusReader {
    #[must_use]
    pub fn snapshot(&self) -> BeaconStatus {
        let mut status = self.receiver.borrow().clone();
        status.tx_elapsed_seconds = self.tx_seconds.load(Ordering::Relaxed);
        status
    }

    /// Wait for the next published change. Returns `None` once the board is gone.
    pub async fn changed(&mut self) -> Option<BeaconStatus> {
        self.receiver.changed().await.ok()?;
        Some(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_sees_updates() {
        let board = StatusBoard::default();
        let mut reader = board.subscribe();

        board.update(|s| {
            s.phase = BeaconPhase::CountingDown;
            s.remaining_seconds = 30;
        });

        let status = reader.changed().await.unwrap();
        assert_eq!(status.phase, BeaconPhase::CountingDown);
        assert_eq!(status.remaining_seconds, 30);
    }

    #[test]
    fn test_record_sync_failure_then_success() {
        use crate::timesync::SyncPhase;

        let board = StatusBoard::default();
        let mut state = SyncState {
            phase: SyncPhase::Unsynced,
            last_sync_epoch: None,
            last_sync_source: SyncSource::None,
            last_attempt_epoch: Some(1_000),
            next_resync_deadline: 1_300,
        };
        board.record_sync(&state, &SyncOutcome::Exhausted { attempts: 9 });
        let status = board.snapshot();
        assert_eq!(status.sync_source, SyncSource::None);
        assert_eq!(status.next_resync_epoch, 1_300);
        assert!(status.last_error.unwrap().contains("9 attempts"));

        state.phase = SyncPhase::Synced;
        state.last_sync_epoch = Some(1_400);
        board.record_sync(
            &state,
            &SyncOutcome::Network {
                epoch: 1_400,
                jump_ms: 0,
                host: "pool.ntp.org".to_string(),
                attempts: 1,
            },
        );
        let status = board.snapshot();
        assert_eq!(status.sync_source, SyncSource::Network);
        assert_eq!(status.last_sync_epoch, Some(1_400));
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_tx_seconds_merged_into_snapshot() {
        let board = StatusBoard::default();
        let counter = board.tx_seconds();
        for _ in 0..17 {
            counter.increment();
        }

        assert_eq!(board.snapshot().tx_elapsed_seconds, 17);
        assert_eq!(board.subscribe().snapshot().tx_elapsed_seconds, 17);
    }

    #[tokio::test]
    async fn test_tx_seconds_wake_readers() {
        let board = StatusBoard::default();
        let mut reader = board.subscribe();
        let counter = board.tx_seconds();

        assert_eq!(counter.increment(), 1);
        assert_eq!(reader.changed().await.unwrap().tx_elapsed_seconds, 1);

        counter.reset();
        assert_eq!(reader.changed().await.unwrap().tx_elapsed_seconds, 0);
        assert_eq!(counter.get(), 0);
    }
}
