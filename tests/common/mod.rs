#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wspr_beacon::encoder::{EncodeError, SymbolBuffer, SymbolEncoder, TestPatternEncoder};
use wspr_beacon::gps::{FastTimeSource, Fix};
use wspr_beacon::ntp::{NetworkTimeClient, NtpError};
use wspr_beacon::timesync::SyncConfig;
use wspr_beacon::types::{epoch_from_utc, Epoch};

/// 2024-05-17 12:01:30 UTC.
pub fn mid_slot_epoch() -> Epoch {
    epoch_from_utc(2024, 5, 17, 12, 1, 30)
}

/// Fake SNTP client. Hosts in `answers` reply at once; every other host
/// fails after `failure_delay`. Each call is logged by host name.
#[derive(Debug, Clone, Default)]
pub struct MockNtp {
    answers: HashMap<String, Epoch>,
    failure_delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockNtp {
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn answering(host: &str, epoch: Epoch) -> Self {
        Self::default().with_answer(host, epoch)
    }

    pub fn with_answer(mut self, host: &str, epoch: Epoch) -> Self {
        self.answers.insert(host.to_string(), epoch);
        self
    }

    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    /// Shared view of the calls made so far.
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

impl NetworkTimeClient for MockNtp {
    async fn sync(&mut self, host: &str, timeout: Duration) -> Result<Epoch, NtpError> {
        self.log.lock().unwrap().push(host.to_string());
        match self.answers.get(host) {
            Some(&epoch) => Ok(epoch),
            None => {
                tokio::time::sleep(self.failure_delay.min(timeout)).await;
                Err(NtpError::Timeout(timeout))
            }
        }
    }
}

/// GPS stand-in that answers with a fixed reading, or stays silent for the
/// whole timeout.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGps {
    fix: Option<Fix>,
    calls: Arc<AtomicU32>,
}

impl ScriptedGps {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_fix(epoch: Epoch, lat: f64, lon: f64) -> Self {
        Self {
            fix: Some(Fix { epoch, lat, lon }),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

impl FastTimeSource for ScriptedGps {
    async fn acquire_fix(&mut self, timeout: Duration) -> Option<Fix> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fix.is_none() {
            tokio::time::sleep(timeout).await;
        }
        self.fix
    }
}

/// Test-pattern encoder that counts how often it is asked to encode and
/// remembers the last message.
#[derive(Debug, Clone, Default)]
pub struct CountingEncoder {
    calls: Arc<AtomicU32>,
    last: Arc<Mutex<Option<(String, String, u8)>>>,
}

impl CountingEncoder {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Call sign, locator and dBm of the last encoded message.
    pub fn last_message(&self) -> Option<(String, String, u8)> {
        self.last.lock().unwrap().clone()
    }
}

impl SymbolEncoder for CountingEncoder {
    fn encode(&self, callsign: &str, locator: &str, power_dbm: u8) -> Result<SymbolBuffer, EncodeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last.lock().unwrap() = Some((callsign.to_string(), locator.to_string(), power_dbm));
        TestPatternEncoder.encode(callsign, locator, power_dbm)
    }
}

pub fn sync_config(hosts: &[&str]) -> SyncConfig {
    SyncConfig {
        gps_timeout: Duration::from_secs(10),
        ntp_hosts: hosts.iter().map(|h| h.to_string()).collect(),
        attempts_per_host: 3,
        attempt_timeout: Duration::from_secs(5),
        resync_interval: Duration::from_secs(300),
    }
}
