//! Frequency synthesizer boundary.
//!
//! The controller never talks to registers. It probes the device once at
//! boot, then only retunes it, keys the output and applies the crystal
//! correction.

use crate::types::Frequency;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("synthesizer not found on the bus")]
    NotFound,
    #[error("bus write failed: {0}")]
    Bus(String),
    #[error("frequency {0} outside synthesizer range")]
    OutOfRange(Frequency),
}

pub trait Synthesizer {
    /// Check that the device answers. Called once at boot.
    fn probe(&mut self) -> bool;

    fn set_frequency(&mut self, frequency: Frequency) -> Result<(), HardwareError>;

    /// Enable or disable the RF output.
    fn set_power(&mut self, on: bool) -> Result<(), HardwareError>;

    /// Crystal correction in parts per billion.
    fn apply_correction(&mut self, ppb: i32) -> Result<(), HardwareError>;
}

impl<S: Synthesizer + ?Sized> Synthesizer for &mut S {
    fn probe(&mut self) -> bool {
        (**self).probe()
    }

    fn set_frequency(&mut self, frequency: Frequency) -> Result<(), HardwareError> {
        (**self).set_frequency(frequency)
    }

    fn set_power(&mut self, on: bool) -> Result<(), HardwareError> {
        (**self).set_power(on)
    }

    fn apply_correction(&mut self, ppb: i32) -> Result<(), HardwareError> {
        (**self).apply_correction(ppb)
    }
}

/// Key the output off on an abort path, where a failure can only be logged.
pub fn power_down<S: Synthesizer + ?Sized>(synth: &mut S) {
    if let Err(e) = synth.set_power(false) {
        warn!("Could not power down output: {}", e);
    }
}

/// Output range of an Si5351-class synthesizer.
pub const MIN_OUTPUT_HZ: u64 = 8_000;
pub const MAX_OUTPUT_HZ: u64 = 160_000_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesizerState {
    pub frequency: Frequency,
    pub output_on: bool,
    pub correction_ppb: i32,
    pub frequency_writes: u32,
}

/// Software stand-in for the synthesizer, used when no device is attached
/// and by the test suite. Every call is recorded.
#[derive(Debug, Default)]
pub struct SimulatedSynthesizer {
    state: SynthesizerState,
    present: bool,
    history: Vec<Frequency>,
    record_history: bool,
}

impl SimulatedSynthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            present: true,
            ..Self::default()
        }
    }

    /// A synthesizer that fails its probe.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Keep every frequency written, for timing and tone assertions.
    #[must_use]
    pub fn with_history(mut self) -> Self {
        self.record_history = true;
        self
    }

    #[must_use]
    pub fn state(&self) -> &SynthesizerState {
        &self.state
    }

    #[must_use]
    pub fn history(&self) -> &[Frequency] {
        &self.history
    }
}

impl Synthesizer for SimulatedSynthesizer {
    fn probe(&mut self) -> bool {
        info!(present = self.present, "Probing simulated synthesizer");
        self.present
    }

    fn set_frequency(&mut self, frequency: Frequency) -> Result<(), HardwareError> {
        if !self.present {
            return Err(HardwareError::NotFound);
        }
        if !(MIN_OUTPUT_HZ..=MAX_OUTPUT_HZ).contains(&frequency.hz()) {
            return Err(HardwareError::OutOfRange(frequency));
        }
        self.state.frequency = frequency;
        self.state.frequency_writes = self.state.frequency_writes.wrapping_add(1);
        if self.record_history {
            self.history.push(frequency);
        }
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), HardwareError> {
        if !self.present {
            return Err(HardwareError::NotFound);
        }
        if self.state.output_on != on {
            debug!(on, "Synthesizer output");
        }
        self.state.output_on = on;
        Ok(())
    }

    fn apply_correction(&mut self, ppb: i32) -> Result<(), HardwareError> {
        if !self.present {
            return Err(HardwareError::NotFound);
        }
        self.state.correction_ppb = ppb;
        Ok(())
    }
}
