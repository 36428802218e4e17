//! # WSPR beacon controller
//!
//! Transmits a fixed-format WSPR message at even-minute slots, hopping across
//! a configurable set of bands, while keeping its clock disciplined from GPS
//! or SNTP.
//!
//! ## Features
//!
//! - **Time discipline**: GPS fix first, then an ordered SNTP host list with
//!   bounded retries and a periodic re-sync deadline
//! - **Slot scheduling**: even-minute alignment, interruptible countdown and a
//!   one-shot warm-up ahead of each slot
//! - **Symbol-paced transmission**: 162 tones on a fixed symbol grid, aborted
//!   cleanly between symbols
//! - **Band rotation**: deterministic walk over the enabled bands with a fresh
//!   random offset per transmission
//! - **Calibration**: steady carrier for trimming the crystal correction
//! - **Control surface**: newline-delimited JSON over TCP
//!
//! ## Quick Start
//!
//! ```no_run
//! use wspr_beacon::{Beacon, BeaconConfig, MemorySettings, NoGps, SimulatedSynthesizer,
//!                   SntpClient, TestPatternEncoder, TimeSyncChain, WallClock};
//!
//! # async fn demo() -> Result<(), wspr_beacon::BeaconError> {
//! let config = BeaconConfig::default();
//! let chain = TimeSyncChain::new(
//!     config.sync.to_sync_config(),
//!     WallClock::from_system_time(),
//!     NoGps,
//!     SntpClient::new(),
//! );
//! let mut beacon = Beacon::new(
//!     &config,
//!     chain,
//!     SimulatedSynthesizer::new(),
//!     TestPatternEncoder,
//!     MemorySettings::default(),
//! )?;
//! beacon.boot().await?;
//! beacon.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`band`] - band catalog and enabled-set rotation
//! - [`timesync`] - GPS/SNTP time acquisition state machine
//! - [`scheduler`] - slot alignment, countdown, warm-up and post-attempt rotation
//! - [`session`] - symbol-paced transmission of one frame
//! - [`calibration`] - exclusive fixed-carrier mode
//! - [`control`] / [`protocol`] / [`server`] - operator control surface
//! - [`controller`] - owns everything and runs the control loop

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod band;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod control;
pub mod controller;
pub mod encoder;
pub mod gps;
pub mod hardware;
pub mod locator;
pub mod ntp;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod settings;
pub mod status;
pub mod timesync;
pub mod types;

// Re-export main public types for convenience
pub use band::{BandTable, EnabledBands};
pub use clock::WallClock;
pub use config::BeaconConfig;
pub use control::{ControlState, Schedule};
pub use controller::{Beacon, BeaconError, StopReason};
pub use encoder::{Identity, IdentityUpdate, SymbolEncoder, TestPatternEncoder};
pub use gps::{GpsTimeSource, NmeaDecoder, NoGps};
pub use hardware::{SimulatedSynthesizer, Synthesizer};
pub use ntp::SntpClient;
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use status::{BeaconPhase, BeaconStatus, StatusBoard};
pub use timesync::TimeSyncChain;
pub use types::Frequency;
