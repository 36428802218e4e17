//! Message encoder contract.
//!
//! Turning a call sign, locator and power level into channel symbols is done
//! by a pluggable [`SymbolEncoder`]. The controller only relies on the
//! contract: one call per transmission, a fixed number of 4-FSK symbols.

use crate::locator::is_valid_locator;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel symbols per transmission.
pub const SYMBOL_COUNT: usize = 162;
/// Highest symbol value (4-FSK).
pub const MAX_SYMBOL_VALUE: u8 = 3;
pub const MAX_CALLSIGN_LEN: usize = 6;
pub const MAX_POWER_DBM: u8 = 60;

pub type SymbolBuffer = Vec<u8, SYMBOL_COUNT>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("call sign {0:?} is empty or longer than {} characters", MAX_CALLSIGN_LEN)]
    InvalidCallsign(String),
    #[error("locator {0:?} is not a 4 or 6 character grid square")]
    InvalidLocator(String),
    #[error("power {0} dBm above {} dBm", MAX_POWER_DBM)]
    InvalidPower(u8),
}

/// Station identity carried by every transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub callsign: String,
    pub locator: String,
    pub power_mw: u32,
}

impl Identity {
    /// Reported power, `round(10 * log10(mW))`.
    #[must_use]
    pub fn power_dbm(&self) -> u8 {
        milliwatts_to_dbm(self.power_mw)
    }

    pub fn validate(&self) -> Result<(), EncodeError> {
        validate_message(&self.callsign, &self.locator, self.power_dbm())
    }

    /// This identity with the fields present in `update` replaced. Call
    /// signs are upper-cased.
    #[must_use]
    pub fn updated(&self, update: &IdentityUpdate) -> Identity {
        Identity {
            callsign: update
                .callsign
                .as_ref()
                .map_or_else(|| self.callsign.clone(), |c| c.trim().to_ascii_uppercase()),
            locator: update
                .locator
                .as_ref()
                .map_or_else(|| self.locator.clone(), |l| l.trim().to_string()),
            power_mw: update.power_mw.unwrap_or(self.power_mw),
        }
    }
}

/// Operator edit of the station identity; absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUpdate {
    pub callsign: Option<String>,
    pub locator: Option<String>,
    pub power_mw: Option<u32>,
}

impl IdentityUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callsign.is_none() && self.locator.is_none() && self.power_mw.is_none()
    }

    /// Fold a later edit on top of this one.
    pub fn merge(&mut self, later: IdentityUpdate) {
        if later.callsign.is_some() {
            self.callsign = later.callsign;
        }
        if later.locator.is_some() {
            self.locator = later.locator;
        }
        if later.power_mw.is_some() {
            self.power_mw = later.power_mw;
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            callsign: "NOCALL".to_string(),
            locator: "AA00aa".to_string(),
            power_mw: 250,
        }
    }
}

#[must_use]
pub fn milliwatts_to_dbm(power_mw: u32) -> u8 {
    if power_mw == 0 {
        return 0;
    }
    (10.0 * f64::from(power_mw).log10()).round().clamp(0.0, f64::from(u8::MAX)) as u8
}

pub trait SymbolEncoder {
    fn encode(&self, callsign: &str, locator: &str, power_dbm: u8) -> Result<SymbolBuffer, EncodeError>;
}

/// Input checks shared by encoder implementations.
pub fn validate_message(callsign: &str, locator: &str, power_dbm: u8) -> Result<(), EncodeError> {
    let callsign_ok = !callsign.is_empty()
        && callsign.len() <= MAX_CALLSIGN_LEN
        && callsign.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ');
    if !callsign_ok {
        return Err(EncodeError::InvalidCallsign(callsign.to_string()));
    }
    if !is_valid_locator(locator) {
        return Err(EncodeError::InvalidLocator(locator.to_string()));
    }
    if power_dbm > MAX_POWER_DBM {
        return Err(EncodeError::InvalidPower(power_dbm));
    }
    Ok(())
}

/// Bench encoder: validates the message and emits a repeating 0-1-2-3 tone
/// staircase of the protocol length.
///
/// Useful for checking tone spacing and symbol timing on a receiver. It does
/// not produce a decodable message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestPatternEncoder;

impl SymbolEncoder for TestPatternEncoder {
    fn encode(&self, callsign: &str, locator: &str, power_dbm: u8) -> Result<SymbolBuffer, EncodeError> {
        validate_message(callsign, locator, power_dbm)?;
        Ok((0..SYMBOL_COUNT).map(|i| (i % 4) as u8).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_conversion() {
        assert_eq!(milliwatts_to_dbm(250), 24);
        assert_eq!(milliwatts_to_dbm(1), 0);
        assert_eq!(milliwatts_to_dbm(1000), 30);
        assert_eq!(milliwatts_to_dbm(5), 7);
        assert_eq!(milliwatts_to_dbm(0), 0);
    }

    #[test]
    fn test_pattern_encoder_length_and_range() {
        let symbols = TestPatternEncoder.encode("K1ABC", "FN31pr", 24).unwrap();
        assert_eq!(symbols.len(), SYMBOL_COUNT);
        assert!(symbols.iter().all(|&s| s <= MAX_SYMBOL_VALUE));
    }

    #[test]
    fn test_identity_update_replaces_present_fields() {
        let identity = Identity {
            callsign: "K1ABC".to_string(),
            locator: "FN31pr".to_string(),
            power_mw: 500,
        };
        let mut update = IdentityUpdate {
            callsign: Some(" w1xyz ".to_string()),
            ..IdentityUpdate::default()
        };
        update.merge(IdentityUpdate {
            power_mw: Some(5),
            ..IdentityUpdate::default()
        });

        let updated = identity.updated(&update);
        assert_eq!(updated.callsign, "W1XYZ");
        assert_eq!(updated.locator, "FN31pr");
        assert_eq!(updated.power_dbm(), 7);
        assert!(updated.validate().is_ok());
        assert!(IdentityUpdate::default().is_empty());

        let bad = identity.updated(&IdentityUpdate {
            locator: Some("ZZ99".to_string()),
            ..IdentityUpdate::default()
        });
        assert!(matches!(bad.validate(), Err(EncodeError::InvalidLocator(_))));
    }

    #[test]
    fn test_message_validation() {
        assert!(matches!(
            TestPatternEncoder.encode("", "FN31", 24),
            Err(EncodeError::InvalidCallsign(_))
        ));
        assert!(matches!(
            TestPatternEncoder.encode("TOOLONGCALL", "FN31", 24),
            Err(EncodeError::InvalidCallsign(_))
        ));
        assert!(matches!(
            TestPatternEncoder.encode("K1ABC", "XX00XX", 24),
            Err(EncodeError::InvalidLocator(_))
        ));
        assert_eq!(
            TestPatternEncoder.encode("K1ABC", "FN31", 61),
            Err(EncodeError::InvalidPower(61))
        );
    }
}
