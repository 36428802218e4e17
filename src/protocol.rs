//! Control-surface command protocol: newline-delimited JSON.
//!
//! Each request is one [`Command`] object per line; each reply is one
//! [`CommandResponse`]. Commands only flip flags and settings in
//! [`ControlState`]; the controller picks them up at its next poll.

use crate::band::{BandIndex, EnabledBands, WSPR_BANDS};
use crate::control::{ControlState, Schedule};
use crate::encoder::{Identity, IdentityUpdate};
use crate::hardware::{MAX_OUTPUT_HZ, MIN_OUTPUT_HZ};
use crate::status::StatusReader;
use crate::types::Frequency;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const MAX_COMMAND_SIZE: usize = 512;
pub const MAX_RESPONSE_SIZE: usize = 2048;
/// Largest correction accepted from an operator, 100 ppm.
pub const MAX_CORRECTION_PPB: i32 = 100_000;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    GetStatus,
    GetSettings,
    SetSchedule { schedule: Schedule },
    SetBands { bands: Vec<BandIndex> },
    /// Abandon the pending slot or the transmission in progress.
    InterruptTx,
    /// Enter calibration, optionally at a new frequency.
    StartCalibration { frequency_hz: Option<u64> },
    SetCalibrationFrequency { frequency_hz: u64 },
    SetCorrection { ppb: i32 },
    /// Save the correction (optionally a new value) and leave calibration.
    SaveCalibration { ppb: Option<i32> },
    /// Change call sign, locator or power from the next slot on.
    SetIdentity {
        #[serde(default)]
        callsign: Option<String>,
        #[serde(default)]
        locator: Option<String>,
        #[serde(default)]
        power_mw: Option<u32>,
    },
    /// Forget stored settings and return to the configured identity and
    /// correction.
    FactoryReset,
    /// Stream status snapshots on this connection.
    Monitor,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    /// Accepted; takes effect at the controller's next poll.
    Acknowledged,
    /// Well-formed but refused.
    NegativeAck,
    InvalidCommand,
    Error,
}

/// Operator-editable settings as reported by `GetSettings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsView {
    pub schedule: Schedule,
    pub interval_seconds: i64,
    pub bands: EnabledBands,
    pub calibration_frequency: Frequency,
    pub correction_ppb: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("message of {0} bytes exceeds buffer size")]
    MessageTooLarge(usize),
    #[error("serialization failed")]
    SerializationError,
    #[error("invalid command id")]
    InvalidCommand,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug)]
pub struct ProtocolHandler {
    command_buffer: CommandBuffer,
    response_buffer: ResponseBuffer,
    commands_handled: u32,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            command_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
            commands_handled: 0,
        }
    }

    #[must_use]
    pub fn commands_handled(&self) -> u32 {
        self.commands_handled
    }

    pub fn parse_command(&mut self, json_str: &str) -> Result<Command, ProtocolError> {
        self.command_buffer.clear();
        self.command_buffer
            .try_push_str(json_str)
            .map_err(|_| ProtocolError::MessageTooLarge(json_str.len()))?;

        serde_json::from_str::<Command>(&self.command_buffer).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    pub fn serialize_response(&mut self, response: &CommandResponse) -> Result<&str, ProtocolError> {
        self.response_buffer.clear();
        let json_str = serde_json::to_string(response).map_err(|_| ProtocolError::SerializationError)?;
        self.response_buffer
            .try_push_str(&json_str)
            .map_err(|_| ProtocolError::MessageTooLarge(json_str.len()))?;
        Ok(&self.response_buffer)
    }

    pub fn validate_command(&self, command: &Command) -> Result<(), ProtocolError> {
        if command.id == 0 {
            return Err(ProtocolError::InvalidCommand);
        }

        match &command.command_type {
            CommandType::SetBands { bands } => {
                if let Some(index) = bands.iter().find(|&&i| i >= WSPR_BANDS.len()) {
                    return Err(ProtocolError::InvalidParameter(format!("no band {}", index)));
                }
            }
            CommandType::StartCalibration {
                frequency_hz: Some(frequency_hz),
            }
            | CommandType::SetCalibrationFrequency { frequency_hz } => {
                if !(MIN_OUTPUT_HZ..=MAX_OUTPUT_HZ).contains(frequency_hz) {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "{} outside {}..{} Hz",
                        frequency_hz, MIN_OUTPUT_HZ, MAX_OUTPUT_HZ
                    )));
                }
            }
            CommandType::SetCorrection { ppb } | CommandType::SaveCalibration { ppb: Some(ppb) } => {
                if ppb.unsigned_abs() > MAX_CORRECTION_PPB.unsigned_abs() {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "correction {} ppb beyond ±{}",
                        ppb, MAX_CORRECTION_PPB
                    )));
                }
            }
            CommandType::SetIdentity {
                callsign: None,
                locator: None,
                power_mw: None,
            } => {
                return Err(ProtocolError::InvalidParameter("no identity field given".to_string()));
            }
            _ => {}
        }
        Ok(())
    }

    /// Validate and apply one command.
    pub fn execute(&mut self, command: &Command, control: &ControlState, status: &StatusReader) -> CommandResponse {
        self.commands_handled = self.commands_handled.wrapping_add(1);
        if let Err(e) = self.validate_command(command) {
            debug!(id = command.id, "Command rejected: {}", e);
            return create_response(command.id, ResponseStatus::NegativeAck, Some(e.to_string()));
        }

        let id = command.id;
        match &command.command_type {
            CommandType::Ping => create_response(id, ResponseStatus::Success, Some("pong".to_string())),
            CommandType::GetStatus => payload_response(id, &status.snapshot()),
            CommandType::GetSettings => payload_response(id, &settings_view(control)),
            CommandType::SetSchedule { schedule } => {
                info!(?schedule, "Schedule change requested");
                control.set_schedule(*schedule);
                create_response(id, ResponseStatus::Acknowledged, Some("slot will be realigned".to_string()))
            }
            CommandType::SetBands { bands } => {
                let enabled = EnabledBands::from_indices(bands.iter().copied());
                info!(bands = ?bands, "Enabled bands changed");
                control.set_enabled_bands(enabled);
                let message = enabled.is_empty().then(|| "no band enabled, transmissions paused".to_string());
                create_response(id, ResponseStatus::Success, message)
            }
            CommandType::InterruptTx => {
                info!("Interrupt requested");
                control.request_interrupt();
                create_response(id, ResponseStatus::Acknowledged, None)
            }
            CommandType::StartCalibration { frequency_hz } => {
                let frequency = frequency_hz.map_or_else(|| control.calibration_frequency(), Frequency::from_hz);
                info!("Calibration requested at {}", frequency);
                control.request_calibration(frequency);
                create_response(id, ResponseStatus::Acknowledged, None)
            }
            CommandType::SetCalibrationFrequency { frequency_hz } => {
                control.set_calibration_frequency(Frequency::from_hz(*frequency_hz));
                create_response(id, ResponseStatus::Success, None)
            }
            CommandType::SetCorrection { ppb } => {
                control.set_correction(*ppb);
                create_response(id, ResponseStatus::Success, None)
            }
            CommandType::SaveCalibration { ppb } => {
                if !control.calibration_requested() {
                    return create_response(
                        id,
                        ResponseStatus::NegativeAck,
                        Some("calibration is not active".to_string()),
                    );
                }
                control.request_calibration_save(ppb.unwrap_or_else(|| control.correction_ppb()));
                create_response(id, ResponseStatus::Acknowledged, None)
            }
            CommandType::SetIdentity {
                callsign,
                locator,
                power_mw,
            } => {
                let update = IdentityUpdate {
                    callsign: callsign.clone(),
                    locator: locator.clone(),
                    power_mw: *power_mw,
                };
                request_identity(id, update, control, status)
            }
            CommandType::FactoryReset => {
                info!("Factory reset requested");
                control.request_factory_reset();
                create_response(id, ResponseStatus::Acknowledged, Some("takes effect from the next slot".to_string()))
            }
            CommandType::Monitor => create_response(id, ResponseStatus::Acknowledged, Some("streaming status".to_string())),
            CommandType::Shutdown => {
                info!("Shutdown requested");
                control.request_shutdown();
                create_response(id, ResponseStatus::Acknowledged, None)
            }
        }
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Check an identity edit against the identity it would produce and queue it.
fn request_identity(id: u32, update: IdentityUpdate, control: &ControlState, status: &StatusReader) -> CommandResponse {
    let snapshot = status.snapshot();
    let current = Identity {
        callsign: snapshot.callsign,
        locator: snapshot.locator,
        power_mw: snapshot.power_mw,
    };
    let mut merged = control.pending_identity().unwrap_or_default();
    merged.merge(update.clone());
    if let Err(e) = current.updated(&merged).validate() {
        debug!(id, "Identity change refused: {}", e);
        return create_response(id, ResponseStatus::NegativeAck, Some(e.to_string()));
    }
    info!(update = ?update, "Identity change requested");
    control.request_identity_update(update);
    create_response(id, ResponseStatus::Acknowledged, Some("takes effect from the next slot".to_string()))
}

pub fn create_response(id: u32, status: ResponseStatus, message: Option<String>) -> CommandResponse {
    CommandResponse {
        id,
        status,
        message,
        payload: None,
    }
}

fn payload_response<T: Serialize>(id: u32, value: &T) -> CommandResponse {
    match serde_json::to_value(value) {
        Ok(payload) => CommandResponse {
            id,
            status: ResponseStatus::Success,
            message: None,
            payload: Some(payload),
        },
        Err(e) => create_response(id, ResponseStatus::Error, Some(e.to_string())),
    }
}

#[must_use]
pub fn settings_view(control: &ControlState) -> SettingsView {
    let schedule = control.schedule();
    SettingsView {
        schedule,
        interval_seconds: schedule.interval_seconds(),
        bands: control.enabled_bands(),
        calibration_frequency: control.calibration_frequency(),
        correction_ppb: control.correction_ppb(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_and_struct_variants() {
        let mut handler = ProtocolHandler::new();
        let cmd = handler.parse_command(r#"{"id":1,"command_type":"Ping"}"#).unwrap();
        assert_eq!(cmd.command_type, CommandType::Ping);

        let cmd = handler
            .parse_command(r#"{"id":2,"command_type":{"SetSchedule":{"schedule":"every4min"}}}"#)
            .unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::SetSchedule {
                schedule: Schedule::Every4Min
            }
        );
    }

    #[test]
    fn test_parse_identity_with_missing_fields() {
        let mut handler = ProtocolHandler::new();
        let cmd = handler
            .parse_command(r#"{"id":3,"command_type":{"SetIdentity":{"locator":"JN58"}}}"#)
            .unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::SetIdentity {
                callsign: None,
                locator: Some("JN58".to_string()),
                power_mw: None,
            }
        );
    }

    #[test]
    fn test_oversized_command_rejected() {
        let mut handler = ProtocolHandler::new();
        let huge = format!(r#"{{"id":1,"command_type":{{"SetBands":{{"bands":[{}]}}}}}}"#, "1,".repeat(400));
        assert!(matches!(handler.parse_command(&huge), Err(ProtocolError::MessageTooLarge(_))));
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let mut handler = ProtocolHandler::new();
        let response = create_response(7, ResponseStatus::Success, None);
        assert_eq!(handler.serialize_response(&response).unwrap(), r#"{"id":7,"status":"Success"}"#);
    }
}
