//! Semantic commands and the table mapping them to EISCP messages.
//!
//! Every message is a three-letter code followed by a value, e.g. `PWR01` or
//! `ZVL1E`. The code identifies both the zone and the operation, so the
//! (zone, operation) pair of a reply is known without any request id.

use crate::error::{EiscpError, Result};
use crate::types::{AudioInfo, HdmiOutput, InputSource, ListeningMode, Power, VideoInfo, Zone};
use serde::{Deserialize, Serialize};
use std::fmt;

const QUERY: &str = "QSTN";
const UP: &str = "UP";
const DOWN: &str = "DOWN";
const TOGGLE: &str = "TG";
const NOT_AVAILABLE: &str = "N/A";

/// Highest raw volume step any receiver reports (0.5 dB steps on 200-step models)
pub const MAX_RAW_VOLUME: u8 = 0xC8;

/// Highest tuner preset number
pub const MAX_PRESET: u8 = 40;

/// Kind of state a command reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Power,
    Volume,
    Mute,
    Input,
    ListeningMode,
    Preset,
    HdmiOutput,
    /// Read-only; reported by the receiver when the signal changes
    AudioInfo,
    /// Read-only; reported by the receiver when the signal changes
    VideoInfo,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Power,
        Operation::Volume,
        Operation::Mute,
        Operation::Input,
        Operation::ListeningMode,
        Operation::Preset,
        Operation::HdmiOutput,
        Operation::AudioInfo,
        Operation::VideoInfo,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Power => "power",
            Operation::Volume => "volume",
            Operation::Mute => "mute",
            Operation::Input => "input",
            Operation::ListeningMode => "listening-mode",
            Operation::Preset => "preset",
            Operation::HdmiOutput => "hdmi-output",
            Operation::AudioInfo => "audio-info",
            Operation::VideoInfo => "video-info",
        })
    }
}

/// (zone, operation) ↔ code table
const CODES: &[(Zone, Operation, &str)] = &[
    (Zone::Main, Operation::Power, "PWR"),
    (Zone::Main, Operation::Volume, "MVL"),
    (Zone::Main, Operation::Mute, "AMT"),
    (Zone::Main, Operation::Input, "SLI"),
    (Zone::Main, Operation::ListeningMode, "LMD"),
    (Zone::Main, Operation::Preset, "PRS"),
    (Zone::Main, Operation::HdmiOutput, "HDO"),
    (Zone::Main, Operation::AudioInfo, "IFA"),
    (Zone::Main, Operation::VideoInfo, "IFV"),
    (Zone::Zone2, Operation::Power, "ZPW"),
    (Zone::Zone2, Operation::Volume, "ZVL"),
    (Zone::Zone2, Operation::Mute, "ZMT"),
    (Zone::Zone2, Operation::Input, "SLZ"),
    (Zone::Zone2, Operation::Preset, "PRZ"),
    (Zone::Zone3, Operation::Power, "PW3"),
    (Zone::Zone3, Operation::Volume, "VL3"),
    (Zone::Zone3, Operation::Mute, "MT3"),
    (Zone::Zone3, Operation::Input, "SL3"),
    (Zone::Zone3, Operation::Preset, "PR3"),
    (Zone::Zone4, Operation::Power, "PW4"),
    (Zone::Zone4, Operation::Volume, "VL4"),
    (Zone::Zone4, Operation::Mute, "MT4"),
    (Zone::Zone4, Operation::Input, "SL4"),
    (Zone::Zone4, Operation::Preset, "PR4"),
];

/// Three-letter code for an operation on a zone
pub fn code_for(zone: Zone, operation: Operation) -> Option<&'static str> {
    CODES
        .iter()
        .find(|(z, op, _)| *z == zone && *op == operation)
        .map(|(_, _, code)| *code)
}

fn lookup_code(code: &str) -> Option<(Zone, Operation)> {
    CODES
        .iter()
        .find(|(_, _, c)| *c == code)
        .map(|(zone, op, _)| (*zone, *op))
}

/// Operations a zone has codes for
pub fn operations_for(zone: Zone) -> impl Iterator<Item = Operation> {
    Operation::ALL
        .into_iter()
        .filter(move |op| code_for(zone, *op).is_some())
}

/// What a command does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetPower(Power),
    QueryPower,
    SetVolume(u8),
    VolumeUp,
    VolumeDown,
    QueryVolume,
    SetMute(bool),
    ToggleMute,
    QueryMute,
    SelectInput(InputSource),
    InputUp,
    InputDown,
    QueryInput,
    SetListeningMode(ListeningMode),
    ListeningModeUp,
    ListeningModeDown,
    QueryListeningMode,
    /// Tune a stored radio preset (1 to 40)
    SelectPreset(u8),
    PresetUp,
    PresetDown,
    QueryPreset,
    SelectHdmiOutput(HdmiOutput),
    HdmiOutputUp,
    QueryHdmiOutput,
    QueryAudioInfo,
    QueryVideoInfo,
}

impl Action {
    pub fn operation(&self) -> Operation {
        match self {
            Action::SetPower(_) | Action::QueryPower => Operation::Power,
            Action::SetVolume(_) | Action::VolumeUp | Action::VolumeDown | Action::QueryVolume => {
                Operation::Volume
            }
            Action::SetMute(_) | Action::ToggleMute | Action::QueryMute => Operation::Mute,
            Action::SelectInput(_) | Action::InputUp | Action::InputDown | Action::QueryInput => {
                Operation::Input
            }
            Action::SetListeningMode(_)
            | Action::ListeningModeUp
            | Action::ListeningModeDown
            | Action::QueryListeningMode => Operation::ListeningMode,
            Action::SelectPreset(_) | Action::PresetUp | Action::PresetDown | Action::QueryPreset => {
                Operation::Preset
            }
            Action::SelectHdmiOutput(_) | Action::HdmiOutputUp | Action::QueryHdmiOutput => {
                Operation::HdmiOutput
            }
            Action::QueryAudioInfo => Operation::AudioInfo,
            Action::QueryVideoInfo => Operation::VideoInfo,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Action::QueryPower
                | Action::QueryVolume
                | Action::QueryMute
                | Action::QueryInput
                | Action::QueryListeningMode
                | Action::QueryPreset
                | Action::QueryHdmiOutput
                | Action::QueryAudioInfo
                | Action::QueryVideoInfo
        )
    }

    /// The query reading back what this action changes
    pub fn query(operation: Operation) -> Action {
        match operation {
            Operation::Power => Action::QueryPower,
            Operation::Volume => Action::QueryVolume,
            Operation::Mute => Action::QueryMute,
            Operation::Input => Action::QueryInput,
            Operation::ListeningMode => Action::QueryListeningMode,
            Operation::Preset => Action::QueryPreset,
            Operation::HdmiOutput => Action::QueryHdmiOutput,
            Operation::AudioInfo => Action::QueryAudioInfo,
            Operation::VideoInfo => Action::QueryVideoInfo,
        }
    }

    fn value(&self) -> Result<String> {
        let value = match self {
            Action::SetPower(Power::On) => "01".to_string(),
            Action::SetPower(Power::Standby) => "00".to_string(),
            Action::SetVolume(v) if *v > MAX_RAW_VOLUME => {
                return Err(EiscpError::InvalidArgument(format!("volume {v} out of range")));
            }
            Action::SetVolume(v) => format!("{:02X}", v),
            Action::SetMute(true) => "01".to_string(),
            Action::SetMute(false) => "00".to_string(),
            Action::ToggleMute => TOGGLE.to_string(),
            Action::SelectInput(source) => wire_code(source.code())?,
            Action::SetListeningMode(mode) => wire_code(mode.code())?,
            Action::SelectPreset(n) if !(1..=MAX_PRESET).contains(n) => {
                return Err(EiscpError::InvalidArgument(format!(
                    "preset {n} outside 1..={MAX_PRESET}"
                )));
            }
            Action::SelectPreset(n) => format!("{:02X}", n),
            Action::SelectHdmiOutput(output) => wire_code(output.code())?,
            Action::VolumeUp
            | Action::InputUp
            | Action::ListeningModeUp
            | Action::PresetUp
            | Action::HdmiOutputUp => UP.to_string(),
            Action::VolumeDown | Action::InputDown | Action::ListeningModeDown | Action::PresetDown => {
                DOWN.to_string()
            }
            Action::QueryPower
            | Action::QueryVolume
            | Action::QueryMute
            | Action::QueryInput
            | Action::QueryListeningMode
            | Action::QueryPreset
            | Action::QueryHdmiOutput
            | Action::QueryAudioInfo
            | Action::QueryVideoInfo => QUERY.to_string(),
        };
        Ok(value)
    }
}

/// Selector codes go on the wire as exactly two upper-case hex digits
fn wire_code(code: &str) -> Result<String> {
    parse_hex_byte(code)
        .map(|byte| format!("{:02X}", byte))
        .ok_or_else(|| EiscpError::InvalidArgument(format!("code {code:?} is not two hex digits")))
}

/// A semantic unit addressed to one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub zone: Zone,
    pub action: Action,
}

impl Command {
    pub fn new(zone: Zone, action: Action) -> Self {
        Self { zone, action }
    }

    pub fn operation(&self) -> Operation {
        self.action.operation()
    }

    /// Correlation key for the confirmation
    pub fn key(&self) -> (Zone, Operation) {
        (self.zone, self.operation())
    }

    /// Render the EISCP message, e.g. `ZVL1E`
    pub fn encode(&self) -> Result<String> {
        let code = code_for(self.zone, self.operation()).ok_or(EiscpError::UnsupportedOperation {
            zone: self.zone,
            operation: self.operation(),
        })?;
        Ok(format!("{}{}", code, self.action.value()?))
    }

    /// Parse a message produced by [`Command::encode`]
    pub fn parse(message: &str) -> Result<Self> {
        let (zone, operation, value) = split_message(message)?;
        let invalid = || EiscpError::InvalidResponse(format!("unrecognized command {message:?}"));

        let action = match (operation, value) {
            (Operation::Power, QUERY) => Action::QueryPower,
            (Operation::Volume, QUERY) => Action::QueryVolume,
            (Operation::Mute, QUERY) => Action::QueryMute,
            (Operation::Input, QUERY) => Action::QueryInput,
            (Operation::ListeningMode, QUERY) => Action::QueryListeningMode,
            (Operation::Preset, QUERY) => Action::QueryPreset,
            (Operation::HdmiOutput, QUERY) => Action::QueryHdmiOutput,
            (Operation::AudioInfo, QUERY) => Action::QueryAudioInfo,
            (Operation::VideoInfo, QUERY) => Action::QueryVideoInfo,
            (Operation::Volume, UP) => Action::VolumeUp,
            (Operation::Volume, DOWN) => Action::VolumeDown,
            (Operation::Input, UP) => Action::InputUp,
            (Operation::Input, DOWN) => Action::InputDown,
            (Operation::ListeningMode, UP) => Action::ListeningModeUp,
            (Operation::ListeningMode, DOWN) => Action::ListeningModeDown,
            (Operation::Preset, UP) => Action::PresetUp,
            (Operation::Preset, DOWN) => Action::PresetDown,
            (Operation::HdmiOutput, UP) => Action::HdmiOutputUp,
            (Operation::Mute, TOGGLE) => Action::ToggleMute,
            (_, value) => match parse_field(operation, value).ok_or_else(invalid)? {
                Field::Power(p) => Action::SetPower(p),
                Field::Volume(v) => Action::SetVolume(v),
                Field::Mute(m) => Action::SetMute(m),
                Field::Input(source) => Action::SelectInput(source),
                Field::ListeningMode(mode) => Action::SetListeningMode(mode),
                Field::Preset(n) => Action::SelectPreset(n),
                Field::HdmiOutput(output) => Action::SelectHdmiOutput(output),
                Field::AudioInfo(_) | Field::VideoInfo(_) | Field::NotAvailable(_) => {
                    return Err(invalid())
                }
            },
        };

        Ok(Command { zone, action })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.zone, self.action)
    }
}

/// A value reported by the receiver for one field of a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "kebab-case")]
pub enum Field {
    Power(Power),
    Volume(u8),
    Mute(bool),
    Input(InputSource),
    ListeningMode(ListeningMode),
    Preset(u8),
    HdmiOutput(HdmiOutput),
    AudioInfo(AudioInfo),
    VideoInfo(VideoInfo),
    /// Receiver answered `N/A` for this operation
    NotAvailable(Operation),
}

impl Field {
    pub fn operation(&self) -> Operation {
        match self {
            Field::Power(_) => Operation::Power,
            Field::Volume(_) => Operation::Volume,
            Field::Mute(_) => Operation::Mute,
            Field::Input(_) => Operation::Input,
            Field::ListeningMode(_) => Operation::ListeningMode,
            Field::Preset(_) => Operation::Preset,
            Field::HdmiOutput(_) => Operation::HdmiOutput,
            Field::AudioInfo(_) => Operation::AudioInfo,
            Field::VideoInfo(_) => Operation::VideoInfo,
            Field::NotAvailable(op) => *op,
        }
    }
}

/// A status report received from the receiver, solicited or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub zone: Zone,
    pub field: Field,
}

impl Status {
    pub fn key(&self) -> (Zone, Operation) {
        (self.zone, self.field.operation())
    }

    /// Interpret a received message.
    ///
    /// Returns `Ok(None)` for messages outside the zone table (network
    /// metadata, tuner frequency, etc).
    pub fn parse(message: &str) -> Result<Option<Status>> {
        let Some(code) = message.get(..3) else {
            return Ok(None);
        };
        if lookup_code(code).is_none() {
            return Ok(None);
        }

        let (zone, operation, value) = split_message(message)?;
        if value == NOT_AVAILABLE {
            return Ok(Some(Status {
                zone,
                field: Field::NotAvailable(operation),
            }));
        }

        let field = parse_field(operation, value)
            .ok_or_else(|| EiscpError::InvalidResponse(format!("unrecognized status {message:?}")))?;
        Ok(Some(Status { zone, field }))
    }
}

fn split_message(message: &str) -> Result<(Zone, Operation, &str)> {
    let code = message
        .get(..3)
        .ok_or_else(|| EiscpError::InvalidResponse(format!("message too short: {message:?}")))?;
    let (zone, operation) = lookup_code(code)
        .ok_or_else(|| EiscpError::InvalidResponse(format!("unknown code {code:?}")))?;
    Ok((zone, operation, message[3..].trim()))
}

fn parse_field(operation: Operation, value: &str) -> Option<Field> {
    match operation {
        Operation::Power => match value {
            "00" => Some(Field::Power(Power::Standby)),
            "01" => Some(Field::Power(Power::On)),
            _ => None,
        },
        Operation::Volume => parse_hex_byte(value)
            .filter(|v| *v <= MAX_RAW_VOLUME)
            .map(Field::Volume),
        Operation::Mute => match value {
            "00" => Some(Field::Mute(false)),
            "01" => Some(Field::Mute(true)),
            _ => None,
        },
        Operation::Input => parse_hex_byte(value).map(|_| Field::Input(InputSource::from_code(value))),
        Operation::ListeningMode => {
            parse_hex_byte(value).map(|_| Field::ListeningMode(ListeningMode::from_code(value)))
        }
        Operation::Preset => parse_hex_byte(value).map(Field::Preset),
        Operation::HdmiOutput => {
            parse_hex_byte(value).map(|_| Field::HdmiOutput(HdmiOutput::from_code(value)))
        }
        Operation::AudioInfo => AudioInfo::parse(value).map(Field::AudioInfo),
        Operation::VideoInfo => VideoInfo::parse(value).map(Field::VideoInfo),
    }
}

fn parse_hex_byte(value: &str) -> Option<u8> {
    if value.len() != 2 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(value, 16).ok()
}
