use super::structs::*;
use super::{CrcMode, SmlError};
use crate::models::RegisterReading;
use crate::obis_utils::{format_obis_code, get_obis_description, ObisCode};
use crc16::{State, KERMIT, X_25};
use log::debug;

/// Checksum of a frame from its start sequence up to the padding byte
pub fn calculate_crc16(frame: &[u8], crc_mode: CrcMode) -> Option<u16> {
    match crc_mode {
        CrcMode::X25 => Some(State::<X_25>::calculate(frame)),
        CrcMode::Kermit => Some(State::<KERMIT>::calculate(frame)),
        CrcMode::Off => None,
    }
}

/// Meters disagree on the byte order of the transmitted checksum, both are accepted
pub fn verify_checksum(frame: &[u8], stored: [u8; 2], crc_mode: CrcMode) -> Result<(), SmlError> {
    let Some(calculated) = calculate_crc16(frame, crc_mode) else {
        return Ok(());
    };

    let expected = u16::from_le_bytes(stored);
    debug!("SML checksum validation: expected=0x{:04X}, calculated=0x{:04X}",
           expected, calculated);

    if calculated == expected || calculated == u16::from_be_bytes(stored) {
        Ok(())
    } else {
        Err(SmlError::ChecksumMismatch { expected, calculated })
    }
}

/// SML_Time is a choice of secIndex, timestamp or local timestamp. Some meters
/// send the bare number instead.
pub fn parse_sml_time(value: &SmlValue) -> Option<u32> {
    match value {
        SmlValue::UInt(_) | SmlValue::Int(_) => value.as_u64().and_then(|t| u32::try_from(t).ok()),
        SmlValue::List(choice) if choice.len() == 2 => match &choice[1] {
            SmlValue::List(local) => local.first().and_then(parse_sml_time),
            time => parse_sml_time(time),
        },
        _ => None,
    }
}

/// Turn a list entry into a reading. The value stays unscaled, the scaler
/// travels along with it.
pub fn reading_from_entry(entry: &SmlListEntry) -> RegisterReading {
    let obis = ObisCode::from_bytes(&entry.obis_code);

    RegisterReading {
        register: format_obis_code(&entry.obis_code),
        name: obis.as_ref().and_then(get_obis_description).map(str::to_string),
        value: entry.value.as_ref().and_then(SmlValue::as_f64),
        scaler: entry.scaler,
        unit: entry.unit.and_then(get_sml_unit_name).map(str::to_string),
    }
}

/// Printable form of an octet string value
pub fn format_octets(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().all(|c| c.is_ascii_graphic() || c == ' ') => text.to_string(),
        _ => hex::encode(bytes),
    }
}
