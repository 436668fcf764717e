use crate::models::{FailureRecord, TelegramResult};
use crate::poll::TelegramDecoder;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod structs;
pub mod parser;
pub mod utils;

use structs::*;
use parser::*;
use utils::*;

#[derive(Error, Debug)]
pub enum SmlError {
    #[error("No SML start sequence found")]
    NoStartSequence,
    #[error("SML frame is truncated")]
    Truncated,
    #[error("Invalid escape sequence at offset {0}")]
    InvalidEscape(usize),
    #[error("Checksum mismatch: expected 0x{expected:04X}, calculated 0x{calculated:04X}")]
    ChecksumMismatch { expected: u16, calculated: u16 },
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Telegram carries no GetListResponse")]
    NoListResponse,
}

/// Checksum algorithm of the transport frame
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrcMode {
    #[default]
    X25,
    Kermit,
    #[serde(rename = "none")]
    Off,
}

/// A decoded telegram: the id of its list response and that response
#[derive(Debug, Clone)]
pub struct SmlTelegram {
    pub transaction_id: Vec<u8>,
    pub response: SmlGetListResponse,
}

/// Decoder for SML telegrams as relayed by the pulse bridge
pub struct SmlDecoder {
    crc_mode: CrcMode,
}

impl SmlDecoder {
    pub fn new(crc_mode: CrcMode) -> Self {
        Self { crc_mode }
    }

    /// Decode the frame and pick the first GetListResponse
    pub fn decode_sml(&self, data: &[u8]) -> Result<SmlTelegram, SmlError> {
        let sml_file = parse_sml_message(data, self.crc_mode)?;
        debug!("Successfully parsed SML message with {} entries", sml_file.messages.len());

        sml_file.messages.into_iter()
            .find_map(|message| match message.message_body {
                SmlMessageBody::GetListResponse(response) => Some(SmlTelegram {
                    transaction_id: message.transaction_id,
                    response,
                }),
                _ => None,
            })
            .ok_or(SmlError::NoListResponse)
    }
}

impl TelegramDecoder for SmlDecoder {
    fn decode(&self, data: &[u8]) -> TelegramResult {
        let telegram = match self.decode_sml(data) {
            Ok(telegram) => telegram,
            Err(e) => {
                FailureRecord::decode(&e, data).log();
                return TelegramResult::failed();
            }
        };

        debug!("Processing GetList response from server: {}", hex::encode(&telegram.response.server_id));

        let readings = telegram.response.val_list.iter()
            .map(|entry| {
                if let Some(SmlValue::OctetString(bytes)) = &entry.value {
                    trace!("{} carries text {}", hex::encode(&entry.obis_code), format_octets(bytes));
                }
                reading_from_entry(entry)
            })
            .collect();

        TelegramResult::decoded(hex::encode(&telegram.transaction_id), readings)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_telegram::*;

    #[test]
    fn test_decode_sample_telegram() {
        let decoder = SmlDecoder::new(CrcMode::X25);
        let result = decoder.decode(&sample_telegram());

        assert_eq!(result.transaction_id.as_deref(), Some("00418e02"));
        assert_eq!(result.readings.len(), 3);

        let energy = &result.readings[0];
        assert_eq!(energy.register, "1-0:1.8.0*255");
        assert_eq!(energy.scaled_value(), Some(10.0));
        assert_eq!(energy.unit.as_deref(), Some("Wh"));

        let power = &result.readings[1];
        assert_eq!(power.register, "1-0:16.7.0*255");
        assert_eq!(power.scaled_value(), Some(-250.0));
        assert_eq!(power.unit.as_deref(), Some("W"));

        assert_eq!(result.readings[2].value, None);
    }

    #[test]
    fn test_decode_with_leading_garbage() {
        let mut data = vec![0x00, 0xFF, 0x13];
        data.extend(sample_telegram());
        let result = SmlDecoder::new(CrcMode::X25).decode(&data);
        assert_eq!(result.transaction_id.as_deref(), Some("00418e02"));
    }

    #[test]
    fn test_decode_failure_is_contained() {
        let decoder = SmlDecoder::new(CrcMode::X25);

        let mut corrupt = sample_telegram();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x55;
        assert!(decoder.decode(&corrupt).is_failure());

        let telegram = sample_telegram();
        let truncated = &telegram[..telegram.len() / 2];
        let result = decoder.decode(truncated);
        assert!(result.is_failure());
        assert!(result.readings.is_empty());

        assert!(decoder.decode(b"<html>502 Bad Gateway</html>").is_failure());
        assert!(decoder.decode(&[]).is_failure());
    }

    #[test]
    fn test_decode_without_list_response() {
        let mut payload = open_response();
        payload.extend(close_response());
        let decoder = SmlDecoder::new(CrcMode::X25);
        assert!(matches!(decoder.decode_sml(&build_frame(&payload)), Err(SmlError::NoListResponse)));
        assert!(decoder.decode(&build_frame(&payload)).is_failure());
    }

    #[test]
    fn test_crc_mode_from_config() {
        let mode: CrcMode = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(mode, CrcMode::Off);
        let mode: CrcMode = serde_json::from_str("\"kermit\"").unwrap();
        assert_eq!(mode, CrcMode::Kermit);
        assert_eq!(CrcMode::default(), CrcMode::X25);
    }
}
