use super::structs::*;
use super::utils::{parse_sml_time, verify_checksum};
use super::{CrcMode, SmlError};
use log::debug;

// SML Transport constants
const SML_ESCAPE: [u8; 4] = [0x1B, 0x1B, 0x1B, 0x1B];
const SML_VERSION_1: [u8; 4] = [0x01, 0x01, 0x01, 0x01];
const SML_END_MARKER: u8 = 0x1A;

// SML Message Type constants
const SML_OPEN_RESPONSE: u32 = 0x0101;
const SML_CLOSE_RESPONSE: u32 = 0x0201;
const SML_GET_LIST_RESPONSE: u32 = 0x0701;

// Type field of the TL byte
const TYPE_OCTET_STRING: u8 = 0x0;
const TYPE_BOOL: u8 = 0x4;
const TYPE_INT: u8 = 0x5;
const TYPE_UINT: u8 = 0x6;
const TYPE_LIST: u8 = 0x7;

const MAX_NESTING: usize = 16;

/// Decode a complete SML transport frame into its messages
pub fn parse_sml_message(data: &[u8], crc_mode: CrcMode) -> Result<SmlFile, SmlError> {
    debug!("Parsing SML message of {} bytes", data.len());

    let payload = extract_frame(data, crc_mode)?;
    parse_sml_file(&payload)
}

fn find_sml_start(data: &[u8]) -> Result<usize, SmlError> {
    data.windows(8)
        .position(|w| w[..4] == SML_ESCAPE[..] && w[4..] == SML_VERSION_1[..])
        .ok_or(SmlError::NoStartSequence)
}

/// Strip the transport layer: start sequence, escaping, padding and checksum
pub fn extract_frame(data: &[u8], crc_mode: CrcMode) -> Result<Vec<u8>, SmlError> {
    let start = find_sml_start(data)?;
    let mut payload = Vec::with_capacity(data.len());
    let mut pos = start + 8;

    // Escape sequences are aligned to four bytes relative to the start
    loop {
        let chunk = data.get(pos..pos + 4).ok_or(SmlError::Truncated)?;
        if chunk != &SML_ESCAPE[..] {
            payload.extend_from_slice(chunk);
            pos += 4;
            continue;
        }

        let next = data.get(pos + 4..pos + 8).ok_or(SmlError::Truncated)?;
        if next == &SML_ESCAPE[..] {
            payload.extend_from_slice(next);
            pos += 8;
            continue;
        }

        if next[0] != SML_END_MARKER {
            return Err(SmlError::InvalidEscape(pos));
        }

        verify_checksum(&data[start..pos + 6], [next[2], next[3]], crc_mode)?;

        let padding = next[1] as usize;
        if padding > 3 || padding > payload.len() {
            return Err(SmlError::ParseError(format!("Invalid padding count {}", padding)));
        }
        payload.truncate(payload.len() - padding);
        return Ok(payload);
    }
}

/// Parse the unescaped message stream of one frame
pub fn parse_sml_file(payload: &[u8]) -> Result<SmlFile, SmlError> {
    let mut parser = SmlParser::new(payload);
    let mut messages = Vec::new();

    while !parser.at_end() {
        match parser.parse_value(0)? {
            SmlValue::EndOfMessage => continue,
            value => messages.push(message_from_value(&value)?),
        }
    }

    if messages.is_empty() {
        return Err(SmlError::ParseError("No valid SML messages found".to_string()));
    }

    Ok(SmlFile { messages })
}

fn parse_error(msg: &str) -> SmlError {
    SmlError::ParseError(msg.to_string())
}

fn optional_octets(value: &SmlValue) -> Option<Vec<u8>> {
    value.as_octets().map(<[u8]>::to_vec)
}

fn message_from_value(value: &SmlValue) -> Result<SmlMessage, SmlError> {
    let fields = value.as_list()
        .filter(|fields| fields.len() >= 5)
        .ok_or_else(|| parse_error("SML message is not a list of 6 elements"))?;

    Ok(SmlMessage {
        transaction_id: optional_octets(&fields[0]).unwrap_or_default(),
        group_no: fields[1].as_u64().unwrap_or(0) as u8,
        abort_on_error: fields[2].as_u64().unwrap_or(0) as u8,
        message_body: parse_message_body(&fields[3])?,
        crc: fields[4].as_u64().map(|crc| crc as u16),
    })
}

fn parse_message_body(value: &SmlValue) -> Result<SmlMessageBody, SmlError> {
    let body = value.as_list()
        .filter(|body| body.len() == 2)
        .ok_or_else(|| parse_error("SML message body is not a choice"))?;
    let tag = body[0].as_u64()
        .ok_or_else(|| parse_error("SML message body has no type tag"))? as u32;

    Ok(match tag {
        SML_OPEN_RESPONSE => SmlMessageBody::OpenResponse(parse_open_response(&body[1])?),
        SML_GET_LIST_RESPONSE => SmlMessageBody::GetListResponse(parse_get_list_response(&body[1])?),
        SML_CLOSE_RESPONSE => SmlMessageBody::CloseResponse,
        other => {
            debug!("Skipping SML message type 0x{:04x}", other);
            SmlMessageBody::Other(other)
        }
    })
}

fn parse_open_response(value: &SmlValue) -> Result<SmlOpenResponse, SmlError> {
    let fields = value.as_list()
        .filter(|fields| fields.len() == 6)
        .ok_or_else(|| parse_error("Invalid OpenResponse"))?;

    Ok(SmlOpenResponse {
        client_id: optional_octets(&fields[1]),
        req_file_id: optional_octets(&fields[2]).unwrap_or_default(),
        server_id: optional_octets(&fields[3]).unwrap_or_default(),
    })
}

fn parse_get_list_response(value: &SmlValue) -> Result<SmlGetListResponse, SmlError> {
    let fields = value.as_list()
        .filter(|fields| fields.len() == 7)
        .ok_or_else(|| parse_error("Invalid GetListResponse"))?;

    let val_list = match &fields[4] {
        SmlValue::List(entries) => entries.iter()
            .map(parse_list_entry)
            .collect::<Result<Vec<_>, _>>()?,
        SmlValue::Absent => Vec::new(),
        _ => return Err(parse_error("GetListResponse value list is not a list")),
    };

    Ok(SmlGetListResponse {
        client_id: optional_octets(&fields[0]),
        server_id: optional_octets(&fields[1]).unwrap_or_default(),
        list_name: optional_octets(&fields[2]),
        act_sensor_time: parse_sml_time(&fields[3]),
        val_list,
        list_signature: optional_octets(&fields[5]),
        act_gateway_time: parse_sml_time(&fields[6]),
    })
}

fn parse_list_entry(value: &SmlValue) -> Result<SmlListEntry, SmlError> {
    let fields = value.as_list()
        .filter(|fields| fields.len() == 7)
        .ok_or_else(|| parse_error("Invalid list entry"))?;

    let obis_code = optional_octets(&fields[0])
        .ok_or_else(|| parse_error("List entry without object name"))?;

    Ok(SmlListEntry {
        obis_code,
        status: fields[1].as_u64(),
        val_time: parse_sml_time(&fields[2]),
        unit: fields[3].as_u64().and_then(|u| u8::try_from(u).ok()),
        scaler: fields[4].as_i64().and_then(|s| i8::try_from(s).ok()),
        value: match &fields[5] {
            SmlValue::Absent => None,
            value => Some(value.clone()),
        },
        value_signature: optional_octets(&fields[6]),
    })
}

struct SmlParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SmlParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn next_byte(&mut self) -> Result<u8, SmlError> {
        let byte = *self.data.get(self.pos)
            .ok_or_else(|| parse_error("Unexpected end of data"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SmlError> {
        let bytes = self.pos.checked_add(len)
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or_else(|| parse_error("Element extends beyond data"))?;
        self.pos += len;
        Ok(bytes)
    }

    /// Returns type, length and the number of TL bytes consumed. For lists
    /// the length is the element count, otherwise it includes the TL bytes.
    fn parse_type_length(&mut self) -> Result<(u8, usize, usize), SmlError> {
        let first = self.next_byte()?;
        let type_field = (first >> 4) & 0x07;
        let mut length = (first & 0x0F) as usize;
        let mut tl_bytes = 1;
        let mut more = first & 0x80 != 0;

        while more {
            let next = self.next_byte()?;
            if (next >> 4) & 0x07 != 0 {
                return Err(parse_error("Invalid extended length byte"));
            }
            more = next & 0x80 != 0;
            length = (length << 4) | (next & 0x0F) as usize;
            tl_bytes += 1;

            // neither a byte length nor an element count can exceed the buffer
            if length > self.data.len() {
                return Err(parse_error("Element length exceeds data"));
            }
        }

        Ok((type_field, length, tl_bytes))
    }

    fn parse_value(&mut self, depth: usize) -> Result<SmlValue, SmlError> {
        if depth > MAX_NESTING {
            return Err(parse_error("SML nesting too deep"));
        }

        if self.data.get(self.pos) == Some(&0x00) {
            self.pos += 1;
            return Ok(SmlValue::EndOfMessage);
        }

        let (type_field, length, tl_bytes) = self.parse_type_length()?;

        if type_field == TYPE_LIST {
            let mut items = Vec::with_capacity(length.min(64));
            for _ in 0..length {
                items.push(self.parse_value(depth + 1)?);
            }
            return Ok(SmlValue::List(items));
        }

        let data_len = length.checked_sub(tl_bytes)
            .ok_or_else(|| parse_error("Element shorter than its TL field"))?;
        let bytes = self.take(data_len)?;

        match type_field {
            TYPE_OCTET_STRING if bytes.is_empty() => Ok(SmlValue::Absent),
            TYPE_OCTET_STRING => Ok(SmlValue::OctetString(bytes.to_vec())),
            TYPE_BOOL => match bytes {
                [b] => Ok(SmlValue::Bool(*b != 0)),
                _ => Err(parse_error("Invalid bool length")),
            },
            TYPE_INT if (1..=8).contains(&bytes.len()) => Ok(SmlValue::Int(be_signed(bytes))),
            TYPE_UINT if (1..=8).contains(&bytes.len()) => Ok(SmlValue::UInt(be_unsigned(bytes))),
            TYPE_INT | TYPE_UINT => Err(parse_error("Invalid integer length")),
            other => Err(SmlError::ParseError(format!("Unknown SML type 0x{:x}", other))),
        }
    }
}

fn be_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn be_signed(bytes: &[u8]) -> i64 {
    let shift = 64 - 8 * bytes.len() as u32;
    ((be_unsigned(bytes) << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_sml::test_telegram::*;

    #[test]
    fn test_find_sml_start() {
        let data = [
            0xAA, 0xBB,
            0x1B, 0x1B, 0x1B, 0x1B,
            0x01, 0x01, 0x01, 0x01,
        ];
        assert_eq!(find_sml_start(&data).unwrap(), 2);
        assert!(matches!(find_sml_start(&data[..8]), Err(SmlError::NoStartSequence)));
    }

    #[test]
    fn test_parse_type_length() {
        let data = [0x72, 0x05]; // Type 7 (list), length 2
        let mut parser = SmlParser::new(&data);
        assert_eq!(parser.parse_type_length().unwrap(), (7, 2, 1));

        let data = [0x83, 0x02]; // Octet string of 0x32 bytes over two TL bytes
        let mut parser = SmlParser::new(&data);
        assert_eq!(parser.parse_type_length().unwrap(), (0, 0x32, 2));
    }

    #[test]
    fn test_parse_integers() {
        let data = [0x52, 0xFF, 0x53, 0xFF, 0x06, 0x65, 0x00, 0x01, 0x00, 0x00, 0x01];
        let mut parser = SmlParser::new(&data);
        assert_eq!(parser.parse_value(0).unwrap(), SmlValue::Int(-1));
        assert_eq!(parser.parse_value(0).unwrap(), SmlValue::Int(-250));
        assert_eq!(parser.parse_value(0).unwrap(), SmlValue::UInt(65536));
        assert_eq!(parser.parse_value(0).unwrap(), SmlValue::Absent);
        assert!(parser.at_end());
    }

    #[test]
    fn test_parse_odd_sized_integer() {
        // five byte signed value as some meters send it
        let data = [0x56, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut parser = SmlParser::new(&data);
        assert_eq!(parser.parse_value(0).unwrap(), SmlValue::Int(-2));
    }

    #[test]
    fn test_extract_frame_unescapes_payload() {
        let payload = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x02, 0x03, 0x04];
        let frame = build_frame(&payload);
        assert_eq!(extract_frame(&frame, CrcMode::X25).unwrap(), payload.to_vec());
    }

    #[test]
    fn test_extract_frame_removes_padding() {
        let frame = build_frame(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(extract_frame(&frame, CrcMode::X25).unwrap(), vec![0x01, 0x02, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_extract_frame_truncated() {
        let frame = build_frame(&[0x01, 0x02, 0x03, 0x04]);
        let cut = &frame[..frame.len() - 3];
        assert!(matches!(extract_frame(cut, CrcMode::X25), Err(SmlError::Truncated)));
    }

    #[test]
    fn test_extract_frame_checksum_mismatch() {
        let mut frame = build_frame(&[0x01, 0x02, 0x03, 0x04]);
        frame[8] ^= 0xFF;
        assert!(matches!(extract_frame(&frame, CrcMode::X25), Err(SmlError::ChecksumMismatch { .. })));
        assert!(extract_frame(&frame, CrcMode::Off).is_ok());
    }

    #[test]
    fn test_parse_sml_file() {
        let file = parse_sml_file(&sample_payload()).unwrap();
        assert_eq!(file.messages.len(), 3);
        assert!(matches!(file.messages[0].message_body, SmlMessageBody::OpenResponse(_)));
        assert!(matches!(file.messages[2].message_body, SmlMessageBody::CloseResponse));

        let SmlMessageBody::GetListResponse(response) = &file.messages[1].message_body else {
            panic!("second message is not a GetListResponse");
        };
        assert_eq!(file.messages[1].transaction_id, SAMPLE_TRANSACTION_ID.to_vec());
        assert_eq!(response.server_id, SAMPLE_SERVER_ID.to_vec());
        assert_eq!(response.val_list.len(), 3);

        let energy = &response.val_list[0];
        assert_eq!(energy.obis_code, vec![0x01, 0x00, 0x01, 0x08, 0x00, 0xFF]);
        assert_eq!(energy.unit, Some(30));
        assert_eq!(energy.scaler, Some(-1));
        assert_eq!(energy.value, Some(SmlValue::UInt(100)));

        let power = &response.val_list[1];
        assert_eq!(power.value, Some(SmlValue::Int(-250)));
        assert_eq!(power.scaler, Some(0));

        let manufacturer = &response.val_list[2];
        assert_eq!(manufacturer.value, Some(SmlValue::OctetString(b"EMH".to_vec())));
        assert_eq!(manufacturer.scaler, None);
    }

    #[test]
    fn test_parse_sml_message_roundtrip_frame() {
        let file = parse_sml_message(&sample_telegram(), CrcMode::X25).unwrap();
        assert_eq!(file.messages.len(), 3);
    }

    #[test]
    fn test_parse_oversized_length() {
        let mut data = vec![0x72];
        data.extend(std::iter::repeat(0x8F).take(16));
        data.push(0x0F);
        assert!(matches!(parse_sml_file(&data), Err(SmlError::ParseError(_))));

        // claims 0x7FF bytes while only a few follow
        let data = [0x87, 0x8F, 0x0F, 0x01, 0x02];
        let mut parser = SmlParser::new(&data);
        assert!(parser.parse_value(0).is_err());

        let mut parser = SmlParser::new(&[0x01, 0x02]);
        parser.next_byte().unwrap();
        assert!(parser.take(usize::MAX).is_err());
    }

    #[test]
    fn test_parse_garbage_payload() {
        assert!(parse_sml_file(&[0x76, 0x05]).is_err());
        assert!(parse_sml_file(&[0x00, 0x00]).is_err());
    }
}
