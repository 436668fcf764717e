use chrono::{DateTime, Utc};
use log::Level;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::panic::Location;
use tokio::time::Instant;

/// Key carrying the telegram's transaction id in every published message
pub const TRANSACTION_ID_KEY: &str = "transaction_id";
/// Key carrying the UTC publication time in every published message
pub const TIME_KEY: &str = "Time";

/// One decoded register of a telegram
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterReading {
    /// Register id, `1-0:1.8.0*255` for OBIS names
    pub register: String,
    /// Human readable register name, when the decoder knows it
    pub name: Option<String>,
    /// Raw value as transmitted, before scaling
    pub value: Option<f64>,
    /// Power of ten the raw value has to be multiplied with
    pub scaler: Option<i8>,
    pub unit: Option<String>,
}

impl RegisterReading {
    pub fn new(register: impl Into<String>, value: Option<f64>, scaler: Option<i8>) -> Self {
        Self {
            register: register.into(),
            name: None,
            value,
            scaler,
            unit: None,
        }
    }

    /// Physical value, `value * 10^scaler`. `None` when the register carries no value.
    pub fn scaled_value(&self) -> Option<f64> {
        let value = self.value?;
        Some(match self.scaler {
            // dividing keeps decimal results like 100 * 10^-1 exact
            Some(s) if s < 0 => value / 10_f64.powi(-(s as i32)),
            Some(s) => value * 10_f64.powi(s as i32),
            None => value,
        })
    }
}

/// Result of decoding one telegram. A decode failure has no transaction id
/// and no readings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelegramResult {
    pub transaction_id: Option<String>,
    pub readings: Vec<RegisterReading>,
}

impl TelegramResult {
    pub fn decoded(transaction_id: String, readings: Vec<RegisterReading>) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            readings,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_failure(&self) -> bool {
        self.transaction_id.is_none()
    }
}

/// The unit of publication: mapped values, static fields, transaction id and time
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct OutputMessage {
    fields: Map<String, Value>,
}

impl OutputMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Attach the telegram identity and publication time
    pub fn stamp(&mut self, transaction_id: &str, time: DateTime<Utc>) {
        self.insert(TRANSACTION_ID_KEY, transaction_id);
        self.insert(TIME_KEY, format_timestamp(time));
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.fields)
    }
}

/// ISO-8601, whole seconds, UTC without zone suffix
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// State kept by the run loop between cycles
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub last_transaction_id: Option<String>,
    pub consecutive_failures: u32,
    pub last_alive: Instant,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            last_transaction_id: None,
            consecutive_failures: 0,
            last_alive: Instant::now(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured log record for everything that goes wrong in a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FailureRecord {
    /// A telegram could not be decoded, the raw bytes are kept hex encoded
    DecodeFailure { message: String, raw: String },
    TransportFailure { message: String, count: u32, location: String },
    Abort { message: String, count: u32, threshold: u32 },
}

impl FailureRecord {
    pub fn decode(error: &impl Display, raw: &[u8]) -> Self {
        FailureRecord::DecodeFailure {
            message: error.to_string(),
            raw: hex::encode(raw),
        }
    }

    pub fn transport(error: &impl Display, count: u32, location: &Location<'_>) -> Self {
        FailureRecord::TransportFailure {
            message: error.to_string(),
            count,
            location: format!("{}:{}", location.file(), location.line()),
        }
    }

    pub fn abort(count: u32, threshold: u32) -> Self {
        FailureRecord::Abort {
            message: "Aborting".to_string(),
            count,
            threshold,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            FailureRecord::Abort { .. } => Level::Error,
            _ => Level::Warn,
        }
    }

    pub fn log(&self) {
        match serde_json::to_string(self) {
            Ok(json) => log::log!(self.level(), "{}", json),
            Err(_) => log::log!(self.level(), "{:?}", self),
        }
    }
}

/// Log record for the life cycle of the process
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleRecord {
    Start { message: String, version: String },
    Alive { message: String, last_transaction_id: Option<String>, consecutive_failures: u32 },
    Stop { message: String, reason: String },
}

impl LifecycleRecord {
    pub fn start() -> Self {
        LifecycleRecord::Start {
            message: "Start".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn alive(state: &RunState) -> Self {
        LifecycleRecord::Alive {
            message: "Alive".to_string(),
            last_transaction_id: state.last_transaction_id.clone(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        LifecycleRecord::Stop {
            message: "Stop".to_string(),
            reason: reason.into(),
        }
    }

    pub fn log(&self) {
        match serde_json::to_string(self) {
            Ok(json) => log::info!("{}", json),
            Err(_) => log::info!("{:?}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lifecycle_record_json() {
        let mut state = RunState::new();
        state.last_transaction_id = Some("00418e02".to_string());
        let json = serde_json::to_value(LifecycleRecord::alive(&state)).unwrap();
        assert_eq!(json["event"], "alive");
        assert_eq!(json["message"], "Alive");
        assert_eq!(json["last_transaction_id"], "00418e02");
        assert_eq!(json["consecutive_failures"], 0);

        let json = serde_json::to_value(LifecycleRecord::stop("aborted")).unwrap();
        assert_eq!(json["event"], "stop");
        assert_eq!(json["reason"], "aborted");
    }

    #[test]
    fn test_scaled_value() {
        assert_eq!(RegisterReading::new("a", Some(100.0), Some(-1)).scaled_value(), Some(10.0));
        assert_eq!(RegisterReading::new("a", Some(12345.0), Some(-2)).scaled_value(), Some(123.45));
        assert_eq!(RegisterReading::new("a", Some(7.0), Some(3)).scaled_value(), Some(7000.0));
        assert_eq!(RegisterReading::new("a", Some(7.0), Some(0)).scaled_value(), Some(7.0));
        assert_eq!(RegisterReading::new("a", Some(-42.0), None).scaled_value(), Some(-42.0));
        assert_eq!(RegisterReading::new("a", None, Some(-1)).scaled_value(), None);
    }

    #[test]
    fn test_telegram_result_failure() {
        assert!(TelegramResult::failed().is_failure());
        assert!(TelegramResult::failed().readings.is_empty());
        assert!(!TelegramResult::decoded("01".to_string(), Vec::new()).is_failure());
    }

    #[test]
    fn test_format_timestamp_drops_subseconds() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 9).unwrap()
            + chrono::Duration::milliseconds(870);
        assert_eq!(format_timestamp(time), "2024-03-01T12:05:09");
    }

    #[test]
    fn test_failure_record_json() {
        let location = Location::caller();
        let record = FailureRecord::transport(&"connection refused", 2, location);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "transport_failure");
        assert_eq!(json["message"], "connection refused");
        assert_eq!(json["count"], 2);
        assert!(json["location"].as_str().unwrap().contains("models"));
        assert_eq!(record.level(), Level::Warn);

        let abort = FailureRecord::abort(3, 3);
        assert_eq!(serde_json::to_value(&abort).unwrap()["message"], "Aborting");
        assert_eq!(abort.level(), Level::Error);

        let decode = FailureRecord::decode(&"bad frame", &[0x1B, 0x01]);
        assert_eq!(serde_json::to_value(&decode).unwrap()["raw"], "1b01");
    }

    #[test]
    fn test_output_message_json() {
        let mut msg = OutputMessage::new();
        msg.insert("energy", 10.0);
        msg.stamp("T1", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"energy":10.0,"transaction_id":"T1","Time":"2024-03-01T00:00:00"}"#
        );
    }
}
