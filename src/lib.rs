//! Bridge from a pulse SML reader to MQTT
//!
//! Polls the raw SML telegram of one meter from the pulse bridge, decodes it,
//! maps the configured registers to named values and publishes new readings
//! as JSON to an MQTT topic or to stdout.

pub mod config;
pub mod models;
pub mod obis_utils;
pub mod metering_sml;
pub mod pulse;
pub mod mapping;
pub mod poll;
pub mod mqtt;
pub mod runner;

// Re-export common types for easier access
pub use config::Config;
pub use models::{OutputMessage, RegisterReading, RunState, TelegramResult};
pub use metering_sml::SmlDecoder;
pub use pulse::PulseFetcher;
pub use poll::PollCycle;
pub use mqtt::{OutputSink, PublishSink};
pub use runner::{RunLoop, RunOutcome, RunSettings};
