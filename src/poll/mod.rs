use crate::config::ObisRule;
use crate::mapping::map_values_to_msg;
use crate::models::{OutputMessage, RunState, TelegramResult};
use crate::mqtt::PublishError;
use crate::pulse::PulseError;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::Location;
use thiserror::Error;

/// Source of raw telegrams, `None` when there is nothing to read this cycle
#[async_trait]
pub trait TelegramSource: Send + Sync {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, PulseError>;
}

/// Turns raw telegram bytes into readings. Never fails, a broken telegram
/// yields a result without transaction id.
pub trait TelegramDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> TelegramResult;
}

#[derive(Error, Debug)]
pub enum CycleErrorKind {
    #[error(transparent)]
    Fetch(#[from] PulseError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// A transport failure of one cycle together with the place it was raised
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct CycleError {
    pub kind: CycleErrorKind,
    pub location: &'static Location<'static>,
}

impl From<PulseError> for CycleError {
    #[track_caller]
    fn from(error: PulseError) -> Self {
        CycleError { kind: error.into(), location: Location::caller() }
    }
}

impl From<PublishError> for CycleError {
    #[track_caller]
    fn from(error: PublishError) -> Self {
        CycleError { kind: error.into(), location: Location::caller() }
    }
}

/// fetch, decode, drop repeated telegrams, map
pub struct PollCycle<S, D> {
    source: S,
    decoder: D,
    rules: HashMap<String, ObisRule>,
    static_fields: Map<String, Value>,
}

impl<S: TelegramSource, D: TelegramDecoder> PollCycle<S, D> {
    pub fn new(source: S, decoder: D, rules: HashMap<String, ObisRule>, static_fields: Map<String, Value>) -> Self {
        Self { source, decoder, rules, static_fields }
    }

    /// Run one cycle. `state` is only touched when a new telegram was mapped.
    pub async fn poll(&self, state: &mut RunState) -> Result<Option<OutputMessage>, CycleError> {
        let Some(data) = self.source.fetch().await? else {
            debug!("No telegram available");
            return Ok(None);
        };

        let result = self.decoder.decode(&data);
        let Some(transaction_id) = result.transaction_id else {
            return Ok(None);
        };
        if state.last_transaction_id.as_deref() == Some(transaction_id.as_str()) {
            debug!("Telegram {} already seen, skipping", transaction_id);
            return Ok(None);
        }

        let mut msg = map_values_to_msg(&result.readings, &self.rules, &self.static_fields);
        msg.stamp(&transaction_id, Utc::now());

        debug!("New telegram {} mapped to {} fields", transaction_id, msg.len());
        state.last_transaction_id = Some(transaction_id);
        Ok(Some(msg))
    }
}
