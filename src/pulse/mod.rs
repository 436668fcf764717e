use crate::config::PulseConfig;
use crate::poll::TelegramSource;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Unable to create HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("Request to pulse bridge failed: {0}")]
    Request(reqwest::Error),
}

/// Fetches the raw SML telegram of one node from the pulse bridge
pub struct PulseFetcher {
    client: Client,
    url: String,
    user: String,
    password: String,
    node: String,
}

impl PulseFetcher {
    pub fn new(config: &PulseConfig) -> Result<Self, PulseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(PulseError::Client)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            node: config.node.clone(),
        })
    }
}

#[async_trait]
impl TelegramSource for PulseFetcher {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, PulseError> {
        let response = self.client.get(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .query(&[("node_id", &self.node)])
            .send()
            .await
            .map_err(PulseError::Request)?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!("Pulse bridge answered {}, no data this cycle", status);
            return Ok(None);
        }

        let body = response.bytes().await.map_err(PulseError::Request)?;
        if body.is_empty() {
            debug!("Pulse bridge sent an empty telegram");
            return Ok(None);
        }

        debug!("Received telegram with {} bytes", body.len());
        Ok(Some(body.to_vec()))
    }
}
