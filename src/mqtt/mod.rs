use crate::config::{MqttConfig, TlsConfig};
use crate::models::OutputMessage;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport};
use std::io::{Stdout, Write};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client rejected the message: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Unable to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Unable to write message: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to read TLS file {path}: {source}")]
    Tls { path: String, source: std::io::Error },
}

/// Where finished messages go
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn emit(&self, msg: &OutputMessage) -> Result<(), PublishError>;

    /// Release the underlying transport
    async fn close(&mut self) {}
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

fn read_tls_file(path: &str) -> Result<Vec<u8>, PublishError> {
    std::fs::read(path).map_err(|source| PublishError::Tls { path: path.to_string(), source })
}

fn tls_transport(tls: &TlsConfig) -> Result<Transport, PublishError> {
    let ca = read_tls_file(&tls.ca_file)?;
    let client_auth = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => Some((read_tls_file(cert)?, read_tls_file(key)?)),
        (None, None) => None,
        _ => {
            warn!("TLS client authentication needs both client_cert and client_key, ignoring it");
            None
        }
    };

    Ok(Transport::Tls(TlsConfiguration::Simple { ca, alpn: None, client_auth }))
}

/// Publishes every message as JSON to one topic on an MQTT broker
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    retain: bool,
    eventloop: Option<JoinHandle<()>>,
}

impl MqttSink {
    /// Set up the client and start polling its event loop. Needs a running tokio runtime.
    pub fn connect(config: &MqttConfig) -> Result<Self, PublishError> {
        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive));
        if let Some(user) = &config.user {
            mqttoptions.set_credentials(user.clone(), config.pass.clone().unwrap_or_default());
        }
        if let Some(tls) = &config.tls {
            mqttoptions.set_transport(tls_transport(tls)?);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        let handle = tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    },
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("Disconnect sent, leaving event loop");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(MqttSink {
            client,
            topic: config.topic.clone(),
            qos: qos_from_level(config.qos),
            retain: config.retain,
            eventloop: Some(handle),
        })
    }
}

#[async_trait]
impl PublishSink for MqttSink {
    async fn emit(&self, msg: &OutputMessage) -> Result<(), PublishError> {
        let payload = msg.to_json()?;
        debug!("Publishing to {}: {}", self.topic, payload);
        // fails with a full request queue instead of waiting for space
        self.client.try_publish(self.topic.clone(), self.qos, self.retain, payload)?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request failed: {}", e);
        }

        if let Some(mut handle) = self.eventloop.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle).await.is_err() {
                debug!("MQTT event loop did not stop in time, aborting it");
                handle.abort();
            }
        }
        info!("MQTT connection closed");
    }
}

/// Writes every message as one JSON line
pub struct ConsoleSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> PublishSink for ConsoleSink<W> {
    async fn emit(&self, msg: &OutputMessage) -> Result<(), PublishError> {
        let payload = msg.to_json()?;
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(out, "{}", payload)?;
        out.flush()?;
        Ok(())
    }
}

/// Sink picked at startup
pub enum OutputSink {
    Broker(MqttSink),
    Console(ConsoleSink<Stdout>),
}

#[async_trait]
impl PublishSink for OutputSink {
    async fn emit(&self, msg: &OutputMessage) -> Result<(), PublishError> {
        match self {
            OutputSink::Broker(sink) => sink.emit(msg).await,
            OutputSink::Console(sink) => sink.emit(msg).await,
        }
    }

    async fn close(&mut self) {
        match self {
            OutputSink::Broker(sink) => sink.close().await,
            OutputSink::Console(sink) => sink.close().await,
        }
    }
}
