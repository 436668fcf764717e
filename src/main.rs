use pulse2mqtt::models::LifecycleRecord;
use pulse2mqtt::mqtt::{ConsoleSink, MqttSink};
use pulse2mqtt::{Config, OutputSink, PollCycle, PulseFetcher, RunLoop, RunOutcome, RunSettings, SmlDecoder};
use log::{error, warn};
use std::fs::OpenOptions;
use std::process::exit;

const DEFAULT_CONFIG: &str = "config.yaml";

/// `pulse2mqtt [config-path] [mqtt]`, returns the config path and whether to publish to the broker
fn parse_args(args: impl Iterator<Item = String>) -> (String, bool) {
    let mut config_path = None;
    let mut use_broker = false;
    for arg in args {
        if arg == "mqtt" {
            use_broker = true;
        } else if config_path.is_none() {
            config_path = Some(arg);
        }
    }
    (config_path.unwrap_or_else(|| DEFAULT_CONFIG.to_string()), use_broker)
}

fn init_logging(config: &Config) {
    let env = env_logger::Env::new().filter_or("PULSE2MQTT_LOG_LEVEL", config.log_level.as_str());
    let mut builder = env_logger::Builder::from_env(env);

    let mut file_error = None;
    if let Some(path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            },
            Err(e) => file_error = Some(format!("Unable to open log file {}: {}, logging to stderr", path, e)),
        }
    }
    builder.init();

    if let Some(msg) = file_error {
        warn!("{}", msg);
    }
}

#[tokio::main]
async fn main() {
    let (config_path, use_broker) = parse_args(std::env::args().skip(1));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load config {}: {}", config_path, e);
            exit(1);
        }
    };
    init_logging(&config);
    LifecycleRecord::start().log();

    let fetcher = match PulseFetcher::new(&config.pulse) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    let sink = if use_broker {
        let mqtt = match config.require_mqtt() {
            Ok(mqtt) => mqtt,
            Err(e) => {
                error!("{}", e);
                exit(1);
            }
        };
        match MqttSink::connect(mqtt) {
            Ok(sink) => OutputSink::Broker(sink),
            Err(e) => {
                error!("{}", e);
                exit(1);
            }
        }
    } else {
        OutputSink::Console(ConsoleSink::stdout())
    };

    let cycle = PollCycle::new(fetcher, SmlDecoder::new(config.crc), config.obis.clone(), config.static_fields.clone());
    let mut runner = RunLoop::new(cycle, sink, RunSettings::from_config(&config));

    /* Listen for Ctrl-C from the start, the loop only reacts while sleeping */
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => { let _ = shutdown_tx.send(()); },
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
    let shutdown = async move {
        if shutdown_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = runner.run(shutdown).await;
    runner.close().await;

    let reason = match outcome {
        RunOutcome::Shutdown => "shutdown requested".to_string(),
        RunOutcome::Aborted { failures } => format!("aborted after {} consecutive failures", failures),
    };
    LifecycleRecord::stop(reason).log();
    exit(outcome.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])), ("config.yaml".to_string(), false));
        assert_eq!(parse_args(args(&["mqtt"])), ("config.yaml".to_string(), true));
        assert_eq!(parse_args(args(&["/etc/pulse.json"])), ("/etc/pulse.json".to_string(), false));
        assert_eq!(parse_args(args(&["/etc/pulse.yaml", "mqtt"])), ("/etc/pulse.yaml".to_string(), true));
        assert_eq!(parse_args(args(&["mqtt", "other.yaml"])), ("other.yaml".to_string(), true));
    }
}
