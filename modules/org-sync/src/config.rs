use event_bus::BusConfig;
use graph_sync::{HttpGraphConfig, DEFAULT_WRITE_TIMEOUT};
use outbox::ProcessorConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Transport the CDC consumer reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    fn parse(raw: Option<String>) -> Self {
        match raw
            .unwrap_or_else(|| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            other => {
                tracing::warn!(bus_type = %other, "Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// In-memory outbox when unset
    pub database_url: Option<String>,
    pub bus_type: BusType,
    pub nats_url: String,
    pub cdc_subject: String,
    pub host: String,
    pub port: u16,
    pub processor: ProcessorConfig,
    pub bus: BusConfig,
    /// In-memory graph when unset
    pub graph: Option<HttpGraphConfig>,
    pub graph_write_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let processor_defaults = ProcessorConfig::default();
        let bus_defaults = BusConfig::default();

        let retention_hours: u64 = parse_or(&lookup, "OUTBOX_RETENTION_HOURS", 168)?;
        let retention_secs = retention_hours
            .checked_mul(3600)
            .ok_or_else(|| "OUTBOX_RETENTION_HOURS is too large".to_string())?;
        let processor = ProcessorConfig {
            batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", processor_defaults.batch_size)?,
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "OUTBOX_POLL_INTERVAL_SECS",
                processor_defaults.poll_interval.as_secs(),
            )?),
            cleanup_interval: Duration::from_secs(parse_or(
                &lookup,
                "OUTBOX_CLEANUP_INTERVAL_SECS",
                processor_defaults.cleanup_interval.as_secs(),
            )?),
            retention: Duration::from_secs(retention_secs),
            enable_dead_letter: parse_bool_or(
                &lookup,
                "OUTBOX_ENABLE_DEAD_LETTER",
                processor_defaults.enable_dead_letter,
            )?,
            dead_letter_threshold: parse_or(
                &lookup,
                "OUTBOX_DEAD_LETTER_THRESHOLD",
                processor_defaults.dead_letter_threshold,
            )?,
        };
        if processor.batch_size == 0 {
            return Err("OUTBOX_BATCH_SIZE must be at least 1".to_string());
        }
        if processor.poll_interval.is_zero() {
            return Err("OUTBOX_POLL_INTERVAL_SECS must be at least 1".to_string());
        }
        if processor.cleanup_interval.is_zero() {
            return Err("OUTBOX_CLEANUP_INTERVAL_SECS must be at least 1".to_string());
        }
        processor.validate().map_err(|e| e.to_string())?;

        let bus = BusConfig {
            queue_capacity: parse_or(&lookup, "BUS_QUEUE_CAPACITY", bus_defaults.queue_capacity)?,
            max_in_flight: parse_or(&lookup, "BUS_MAX_IN_FLIGHT", bus_defaults.max_in_flight)?,
        };

        let graph_write_timeout = Duration::from_secs(parse_or(
            &lookup,
            "GRAPH_WRITE_TIMEOUT_SECS",
            DEFAULT_WRITE_TIMEOUT.as_secs(),
        )?);
        if graph_write_timeout.is_zero() {
            return Err("GRAPH_WRITE_TIMEOUT_SECS must be at least 1".to_string());
        }
        let graph = lookup("GRAPH_URL").map(|url| HttpGraphConfig {
            url,
            database: lookup("GRAPH_DATABASE").unwrap_or_else(|| "neo4j".to_string()),
            user: lookup("GRAPH_USER"),
            password: lookup("GRAPH_PASSWORD"),
            request_timeout: graph_write_timeout,
        });

        Ok(Config {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            bus_type: BusType::parse(lookup("BUS_TYPE")),
            nats_url: lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string()),
            cdc_subject: lookup("CDC_SUBJECT").unwrap_or_else(|| "cdc.>".to_string()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8095)?,
            processor,
            bus,
            graph,
            graph_write_timeout,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} must be a valid {}", std::any::type_name::<T>())),
    }
}

fn parse_bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, String> {
    match lookup(key).map(|raw| raw.trim().to_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("{key} must be true or false")),
        },
    }
}
