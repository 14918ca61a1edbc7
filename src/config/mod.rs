//! Configuration loading and validation utilities.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tokio::fs;
use tracing::instrument;

use crate::{PipelineError, protocol};

/// Command-line arguments used to bootstrap the runtime.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Streamtally per-device record counting service")]
pub struct CliArgs {
    /// Location of the runtime configuration document.
    #[arg(long, value_name = "PATH", default_value = "streamtally.toml")]
    pub config: PathBuf,
    /// Interface both listeners bind to.
    #[arg(long, value_name = "HOST", env = "STREAMTALLY_HOST")]
    pub host: Option<String>,
    /// TCP port accepting producer record streams.
    #[arg(long, value_name = "PORT", env = "STREAMTALLY_INGEST_PORT")]
    pub ingest_port: Option<u16>,
    /// HTTP port serving count snapshots.
    #[arg(long, value_name = "PORT", env = "STREAMTALLY_HTTP_PORT")]
    pub http_port: Option<u16>,
    /// Intake buffer capacity in records.
    #[arg(long, value_name = "RECORDS", env = "STREAMTALLY_BUFFER_CAPACITY")]
    pub buffer_capacity: Option<usize>,
    /// Largest accepted record frame in bytes.
    #[arg(long, value_name = "BYTES", env = "STREAMTALLY_MAX_FRAME_BYTES")]
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct ServerDefaults {
    pub host: String,
    pub ingest_port: u16,
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct IntakeDefaults {
    pub buffer_capacity: usize,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct ConfigDocument {
    pub server: ServerDefaults,
    pub intake: IntakeDefaults,
}

/// Network endpoints the process binds at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub ingest_port: u16,
    pub http_port: u16,
}

/// Intake sizing derived from the document and CLI overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub buffer_capacity: usize,
    pub max_frame_bytes: usize,
}

/// Fully merged configuration set.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cli: CliArgs,
    pub server: ServerConfig,
    pub intake: IntakeConfig,
}

impl AppConfig {
    #[instrument(skip_all)]
    pub async fn load(cli: CliArgs) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(&cli.config)
            .await
            .map_err(|err| PipelineError::Config(format!("failed to read config: {err}")))?;
        let doc: ConfigDocument = toml::from_str(&raw)
            .map_err(|err| PipelineError::Config(format!("invalid config document: {err}")))?;

        let host = cli.host.clone().unwrap_or(doc.server.host);
        if host.is_empty() {
            return Err(PipelineError::Config(
                "listen host must not be empty".to_string(),
            ));
        }
        let ingest_port = cli.ingest_port.unwrap_or(doc.server.ingest_port);
        let http_port = cli.http_port.unwrap_or(doc.server.http_port);
        if ingest_port == http_port {
            return Err(PipelineError::Config(format!(
                "ingest and http ports must differ, both are {ingest_port}"
            )));
        }

        let buffer_capacity = cli.buffer_capacity.unwrap_or(doc.intake.buffer_capacity);
        if buffer_capacity == 0 {
            return Err(PipelineError::Config(
                "intake buffer capacity must be positive".to_string(),
            ));
        }
        let max_frame_bytes = cli.max_frame_bytes.unwrap_or(doc.intake.max_frame_bytes);
        if max_frame_bytes < protocol::RECORD_HEADER_BYTES {
            return Err(PipelineError::Config(format!(
                "max frame bytes {max_frame_bytes} is below the {}-byte record header",
                protocol::RECORD_HEADER_BYTES
            )));
        }

        Ok(Self {
            cli,
            server: ServerConfig {
                host,
                ingest_port,
                http_port,
            },
            intake: IntakeConfig {
                buffer_capacity,
                max_frame_bytes,
            },
        })
    }
}
