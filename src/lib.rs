//! Core library for the streamtally counting pipeline.
//!
//! The crate exposes the record type shared across the asynchronous pipeline
//! stages, configuration loading utilities, the ingest wire codec, and the
//! orchestration entry point used by the service binary.

pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod server;

use std::fmt::Display;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::pipeline::{
    aggregate::{self, AggregatorStatus},
    counts::CountTable,
    intake,
};

/// Immutable unit of telemetry input travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Identifier of the originating device. An empty identifier is a
    /// regular device key; validation belongs to producers, not the core.
    pub device_id: String,
    /// Producer-reported capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Opaque payload bytes. Never inspected by the pipeline.
    pub payload: Vec<u8>,
}

impl Record {
    /// Helper for constructing records from adapter code and tests.
    pub fn new(device_id: impl Into<String>, timestamp_ms: i64, payload: Vec<u8>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp_ms,
            payload,
        }
    }
}

/// Errors returned by the pipeline and its adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("wire protocol violation: {0}")]
    Protocol(String),
    #[error("intake rejected: {0}")]
    Intake(String),
    #[error("count update failed: {0}")]
    Count(String),
    #[error("task join failure: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Runs the service until a shutdown signal arrives or the aggregator fails.
#[instrument(skip_all)]
pub async fn run(config: config::AppConfig) -> Result<(), PipelineError> {
    let shutdown = CancellationToken::new();

    let (intake_tx, intake_rx) = intake::channel(config.intake.buffer_capacity);
    let table = CountTable::default();
    let reader = table.reader();
    let (status_tx, status_rx) = watch::channel(AggregatorStatus::Running);
    let mut aggregator = aggregate::spawn(intake_rx, table, status_tx, shutdown.clone());

    let ingest_listener = bind(&config.server.host, config.server.ingest_port, "ingest").await?;
    let http_listener = bind(&config.server.host, config.server.http_port, "http").await?;

    let mut ingest = server::ingest::spawn(
        ingest_listener,
        intake_tx,
        config.intake.max_frame_bytes,
        shutdown.clone(),
    );
    let mut http = server::http::spawn(http_listener, reader, status_rx, shutdown.clone());

    // The first task to terminate decides the outcome; the others are wound
    // down behind it. A listener dying is as fatal as the aggregator dying.
    let mut aggregator_joined = None;
    let mut ingest_joined = None;
    let mut http_joined = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        result = &mut aggregator => aggregator_joined = Some(result),
        result = &mut ingest => ingest_joined = Some(result),
        result = &mut http => http_joined = Some(result),
    }
    shutdown.cancel();

    let report = match aggregator_joined {
        Some(result) => result,
        // Cancellation lets the aggregator finish its Draining transition
        // before the join completes.
        None => aggregator.await,
    }
    .map_err(PipelineError::from)??;
    match ingest_joined {
        Some(result) => result,
        None => ingest.await,
    }
    .map_err(PipelineError::from)??;
    match http_joined {
        Some(result) => result,
        None => http.await,
    }
    .map_err(PipelineError::from)??;

    info!(
        counted = report.records_counted,
        abandoned = report.records_abandoned,
        "pipeline stopped"
    );
    Ok(())
}

async fn bind(host: &str, port: u16, role: &'static str) -> Result<TcpListener, PipelineError> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|err| PipelineError::Io(format!("bind {role} {host}:{port}: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| PipelineError::Io(format!("local addr for {role}: {err}")))?;
    info!(%addr, role, "listener bound");
    Ok(listener)
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Record(device={}, ts={}, {} payload bytes)",
            self.device_id,
            self.timestamp_ms,
            self.payload.len()
        )
    }
}
