//! The single consumer task draining the intake buffer into the count table.

use std::fmt;

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::PipelineError;

use super::{counts::CountTable, intake::IntakeReceiver};

/// Lifecycle of the aggregator, published through a watch channel so the
/// query surface can report liveness.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AggregatorStatus {
    /// Consuming records and updating counts.
    #[default]
    Running,
    /// Shutdown observed; the record in hand is applied, nothing further is
    /// pulled.
    Draining,
    /// Exited cleanly. Buffered records left behind are not counted.
    Stopped,
    /// Exited on a fatal count-update error.
    Failed(String),
}

impl AggregatorStatus {
    /// Returns `true` while snapshots still track incoming records.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

impl fmt::Display for AggregatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Final accounting returned when the aggregator exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorReport {
    /// Records fully applied to the count table.
    pub records_counted: u64,
    /// Records still buffered when the loop stopped.
    pub records_abandoned: usize,
}

enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Spawns the aggregator task. There is exactly one per pipeline; exclusive
/// ownership of the count table and the receiver makes table mutation
/// race-free without any locking on the write path beyond the snapshot
/// critical section.
pub fn spawn(
    mut input: IntakeReceiver,
    mut table: CountTable,
    status: watch::Sender<AggregatorStatus>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<AggregatorReport, PipelineError>> {
    tokio::spawn(async move {
        let mut phase = Phase::Running;
        let mut counted = 0u64;

        loop {
            match phase {
                Phase::Running => {
                    // The shutdown check is biased ahead of the dequeue so
                    // the Running -> Draining transition is prompt once the
                    // token fires.
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            let _ = status.send(AggregatorStatus::Draining);
                            phase = Phase::Draining;
                        }
                        maybe = input.dequeue() => match maybe {
                            Some(record) => {
                                // No suspension between dequeue and apply: a
                                // record is either unconsumed or fully
                                // counted, never half-applied.
                                if let Err(err) = table.apply(&record.device_id) {
                                    error!(target: "aggregate", error = %err, "count update failed");
                                    let _ = status.send(AggregatorStatus::Failed(err.to_string()));
                                    return Err(err);
                                }
                                counted += 1;
                            }
                            None => phase = Phase::Stopped,
                        }
                    }
                }
                Phase::Draining => {
                    let buffered = input.buffered();
                    if buffered > 0 {
                        warn!(
                            target: "aggregate",
                            buffered,
                            "stopping with unprocessed records buffered"
                        );
                    }
                    phase = Phase::Stopped;
                }
                Phase::Stopped => break,
            }
        }

        let report = AggregatorReport {
            records_counted: counted,
            records_abandoned: input.buffered(),
        };
        let _ = status.send(AggregatorStatus::Stopped);
        info!(
            target: "aggregate",
            counted = report.records_counted,
            abandoned = report.records_abandoned,
            "aggregator stopped"
        );
        Ok(report)
    })
}
