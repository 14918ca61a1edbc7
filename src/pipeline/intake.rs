//! Bounded FIFO intake buffer between producers and the aggregator.

use tokio::sync::mpsc;

use crate::{PipelineError, Record};

/// Creates the intake buffer with a fixed capacity in records.
///
/// The buffer lives for the process lifetime and is never resized. Capacity
/// must be positive; configuration validation enforces that before wiring.
pub fn channel(capacity: usize) -> (IntakeSender, IntakeReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (IntakeSender { tx }, IntakeReceiver { rx })
}

/// Producer-side handle. Cloned once per inbound connection.
#[derive(Clone)]
pub struct IntakeSender {
    tx: mpsc::Sender<Record>,
}

impl IntakeSender {
    /// Hands one record to the aggregator, suspending while the buffer is
    /// at capacity. Backpressure is expressed as suspension: a full buffer
    /// never drops the record and never errors.
    ///
    /// Fails only when the aggregator has permanently stopped, so a producer
    /// is never left suspended on a buffer nobody drains.
    pub async fn enqueue(&self, record: Record) -> Result<(), PipelineError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| PipelineError::Intake("aggregator stopped".to_string()))
    }
}

/// Consumer-side handle, owned by the single aggregator task.
pub struct IntakeReceiver {
    rx: mpsc::Receiver<Record>,
}

impl IntakeReceiver {
    /// Takes the oldest buffered record, suspending while the buffer is
    /// empty. Returns `None` once every sender is gone and the buffer has
    /// drained.
    pub async fn dequeue(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    /// Number of records currently buffered.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }
}
