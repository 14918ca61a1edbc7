//! The record counting core: bounded intake, single aggregator, snapshots.
//!
//! Producers hand records to the intake buffer, the aggregator consumes them
//! one at a time into the count table, and readers observe the table through
//! snapshot copies. The intake buffer is the only producer/consumer
//! contention point; the count table is the only aggregator/reader one.

pub mod aggregate;
pub mod counts;
pub mod intake;
