//! Network adapters around the counting core.

pub mod http;
pub mod ingest;
