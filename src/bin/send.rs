//! Load generator streaming synthetic records at a running ingest listener.

use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use rand::Rng;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use streamtally::{Record, protocol};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Streamtally synthetic record sender")]
struct SendArgs {
    /// Ingest endpoint to stream records at.
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:50051")]
    addr: String,
    /// Number of records to send.
    #[arg(long, value_name = "COUNT", default_value = "10")]
    count: u64,
    /// Number of distinct device identifiers to cycle through.
    #[arg(long, value_name = "DEVICES", default_value = "1")]
    devices: u64,
    /// Prefix for generated device identifiers.
    #[arg(long, value_name = "PREFIX", default_value = "sensor")]
    device_prefix: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = SendArgs::parse();
    if args.devices == 0 {
        return Err("at least one device identifier is required".into());
    }

    let mut stream = TcpStream::connect(&args.addr).await?;
    let mut frame = Vec::new();
    for index in 0..args.count {
        let device_id = format!("{}-{}", args.device_prefix, index % args.devices + 1);
        let record = Record::new(device_id, unix_millis()?, random_payload());
        frame.clear();
        protocol::encode_frame(&record, &mut frame)?;
        stream.write_all(&frame).await?;
    }

    // Half-close tells the server the stream is complete; the single ack
    // byte confirms every record was handed to the pipeline.
    stream.shutdown().await?;
    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await?;
    match ack[0] {
        protocol::ACK_OK => {
            info!(records = args.count, "stream acknowledged");
            Ok(())
        }
        other => Err(format!("ingest refused the stream (ack {other})").into()),
    }
}

fn unix_millis() -> Result<i64, std::time::SystemTimeError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64)
}

/// Mixes payload shapes so runs exercise arbitrary, uninspected bytes:
/// sensor-style JSON, raw binary, or a log line.
fn random_payload() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    match rng.gen_range(0..3) {
        0 => serde_json::json!({
            "temperature": rng.gen_range(20.0..35.0),
            "humidity": rng.gen_range(30.0..80.0),
            "pressure": rng.gen_range(980.0..1020.0),
            "battery": rng.gen_range(20.0..100.0),
        })
        .to_string()
        .into_bytes(),
        1 => {
            let mut bytes = vec![0u8; rng.gen_range(100..500)];
            rng.fill(&mut bytes[..]);
            bytes
        }
        _ => format!(
            "INFO: system running normally | value: {:.2}",
            rng.gen_range(0.0..100.0)
        )
        .into_bytes(),
    }
}
