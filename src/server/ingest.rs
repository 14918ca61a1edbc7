//! TCP ingest listener feeding producer record streams into the intake.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    PipelineError,
    pipeline::intake::IntakeSender,
    protocol::{self, ProtocolError},
};

/// Spawns the accept loop. Each producer connection gets its own task and
/// its own clone of the intake sender; a connection failure never affects
/// other producers or the aggregator.
pub fn spawn(
    listener: TcpListener,
    intake: IntakeSender,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(target: "ingest", %peer, "producer connected");
                        let intake = intake.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(error) =
                                handle_stream(stream, peer, intake, max_frame_bytes, shutdown).await
                            {
                                warn!(target: "ingest", %peer, error = %error, "producer stream failed");
                            }
                        });
                    }
                    Err(err) => {
                        return Err(PipelineError::Io(format!("accept: {err}")));
                    }
                }
            }
        }
        Ok(())
    })
}

/// Reads framed records until the producer half-closes, enqueueing each one
/// before pulling the next. Awaiting the enqueue is what turns a full intake
/// buffer into TCP backpressure on the remote sender.
async fn handle_stream(
    mut stream: TcpStream,
    peer: SocketAddr,
    intake: IntakeSender,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let mut received = 0u64;

    loop {
        let mut header = [0u8; protocol::FRAME_HEADER_BYTES];
        let read = tokio::select! {
            // Pipeline stopping: close without an acknowledgement, the same
            // outcome the producer sees on a mid-stream disconnect.
            _ = shutdown.cancelled() => return Ok(()),
            read = stream.read_exact(&mut header) => read,
        };
        match read {
            Ok(_) => {}
            // EOF at a frame boundary is the end of the stream.
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(PipelineError::Io(format!("{peer}: read frame header: {err}")));
            }
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > max_frame_bytes {
            let err = ProtocolError::FrameTooLarge {
                len,
                max: max_frame_bytes,
            };
            send_ack(&mut stream, protocol::ACK_FAILED).await?;
            return Err(PipelineError::Protocol(format!("{peer}: {err}")));
        }

        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|err| PipelineError::Io(format!("{peer}: read frame body: {err}")))?;

        let record = match protocol::decode_frame(&body) {
            Ok(record) => record,
            Err(err) => {
                send_ack(&mut stream, protocol::ACK_FAILED).await?;
                return Err(PipelineError::Protocol(format!("{peer}: {err}")));
            }
        };
        trace!(target: "ingest", %peer, %record, "record received");

        if let Err(err) = intake.enqueue(record).await {
            send_ack(&mut stream, protocol::ACK_FAILED).await?;
            return Err(err);
        }
        received += 1;
    }

    send_ack(&mut stream, protocol::ACK_OK).await?;
    debug!(target: "ingest", %peer, records = received, "producer stream acknowledged");
    Ok(())
}

async fn send_ack(stream: &mut TcpStream, ack: u8) -> Result<(), PipelineError> {
    stream
        .write_all(&[ack])
        .await
        .map_err(|err| PipelineError::Io(format!("write ack: {err}")))
}
