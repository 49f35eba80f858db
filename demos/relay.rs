//! Relay demo: one stream driven through a session over an in-memory
//! transport.
//!
//! The "peer" task plays both endpoints: it opens stream 1 with a reserved
//! buffer, sends data on both directions, ends the client direction and
//! finally resets the server direction. The session prints every event.
//!
//! ```text
//! RUST_LOG=halfduplex=debug cargo run --example relay
//! ```

use bytes::Bytes;
use halfduplex::extension::{ExtensionPolicy, Reservation};
use halfduplex::handshake::Authorization;
use halfduplex::protocol::{Direction, Frame, FrameType, StreamId};
use halfduplex::{Escalation, Session, StreamEvent};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

const CLIENT: Direction = Direction::InitiatorToAcceptor;
const SERVER: Direction = Direction::AcceptorToInitiator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("halfduplex=debug")),
        )
        .init();

    let (local, mut peer) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(local);

    let mut session = Session::builder()
        .extension_policy(ExtensionPolicy::new().require(FrameType::Flush, SERVER))
        .escalation(Escalation::None)
        .start(reader, writer);

    let sid = StreamId(1);
    let token = Authorization::from(0xC0FFEE_u64);

    let script = vec![
        Frame::begin(sid, CLIENT, token).with_extension(Reservation::new(4096).to_extension()?),
        Frame::begin(sid, SERVER, token),
        Frame::data(sid, CLIENT, Some(Bytes::from_static(b"hello from the client"))),
        Frame::flush(sid, SERVER, None).with_extension(Bytes::from_static(b"checkpoint")),
        Frame::end(sid, CLIENT),
        Frame::reset(sid, SERVER),
    ];

    tokio::spawn(async move {
        for frame in script {
            if peer.write_all(&frame.encode()).await.is_err() {
                break;
            }
        }
        // keep the transport open until the session has drained
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    while let Some(event) = session.next_event().await {
        println!("{:?}", event);

        match event {
            StreamEvent::DataAvailable {
                stream_id,
                direction,
                ..
            }
            | StreamEvent::Ended {
                stream_id,
                direction,
            } => {
                // the stream may already be gone if both directions finished
                let (drained, events) = match session.drain(stream_id, direction).await {
                    Ok(result) => result,
                    Err(e) => {
                        println!("  {}", e);
                        continue;
                    }
                };
                for delivery in drained.deliveries {
                    println!(
                        "  {} {:?}: payload={:?} extension={:?}",
                        direction, delivery.kind, delivery.payload, delivery.extension
                    );
                }
                for event in &events {
                    println!("{:?}", event);
                }
                if events.contains(&StreamEvent::Destroyed { stream_id }) {
                    break;
                }
            }
            StreamEvent::Destroyed { .. } => break,
            _ => {}
        }
    }

    Ok(())
}
