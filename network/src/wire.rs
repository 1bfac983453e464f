//! A message-level duplex link to one remote peer.
//!
//! A [`Wire`] hides the transport: the TCP variant spawns a reader and a
//! writer task around a socket, the in-memory variant simply crosses two
//! channel pairs.

use chainwatch_messages::PeerMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec;

pub struct Wire {
    /// Display name of the remote side, e.g. `"10.0.0.1:8333"`.
    pub remote: String,
    /// Messages queued here are written to the remote.
    pub outbound: mpsc::UnboundedSender<PeerMessage>,
    /// Messages read from the remote.
    pub inbound: mpsc::UnboundedReceiver<PeerMessage>,
    /// Transport tasks, aborted when the wire is closed.
    pub tasks: Vec<JoinHandle<()>>,
}

impl Wire {
    /// Two wires connected back to back, for in-process peers.
    pub fn pair(a_name: impl Into<String>, b_name: impl Into<String>) -> (Wire, Wire) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Wire {
            remote: b_name.into(),
            outbound: a_tx,
            inbound: a_rx,
            tasks: Vec::new(),
        };
        let b = Wire {
            remote: a_name.into(),
            outbound: b_tx,
            inbound: b_rx,
            tasks: Vec::new(),
        };
        (a, b)
    }

    /// Wrap a connected socket. Spawns one read loop and one write loop.
    pub fn from_stream(remote: String, stream: TcpStream) -> Wire {
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<PeerMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let read_peer = remote.clone();
        let read_loop = tokio::spawn(async move {
            loop {
                match codec::read_frame(&mut reader).await {
                    Ok(Some(message)) => {
                        if in_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(peer = %read_peer, "peer disconnected (clean close)");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %read_peer, error = %e, "peer disconnected with error");
                        break;
                    }
                }
            }
        });

        let write_peer = remote.clone();
        let write_loop = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = codec::write_frame(&mut writer, &message).await {
                    tracing::warn!(
                        peer = %write_peer,
                        command = message.command(),
                        error = %e,
                        "write to peer failed"
                    );
                    break;
                }
            }
        });

        Wire {
            remote,
            outbound: out_tx,
            inbound: in_rx,
            tasks: vec![read_loop, write_loop],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn pair_crosses_messages() {
        let (a, mut b) = Wire::pair("a", "b");
        assert_eq!(a.remote, "b");
        assert_eq!(b.remote, "a");
        a.outbound.send(PeerMessage::Verack).expect("open");
        assert_eq!(b.inbound.recv().await, Some(PeerMessage::Verack));
    }

    #[tokio::test]
    async fn tcp_wire_exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let client = tokio::spawn({
            let addr = addr.clone();
            async move { TcpStream::connect(addr).await.expect("connect") }
        });
        let (server_stream, _) = listener.accept().await.expect("accept");
        let client_stream = client.await.expect("join");

        let client_wire = Wire::from_stream(addr, client_stream);
        let mut server_wire = Wire::from_stream("client".into(), server_stream);

        client_wire
            .outbound
            .send(PeerMessage::Ping(42))
            .expect("open");
        assert_eq!(server_wire.inbound.recv().await, Some(PeerMessage::Ping(42)));
        assert_eq!(client_wire.tasks.len(), 2);
    }
}
