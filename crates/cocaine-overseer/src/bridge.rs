//! The two stream-bridging dispatches that bind a client channel to a
//! worker channel.
//!
//! RPC framing is out of scope; a "dispatch" here is a tokio task reading
//! `StreamFrame`s off one `mpsc` channel and forwarding them onto another,
//! closing the shared `Channel` exactly once it sees a terminal frame or
//! the upstream half dies.

use std::sync::Arc;

use cocaine_proto::{ErrorCode, StreamFrame};
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::Channel;

/// The client side of one `enqueue` stream: frames inbound from the
/// client (forwarded to the worker) and a sink for frames outbound to the
/// client (the worker's replies).
pub struct ClientUpstream {
    pub incoming: mpsc::UnboundedReceiver<StreamFrame>,
    pub outgoing: mpsc::UnboundedSender<StreamFrame>,
}

/// Handle retained by whatever accepted the client connection: feed it
/// frames as they arrive, read replies as they're produced.
pub struct ClientHandle {
    pub to_overseer: mpsc::UnboundedSender<StreamFrame>,
    pub from_overseer: mpsc::UnboundedReceiver<StreamFrame>,
}

/// The worker side of one dispatched channel, handed to whatever RPC layer
/// owns the worker's actual socket: frames read off the worker's invoke
/// stream land in `from_client`, and frames the wire layer reads back from
/// the worker go out through `to_client`.
pub struct WorkerChannelIo {
    pub from_client: mpsc::UnboundedReceiver<StreamFrame>,
    pub to_client: mpsc::UnboundedSender<StreamFrame>,
}

impl ClientUpstream {
    /// Builds a connected `(ClientUpstream, ClientHandle)` pair, wired as
    /// the RPC layer would: the handle's sends land in the upstream's
    /// `incoming`, and the upstream's `outgoing` lands in the handle's
    /// `from_overseer`.
    pub fn new_test_pair() -> (Self, ClientHandle) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            ClientUpstream {
                incoming: in_rx,
                outgoing: out_tx,
            },
            ClientHandle {
                to_overseer: in_tx,
                from_overseer: out_rx,
            },
        )
    }
}

/// Forwards client-originated frames to the worker's invoke stream. Closes
/// `channel.close_recv()` exactly once, on the first terminal frame or
/// once the client side goes away. An ungraceful disconnect (the client
/// transport dying with no terminal frame) also closes the send side,
/// since there is no client left to drain a graceful worker reply to.
pub async fn run_client_to_worker(
    mut incoming: mpsc::UnboundedReceiver<StreamFrame>,
    to_worker: mpsc::UnboundedSender<StreamFrame>,
    channel: Arc<Channel>,
) {
    while let Some(frame) = incoming.recv().await {
        let terminal = frame.is_terminal();
        if to_worker.send(frame).is_err() {
            debug!(channel_id = channel.id, "worker invoke stream gone, aborting");
            channel.close_recv();
            return;
        }
        if terminal {
            channel.close_recv();
            return;
        }
    }
    // Client transport died without sending a terminal frame: a full
    // abort, not a graceful half-close, so tear down the worker side too
    // instead of leaving it waiting on a channel nothing will ever close.
    channel.close_recv();
    channel.close_send();
}

/// Forwards worker-originated frames to the client's downstream. Closes
/// `channel.close_send()` exactly once. A failed write to the client is
/// fail-safe: it never propagates as an error, it simply closes the
/// channel as if the worker had sent `error(connection_aborted)`.
pub async fn run_worker_to_client(
    mut incoming: mpsc::UnboundedReceiver<StreamFrame>,
    to_client: mpsc::UnboundedSender<StreamFrame>,
    channel: Arc<Channel>,
) {
    while let Some(frame) = incoming.recv().await {
        let terminal = frame.is_terminal();
        if to_client.send(frame).is_err() {
            debug!(
                channel_id = channel.id,
                "client transport gone, treating as {}",
                ErrorCode::Server
            );
            channel.close_send();
            return;
        }
        if terminal {
            channel.close_send();
            return;
        }
    }
    channel.close_send();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn client_to_worker_forwards_and_closes_on_choke() {
        let (to_worker_tx, mut to_worker_rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel::new(1));

        let task = tokio::spawn(run_client_to_worker(client_rx, to_worker_tx, channel.clone()));

        client_tx
            .send(StreamFrame::chunk(Bytes::from_static(b"hi")))
            .unwrap();
        client_tx.send(StreamFrame::Choke).unwrap();

        task.await.unwrap();
        assert!(channel.is_rx_closed());
        assert!(matches!(to_worker_rx.recv().await, Some(StreamFrame::Chunk { .. })));
        assert!(matches!(to_worker_rx.recv().await, Some(StreamFrame::Choke)));
    }

    #[tokio::test]
    async fn client_to_worker_aborts_both_sides_on_ungraceful_disconnect() {
        let (to_worker_tx, _to_worker_rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel::new(2));

        let task = tokio::spawn(run_client_to_worker(client_rx, to_worker_tx, channel.clone()));
        drop(client_tx); // client transport dies with no terminal frame

        task.await.unwrap();
        assert!(channel.is_rx_closed());
        assert!(channel.is_tx_closed());
    }

    #[tokio::test]
    async fn worker_to_client_closes_on_disconnect_without_panicking() {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel::new(1));

        drop(to_client_rx); // client gone before any frame arrives

        let task = tokio::spawn(run_worker_to_client(worker_rx, to_client_tx, channel.clone()));
        worker_tx
            .send(StreamFrame::chunk(Bytes::from_static(b"x")))
            .unwrap();

        task.await.unwrap();
        assert!(channel.is_tx_closed());
    }

    #[tokio::test]
    async fn bridge_close_fires_through_channel_watch() {
        let (to_worker_tx, _to_worker_rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel::new(7));

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));
        channel.watch(move |_| {
            if let Some(tx) = done_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });

        let worker_task =
            tokio::spawn(run_client_to_worker(client_rx, to_worker_tx, channel.clone()));
        client_tx.send(StreamFrame::Choke).unwrap();
        worker_task.await.unwrap();
        channel.close_send(); // simulate the other half already closed

        done_rx.await.unwrap();
    }
}
