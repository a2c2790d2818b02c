//! In-process ordered envelope transport.
//!
//! Each direction is an unbounded FIFO queue moving [`Envelope`]s by value:
//! buffer ownership transfers with the message, nothing is copied. There is
//! no delivery guarantee once an endpoint is dropped mid-flight.

use tokio::sync::mpsc;

use crate::error::{Result, TreewireError};
use crate::protocol::Envelope;

/// Sending half of one channel direction. Cheaply cloneable.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSender {
    /// Send an envelope, transferring ownership of its buffers.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| TreewireError::ChannelClosed)
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of one channel direction.
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl ChannelReceiver {
    /// Receive the next envelope in send order. `None` when the sender is
    /// gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// Create one channel direction.
pub fn channel() -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSender { tx }, ChannelReceiver { rx })
}

/// One side of a duplex connection: a sender toward the peer and a receiver
/// for the peer's envelopes.
pub struct Endpoint {
    pub tx: ChannelSender,
    pub rx: ChannelReceiver,
}

/// Create a connected pair of endpoints.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (
        Endpoint { tx: a_tx, rx: a_rx },
        Endpoint { tx: b_tx, rx: b_rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EnvelopeKind;
    use bytes::Bytes;

    fn empty_envelope() -> Envelope {
        Envelope {
            kind: EnvelopeKind::Mutate,
            node_creations: Bytes::new(),
            strings: Vec::new(),
            mutations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel();

        for i in 0..3u8 {
            let mut env = empty_envelope();
            env.mutations.push(Bytes::copy_from_slice(&[i]));
            tx.send(env).unwrap();
        }

        for i in 0..3u8 {
            let env = rx.recv().await.unwrap();
            assert_eq!(&env.mutations[0][..], &[i]);
        }
    }

    #[tokio::test]
    async fn test_send_after_receiver_drop_is_channel_closed() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(
            tx.send(empty_envelope()),
            Err(TreewireError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_duplex_directions_are_independent() {
        let (mut a, mut b) = duplex();

        a.tx.send(empty_envelope()).unwrap();
        assert!(b.rx.recv().await.is_some());
        assert!(a.rx.try_recv().is_none());

        b.tx.send(empty_envelope()).unwrap();
        assert!(a.rx.recv().await.is_some());
    }
}
