//! Single-producer/single-consumer link between two adjacent stages.
//!
//! Capacity 0 is a rendezvous: `send` returns only after the receiving side
//! has taken the value. Any other capacity is a plain bounded buffer.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{EngineError, EngineResult};

pub(crate) fn link<T>(capacity: usize) -> (LinkSender<T>, LinkReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        LinkSender {
            tx,
            rendezvous: capacity == 0,
        },
        LinkReceiver { rx },
    )
}

pub(crate) struct LinkSender<T> {
    tx: mpsc::Sender<T>,
    rendezvous: bool,
}

impl<T> LinkSender<T> {
    /// Hand `value` to the next stage.
    ///
    /// Fails with [`EngineError::QueueClosed`] when the receiver is gone; the
    /// value is dropped. Dropping the returned future part-way is allowed and
    /// may or may not have delivered the value.
    pub(crate) async fn send(&self, value: T) -> EngineResult<()> {
        self.tx
            .send(value)
            .await
            .map_err(|_| EngineError::QueueClosed)?;

        if self.rendezvous {
            // The single slot frees up once the receiver has taken the value.
            let _permit = self
                .tx
                .reserve()
                .await
                .map_err(|_| EngineError::QueueClosed)?;
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub(crate) struct LinkReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> LinkReceiver<T> {
    /// Next value, or `None` once the sender is dropped and the link drained.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub(crate) fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream::new(self.rx)
    }
}
