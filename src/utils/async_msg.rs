//! Multiple producer, single-consumer in-memory FIFO channels with
//! asynchronous reading.

use futures::channel::mpsc::{self, Receiver, Sender};
pub use futures::channel::mpsc::{SendError, TrySendError};
use futures::prelude::*;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The sending end of an in-memory FIFO channel.
#[derive(Debug)]
pub struct MessageBox<Msg>(Sender<Msg>);

/// The receiving end of an in-memory FIFO channel, readable as a
/// `Stream` from a tokio task.
#[derive(Debug)]
pub struct MessageQueue<Msg>(Receiver<Msg>);

/// Constructs an in-memory channel and returns both halves. `buffer` is
/// the number of messages allowed to be pending.
pub fn channel<Msg>(buffer: usize) -> (MessageBox<Msg>, MessageQueue<Msg>) {
    let (tx, rx) = mpsc::channel(buffer);
    (MessageBox(tx), MessageQueue(rx))
}

impl<Msg> MessageBox<Msg> {
    /// Sends a message, failing immediately if the channel is full or
    /// the receiving task is gone.
    pub fn try_send(&mut self, msg: Msg) -> Result<(), TrySendError<Msg>> {
        self.0.try_send(msg)
    }

    /// Sends a message, waiting for channel capacity.
    pub async fn send(&mut self, msg: Msg) -> Result<(), SendError> {
        self.0.send(msg).await
    }
}

impl<Msg> Clone for MessageBox<Msg> {
    fn clone(&self) -> Self {
        MessageBox(self.0.clone())
    }
}

impl<Msg> Stream for MessageQueue<Msg> {
    type Item = Msg;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Msg>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_are_delivered_in_order() {
        let (mut mbox, mut queue) = channel::<u32>(8);
        for i in 0..5 {
            mbox.try_send(i).expect("channel has room");
        }
        drop(mbox);
        let mut seen = Vec::new();
        while let Some(msg) = queue.next().await {
            seen.push(msg);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
