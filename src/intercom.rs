//! Typed messages and reply plumbing between the public service facade
//! and the block admission task.

use crate::blockcfg::Block;
use crate::blockchain::Error;
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

type ReplySender<T> = oneshot::Sender<Result<T, Error>>;

/// One-shot reply handle held by the admission task while it processes
/// a request.
#[derive(Debug)]
pub struct ReplyHandle<T> {
    sender: ReplySender<T>,
}

impl<T> ReplyHandle<T> {
    pub fn reply(self, result: Result<T, Error>) {
        // A send error means the submitter stopped waiting; the result
        // is simply dropped.
        let _ = self.sender.send(result);
    }
}

/// Future resolving to the admission task's reply.
pub struct ReplyFuture<T> {
    receiver: oneshot::Receiver<Result<T, Error>>,
}

impl<T> Future for ReplyFuture<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::ReplyCanceled)),
        }
    }
}

pub fn unary_reply<T>() -> (ReplyHandle<T>, ReplyFuture<T>) {
    let (sender, receiver) = oneshot::channel();
    (ReplyHandle { sender }, ReplyFuture { receiver })
}

/// Requests serialized through the block admission lane. Everything
/// that mutates the canonical chain travels through this enum.
#[derive(Debug)]
pub enum BlockMsg {
    /// A candidate block offered by a submitter.
    Submit {
        block: Box<Block>,
        do_check: bool,
        fork_allowed: bool,
        reply: ReplyHandle<Option<Block>>,
    },
    /// Undo the current head.
    Revert { reply: ReplyHandle<Block> },
    /// Bulk ingestion of a contiguous main-chain segment.
    SaveBunch {
        blocks: Vec<Block>,
        target_last_number: u64,
        reply: ReplyHandle<()>,
    },
}
