//! One-at-a-time execution queue with a debounced epilogue.
//!
//! Each remote repository owns one queue. Enqueueing never blocks the
//! caller; a dispatcher task executes operations strictly in FIFO order,
//! one at a time. After each operation the queue consults its
//! [`EpiloguePolicy`]: if enough time passed since the last epilogue run,
//! the shared epilogue (persisting the provider's manifest) runs before
//! the next item is dequeued. When the queue drains with the last
//! epilogue decision skipped, the epilogue runs exactly once more before
//! the dispatcher goes idle, so pending state always reaches the backend.
//!
//! Queues of different repositories are independent tasks and progress in
//! parallel.

use crate::time::now_ms;
use futures_util::future::BoxFuture;
use mirror_core::EpiloguePolicy;
use tokio::sync::{mpsc, oneshot};

/// A queued operation and the sink its result resolves.
struct Job<T> {
    op: BoxFuture<'static, T>,
    result: oneshot::Sender<T>,
}

/// The epilogue action shared by all of one queue's operations.
pub type Epilogue = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Strict FIFO execution queue for one client.
pub struct WriteQueue<T> {
    tx: mpsc::UnboundedSender<Job<T>>,
}

impl<T: Send + 'static> WriteQueue<T> {
    /// Spawn the dispatcher task.
    pub fn spawn(epilogue: Epilogue, mut policy: EpiloguePolicy) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<T>>();

        tokio::spawn(async move {
            loop {
                // Take the head item, running the trailing epilogue first
                // whenever the queue is observed empty.
                let job = match rx.try_recv() {
                    Ok(job) => job,
                    Err(mpsc::error::TryRecvError::Empty) => {
                        if policy.on_drain(now_ms()) {
                            epilogue().await;
                        }
                        match rx.recv().await {
                            Some(job) => job,
                            None => break,
                        }
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if policy.on_drain(now_ms()) {
                            epilogue().await;
                        }
                        break;
                    }
                };

                let result = job.op.await;
                // The caller may have stopped waiting; that is fine.
                let _ = job.result.send(result);

                if policy.after_item(now_ms()) {
                    epilogue().await;
                }
            }
        });

        Self { tx }
    }

    /// Enqueue an operation. Returns a receiver resolving to the
    /// operation's result once the dispatcher has executed it.
    pub fn enqueue(&self, op: BoxFuture<'static, T>) -> oneshot::Receiver<T> {
        let (result_tx, result_rx) = oneshot::channel();
        let job = Job {
            op,
            result: result_tx,
        };
        // The dispatcher only stops when the queue is dropped, so a send
        // failure can only happen during teardown; the receiver then
        // reports a closed channel.
        let _ = self.tx.send(job);
        result_rx
    }
}
