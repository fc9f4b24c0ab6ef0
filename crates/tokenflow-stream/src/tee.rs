//! Forking buffer.
//!
//! [`tee`] turns one producer into `n` independent producers.  Each consumer
//! owns a queue of pending records; whichever consumer finds its queue empty
//! pulls the next record from the shared upstream and pushes a copy onto
//! every open queue, its own included.  The upstream is therefore pulled
//! once per item no matter how many consumers there are, and all consumers
//! observe the same total order.
//!
//! The queues sit behind a short-lived [`std::sync::Mutex`] that is never
//! held across an await.  The upstream itself sits behind a
//! [`tokio::sync::Mutex`], so at most one upstream pull is in flight at a
//! time while consumers with buffered records keep draining them.

use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, StreamError};
use crate::producer::Producer;

/// A buffered upstream outcome.
#[derive(Debug, Clone)]
enum Record<T> {
    Value(T),
    Error(StreamError),
    Done,
}

struct Queues<T> {
    pending: Vec<VecDeque<Record<T>>>,
    /// Consumers that terminated early; their queues are no longer fed.
    closed: Vec<bool>,
    /// Set once the upstream reported completion or failure.
    finished: bool,
}

impl<T: Clone> Queues<T> {
    fn push_all(&mut self, record: Record<T>) {
        for (queue, closed) in self.pending.iter_mut().zip(&self.closed) {
            if !*closed {
                queue.push_back(record.clone());
            }
        }
    }

    /// Pop the next record for consumer `index`, or `None` if its queue is
    /// empty and it has to pull.
    fn take(&mut self, index: usize) -> Option<Result<Option<T>>> {
        if self.closed[index] {
            return Some(Ok(None));
        }
        let queue = &mut self.pending[index];
        match queue.front()? {
            // `Done` stays queued so later calls keep reporting completion.
            Record::Done => Some(Ok(None)),
            _ => match queue.pop_front() {
                Some(Record::Value(value)) => Some(Ok(Some(value))),
                Some(Record::Error(err)) => Some(Err(err)),
                _ => Some(Ok(None)),
            },
        }
    }
}

struct TeeShared<P: Producer> {
    queues: std::sync::Mutex<Queues<P::Item>>,
    source: Mutex<P>,
}

impl<P: Producer> TeeShared<P> {
    fn queues(&self) -> MutexGuard<'_, Queues<P::Item>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One of the `n` producers returned by [`tee`].
pub struct TeeProducer<P: Producer> {
    index: usize,
    shared: Arc<TeeShared<P>>,
}

impl<P: Producer> TeeProducer<P> {
    /// Position of this consumer among its siblings.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Fork `source` into `n` producers that each see every upstream value
/// exactly once and in the same order.
///
/// Returns an empty vector when `n` is zero, dropping `source`.
pub fn tee<P>(source: P, n: usize) -> Vec<TeeProducer<P>>
where
    P: Producer,
    P::Item: Clone,
{
    if n == 0 {
        return Vec::new();
    }
    let shared = Arc::new(TeeShared {
        queues: std::sync::Mutex::new(Queues {
            pending: (0..n).map(|_| VecDeque::new()).collect(),
            closed: vec![false; n],
            finished: false,
        }),
        source: Mutex::new(source),
    });
    (0..n)
        .map(|index| TeeProducer {
            index,
            shared: Arc::clone(&shared),
        })
        .collect()
}

#[async_trait]
impl<P> Producer for TeeProducer<P>
where
    P: Producer,
    P::Item: Clone,
{
    type Item = P::Item;

    async fn next_value(&mut self) -> Result<Option<P::Item>> {
        if let Some(outcome) = self.shared.queues().take(self.index) {
            return outcome;
        }

        let mut source = self.shared.source.lock().await;
        // Another consumer may have pulled while this one waited.
        {
            let mut queues = self.shared.queues();
            if let Some(outcome) = queues.take(self.index) {
                return outcome;
            }
            if queues.finished {
                return Ok(None);
            }
        }

        let pulled = source.next_value().await;
        let mut queues = self.shared.queues();
        match pulled {
            Ok(Some(value)) => queues.push_all(Record::Value(value)),
            Ok(None) => {
                tracing::trace!("tee upstream exhausted");
                queues.finished = true;
                queues.push_all(Record::Done);
            }
            Err(err) => {
                tracing::debug!(error = %err, "tee upstream failed");
                queues.finished = true;
                queues.push_all(Record::Error(err));
                queues.push_all(Record::Done);
            }
        }
        queues.take(self.index).unwrap_or(Ok(None))
    }

    /// Detach this consumer.  The upstream is terminated once every consumer
    /// has detached.
    async fn terminate(&mut self) -> Result<()> {
        let last = {
            let mut queues = self.shared.queues();
            if queues.closed[self.index] {
                return Ok(());
            }
            queues.closed[self.index] = true;
            queues.pending[self.index].clear();
            let last = queues.closed.iter().all(|closed| *closed) && !queues.finished;
            if last {
                queues.finished = true;
            }
            last
        };
        if last {
            tracing::trace!("all tee consumers detached, terminating upstream");
            self.shared.source.lock().await.terminate().await?;
        }
        Ok(())
    }
}
