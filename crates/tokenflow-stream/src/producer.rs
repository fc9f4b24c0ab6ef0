//! The lazy sequence producer contract.
//!
//! A [`Producer`] is a single-pass, on-demand source of values.  Callers pull
//! with [`Producer::next_value`] until it returns `Ok(None)`, and may stop
//! early with [`Producer::terminate`], which must release any resources the
//! producer holds.  Producers are not restartable.
//!
//! The helpers in this module bridge producers to and from
//! [`futures::Stream`] and drain them.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{Result, StreamError};
use crate::merge::Merge;

/// A single-pass, pull-based source of values.
#[async_trait]
pub trait Producer: Send {
    /// The type of value produced.
    type Item: Send + 'static;

    /// Request the next value.  `Ok(None)` signals that the sequence is
    /// exhausted; every later call must keep returning `Ok(None)`.
    async fn next_value(&mut self) -> Result<Option<Self::Item>>;

    /// Stop early and release held resources.  Safe to call more than once.
    async fn terminate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop early, release held resources, then hand `err` back to the
    /// caller.
    async fn terminate_with_error(&mut self, err: StreamError) -> Result<()> {
        self.terminate().await?;
        Err(err)
    }
}

/// A type-erased producer.
pub type BoxProducer<T> = Box<dyn Producer<Item = T>>;

#[async_trait]
impl<P> Producer for Box<P>
where
    P: Producer + ?Sized,
{
    type Item = P::Item;

    async fn next_value(&mut self) -> Result<Option<Self::Item>> {
        (**self).next_value().await
    }

    async fn terminate(&mut self) -> Result<()> {
        (**self).terminate().await
    }

    async fn terminate_with_error(&mut self, err: StreamError) -> Result<()> {
        (**self).terminate_with_error(err).await
    }
}

// ---------------------------------------------------------------------------
// In-memory producer
// ---------------------------------------------------------------------------

/// Producer over values already held in memory.
#[derive(Debug)]
pub struct IterProducer<T> {
    items: VecDeque<T>,
}

/// Build a producer that yields every item of `items` in order.
pub fn from_iter<T, I>(items: I) -> IterProducer<T>
where
    I: IntoIterator<Item = T>,
{
    IterProducer {
        items: items.into_iter().collect(),
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for IterProducer<T> {
    type Item = T;

    async fn next_value(&mut self) -> Result<Option<T>> {
        Ok(self.items.pop_front())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.items.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// futures::Stream bridges
// ---------------------------------------------------------------------------

/// Producer that pulls from a [`futures::Stream`] of results.
pub struct StreamProducer<S> {
    stream: Option<S>,
}

/// Wrap a stream of results as a producer.  Terminating drops the stream.
pub fn from_stream<T, S>(stream: S) -> StreamProducer<S>
where
    S: Stream<Item = Result<T>> + Send + Unpin,
{
    StreamProducer {
        stream: Some(stream),
    }
}

#[async_trait]
impl<T, S> Producer for StreamProducer<S>
where
    T: Send + 'static,
    S: Stream<Item = Result<T>> + Send + Unpin,
{
    type Item = T;

    async fn next_value(&mut self) -> Result<Option<T>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(item) => item.map(Some),
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}

/// Expose a producer as a [`futures::Stream`].
///
/// The stream ends after the first error or once the producer is exhausted.
pub fn into_stream<P>(producer: P) -> impl Stream<Item = Result<P::Item>> + Send
where
    P: Producer,
{
    futures::stream::unfold(Some(producer), |state| async move {
        let mut producer = state?;
        match producer.next_value().await {
            Ok(Some(value)) => Some((Ok(value), Some(producer))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    })
}

// ---------------------------------------------------------------------------
// Draining
// ---------------------------------------------------------------------------

/// Drain `producer` into a vector.
pub async fn collect<P>(producer: &mut P) -> Result<Vec<P::Item>>
where
    P: Producer + ?Sized,
{
    let mut items = Vec::new();
    while let Some(item) = producer.next_value().await? {
        items.push(item);
    }
    Ok(items)
}

/// Drain `producer`, folding every value into a running accumulation with
/// [`Merge`].  Returns `None` for an empty producer.
///
/// A merge failure terminates the producer before the error is returned.
pub async fn accumulate<P>(producer: &mut P) -> Result<Option<P::Item>>
where
    P: Producer + ?Sized,
    P::Item: Merge,
{
    let mut acc: Option<P::Item> = None;
    while let Some(chunk) = producer.next_value().await? {
        acc = match acc {
            None => Some(chunk),
            Some(prev) => match prev.merge(chunk) {
                Ok(merged) => Some(merged),
                Err(err) => {
                    producer.terminate().await?;
                    return Err(err);
                }
            },
        };
    }
    Ok(acc)
}
