//! Stream source adapter.
//!
//! A [`ReadableStream`] owns a [`PullSource`] and enforces the stream lock:
//! at most one [`StreamReader`] may be attached at a time.  An
//! [`IterableStream`] wraps a readable stream behind the [`Producer`]
//! contract, attaching a reader lazily on the first pull and releasing it on
//! every exit path (completion, error, or early termination).
//!
//! ```text
//! PullSource ──> ReadableStream ──(lock)──> StreamReader ──> IterableStream: Producer
//! ```
//!
//! Three bridges turn other shapes into a [`PullSource`]:
//!
//! - [`ReaderSource`] forwards reads from a reader of another stream.
//! - [`ProducerSource`] forwards pulls from a [`Producer`]; cancelling it
//!   terminates the producer.
//! - [`FuturesSource`] forwards items of a [`futures::Stream`], e.g. an HTTP
//!   response body.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::Mutex;

use crate::error::{Result, StreamError};
use crate::producer::Producer;

// ---------------------------------------------------------------------------
// Pull source contract
// ---------------------------------------------------------------------------

/// An external, pull-based source of byte chunks or objects.
#[async_trait]
pub trait PullSource: Send {
    /// The type of item read from the source.
    type Item: Send + 'static;

    /// Request the next item.  `Ok(None)` means the source is exhausted.
    async fn read(&mut self) -> Result<Option<Self::Item>>;

    /// Ask the source to stop producing and release what it holds.
    async fn cancel(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Readable stream and its exclusive reader
// ---------------------------------------------------------------------------

struct StreamShared<S> {
    source: Mutex<S>,
    locked: AtomicBool,
    closed: AtomicBool,
}

impl<S: PullSource> StreamShared<S> {
    async fn read(&self) -> Result<Option<S::Item>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut source = self.source.lock().await;
        match source.read().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.closed.store(true, Ordering::Release);
                Ok(None)
            }
            Err(err) => {
                self.closed.store(true, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn cancel(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.source.lock().await.cancel().await
    }
}

/// Shared handle to a pull source guarded by the stream lock.
///
/// Cloning the handle does not clone the source; all clones observe the same
/// lock and the same closed state.
pub struct ReadableStream<S> {
    shared: Arc<StreamShared<S>>,
}

impl<S> Clone for ReadableStream<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: PullSource> ReadableStream<S> {
    /// Wrap `source` in a new, unlocked stream.
    pub fn new(source: S) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                source: Mutex::new(source),
                locked: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a reader currently holds the stream lock.
    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    /// Whether the source has completed, failed, or been cancelled.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Attach an exclusive reader.
    ///
    /// Fails with [`StreamError::Locked`] while another reader is attached.
    pub fn get_reader(&self) -> Result<StreamReader<S>> {
        if self
            .shared
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::Locked);
        }
        tracing::trace!("stream reader attached");
        Ok(StreamReader {
            shared: Arc::clone(&self.shared),
            released: false,
        })
    }

    /// Cancel the stream directly.  Fails with [`StreamError::Locked`] while
    /// a reader is attached; cancel through the reader instead.
    pub async fn cancel(&self) -> Result<()> {
        if self.is_locked() {
            return Err(StreamError::Locked);
        }
        self.shared.cancel().await
    }
}

/// Exclusive reader of a [`ReadableStream`].
///
/// Holding a reader holds the stream lock.  The lock is released by
/// [`StreamReader::release_lock`] or when the reader is dropped.
pub struct StreamReader<S> {
    shared: Arc<StreamShared<S>>,
    released: bool,
}

impl<S: PullSource> StreamReader<S> {
    /// Read the next item from the underlying source.
    ///
    /// Fails with [`StreamError::Locked`] once the lock has been released.
    pub async fn read(&mut self) -> Result<Option<S::Item>> {
        if self.released {
            return Err(StreamError::Locked);
        }
        self.shared.read().await
    }

    /// Build the cancel request for the underlying source.
    ///
    /// The returned future owns its handle to the stream, so the caller can
    /// release the lock before awaiting the cancel outcome.
    pub fn cancel(&self) -> BoxFuture<'static, Result<()>>
    where
        S: 'static,
    {
        let shared = Arc::clone(&self.shared);
        async move { shared.cancel().await }.boxed()
    }

    /// Release the stream lock.  Idempotent.
    pub fn release_lock(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.locked.store(false, Ordering::Release);
            tracing::trace!("stream reader released");
        }
    }

    /// Whether the underlying stream is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<S> Drop for StreamReader<S> {
    fn drop(&mut self) {
        if !self.released {
            self.shared.locked.store(false, Ordering::Release);
        }
    }
}

// ---------------------------------------------------------------------------
// Iterable stream: the producer-facing adapter
// ---------------------------------------------------------------------------

enum ReaderSlot<S> {
    /// No reader attached yet.
    Detached,
    /// A reader holds the stream lock.
    Attached(StreamReader<S>),
    /// The one attach/detach cycle has completed.
    Released,
}

/// Adapts a [`ReadableStream`] to the [`Producer`] contract.
///
/// Each adapter performs exactly one attach/detach cycle: the reader is
/// attached on the first pull and released on completion, on error, or on
/// [`Producer::terminate`].  Once released, the adapter yields `Ok(None)`.
pub struct IterableStream<S: PullSource> {
    stream: ReadableStream<S>,
    reader: ReaderSlot<S>,
}

impl<S: PullSource + 'static> IterableStream<S> {
    /// Adapt an existing readable stream.  The lock is taken on first pull.
    pub fn new(stream: ReadableStream<S>) -> Self {
        Self {
            stream,
            reader: ReaderSlot::Detached,
        }
    }

    /// Adapt a bare pull source.
    pub fn from_source(source: S) -> Self {
        Self::new(ReadableStream::new(source))
    }

    /// The stream this adapter reads from.
    pub fn stream(&self) -> &ReadableStream<S> {
        &self.stream
    }

    fn ensure_reader(&mut self) -> Result<Option<&mut StreamReader<S>>> {
        if matches!(self.reader, ReaderSlot::Detached) {
            self.reader = ReaderSlot::Attached(self.stream.get_reader()?);
        }
        match &mut self.reader {
            ReaderSlot::Attached(reader) => Ok(Some(reader)),
            _ => Ok(None),
        }
    }

    /// Single release path shared by completion, error and termination.
    fn release(&mut self) {
        if let ReaderSlot::Attached(mut reader) =
            std::mem::replace(&mut self.reader, ReaderSlot::Released)
        {
            reader.release_lock();
        }
    }

    async fn cancel_and_release(&mut self) -> Result<()> {
        // Terminating before the first pull still cancels the source, so an
        // adapter is attached here if it never was.
        if matches!(self.reader, ReaderSlot::Detached) {
            match self.stream.get_reader() {
                Ok(reader) => self.reader = ReaderSlot::Attached(reader),
                Err(err) => {
                    tracing::debug!(error = %err, "stream held elsewhere; not cancelling");
                    self.reader = ReaderSlot::Released;
                }
            }
        }
        let cancel = match &self.reader {
            ReaderSlot::Attached(reader) if !reader.is_closed() => Some(reader.cancel()),
            _ => None,
        };
        // The lock is released before the cancel round-trip is awaited.
        self.release();
        if let Some(cancel) = cancel {
            if let Err(err) = cancel.await {
                tracing::warn!(error = %err, "stream source cancel failed");
            }
        }
        Ok(())
    }
}

impl<S: PullSource + 'static> IterableStream<ReaderSource<S>> {
    /// Bridge an already attached reader of another stream into a fresh
    /// adapter that requests and forwards until the reader completes.
    pub fn from_reader(reader: StreamReader<S>) -> Self {
        Self::from_source(ReaderSource::new(reader))
    }
}

impl<P: Producer + 'static> IterableStream<ProducerSource<P>> {
    /// Bridge a producer.  Terminating the adapter terminates the producer.
    pub fn from_producer(producer: P) -> Self {
        Self::from_source(ProducerSource::new(producer))
    }
}

impl<T, St> IterableStream<FuturesSource<St>>
where
    T: Send + 'static,
    St: Stream<Item = Result<T>> + Send + Unpin + 'static,
{
    /// Bridge a [`futures::Stream`] of results.
    pub fn from_stream(stream: St) -> Self {
        Self::from_source(FuturesSource::new(stream))
    }
}

#[async_trait]
impl<S: PullSource + 'static> Producer for IterableStream<S> {
    type Item = S::Item;

    async fn next_value(&mut self) -> Result<Option<S::Item>> {
        let Some(reader) = self.ensure_reader()? else {
            return Ok(None);
        };
        match reader.read().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.release();
                Ok(None)
            }
            Err(err) => {
                self.release();
                Err(err)
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.cancel_and_release().await
    }

    async fn terminate_with_error(&mut self, err: StreamError) -> Result<()> {
        self.cancel_and_release().await?;
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Bridges
// ---------------------------------------------------------------------------

/// Pull source that forwards reads from a reader of another stream.
pub struct ReaderSource<S> {
    reader: StreamReader<S>,
}

impl<S: PullSource> ReaderSource<S> {
    /// Take ownership of `reader`.
    pub fn new(reader: StreamReader<S>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<S: PullSource + 'static> PullSource for ReaderSource<S> {
    type Item = S::Item;

    async fn read(&mut self) -> Result<Option<S::Item>> {
        match self.reader.read().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.reader.release_lock();
                Ok(None)
            }
            Err(err) => {
                self.reader.release_lock();
                Err(err)
            }
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.reader.release_lock();
        Ok(())
    }
}

/// Pull source that forwards pulls from a [`Producer`].
pub struct ProducerSource<P> {
    producer: P,
}

impl<P: Producer> ProducerSource<P> {
    /// Take ownership of `producer`.
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<P: Producer> PullSource for ProducerSource<P> {
    type Item = P::Item;

    async fn read(&mut self) -> Result<Option<P::Item>> {
        self.producer.next_value().await
    }

    async fn cancel(&mut self) -> Result<()> {
        self.producer.terminate().await
    }
}

/// Pull source over a [`futures::Stream`] of results.  Cancelling drops the
/// stream, which closes the underlying connection for HTTP bodies.
pub struct FuturesSource<St> {
    stream: Option<St>,
}

impl<St> FuturesSource<St> {
    /// Take ownership of `stream`.
    pub fn new(stream: St) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl<T, St> PullSource for FuturesSource<St>
where
    T: Send + 'static,
    St: Stream<Item = Result<T>> + Send + Unpin,
{
    type Item = T;

    async fn read(&mut self) -> Result<Option<T>> {
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

    async fn cancel(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}
