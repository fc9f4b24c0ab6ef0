//! Generator setup coordination.
//!
//! When several pipeline stages are chained, each stage's initialization
//! (rendering a prompt from the first partial input, opening a downstream
//! connection, ...) should happen in the order data actually becomes
//! available, not in the order the stages were constructed.
//!
//! [`SetupProducer`] starts the first pull of its upstream as soon as it is
//! constructed and exposes a one-shot *setup* signal that resolves only once
//! that first value exists.  [`pipe_with_setup`] awaits the signal before
//! building the downstream stage, which sequences stage construction by data
//! availability across an arbitrary chain.
//!
//! Every pull, including the wait for the first value, is raced against the
//! stage's cancellation token and bounded by the configured inactivity
//! timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::cancel::{CancellationToken, race_with_cancel};
use crate::config::RunConfig;
use crate::error::{Result, StreamError};
use crate::producer::Producer;

type FirstResult<T> = Result<Option<T>>;
type SetupFn<T, S> = Box<dyn FnOnce(Option<&T>) -> BoxFuture<'static, Result<S>> + Send>;

/// One-shot setup signal that any number of observers can await.
pub type SetupSignal<S> = Shared<BoxFuture<'static, Result<S>>>;

/// Producer wrapper that exposes a deferred setup signal.
///
/// Construction spawns the first upstream pull on the current tokio runtime,
/// so it must be called from within one.  Dropping the stage aborts that pull
/// if it is still pending.
pub struct SetupProducer<P: Producer, S> {
    producer: Arc<Mutex<P>>,
    first: Option<oneshot::Receiver<FirstResult<P::Item>>>,
    setup: SetupSignal<S>,
    driver: JoinHandle<()>,
    config: RunConfig,
    cancel: Option<CancellationToken>,
}

impl<P> SetupProducer<P, ()>
where
    P: Producer + 'static,
{
    /// Wrap `producer` with a setup signal that resolves to `()` once the
    /// first value is available.
    pub fn new(producer: P, config: RunConfig) -> Self {
        Self::spawn(producer, Box::new(|_| async { Ok(()) }.boxed()), config)
    }
}

impl<P, S> SetupProducer<P, S>
where
    P: Producer + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Wrap `producer`; once the first value is available, `start_setup` is
    /// called with it (or with `None` for an empty upstream) and the setup
    /// signal resolves to the future's output.
    pub fn with_setup<F, Fut>(producer: P, start_setup: F, config: RunConfig) -> Self
    where
        F: FnOnce(Option<&P::Item>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        Self::spawn(
            producer,
            Box::new(move |first| start_setup(first).boxed()),
            config,
        )
    }

    fn spawn(producer: P, start_setup: SetupFn<P::Item, S>, config: RunConfig) -> Self {
        let producer = Arc::new(Mutex::new(producer));
        let (first_tx, first_rx) = oneshot::channel();
        let (setup_tx, setup_rx) = oneshot::channel();
        let timeout = config.stream_timeout();

        let upstream = Arc::clone(&producer);
        let driver = tokio::spawn(async move {
            let first = {
                let mut upstream = upstream.lock().await;
                pull(&mut *upstream, timeout).await
            };
            let setup = match &first {
                Ok(value) => start_setup(value.as_ref()),
                Err(err) => {
                    let err = err.clone();
                    async move { Err(err) }.boxed()
                }
            };
            let _ = first_tx.send(first);
            let resolved = setup.await;
            tracing::trace!(ok = resolved.is_ok(), "stage setup resolved");
            let _ = setup_tx.send(resolved);
        });

        let setup = setup_rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(StreamError::Internal("setup task ended before resolving".into()))
                })
            })
            .boxed()
            .shared();

        let cancel = config.cancel.clone();
        Self {
            producer,
            first: Some(first_rx),
            setup,
            driver,
            config,
            cancel,
        }
    }

    /// Override the cancellation token inherited from the config.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The deferred setup signal.  May be awaited any number of times; every
    /// observer sees the same resolved value.
    pub fn setup(&self) -> SetupSignal<S> {
        self.setup.clone()
    }

    /// The configuration this stage was built with.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

async fn pull<P>(producer: &mut P, timeout: Option<Duration>) -> Result<Option<P::Item>>
where
    P: Producer + ?Sized,
{
    match timeout {
        Some(window) => tokio::time::timeout(window, producer.next_value())
            .await
            .map_err(|_| StreamError::Timeout {
                timeout_ms: window.as_millis() as u64,
            })?,
        None => producer.next_value().await,
    }
}

#[async_trait]
impl<P, S> Producer for SetupProducer<P, S>
where
    P: Producer + 'static,
    S: Clone + Send + Sync + 'static,
{
    type Item = P::Item;

    async fn next_value(&mut self) -> Result<Option<P::Item>> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(StreamError::Cancelled);
        }

        // The first pull is already in flight; hand it over without pulling
        // again.  The receiver stays in place if the wait is cancelled so
        // that terminate still aborts the stalled driver.
        if let Some(first) = self.first.as_mut() {
            let received = async { Ok::<_, StreamError>(first.await) };
            let received = match &self.cancel {
                Some(token) => race_with_cancel(received, token).await?,
                None => received.await?,
            };
            self.first = None;
            return received.unwrap_or_else(|_| {
                Err(StreamError::Internal("first pull ended without a result".into()))
            });
        }

        let timeout = self.config.stream_timeout();
        let mut producer = self.producer.lock().await;
        let next = pull(&mut *producer, timeout);
        match &self.cancel {
            Some(token) => race_with_cancel(next, token).await,
            None => next.await,
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.first.take().is_some() && !self.driver.is_finished() {
            tracing::trace!("terminating stage before its first value arrived");
            self.driver.abort();
        }
        self.producer.lock().await.terminate().await
    }

    async fn terminate_with_error(&mut self, err: StreamError) -> Result<()> {
        if self.first.take().is_some() && !self.driver.is_finished() {
            self.driver.abort();
        }
        self.producer.lock().await.terminate_with_error(err).await
    }
}

impl<P: Producer, S> Drop for SetupProducer<P, S> {
    // An unfinished first pull owns a handle on the upstream; abort it so the
    // upstream is freed together with the stage.
    fn drop(&mut self) {
        if !self.driver.is_finished() {
            self.driver.abort();
        }
    }
}

/// Output of [`pipe_with_setup`].
#[derive(Debug)]
pub struct Piped<O, S> {
    /// Whatever the downstream-building function returned.
    pub output: O,
    /// The resolved setup value.
    pub setup: S,
}

/// Wrap `producer` in a [`SetupProducer`], wait for its setup signal, then
/// build the downstream stage with `to`.
///
/// `cancel` takes precedence over any token already carried by `config`.
pub async fn pipe_with_setup<P, S, F, Fut, D, O>(
    to: D,
    producer: P,
    start_setup: F,
    cancel: Option<CancellationToken>,
    config: RunConfig,
) -> Result<Piped<O, S>>
where
    P: Producer + 'static,
    S: Clone + Send + Sync + 'static,
    F: FnOnce(Option<&P::Item>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
    D: FnOnce(SetupProducer<P, S>, S) -> O,
{
    let mut stage = SetupProducer::with_setup(producer, start_setup, config);
    if let Some(token) = cancel {
        stage = stage.with_cancel(token);
    }
    let setup = stage.setup().await?;
    Ok(Piped {
        output: to(stage, setup.clone()),
        setup,
    })
}
