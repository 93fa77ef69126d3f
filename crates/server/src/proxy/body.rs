use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures_util::{Stream, stream::BoxStream};
use tokio::time::{Instant, Sleep};

/// Why a response stream was cut short.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BodyError {
    #[error("upstream stream failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("no data from upstream for {0:?}")]
    Idle(Duration),
    #[error("upstream process stopped while streaming")]
    Interrupted,
}

/// Response body streamed from the upstream process.
///
/// Chunks are passed through as they arrive. The stream ends with an error when no
/// chunk arrives within the idle timeout, or when `interrupted` resolves (the process
/// left `Running` or the gateway is shutting down). Dropping the body drops the
/// upstream connection.
pub(crate) struct UpstreamBody {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    idle_timeout: Duration,
    idle: Pin<Box<Sleep>>,
    interrupted: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl UpstreamBody {
    pub fn new(
        inner: BoxStream<'static, reqwest::Result<Bytes>>,
        idle_timeout: Duration,
        interrupted: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        Self {
            inner,
            idle_timeout,
            idle: Box::pin(tokio::time::sleep(idle_timeout)),
            interrupted: Box::pin(interrupted),
            done: false,
        }
    }

    fn finish(&mut self, error: BodyError) -> Poll<Option<Result<Bytes, BodyError>>> {
        log::debug!("Closing response stream: {error}");

        self.done = true;
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for UpstreamBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if this.done {
            return Poll::Ready(None);
        }

        if this.interrupted.as_mut().poll(cx).is_ready() {
            return this.finish(BodyError::Interrupted);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let deadline = Instant::now() + this.idle_timeout;
                this.idle.as_mut().reset(deadline);

                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => this.finish(BodyError::Upstream(error)),
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(()) => this.finish(BodyError::Idle(this.idle_timeout)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
