use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use thiserror::Error;
use tokio::time::{Instant, Sleep, sleep, sleep_until};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error yielded by [`IdleTimeoutBody`]
#[derive(Error, Debug)]
pub enum IdleBodyError {
    /// No frame arrived within the activity window
    #[error("No body activity for {0:?}")]
    Idle(Duration),

    /// The wrapped body failed
    #[error("Body error: {0}")]
    Inner(BoxError),
}

/// Body wrapper that aborts once no frame has been produced for `timeout`.
///
/// The deadline is re-armed after every frame, so a slow but steady stream
/// is never cut off.
pub struct IdleTimeoutBody<B> {
    inner: B,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<B> IdleTimeoutBody<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(sleep(timeout)),
        }
    }
}

impl<B> Body for IdleTimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = IdleBodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                this.deadline.as_mut().reset(Instant::now() + this.timeout);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(IdleBodyError::Inner(e.into())))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Some(Err(IdleBodyError::Idle(this.timeout)))),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Shared record of the last time a request made progress.
///
/// Cloned into [`ActivityBody`] on the upload side; [`ActivityClock::idle`]
/// resolves once a whole window passes without a [`ActivityClock::touch`].
#[derive(Clone, Debug)]
pub struct ActivityClock {
    inner: Arc<ClockInner>,
}

#[derive(Debug)]
struct ClockInner {
    origin: Instant,
    last_nanos: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                origin: Instant::now(),
                last_nanos: AtomicU64::new(0),
            }),
        }
    }

    /// Mark activity now.
    pub fn touch(&self) {
        let nanos = u64::try_from(self.inner.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.inner.last_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.inner.origin + Duration::from_nanos(self.inner.last_nanos.load(Ordering::Relaxed))
    }

    /// Completes once `window` has elapsed since the last activity.
    pub async fn idle(&self, window: Duration) {
        loop {
            let deadline = self.last_activity() + window;
            if Instant::now() >= deadline {
                return;
            }
            sleep_until(deadline).await;
        }
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Body wrapper that touches an [`ActivityClock`] on every frame it yields.
pub struct ActivityBody<B> {
    inner: B,
    clock: ActivityClock,
}

impl<B> ActivityBody<B> {
    pub fn new(inner: B, clock: ActivityClock) -> Self {
        Self { inner, clock }
    }
}

impl<B> Body for ActivityBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(_))) = &polled {
            this.clock.touch();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
