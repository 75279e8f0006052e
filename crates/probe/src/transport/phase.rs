//! Stream wrapper that timestamps the first write, the last write before
//! the response starts, and the first read of a connection.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[derive(Debug, Default, Clone, Copy)]
pub struct Marks {
    pub first_write: Option<Instant>,
    pub last_write: Option<Instant>,
    pub first_read: Option<Instant>,
}

/// Shared handle to the marks recorded by a [`PhaseIo`]
#[derive(Debug, Default, Clone)]
pub struct PhaseClock(Arc<Mutex<Marks>>);

impl PhaseClock {
    pub fn snapshot(&self) -> Marks {
        self.0.lock().map(|m| *m).unwrap_or_default()
    }

    fn wrote(&self) {
        if let Ok(mut marks) = self.0.lock() {
            // writes after the response began belong to nothing we measure
            if marks.first_read.is_some() {
                return;
            }
            let now = Instant::now();
            marks.first_write.get_or_insert(now);
            marks.last_write = Some(now);
        }
    }

    fn read(&self) {
        if let Ok(mut marks) = self.0.lock() {
            marks.first_read.get_or_insert_with(Instant::now);
        }
    }
}

pub struct PhaseIo<S> {
    inner: S,
    clock: PhaseClock,
}

impl<S> PhaseIo<S> {
    pub fn new(inner: S, clock: PhaseClock) -> Self {
        Self { inner, clock }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PhaseIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.clock.read();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PhaseIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            this.clock.wrote();
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            this.clock.wrote();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
