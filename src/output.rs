//! Buffered response output
//!
//! Small writes accumulate in one pooled buffer and reach the channel in
//! batches, similar in spirit to write corking:
//! - Buffer leased lazily on first write, returned exactly once
//! - Full buffers drain with a blocking write
//! - `close_async` drains without blocking, resuming on write readiness
//! - `Content-Length` is filled in when nothing was committed yet

use bytes::{Buf, Bytes, BytesMut};
use http::StatusCode;
use http::header::CONTENT_LENGTH;

use crate::alloc::PooledBuffer;
use crate::channel::{self, Progress, RawChannel};
use crate::error::{Error, Result};
use crate::exchange::{Exchange, ReadinessListener};

/// Per-exchange output state
#[derive(Debug, Default)]
pub(crate) struct BufferedOutput {
    closed: bool,
    /// Set once bytes were handed to the channel; never cleared
    write_started: bool,
    written: u64,
    content_length: Option<u64>,
    buffer: Option<OutputBuffer>,
    buffer_size: Option<usize>,
}

impl BufferedOutput {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// The buffer backing an output stream
#[derive(Debug)]
struct OutputBuffer {
    storage: Storage,
    limit: usize,
}

#[derive(Debug)]
enum Storage {
    /// Leased from the connection's pool
    Pooled(PooledBuffer),
    /// Sized by the caller or supplied by them; never returned to a pool
    Dedicated(BytesMut),
}

impl OutputBuffer {
    fn pooled(buf: PooledBuffer) -> Self {
        let limit = buf.limit();
        Self {
            storage: Storage::Pooled(buf),
            limit,
        }
    }

    fn dedicated(buf: BytesMut, limit: usize) -> Self {
        Self {
            storage: Storage::Dedicated(buf),
            limit,
        }
    }

    #[inline]
    fn bytes(&self) -> &BytesMut {
        match &self.storage {
            Storage::Pooled(buf) => buf,
            Storage::Dedicated(buf) => buf,
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut BytesMut {
        match &mut self.storage {
            Storage::Pooled(buf) => buf,
            Storage::Dedicated(buf) => buf,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.bytes().len()
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.len())
    }

    fn release(self) {
        match self.storage {
            Storage::Pooled(buf) => buf.release(),
            Storage::Dedicated(_) => {}
        }
    }
}

/// Response body writer for one exchange
///
/// Obtained from [`Exchange::output`].
pub struct Output<'a, C> {
    exchange: &'a mut Exchange<C>,
}

impl<'a, C: RawChannel> Output<'a, C> {
    pub(crate) fn new(exchange: &'a mut Exchange<C>) -> Self {
        Self { exchange }
    }

    #[inline]
    fn state(&self) -> &BufferedOutput {
        &self.exchange.output
    }

    #[inline]
    fn state_mut(&mut self) -> &mut BufferedOutput {
        &mut self.exchange.output
    }

    /// Whether the stream has been closed
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Whether any byte has been handed to the channel
    pub fn is_write_started(&self) -> bool {
        self.state().write_started
    }

    /// Total bytes accepted by `write`
    pub fn bytes_written(&self) -> u64 {
        self.state().written
    }

    /// Bytes currently held in the buffer
    pub fn buffered(&self) -> usize {
        self.state().buffer.as_ref().map_or(0, OutputBuffer::len)
    }

    /// Declare the response length
    ///
    /// Once that many bytes have been written the stream flushes and closes
    /// itself.
    pub fn set_content_length(&mut self, length: u64) -> Result<()> {
        if self.state().write_started || self.exchange.is_committed() {
            return Err(Error::IllegalState("response already committed"));
        }
        self.state_mut().content_length = Some(length);
        self.exchange
            .response_headers_mut()
            .insert(CONTENT_LENGTH, length.into());
        Ok(())
    }

    /// Use a dedicated buffer of `size` bytes instead of a pooled one
    pub fn set_buffer_size(&mut self, size: usize) -> Result<()> {
        if self.state().buffer.is_some() {
            return Err(Error::IllegalState("content has been written"));
        }
        if size == 0 {
            return Err(Error::IllegalState("buffer size must be non-zero"));
        }
        self.state_mut().buffer_size = Some(size);
        Ok(())
    }

    /// Supply an externally managed buffer; its capacity is the flush threshold
    pub fn set_buffer(&mut self, mut buffer: BytesMut) -> Result<()> {
        if self.state().buffer.is_some() {
            return Err(Error::IllegalState("content has been written"));
        }
        let limit = buffer.capacity();
        if limit == 0 {
            return Err(Error::IllegalState("buffer size must be non-zero"));
        }
        buffer.clear();
        self.state_mut().buffer = Some(OutputBuffer::dedicated(buffer, limit));
        Ok(())
    }

    fn buffer(&mut self) -> &mut OutputBuffer {
        let exchange = &mut *self.exchange;
        let pool = &exchange.pool;
        let size = exchange.output.buffer_size;
        exchange.output.buffer.get_or_insert_with(|| match size {
            Some(size) => OutputBuffer::dedicated(BytesMut::with_capacity(size), size),
            None => OutputBuffer::pooled(pool.allocate()),
        })
    }

    /// Append bytes to the response body
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state().closed {
            return Err(Error::StreamClosed);
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut rest = data;
        while !rest.is_empty() {
            let buffer = self.buffer();
            if buffer.remaining() == 0 && buffer.len() == 0 {
                return Err(Error::IllegalState("output buffer has no capacity"));
            }
            let n = buffer.remaining().min(rest.len());
            buffer.bytes_mut().extend_from_slice(&rest[..n]);
            rest = &rest[n..];

            if buffer.remaining() == 0 {
                self.write_buffer()?;
            }
        }

        self.update_written(data.len() as u64)
    }

    fn update_written(&mut self, len: u64) -> Result<()> {
        let state = self.state_mut();
        state.written += len;
        if state.content_length.is_some_and(|cl| state.written >= cl) {
            tracing::trace!(written = state.written, "declared length reached");
            self.flush()?;
            self.close()?;
        }
        Ok(())
    }

    /// Drain the buffer to the channel, blocking
    fn write_buffer(&mut self) -> Result<()> {
        let Some(mut buffer) = self.state_mut().buffer.take() else {
            return Ok(());
        };
        if buffer.len() == 0 {
            self.state_mut().buffer = Some(buffer);
            return Ok(());
        }

        self.state_mut().write_started = true;
        let result = self.exchange.send_blocking(buffer.bytes());
        buffer.bytes_mut().clear();
        self.state_mut().buffer = Some(buffer);
        result
    }

    /// Write buffered bytes through to the channel
    pub fn flush(&mut self) -> Result<()> {
        if self.state().closed {
            return Err(Error::StreamClosed);
        }
        if self.buffered() > 0 {
            self.write_buffer()?;
            channel::flush_blocking(self.exchange.raw_channel_mut()?)?;
        }
        Ok(())
    }

    /// Discard buffered bytes so the body can be written again
    pub fn reset_buffer(&mut self) -> Result<()> {
        if self.state().write_started {
            return Err(Error::IllegalState("response already committed"));
        }
        let state = self.state_mut();
        if let Some(buffer) = state.buffer.take() {
            buffer.release();
        }
        state.written = 0;
        Ok(())
    }

    fn fix_content_length(&mut self) {
        let state = self.state();
        if state.write_started
            || state.content_length.is_some()
            || self.exchange.is_committed()
            || self.exchange.status() == StatusCode::SWITCHING_PROTOCOLS
        {
            return;
        }
        let length = self.buffered() as u64;
        self.exchange
            .response_headers_mut()
            .insert(CONTENT_LENGTH, length.into());
    }

    /// Close the stream, blocking until everything is flushed
    ///
    /// A second call is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state().closed {
            return Ok(());
        }
        self.state_mut().closed = true;

        let result = self.finish_blocking();
        if let Some(buffer) = self.state_mut().buffer.take() {
            buffer.release();
        }
        result
    }

    fn finish_blocking(&mut self) -> Result<()> {
        self.fix_content_length();
        self.write_buffer()?;
        if let Some(head) = self.exchange.commit_head() {
            channel::write_blocking(self.exchange.raw_channel_mut()?, &head)?;
        }

        let channel = self.exchange.raw_channel_mut()?;
        channel.end_response()?;
        channel::flush_blocking(channel)
    }

    /// Close the stream without blocking, then end the exchange
    ///
    /// Bytes the channel cannot take right away are written from a write
    /// listener as the channel becomes ready. I/O failures abort the
    /// connection instead of being returned.
    pub fn close_async(mut self) {
        if self.state().closed {
            self.exchange.end_exchange();
            return;
        }
        self.state_mut().closed = true;
        self.fix_content_length();

        let head = self.exchange.commit_head().unwrap_or_default();
        let body = self.state_mut().buffer.take();
        let drain = AsyncDrain::new(head, body);
        if drain.is_complete() {
            drain.release();
            self.exchange.end_exchange();
            return;
        }

        self.state_mut().write_started = true;
        drain.run(self.exchange);
    }
}

/// In-flight non-blocking drain of the response head and body
#[derive(Debug)]
struct AsyncDrain {
    head: Bytes,
    body: Option<OutputBuffer>,
    position: usize,
}

enum DrainStatus {
    Complete,
    Pending,
    Closed,
}

impl AsyncDrain {
    fn new(head: Bytes, body: Option<OutputBuffer>) -> Self {
        Self {
            head,
            body,
            position: 0,
        }
    }

    fn pending(&self) -> &[u8] {
        if self.head.has_remaining() {
            return &self.head;
        }
        match &self.body {
            Some(body) => &body.bytes()[self.position..],
            None => &[],
        }
    }

    fn is_complete(&self) -> bool {
        self.pending().is_empty()
    }

    fn advance(&mut self, n: usize) {
        if self.head.has_remaining() {
            self.head.advance(n);
        } else {
            self.position += n;
        }
    }

    fn drain<C: RawChannel>(&mut self, channel: &mut C) -> std::io::Result<DrainStatus> {
        loop {
            let pending = self.pending();
            if pending.is_empty() {
                return Ok(DrainStatus::Complete);
            }
            match channel.write(pending)? {
                Progress::Transferred(n) => self.advance(n),
                Progress::WouldBlock => return Ok(DrainStatus::Pending),
                Progress::Closed => return Ok(DrainStatus::Closed),
            }
        }
    }

    fn release(self) {
        if let Some(body) = self.body {
            body.release();
        }
    }

    fn run<C: RawChannel>(mut self, exchange: &mut Exchange<C>) {
        let channel = match exchange.raw_channel_mut() {
            Ok(channel) => channel,
            Err(_) => {
                self.release();
                exchange.end_exchange();
                return;
            }
        };

        match self.drain(channel) {
            Ok(DrainStatus::Complete) => {
                self.release();
                exchange.end_exchange();
            }
            Ok(DrainStatus::Pending) => {
                tracing::trace!(remaining = self.pending().len(), "write pending");
                channel.resume_writes();
                exchange.set_write_listener(Box::new(self));
            }
            Ok(DrainStatus::Closed) => {
                tracing::debug!("peer closed during response write");
                channel.suspend_writes();
                channel.close();
                self.release();
                exchange.end_exchange();
            }
            Err(e) => {
                tracing::warn!(error = %e, "response write failed");
                channel.suspend_writes();
                channel.close();
                self.release();
                exchange.end_exchange();
            }
        }
    }
}

impl<C: RawChannel> ReadinessListener<C> for AsyncDrain {
    fn on_ready(self: Box<Self>, exchange: &mut Exchange<C>) {
        (*self).run(exchange);
    }
}
