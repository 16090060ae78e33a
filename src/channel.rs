//! Non-blocking byte channel contract
//!
//! The upgrade core never owns a socket type directly. It drives any
//! [`RawChannel`], whose `read`/`write` calls return immediately with a
//! [`Progress`] report instead of blocking. Readiness is signalled back to the
//! core through one-shot listeners registered on the exchange.

use std::io;

use crate::error::{Error, Result};

/// Outcome of a single non-blocking transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Some bytes moved (always non-zero)
    Transferred(usize),
    /// The channel cannot make progress right now
    WouldBlock,
    /// The peer closed its side
    Closed,
}

/// A bidirectional non-blocking byte stream
pub trait RawChannel {
    /// Read into `dst` without blocking
    fn read(&mut self, dst: &mut [u8]) -> io::Result<Progress>;

    /// Write from `src` without blocking
    fn write(&mut self, src: &[u8]) -> io::Result<Progress>;

    /// Push internally buffered bytes toward the peer
    ///
    /// Returns `Ok(true)` once nothing remains buffered.
    fn flush(&mut self) -> io::Result<bool>;

    /// Mark the end of the current response body
    ///
    /// The connection itself stays open so a following exchange can reuse it.
    fn end_response(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Block the calling thread until the channel accepts more bytes
    fn await_writable(&mut self) -> io::Result<()>;

    /// Stop delivering read readiness
    fn suspend_reads(&mut self);

    /// Resume delivering read readiness
    fn resume_reads(&mut self);

    /// Stop delivering write readiness
    fn suspend_writes(&mut self);

    /// Resume delivering write readiness
    fn resume_writes(&mut self);

    /// Force-close the channel, ignoring errors
    fn close(&mut self);

    /// Whether the channel is still open
    fn is_open(&self) -> bool;

    /// Whether the channel is encrypted (selects `wss://` over `ws://`)
    fn is_secure(&self) -> bool {
        false
    }
}

/// Write all of `src`, blocking on writability as needed
pub fn write_blocking<C: RawChannel + ?Sized>(channel: &mut C, mut src: &[u8]) -> Result<()> {
    while !src.is_empty() {
        match channel.write(src)? {
            Progress::Transferred(n) => src = &src[n..],
            Progress::WouldBlock => channel.await_writable()?,
            Progress::Closed => return Err(Error::ConnectionAborted),
        }
    }
    Ok(())
}

/// Flush the channel, blocking on writability as needed
pub fn flush_blocking<C: RawChannel + ?Sized>(channel: &mut C) -> Result<()> {
    while !channel.flush()? {
        channel.await_writable()?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory channel for exercising partial I/O paths

    use std::collections::VecDeque;
    use std::io;

    use super::{Progress, RawChannel};

    /// One scripted read result
    #[derive(Debug, Clone)]
    pub(crate) enum ReadStep {
        Data(Vec<u8>),
        WouldBlock,
        Eof,
        Fail,
    }

    /// One scripted write result
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum WriteStep {
        /// Accept at most this many bytes
        Accept(usize),
        WouldBlock,
        Closed,
        Fail,
    }

    /// In-memory channel replaying scripted read and write outcomes
    ///
    /// An empty read script reports `WouldBlock`; an empty write script
    /// accepts everything.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedChannel {
        pub reads: VecDeque<ReadStep>,
        pub writes: VecDeque<WriteStep>,
        pub written: Vec<u8>,
        pub closed: bool,
        pub secure: bool,
        pub reads_suspended: bool,
        pub reads_resumed: usize,
        pub writes_suspended: bool,
        pub writes_resumed: usize,
        pub responses_ended: usize,
        pub flushes: usize,
        pub writable_waits: usize,
    }

    impl ScriptedChannel {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn secure() -> Self {
            Self {
                secure: true,
                ..Self::default()
            }
        }

        pub(crate) fn push_read(&mut self, step: ReadStep) {
            self.reads.push_back(step);
        }

        pub(crate) fn push_data(&mut self, data: &[u8]) {
            self.reads.push_back(ReadStep::Data(data.to_vec()));
        }

        pub(crate) fn push_write(&mut self, step: WriteStep) {
            self.writes.push_back(step);
        }
    }

    impl RawChannel for ScriptedChannel {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<Progress> {
            match self.reads.pop_front() {
                None | Some(ReadStep::WouldBlock) => Ok(Progress::WouldBlock),
                Some(ReadStep::Eof) => Ok(Progress::Closed),
                Some(ReadStep::Fail) => Err(io::Error::other("scripted read failure")),
                Some(ReadStep::Data(mut chunk)) => {
                    let n = chunk.len().min(dst.len());
                    dst[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(ReadStep::Data(chunk.split_off(n)));
                    }
                    Ok(Progress::Transferred(n))
                }
            }
        }

        fn write(&mut self, src: &[u8]) -> io::Result<Progress> {
            if self.closed {
                return Ok(Progress::Closed);
            }
            match self.writes.pop_front() {
                None => {
                    self.written.extend_from_slice(src);
                    Ok(Progress::Transferred(src.len()))
                }
                Some(WriteStep::Accept(limit)) => {
                    let n = limit.min(src.len());
                    if n == 0 {
                        return Ok(Progress::WouldBlock);
                    }
                    self.written.extend_from_slice(&src[..n]);
                    Ok(Progress::Transferred(n))
                }
                Some(WriteStep::WouldBlock) => Ok(Progress::WouldBlock),
                Some(WriteStep::Closed) => Ok(Progress::Closed),
                Some(WriteStep::Fail) => Err(io::Error::other("scripted write failure")),
            }
        }

        fn flush(&mut self) -> io::Result<bool> {
            self.flushes += 1;
            Ok(true)
        }

        fn end_response(&mut self) -> io::Result<()> {
            self.responses_ended += 1;
            Ok(())
        }

        fn await_writable(&mut self) -> io::Result<()> {
            self.writable_waits += 1;
            Ok(())
        }

        fn suspend_reads(&mut self) {
            self.reads_suspended = true;
        }

        fn resume_reads(&mut self) {
            self.reads_suspended = false;
            self.reads_resumed += 1;
        }

        fn suspend_writes(&mut self) {
            self.writes_suspended = true;
        }

        fn resume_writes(&mut self) {
            self.writes_suspended = false;
            self.writes_resumed += 1;
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_open(&self) -> bool {
            !self.closed
        }

        fn is_secure(&self) -> bool {
            self.secure
        }
    }
}
