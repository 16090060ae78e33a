//! Tokio TCP adapter
//!
//! [`TcpChannel`] exposes a `tokio::net::TcpStream` through the non-blocking
//! [`RawChannel`] contract, and [`drive`] waits on the socket's readiness to
//! run whichever listeners an exchange has registered.
//!
//! Blocking writes park the worker thread with `block_in_place`, so exchanges
//! must be driven on a multi-threaded runtime. On a current-thread runtime a
//! blocking write that would wait fails with `ErrorKind::Unsupported`.

use std::io;
use std::net::Shutdown;

use socket2::SockRef;
use tokio::io::Interest as TokioInterest;
use tokio::net::TcpStream;
use tokio::runtime::RuntimeFlavor;

use crate::channel::{Progress, RawChannel};
use crate::error::{Error, Result};
use crate::exchange::Exchange;

/// A TCP connection driven through non-blocking calls
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    open: bool,
    reads_enabled: bool,
    writes_enabled: bool,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            open: true,
            reads_enabled: true,
            writes_enabled: true,
        }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    /// Whether read readiness is currently wanted
    pub fn reads_enabled(&self) -> bool {
        self.reads_enabled
    }

    /// Whether write readiness is currently wanted
    pub fn writes_enabled(&self) -> bool {
        self.writes_enabled
    }
}

impl RawChannel for TcpChannel {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<Progress> {
        if !self.open {
            return Ok(Progress::Closed);
        }
        match self.stream.try_read(dst) {
            Ok(0) if !dst.is_empty() => Ok(Progress::Closed),
            Ok(n) => Ok(Progress::Transferred(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Progress::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, src: &[u8]) -> io::Result<Progress> {
        if !self.open {
            return Ok(Progress::Closed);
        }
        match self.stream.try_write(src) {
            Ok(0) if !src.is_empty() => Ok(Progress::Closed),
            Ok(n) => Ok(Progress::Transferred(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Progress::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> io::Result<bool> {
        // Nothing is buffered in user space.
        Ok(true)
    }

    fn await_writable(&mut self) -> io::Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "blocking writes need a multi-threaded runtime",
            ));
        }
        let stream = &self.stream;
        tokio::task::block_in_place(|| handle.block_on(stream.writable()))
    }

    fn suspend_reads(&mut self) {
        self.reads_enabled = false;
    }

    fn resume_reads(&mut self) {
        self.reads_enabled = true;
    }

    fn suspend_writes(&mut self) {
        self.writes_enabled = false;
    }

    fn resume_writes(&mut self) {
        self.writes_enabled = true;
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            tracing::trace!(error = %e, "shutdown on close failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Run the exchange's readiness listeners until none is left
///
/// Returns once the exchange ended or nothing is waiting on the socket.
pub async fn drive(exchange: &mut Exchange<TcpChannel>) -> Result<()> {
    loop {
        let interest = exchange.interest();
        if exchange.is_ended() || interest.is_empty() {
            return Ok(());
        }
        let Some(channel) = exchange.channel() else {
            return Ok(());
        };

        let wanted = match (interest.readable, interest.writable) {
            (true, true) => TokioInterest::READABLE | TokioInterest::WRITABLE,
            (true, false) => TokioInterest::READABLE,
            _ => TokioInterest::WRITABLE,
        };

        let ready = match channel.stream.ready(wanted).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "readiness wait failed");
                exchange.abort();
                return Err(Error::from(e));
            }
        };

        if ready.is_readable() || ready.is_read_closed() {
            exchange.fire_readable();
        }
        if ready.is_writable() || ready.is_write_closed() {
            exchange.fire_writable();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::HeaderValue;
    use http::header::HOST;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::alloc::BufferPool;
    use crate::exchange::ExchangeState;
    use crate::handshake::headers::{
        SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_KEY1, SEC_WEBSOCKET_KEY2, SEC_WEBSOCKET_VERSION,
    };
    use crate::handshake::{HandshakeStatus, Negotiator};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    async fn read_head(client: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rfc_handshake_over_tcp() {
        let (server, mut client) = connected_pair().await;

        let mut ex = Exchange::new(TcpChannel::new(server), BufferPool::new(1024, 4));
        ex.set_request_target("/chat");
        let headers = ex.request_headers_mut();
        headers.insert(HOST, HeaderValue::from_static("localhost:9001"));
        headers.insert(
            SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

        let status = Negotiator::default().negotiate(&mut ex).unwrap();
        assert!(status.is_some());
        drive(&mut ex).await.unwrap();
        assert_eq!(ex.state(), ExchangeState::Upgraded);

        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(head.contains("sec-websocket-location: ws://localhost:9001/chat\r\n"));

        let upgraded = ex.take_upgraded().unwrap();
        assert!(upgraded.is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_legacy_handshake_waits_for_key_bytes() {
        let (server, mut client) = connected_pair().await;

        let mut ex = Exchange::new(TcpChannel::new(server), BufferPool::new(1024, 4));
        ex.set_request_target("/demo");
        let headers = ex.request_headers_mut();
        headers.insert(HOST, HeaderValue::from_static("example.com"));
        headers.insert(
            SEC_WEBSOCKET_KEY1,
            HeaderValue::from_static("4 @1  46546xW%0l 1 5"),
        );
        headers.insert(
            SEC_WEBSOCKET_KEY2,
            HeaderValue::from_static("12998 5 Y3 1  .P00"),
        );

        let status = Negotiator::default().negotiate(&mut ex).unwrap();
        assert_eq!(status, Some(HandshakeStatus::Pending));

        let writer = tokio::spawn(async move {
            client.write_all(b"^n:").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(b"ds[4U").await.unwrap();
            client
        });

        drive(&mut ex).await.unwrap();
        assert_eq!(ex.state(), ExchangeState::Upgraded);

        let mut client = writer.await.unwrap();
        let head = read_head(&mut client).await;
        assert!(head.contains("sec-websocket-location: ws://example.com/demo\r\n"));

        let mut body = [0u8; 16];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"8jKS'y:G*Co,Wxa-");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_hangup_aborts_legacy_handshake() {
        let (server, client) = connected_pair().await;

        let mut ex = Exchange::new(TcpChannel::new(server), BufferPool::new(1024, 4));
        let headers = ex.request_headers_mut();
        headers.insert(SEC_WEBSOCKET_KEY1, HeaderValue::from_static("1 2"));
        headers.insert(SEC_WEBSOCKET_KEY2, HeaderValue::from_static("3 4"));

        Negotiator::default().negotiate(&mut ex).unwrap();
        drop(client);

        drive(&mut ex).await.unwrap();
        assert_eq!(ex.state(), ExchangeState::Aborted);
        assert!(!ex.channel().unwrap().is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keep_alive_serves_second_response() {
        let (server, mut client) = connected_pair().await;
        let pool = BufferPool::new(8, 4);

        let mut ex = Exchange::new(TcpChannel::new(server), pool.clone());
        let mut output = ex.output();
        output.set_content_length(12).unwrap();
        output.write(b"hello, ").unwrap();
        output.write(b"world").unwrap();
        assert!(output.is_closed());

        let channel = ex.into_channel().unwrap();
        assert!(channel.is_open());

        let mut ex = Exchange::new(channel, pool.clone());
        let mut output = ex.output();
        output.set_content_length(6).unwrap();
        output.write(b"second").unwrap();
        assert!(ex.channel().unwrap().is_open());

        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-length: 12\r\n"));
        let mut first = [0u8; 12];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"hello, world");

        let head = read_head(&mut client).await;
        assert!(head.contains("content-length: 6\r\n"));
        let mut second = [0u8; 6];
        client.read_exact(&mut second).await.unwrap();
        assert_eq!(&second, b"second");

        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_wait_rejected_on_current_thread() {
        let (server, _client) = connected_pair().await;

        let mut channel = TcpChannel::new(server);
        let err = channel.await_writable().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
