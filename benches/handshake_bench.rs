//! Benchmarks for sockudo-upgrade handshake proofs and response output
//!
//! Run with: cargo bench

use std::io;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use http::HeaderValue;
use http::header::HOST;

use sockudo_upgrade::handshake::headers::{SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION};
use sockudo_upgrade::handshake::proof::{accept_key, decode_key, solve_legacy, solve_nonce};
use sockudo_upgrade::{BufferPool, Exchange, Handshake, Progress, RawChannel, WS_GUID};

/// Channel that accepts and discards every byte
#[derive(Default)]
struct SinkChannel {
    open: bool,
}

impl RawChannel for SinkChannel {
    fn read(&mut self, _dst: &mut [u8]) -> io::Result<Progress> {
        Ok(Progress::WouldBlock)
    }

    fn write(&mut self, src: &[u8]) -> io::Result<Progress> {
        Ok(Progress::Transferred(src.len()))
    }

    fn flush(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn await_writable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn suspend_reads(&mut self) {}
    fn resume_reads(&mut self) {}
    fn suspend_writes(&mut self) {}
    fn resume_writes(&mut self) {}

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn sink() -> SinkChannel {
    SinkChannel { open: true }
}

/// Benchmark both proof solvers
fn bench_proofs(c: &mut Criterion) {
    let mut group = c.benchmark_group("proof");

    group.bench_function("accept_key", |b| {
        b.iter(|| accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")));
    });

    group.bench_function("solve_nonce", |b| {
        b.iter(|| solve_nonce("SHA1", WS_GUID, black_box("dGhlIHNhbXBsZSBub25jZQ==")));
    });

    group.bench_function("decode_key", |b| {
        b.iter(|| decode_key(black_box("4 @1  46546xW%0l 1 5")));
    });

    group.bench_function("solve_legacy", |b| {
        b.iter(|| {
            solve_legacy(
                "MD5",
                black_box("4 @1  46546xW%0l 1 5"),
                black_box("12998 5 Y3 1  .P00"),
                black_box(b"^n:ds[4U"),
            )
        });
    });

    group.finish();
}

/// Benchmark a full RFC 6455 upgrade against an in-memory channel
fn bench_upgrade(c: &mut Criterion) {
    let pool = BufferPool::new(4096, 16);
    let handshake = Handshake::hybi13();

    c.bench_function("upgrade/hybi13", |b| {
        b.iter(|| {
            let mut ex = Exchange::new(sink(), pool.clone());
            ex.set_request_target("/chat");
            let headers = ex.request_headers_mut();
            headers.insert(HOST, HeaderValue::from_static("localhost"));
            headers.insert(
                SEC_WEBSOCKET_KEY,
                HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
            );
            headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

            let status = handshake.handshake(&mut ex);
            black_box((status, ex.take_upgraded()))
        });
    });
}

/// Benchmark buffered response output
fn bench_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("output");
    let pool = BufferPool::new(16 * 1024, 16);

    for chunk in [16, 256, 4096] {
        let total = 64 * 1024;
        let data = vec![0x42u8; chunk];
        group.throughput(Throughput::Bytes(total as u64));

        group.bench_with_input(BenchmarkId::new("write", chunk), &data, |b, data| {
            b.iter(|| {
                let mut ex = Exchange::new(sink(), pool.clone());
                let mut output = ex.output();
                for _ in 0..total / data.len() {
                    output.write(black_box(data)).ok();
                }
                output.close_async();
                black_box(ex.state())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_proofs, bench_upgrade, bench_output);

criterion_main!(benches);
