//! End-to-end reassembly scenarios.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use tcp_reassembly::{
    Assembler, AssemblerConfig, ConnectionPool, Direction, FlowKey, NetFlow, PAGE_BYTES,
    Reassembly, Stream, TcpFlags, TcpSegment,
};

/// Owned copy of a delivered chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk {
    skip: bool,
    start: bool,
    bytes: Vec<u8>,
}

fn chunk(skip: bool, start: bool, bytes: &[u8]) -> Chunk {
    Chunk {
        skip,
        start,
        bytes: bytes.to_vec(),
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Chunk>>>);

impl Stream for Recorder {
    fn reassembled(&mut self, chunks: &[Reassembly<'_>]) {
        *self.0.lock().unwrap() = chunks
            .iter()
            .map(|c| {
                assert_eq!(c.direction, Direction::Forward);
                chunk(c.skip, c.start, c.bytes)
            })
            .collect();
    }

    fn reassembly_complete(&mut self) {}
}

struct Step<'a> {
    segment: TcpSegment<'a>,
    want: Vec<Chunk>,
}

fn step(segment: TcpSegment<'_>, want: Vec<Chunk>) -> Step<'_> {
    Step { segment, want }
}

fn run(steps: Vec<Step<'_>>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let recorder = Recorder::default();
    let delivered = recorder.0.clone();
    let pool = ConnectionPool::new(move |_: &FlowKey| recorder.clone());
    let config = AssemblerConfig::default()
        .with_max_pages(100)
        .with_max_pages_per_connection(4);
    let mut assembler = Assembler::new(config, pool).unwrap();
    let net = NetFlow::new(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8));

    for (i, step) in steps.iter().enumerate() {
        delivered.lock().unwrap().clear();
        assembler.process(&net, &step.segment);
        let got = delivered.lock().unwrap().clone();
        assert_eq!(got, step.want, "step {i}");
    }
    assert!(assembler.page_pool().in_use() <= 100);
}

fn data(seq: u32, payload: &[u8]) -> TcpSegment<'_> {
    TcpSegment::new(1, 2, seq, payload)
}

fn syn(seq: u32, payload: &[u8]) -> TcpSegment<'_> {
    data(seq, payload).with_flags(TcpFlags::SYN)
}

#[test]
fn test_reorder() {
    run(vec![
        step(data(1001, &[1, 2, 3]), vec![]),
        step(data(1004, &[2, 2, 3]), vec![]),
        step(data(1010, &[4, 2, 3]), vec![]),
        step(
            data(1007, &[3, 2, 3]),
            vec![
                chunk(true, false, &[1, 2, 3]),
                chunk(false, false, &[2, 2, 3]),
                chunk(false, false, &[3, 2, 3]),
                chunk(false, false, &[4, 2, 3]),
            ],
        ),
    ]);
}

#[test]
fn test_reorder_fast() {
    run(vec![
        step(syn(1000, &[1, 2, 3]), vec![chunk(false, true, &[1, 2, 3])]),
        step(data(1007, &[3, 2, 3]), vec![]),
        step(
            data(1004, &[2, 2, 3]),
            vec![
                chunk(false, false, &[2, 2, 3]),
                chunk(false, false, &[3, 2, 3]),
            ],
        ),
    ]);
}

#[test]
fn test_overlap() {
    run(vec![
        step(
            syn(1000, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0]),
            vec![chunk(false, true, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0])],
        ),
        step(
            data(1007, &[7, 8, 9, 0, 1, 2, 3, 4]),
            vec![chunk(false, false, &[1, 2, 3, 4])],
        ),
    ]);
}

#[test]
fn test_sequence_wraparound() {
    run(vec![
        step(
            syn(0xFFFF_FFFF, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0]),
            vec![chunk(false, true, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0])],
        ),
        step(data(10, &[1, 2, 3, 4]), vec![chunk(false, false, &[1, 2, 3, 4])]),
    ]);
}

#[test]
fn test_wraparound_buffered_before_syn() {
    run(vec![
        step(data(10, &[1, 2, 3, 4]), vec![]),
        step(
            syn(0xFFFF_FFFF, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0]),
            vec![
                chunk(false, true, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0]),
                chunk(false, false, &[1, 2, 3, 4]),
            ],
        ),
    ]);
}

#[test]
fn test_cache_large_packet() {
    let payload: Vec<u8> = (0..PAGE_BYTES * 3).map(|i| (i % 251) as u8).collect();
    run(vec![
        step(data(1001, &payload), vec![]),
        step(
            syn(1000, &[]),
            vec![
                chunk(false, true, &[]),
                chunk(false, false, &payload[..PAGE_BYTES]),
                chunk(false, false, &payload[PAGE_BYTES..PAGE_BYTES * 2]),
                chunk(false, false, &payload[PAGE_BYTES * 2..]),
            ],
        ),
    ]);
}

#[test]
fn test_pure_retransmission_is_silent() {
    run(vec![
        step(syn(0, b"hello"), vec![chunk(false, true, b"hello")]),
        step(data(1, b"hello"), vec![]),
        step(data(3, b"llo world"), vec![chunk(false, false, b" world")]),
    ]);
}

#[test]
fn test_arrival_order_does_not_change_bytes() {
    let payload: Vec<u8> = (0..64u8).collect();
    let orders: [&[usize]; 3] = [&[0, 1, 2, 3], &[3, 2, 1, 0], &[2, 0, 3, 1]];

    for order in orders {
        let recorder = Recorder::default();
        let all = Arc::new(Mutex::new(Vec::new()));
        let sink = all.clone();
        let delivered = recorder.0.clone();
        let pool = ConnectionPool::new(move |_: &FlowKey| recorder.clone());
        let config = AssemblerConfig::default()
            .with_max_pages(100)
            .with_max_pages_per_connection(10);
        let mut assembler = Assembler::new(config, pool).unwrap();
        let net = NetFlow::new(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8));

        assembler.process(&net, &syn(99, &[]));
        for &i in order {
            // overlapping 20-byte windows every 16 bytes
            let from = i * 16;
            let to = (from + 20).min(payload.len());
            assembler.process(&net, &data(100 + from as u32, &payload[from..to]));
            for c in delivered.lock().unwrap().iter() {
                sink.lock().unwrap().extend_from_slice(&c.bytes);
            }
        }
        assert_eq!(*all.lock().unwrap(), payload, "order {order:?}");
    }
}
