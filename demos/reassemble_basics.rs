//! Reassembly basics example.
//!
//! This example feeds a short, shuffled HTTP exchange through an assembler
//! and prints what each direction's stream receives.
//!
//! Run with: RUST_LOG=debug cargo run --example reassemble_basics

use std::net::Ipv4Addr;

use tcp_reassembly::{
    Assembler, AssemblerConfig, ConnectionPool, Direction, FlowKey, NetFlow, Reassembly,
    Stream, TcpFlags, TcpSegment,
};

/// Prints every chunk and the totals per direction.
struct PrintStream {
    key: FlowKey,
    totals: [usize; 2],
}

impl Stream for PrintStream {
    fn reassembled(&mut self, chunks: &[Reassembly<'_>]) {
        for chunk in chunks {
            self.totals[chunk.direction.index()] += chunk.bytes.len();
            println!(
                "  {:?} start={} skip={} {:?}",
                chunk.direction,
                chunk.start,
                chunk.skip,
                String::from_utf8_lossy(chunk.bytes)
            );
        }
    }

    fn reassembly_complete(&mut self) {
        println!(
            "  {} complete: {} bytes forward, {} bytes reverse",
            self.key,
            self.totals[Direction::Forward.index()],
            self.totals[Direction::Reverse.index()]
        );
    }
}

fn main() {
    env_logger::init();

    println!("=== TCP Reassembly Basics ===\n");

    let pool = ConnectionPool::new(|key: &FlowKey| PrintStream {
        key: *key,
        totals: [0; 2],
    });
    let config = AssemblerConfig::default()
        .with_max_pages(64)
        .with_max_pages_per_connection(8);
    let mut assembler = Assembler::new(config, pool).expect("valid config");

    let client = NetFlow::new(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(93, 184, 216, 34));
    let server = client.reverse();

    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
    let (req_head, req_tail) = request.split_at(16);
    let (resp_head, resp_tail) = response.split_at(17);

    let steps: Vec<(&str, NetFlow, TcpSegment<'_>)> = vec![
        (
            "client SYN",
            client,
            TcpSegment::new(51000, 80, 1000, &[]).with_flags(TcpFlags::SYN),
        ),
        (
            "server SYN-ACK",
            server,
            TcpSegment::new(80, 51000, 7000, &[]).with_flags(TcpFlags::SYN | TcpFlags::ACK),
        ),
        (
            "request tail (early)",
            client,
            TcpSegment::new(51000, 80, 1001 + req_head.len() as u32, req_tail),
        ),
        (
            "request head",
            client,
            TcpSegment::new(51000, 80, 1001, req_head),
        ),
        (
            "request head (retransmitted)",
            client,
            TcpSegment::new(51000, 80, 1001, req_head),
        ),
        (
            "response head",
            server,
            TcpSegment::new(80, 51000, 7001, resp_head),
        ),
        (
            "response tail + FIN",
            server,
            TcpSegment::new(80, 51000, 7001 + resp_head.len() as u32, resp_tail)
                .with_flags(TcpFlags::FIN | TcpFlags::ACK),
        ),
        (
            "client FIN",
            client,
            TcpSegment::new(51000, 80, 1001 + request.len() as u32, &[])
                .with_flags(TcpFlags::FIN | TcpFlags::ACK),
        ),
    ];

    for (label, net, segment) in &steps {
        println!("--- {label} (seq {}) ---", segment.seq);
        assembler.process(net, segment);
    }

    println!("\nConnections left: {}", assembler.pool().len());
    println!("Pages in use: {}", assembler.page_pool().in_use());
    println!("\n=== Done! ===");
}
