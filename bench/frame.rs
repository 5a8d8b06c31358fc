use bencher::{black_box, Bencher};
use shield_relay::relay::{classify, Parser, SessionFrame, SessionPorts};
use shield_relay::test::make_frame;
use std::net::Ipv4Addr;

const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const DEVICE: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 77);

fn handle_n(b: &mut Bencher, payload_len: usize) {
    let ports = SessionPorts::default();
    let payload = vec![0x5a; payload_len];
    let frames = vec![
        make_frame(DEVICE, HOST, 51000, ports.video, b""),
        make_frame(HOST, DEVICE, ports.video, ports.video, &payload),
        make_frame(HOST, DEVICE, 40000, 443, &payload),
    ];

    b.bytes = frames.iter().map(|f| f.len() as u64).sum();
    b.iter(|| {
        for frame in &frames {
            if let Ok(parsed) = SessionFrame::parse(frame) {
                black_box(classify(&parsed, HOST, &ports));
            }
        }
    });
}

fn parse_small(b: &mut Bencher) {
    handle_n(b, 64)
}

fn parse_video(b: &mut Bencher) {
    handle_n(b, 1400)
}

fn reject_garbage(b: &mut Bencher) {
    let frame = make_frame(DEVICE, HOST, 51000, 47998, &[0u8; 512]);
    let truncated = &frame[..frame.len() - 1];

    b.iter(|| black_box(SessionFrame::parse(truncated).is_err()));
}

bencher::benchmark_group!(frame, parse_small, parse_video, reject_garbage);

bencher::benchmark_main!(frame);
