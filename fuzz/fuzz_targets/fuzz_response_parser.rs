#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_http11_transport::{Event, ParserLimits, ResponseContext, ResponseParser};

#[derive(Arbitrary, Debug)]
struct FuzzResponse {
    data: Vec<u8>,
    method: u8,
    upgrade: bool,
    pipelined: u8,
    split_hint: u8,
    small_limits: bool,
    pause_every: u8,
}

const METHODS: [&str; 5] = ["GET", "HEAD", "POST", "CONNECT", "PUT"];

fuzz_target!(|input: FuzzResponse| {
    let limits = if input.small_limits {
        ParserLimits {
            max_header_size: 256,
            max_headers_count: 8,
            max_response_size: Some(1024),
            max_chunk_line_size: 32,
        }
    } else {
        ParserLimits::default()
    };
    let mut parser = ResponseParser::with_limits(limits);
    let method = METHODS[input.method as usize % METHODS.len()];
    for _ in 0..=(input.pipelined % 4) {
        parser.expect(ResponseContext::new(method).upgrade(input.upgrade));
    }

    let split_size = (input.split_hint as usize % 64) + 1;
    let mut count = 0usize;
    for part in input.data.chunks(split_size) {
        parser.push(part);
        loop {
            match parser.next_event() {
                Ok(Some(Event::Upgrade { remaining, .. })) => {
                    assert!(remaining.len() <= input.data.len());
                    assert!(parser.is_finished());
                    return;
                }
                Ok(Some(_)) => {
                    count += 1;
                    // 一時停止と再開でイベント列が壊れないこと
                    if input.pause_every > 0 && count % input.pause_every as usize == 0 {
                        parser.pause();
                        assert!(matches!(parser.next_event(), Ok(None)));
                        parser.resume();
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // エラーは記録され続ける
                    assert_eq!(parser.next_event().unwrap_err(), err);
                    return;
                }
            }
        }
    }
    let _ = parser.finish();
});
