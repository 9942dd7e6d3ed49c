#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_http11_transport::{
    BodyShape, Event, RequestDescriptor, ResponseContext, ResponseParser, TransmitOptions,
    Transmission, WriteState, classify,
};

#[derive(Arbitrary, Debug)]
struct FuzzChunked {
    chunks: Vec<Vec<u8>>,
    split_hint: u8,
}

fn normalize_chunks(mut chunks: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    chunks.retain(|chunk| !chunk.is_empty());
    if chunks.len() > 64 {
        chunks.truncate(64);
    }
    chunks
}

fuzz_target!(|input: FuzzChunked| {
    let chunks = normalize_chunks(input.chunks);
    if chunks.is_empty() {
        return;
    }
    let expected: Vec<u8> = chunks.concat();

    let desc = RequestDescriptor::new("POST", "/");
    let mut state = WriteState::new();
    let mut tx = Transmission::prepare(
        &desc,
        &classify(&BodyShape::Stream),
        &mut state,
        &TransmitOptions::default(),
    )
    .unwrap();
    let mut wire = Vec::new();
    for chunk in &chunks {
        tx.write_chunk(chunk, &mut wire).unwrap();
    }
    tx.finish(&mut wire).unwrap();

    // ボディ部分をそのまま chunked レスポンスとして読み直す
    let body_start = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let mut response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    response.extend_from_slice(&wire[body_start..]);

    let mut parser = ResponseParser::new();
    parser.expect(ResponseContext::new("POST"));
    let split_size = (input.split_hint as usize % 32) + 1;
    let mut body = Vec::new();
    let mut completed = false;
    for part in response.chunks(split_size) {
        for event in parser.feed(part).unwrap() {
            match event {
                Event::Body(b) => body.extend(b),
                Event::MessageComplete(_) => completed = true,
                _ => {}
            }
        }
    }
    assert!(completed);
    assert_eq!(body, expected);
});
