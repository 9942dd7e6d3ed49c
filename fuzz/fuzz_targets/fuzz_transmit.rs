#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_http11_transport::{
    BodyShape, Error, Framing, RequestDescriptor, TransmitOptions, Transmission, WriteState,
    classify,
};

#[derive(Arbitrary, Debug)]
struct FuzzTransmit {
    method: u8,
    declared: Option<u16>,
    chunks: Vec<Vec<u8>>,
    fixed: bool,
    strict: bool,
}

const METHODS: [&str; 6] = ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS"];

fuzz_target!(|input: FuzzTransmit| {
    let method = METHODS[input.method as usize % METHODS.len()];
    let mut desc = RequestDescriptor::new(method, "/");
    if let Some(len) = input.declared {
        desc = desc.content_length(len as u64);
    }
    let options = TransmitOptions {
        strict_content_length: input.strict,
        ..Default::default()
    };
    let body: Vec<u8> = input.chunks.concat();
    let shape = if input.fixed {
        BodyShape::Fixed {
            len: body.len() as u64,
        }
    } else {
        BodyShape::Stream
    };
    let plan = classify(&shape);

    let mut state = WriteState::new();
    let mut tx = match Transmission::prepare(&desc, &plan, &mut state, &options) {
        Ok(tx) => tx,
        Err(err) => {
            assert!(matches!(err, Error::ContentLengthMismatch { .. }));
            // 失敗時はソケット状態を変更しない
            assert_eq!(state, WriteState::new());
            return;
        }
    };
    assert!(state.is_writing());

    let mut out = Vec::new();
    let result = if input.fixed {
        tx.write_fixed(&body, &mut out)
    } else {
        input
            .chunks
            .iter()
            .try_for_each(|chunk| tx.write_chunk(chunk, &mut out))
            .and_then(|()| tx.finish(&mut out))
    };
    if result.is_err() {
        assert!(input.strict);
        return;
    }
    tx.complete(&mut state);
    assert!(!state.is_writing());

    // chunked と content-length が同時に出ることはない
    let has_te = out.windows(18).any(|w| w == b"transfer-encoding:");
    let has_cl = out.windows(15).any(|w| w == b"content-length:");
    assert!(!(has_te && has_cl));
    if tx.framing() == Framing::Chunked {
        assert!(has_te);
        assert!(out.ends_with(b"0\r\n\r\n"));
    }
    assert_eq!(tx.bytes_written(), body.len() as u64);
});
