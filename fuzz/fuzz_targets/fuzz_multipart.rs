#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_http11_transport::multipart::{FormLayout, FormPartHead};

#[derive(Arbitrary, Debug)]
struct FuzzPart {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

#[derive(Arbitrary, Debug)]
struct FuzzMultipart {
    random: u64,
    parts: Vec<FuzzPart>,
}

fuzz_target!(|input: FuzzMultipart| {
    let mut layout = FormLayout::new(input.random);
    for part in &input.parts {
        let mut head = FormPartHead::new(&part.name).len(part.data.len() as u64);
        if let Some(filename) = &part.filename {
            head = head.filename(filename);
        }
        if let Some(ct) = &part.content_type {
            head = head.content_type(ct);
        }
        layout.push_part(head);
    }

    let mut body = Vec::new();
    for (index, part) in input.parts.iter().enumerate() {
        body.extend(layout.part_header(index).unwrap());
        body.extend_from_slice(&part.data);
        body.extend_from_slice(FormLayout::PART_TERMINATOR);
    }
    body.extend(layout.closing());

    assert_eq!(layout.content_length(), Some(body.len() as u64));
});
