//! multipart レイアウトのプロパティテスト (multipart.rs)

use pbt::token;
use proptest::prelude::*;
use shiguredo_http11_transport::multipart::{FormLayout, FormPartHead};

// ========================================
// Strategy 定義
// ========================================

/// パート名・ファイル名 (エスケープ対象の文字を含みうる)
fn part_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_\"\r\n -]{1,24}".prop_map(|s| s)
}

fn form_part() -> impl Strategy<Value = (FormPartHead, Vec<u8>)> {
    (
        part_name(),
        proptest::option::of(part_name()),
        proptest::option::of(token().prop_map(|t| format!("application/{}", t))),
        proptest::collection::vec(any::<u8>(), 0..128),
    )
        .prop_map(|(name, filename, content_type, data)| {
            let mut head = FormPartHead::new(&name).len(data.len() as u64);
            if let Some(filename) = filename {
                head = head.filename(&filename);
            }
            if let Some(ct) = content_type {
                head = head.content_type(&ct);
            }
            (head, data)
        })
}

/// レイアウトに従ってボディ全体を組み立てる
fn render(layout: &FormLayout, data: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, part) in data.iter().enumerate() {
        out.extend(layout.part_header(index).expect("part exists"));
        out.extend_from_slice(part);
        out.extend_from_slice(FormLayout::PART_TERMINATOR);
    }
    out.extend(layout.closing());
    out
}

// ========================================
// 長さの事前計算
// ========================================

proptest! {
    #[test]
    fn content_length_matches_rendered_body(
        parts in proptest::collection::vec(form_part(), 0..6),
        random in any::<u64>(),
    ) {
        let mut layout = FormLayout::new(random);
        let mut data = Vec::new();
        for (head, bytes) in parts {
            layout.push_part(head);
            data.push(bytes);
        }
        let rendered = render(&layout, &data);
        prop_assert_eq!(layout.content_length(), Some(rendered.len() as u64));
    }

    #[test]
    fn unknown_part_length_makes_total_unknown(
        parts in proptest::collection::vec(form_part(), 0..4),
        name in part_name(),
    ) {
        let mut layout = FormLayout::with_boundary("b");
        for (head, _) in parts {
            layout.push_part(head);
        }
        layout.push_part(FormPartHead::new(&name));
        prop_assert_eq!(layout.content_length(), None);
    }
}

// ========================================
// ヘッダーのエスケープ
// ========================================

proptest! {
    #[test]
    fn part_header_has_no_raw_line_breaks_in_disposition(name in part_name()) {
        let layout = FormLayout::with_boundary("boundary").part(FormPartHead::new(&name));
        let header = layout.part_header(0).unwrap();
        let text = String::from_utf8(header).unwrap();
        let mut lines = text.split("\r\n");
        prop_assert_eq!(lines.next(), Some("--boundary"));
        let disposition = lines.next().unwrap();
        prop_assert!(disposition.starts_with("Content-Disposition: form-data; name=\""));
        prop_assert!(!disposition.contains('\n'));
        // 値の中に生の引用符は残らない
        let quoted = &disposition["Content-Disposition: form-data; name=\"".len()..];
        prop_assert_eq!(quoted.matches('"').count(), 1);
        prop_assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn boundary_is_derived_from_random_value(random in any::<u64>()) {
        let layout = FormLayout::new(random);
        let suffix = format!("{:016x}", random);
        prop_assert!(layout.boundary().ends_with(&suffix));
        prop_assert_eq!(
            layout.content_type(),
            format!("multipart/form-data; boundary={}", layout.boundary())
        );
        prop_assert_eq!(layout.content_length(), Some(layout.closing().len() as u64));
    }
}
