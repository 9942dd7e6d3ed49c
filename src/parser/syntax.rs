//! ステータス行とヘッダー行の構文解析

use crate::error::Error;

/// CRLF で終わる行を探す
pub(crate) fn find_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// CRLF がまだ届いていない行の長さ
///
/// 末尾の `\r` は行終端の一部なので数えない。完成した行の長さと同じ基準になる。
pub(crate) fn partial_line_len(buf: &[u8]) -> usize {
    buf.len() - usize::from(buf.last() == Some(&b'\r'))
}

/// ステータス行をパース
///
/// `HTTP-version SP status-code SP [ reason-phrase ]`
pub(crate) fn parse_status_line(line: &[u8]) -> Result<(String, u16, String), Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::InvalidData(format!("invalid UTF-8: {e}")))?;

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default();

    if !is_valid_http_version(version) {
        return Err(Error::InvalidData(format!("invalid status line: {}", line)));
    }
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidData(format!("invalid status code: {}", code)));
    }
    let status_code: u16 = code
        .parse()
        .map_err(|_| Error::InvalidData(format!("invalid status code: {}", code)))?;
    if !(100..=599).contains(&status_code) {
        return Err(Error::InvalidData(format!("invalid status code: {}", code)));
    }
    if !is_valid_field_value(reason) {
        return Err(Error::InvalidData(
            "invalid status line: invalid reason phrase".to_string(),
        ));
    }

    Ok((version.to_string(), status_code, reason.to_string()))
}

/// ヘッダー行をパース
pub(crate) fn parse_header_line(line: &[u8]) -> Result<(String, String), Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::InvalidData(format!("invalid UTF-8: {e}")))?;

    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(Error::InvalidData(
            "invalid header line: obs-fold".to_string(),
        ));
    }

    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::InvalidData("invalid header line: missing colon".to_string()))?;
    if !is_valid_header_name(name) {
        return Err(Error::InvalidData(
            "invalid header line: invalid name".to_string(),
        ));
    }

    // ヘッダー値の検証 (RFC 9110 Section 5.5)
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if !is_valid_field_value(value) {
        return Err(Error::InvalidData(
            "invalid header line: invalid value (contains control characters)".to_string(),
        ));
    }

    Ok((name.to_string(), value.to_string()))
}

/// ヘッダー名が有効か確認
pub(crate) fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_char)
}

/// トークン文字か確認
pub(crate) fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
    )
}

/// ヘッダー値が有効か確認 (RFC 9110 Section 5.5)
///
/// 制御文字 (0x00-0x08, 0x0A-0x1F, 0x7F) を含む場合は無効
pub(crate) fn is_valid_field_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| matches!(b, 0x09 | 0x20..=0x7E | 0x80..=0xFF))
}

/// HTTP/1.0 または HTTP/1.1 のみ許可
fn is_valid_http_version(version: &str) -> bool {
    matches!(version, "HTTP/1.0" | "HTTP/1.1")
}

/// Transfer-Encoding が chunked かどうかを解析
///
/// chunked 以外のコーディングはサポートしない。
pub(crate) fn parse_transfer_encoding_chunked(headers: &[(String, String)]) -> Result<bool, Error> {
    let mut chunked_count = 0;

    for (name, value) in headers {
        if !name.eq_ignore_ascii_case("Transfer-Encoding") {
            continue;
        }
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::InvalidData(
                    "invalid Transfer-Encoding: empty token".to_string(),
                ));
            }
            if !token.eq_ignore_ascii_case("chunked") {
                return Err(Error::InvalidData(
                    "invalid Transfer-Encoding: unsupported coding".to_string(),
                ));
            }
            chunked_count += 1;
            if chunked_count > 1 {
                return Err(Error::InvalidData(
                    "invalid Transfer-Encoding: duplicate chunked".to_string(),
                ));
            }
        }
    }

    Ok(chunked_count == 1)
}

/// Content-Length ヘッダーを解析
///
/// 複数ある場合は全て同じ値でなければならない。
pub(crate) fn parse_content_length(headers: &[(String, String)]) -> Result<Option<u64>, Error> {
    let mut value: Option<u64> = None;
    for (name, raw_value) in headers {
        if !name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        let raw_value = raw_value.trim();
        if raw_value.is_empty() || !raw_value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidData(
                "invalid Content-Length: not a number".to_string(),
            ));
        }
        let parsed = raw_value
            .parse::<u64>()
            .map_err(|_| Error::InvalidData("invalid Content-Length: overflow".to_string()))?;
        match value {
            Some(prev) if prev != parsed => {
                return Err(Error::InvalidData(
                    "invalid Content-Length: mismatched values".to_string(),
                ));
            }
            _ => value = Some(parsed),
        }
    }
    Ok(value)
}

/// ボディ関連ヘッダーを解決
pub(crate) fn resolve_body_headers(
    headers: &[(String, String)],
) -> Result<(bool, Option<u64>), Error> {
    let chunked = parse_transfer_encoding_chunked(headers)?;
    let content_length = parse_content_length(headers)?;

    if chunked && content_length.is_some() {
        return Err(Error::InvalidData(
            "invalid message: both Transfer-Encoding and Content-Length".to_string(),
        ));
    }

    Ok((chunked, content_length))
}

/// チャンクサイズ行をパース (拡張は無視)
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidChunkSize(text.into_owned()));
    }
    u64::from_str_radix(size, 16).map_err(|_| Error::InvalidChunkSize(text.into_owned()))
}
