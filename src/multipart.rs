//! multipart/form-data のレイアウト (RFC 7578)
//!
//! ## 概要
//!
//! パートのボディそのものは扱わず、境界行とパートヘッダーのバイト列、
//! および全体の長さ (すべてのパート長が分かる場合のみ) を計算する。
//! ボディの取得は I/O 層の責任となる。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_http11_transport::multipart::{FormLayout, FormPartHead};
//!
//! let layout = FormLayout::with_boundary("boundary")
//!     .part(FormPartHead::new("field1").len(6));
//! assert_eq!(layout.content_type(), "multipart/form-data; boundary=boundary");
//!
//! let mut body = layout.part_header(0).unwrap();
//! body.extend_from_slice(b"value1");
//! body.extend_from_slice(FormLayout::PART_TERMINATOR);
//! body.extend_from_slice(&layout.closing());
//! assert_eq!(layout.content_length(), Some(body.len() as u64));
//! ```

/// パートのヘッダー情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPartHead {
    /// フィールド名
    pub name: String,
    /// ファイル名
    pub filename: Option<String>,
    /// Content-Type
    pub content_type: Option<String>,
    /// ボディ長 (不明なら None)
    pub len: Option<u64>,
}

impl FormPartHead {
    /// 新しいパートを作成
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            filename: None,
            content_type: None,
            len: None,
        }
    }

    /// ファイル名を設定
    pub fn filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    /// Content-Type を設定
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// ボディ長を設定
    pub fn len(mut self, len: u64) -> Self {
        self.len = Some(len);
        self
    }
}

/// multipart ボディのレイアウト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLayout {
    boundary: String,
    parts: Vec<FormPartHead>,
}

impl FormLayout {
    /// 各パートのボディの後に置く CRLF
    pub const PART_TERMINATOR: &'static [u8] = b"\r\n";

    /// 乱数値を受け取って境界を生成する
    ///
    /// Sans I/O の原則に従い、乱数生成は呼び出し側の責任となる。
    pub fn new(random_value: u64) -> Self {
        Self {
            boundary: format!("----formdata-shiguredo-{:016x}", random_value),
            parts: Vec::new(),
        }
    }

    /// 境界を指定して作成
    pub fn with_boundary(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            parts: Vec::new(),
        }
    }

    /// パートを追加
    pub fn part(mut self, part: FormPartHead) -> Self {
        self.parts.push(part);
        self
    }

    /// パートを追加
    pub fn push_part(&mut self, part: FormPartHead) {
        self.parts.push(part);
    }

    /// 境界文字列を取得
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// パート一覧を取得
    pub fn parts(&self) -> &[FormPartHead] {
        &self.parts
    }

    /// Content-Type ヘッダー値を取得
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// パートの境界行とヘッダーを生成
    pub fn part_header(&self, index: usize) -> Option<Vec<u8>> {
        let part = self.parts.get(index)?;
        let mut buf = Vec::new();

        buf.extend_from_slice(b"--");
        buf.extend_from_slice(self.boundary.as_bytes());
        buf.extend_from_slice(b"\r\n");

        buf.extend_from_slice(b"Content-Disposition: form-data; name=\"");
        buf.extend_from_slice(escape_quoted(&part.name).as_bytes());
        buf.push(b'"');
        if let Some(filename) = &part.filename {
            buf.extend_from_slice(b"; filename=\"");
            buf.extend_from_slice(escape_quoted(filename).as_bytes());
            buf.push(b'"');
        }
        buf.extend_from_slice(b"\r\n");

        if let Some(ct) = &part.content_type {
            buf.extend_from_slice(b"Content-Type: ");
            buf.extend_from_slice(ct.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(b"\r\n");
        Some(buf)
    }

    /// 終了境界を生成
    pub fn closing(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"--");
        buf.extend_from_slice(self.boundary.as_bytes());
        buf.extend_from_slice(b"--\r\n");
        buf
    }

    /// ボディ全体の長さ
    ///
    /// 1 つでも長さ不明のパートがあれば `None`。
    pub fn content_length(&self) -> Option<u64> {
        let mut total: u64 = 0;
        for (index, part) in self.parts.iter().enumerate() {
            let header = self.part_header(index)?;
            total = total
                .checked_add(header.len() as u64)?
                .checked_add(part.len?)?
                .checked_add(Self::PART_TERMINATOR.len() as u64)?;
        }
        total.checked_add(self.closing().len() as u64)
    }
}

/// quoted-string 内の `"` と改行をパーセントエンコード
fn escape_quoted(value: &str) -> String {
    value
        .replace('\n', "%0A")
        .replace('\r', "%0D")
        .replace('"', "%22")
}
