/// ペイロードを期待するメソッドかどうか
///
/// PUT, POST, PATCH, QUERY, PROPFIND, PROPPATCH のみ true。
pub fn expects_payload(method: &str) -> bool {
    matches!(
        method,
        "PUT" | "POST" | "PATCH" | "QUERY" | "PROPFIND" | "PROPPATCH"
    )
}

/// Content-Length の不一致検査の対象メソッドかどうか
///
/// GET, HEAD, OPTIONS, TRACE, CONNECT は検査しない。
pub fn checks_content_length(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD" | "OPTIONS" | "TRACE" | "CONNECT")
}

/// ヘッダー値 (複数値を持てる)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// 単一値
    Single(String),
    /// 複数値 (値ごとに `name: value` 行を繰り返して送信する)
    Multi(Vec<String>),
}

impl HeaderValue {
    /// 値を順に返す
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            HeaderValue::Single(v) => std::slice::from_ref(v),
            HeaderValue::Multi(vs) => vs,
        };
        values.iter().map(String::as_str)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Single(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Single(v)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(vs: Vec<String>) -> Self {
        HeaderValue::Multi(vs)
    }
}

/// リクエスト後のソケット扱い (3 状態)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResetPolicy {
    /// 指定なし (メソッドなどから決定)
    #[default]
    Unset,
    /// このリクエストの後に必ず接続を閉じる
    ForceClose,
    /// 接続を維持する
    ForceKeepAlive,
}

/// リクエスト記述子
///
/// 1 回の送信試行について不変。ボディは I/O 層が別に持ち、
/// ここでは宣言された長さなどのメタデータのみを扱う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// HTTP メソッド (GET, POST, etc.)
    pub method: String,
    /// リクエストパス
    pub path: String,
    /// Host ヘッダーの上書き
    pub host: Option<String>,
    /// ヘッダー (挿入順、重複名を保持)
    pub headers: Vec<(String, HeaderValue)>,
    /// 呼び出し側が宣言した Content-Length
    pub content_length: Option<u64>,
    /// アップグレード先プロトコル名
    pub upgrade: Option<String>,
    /// ブロッキングリクエスト (レスポンスヘッダー到着まで次を送らない)
    pub blocking: bool,
    /// リクエスト後のソケット扱い
    pub reset: ResetPolicy,
}

impl RequestDescriptor {
    /// 新しいリクエスト記述子を作成
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            host: None,
            headers: Vec::new(),
            content_length: None,
            upgrade: None,
            blocking: false,
            reset: ResetPolicy::Unset,
        }
    }

    /// ヘッダーを追加 (ビルダーパターン)
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// 複数値ヘッダーを追加 (ビルダーパターン)
    pub fn header_values<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.headers.push((name.to_string(), HeaderValue::Multi(values)));
        self
    }

    /// Host ヘッダーを設定 (ビルダーパターン)
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Content-Length を宣言 (ビルダーパターン)
    pub fn content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    /// アップグレードを要求 (ビルダーパターン)
    pub fn upgrade(mut self, protocol: &str) -> Self {
        self.upgrade = Some(protocol.to_string());
        self
    }

    /// ブロッキングリクエストにする (ビルダーパターン)
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// ソケット扱いを指定 (ビルダーパターン)
    pub fn reset(mut self, reset: ResetPolicy) -> Self {
        self.reset = reset;
        self
    }

    /// ヘッダーを追加
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.into()));
    }

    /// ヘッダーを取得 (大文字小文字を区別しない、最初の値)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.iter().next())
    }

    /// ヘッダーが存在するか確認
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// ペイロードを期待するメソッドかどうか
    pub fn expects_payload(&self) -> bool {
        expects_payload(&self.method)
    }
}
