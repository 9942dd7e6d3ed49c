//! PBT テスト共通ユーティリティ

use proptest::prelude::*;

// ========================================
// トークン・ヘッダー生成
// ========================================

/// HTTP トークン文字列 (1-16 文字)
pub fn token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!#$%&'*+.^_`|~-]{1,16}".prop_map(|s| s)
}

/// ヘッダー名 (接続管理・フレーミング系の名前と衝突しないように x- を付ける)
pub fn extension_header_name() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,16}".prop_map(|s| format!("x-{}", s))
}

/// ヘッダー値 (前後の空白なし、制御文字なし)
pub fn header_value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]([A-Za-z0-9 ,;=/._-]{0,30}[A-Za-z0-9])?".prop_map(|s| s)
}

/// 拡張ヘッダー一覧
pub fn extension_headers() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((extension_header_name(), header_value()), 0..8)
}

// ========================================
// ボディ生成
// ========================================

/// 空でないチャンク列
pub fn body_chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 0..8)
}

// ========================================
// 分割
// ========================================

/// バイト列を `points` の位置で分割する
///
/// 位置はソートされて範囲内に丸められる。
pub fn split_at_points(data: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = points.iter().map(|p| p % (data.len() + 1)).collect();
    points.sort_unstable();
    points.dedup();

    let mut pieces = Vec::new();
    let mut start = 0;
    for p in points {
        pieces.push(data[start..p].to_vec());
        start = p;
    }
    pieces.push(data[start..].to_vec());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_points() {
        let pieces = split_at_points(b"abcdef", &[4, 2, 2, 13]);
        assert_eq!(pieces.concat(), b"abcdef");
        assert_eq!(pieces[0], b"ab");
    }
}
