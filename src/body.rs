//! リクエストボディの分類

use crate::multipart::FormLayout;

/// I/O を伴わずに分かるボディの形
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyShape {
    /// ボディなし
    Empty,
    /// メモリ上のバッファ
    Fixed { len: u64 },
    /// 長さが読まずに分かる遅延ソース (ファイルなど)
    SizedLazy {
        len: u64,
        content_type: Option<String>,
    },
    /// プッシュ型のストリーム
    Stream,
    /// プル型の非同期シーケンス
    AsyncSequence,
    /// multipart/form-data
    Form(FormLayout),
}

/// 送信戦略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// ボディなし
    Empty,
    /// 一括送信
    Fixed,
    /// 全て読み取ってから一括送信
    SizedLazy,
    /// プッシュ型ストリームを逐次送信
    Stream,
    /// プル型シーケンスを逐次送信
    AsyncSequence,
}

impl Strategy {
    /// チャンクを逐次生成する戦略かどうか
    pub fn is_chunk_producing(&self) -> bool {
        matches!(self, Strategy::Stream | Strategy::AsyncSequence)
    }
}

/// 分類結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPlan {
    /// 送信戦略
    pub strategy: Strategy,
    /// ボディから測定できた長さ
    pub measured_len: Option<u64>,
    /// ボディから決まる Content-Type
    pub content_type: Option<String>,
}

/// ボディを分類する
///
/// 分類は失敗しない。未知の形は呼び出し側が事前に拒否する。
pub fn classify(shape: &BodyShape) -> BodyPlan {
    match shape {
        BodyShape::Empty => BodyPlan {
            strategy: Strategy::Empty,
            measured_len: Some(0),
            content_type: None,
        },
        // 長さ 0 のバッファはボディなしと同じ扱い
        BodyShape::Fixed { len: 0 } => BodyPlan {
            strategy: Strategy::Empty,
            measured_len: Some(0),
            content_type: None,
        },
        BodyShape::Fixed { len } => BodyPlan {
            strategy: Strategy::Fixed,
            measured_len: Some(*len),
            content_type: None,
        },
        BodyShape::SizedLazy { len, content_type } => BodyPlan {
            strategy: Strategy::SizedLazy,
            measured_len: Some(*len),
            content_type: content_type.clone().filter(|ct| !ct.is_empty()),
        },
        BodyShape::Stream => BodyPlan {
            strategy: Strategy::Stream,
            measured_len: None,
            content_type: None,
        },
        BodyShape::AsyncSequence => BodyPlan {
            strategy: Strategy::AsyncSequence,
            measured_len: None,
            content_type: None,
        },
        // 全パートの長さが分かる場合のみ長さを持つストリームになる
        BodyShape::Form(layout) => BodyPlan {
            strategy: Strategy::Stream,
            measured_len: layout.content_length(),
            content_type: Some(layout.content_type()),
        },
    }
}
