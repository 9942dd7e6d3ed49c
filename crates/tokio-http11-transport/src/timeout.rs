//! タイマーの tokio 時計への橋渡し
//!
//! 監視の状態機械は `std::time::Instant` で動く。tokio の時計から作ることで、
//! 時間を止めたテストでも同じ判定になる。

use std::time::Instant;

/// tokio の時計での現在時刻
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// 期限まで待つ
///
/// 期限がなければ完了しない。
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
