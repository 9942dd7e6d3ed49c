//! 中断シグナル
//!
//! [`AbortSignal`] は複製して共有できる。どれか 1 つで [`AbortSignal::abort`] を呼ぶと
//! 全ての複製が中断状態になり、登録済みのリスナーが 1 回だけ呼ばれる。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

type Listener = Box<dyn FnOnce(Option<&str>) + Send>;

#[derive(Default)]
struct State {
    /// 中断済みなら `Some(理由)`
    reason: Option<Option<String>>,
    listeners: Vec<(u64, Listener)>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    next_id: AtomicU64,
}

/// 中断シグナル
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// リスナーの登録 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

impl AbortSignal {
    /// 新しいシグナルを作成
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // リスナーはロック外で呼ぶので、ここで poison になることはない
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 中断する
    ///
    /// 2 回目以降の呼び出しは何もしない。
    pub fn abort(&self, reason: Option<&str>) {
        let listeners = {
            let mut state = self.lock();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason.map(str::to_string));
            std::mem::take(&mut state.listeners)
        };
        self.inner.notify.notify_waiters();
        for (_, listener) in listeners {
            listener(reason);
        }
    }

    /// 中断済みかどうか
    pub fn is_aborted(&self) -> bool {
        self.lock().reason.is_some()
    }

    /// 中断理由
    ///
    /// 中断されていない、または理由なしで中断された場合は `None`。
    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone().flatten()
    }

    /// 中断されるまで待つ
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// 中断時に呼ばれるリスナーを登録
    ///
    /// 既に中断済みの場合は即座に呼ぶ。
    pub fn on_abort<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(Option<&str>) + Send + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.lock();
        if let Some(reason) = state.reason.clone() {
            drop(state);
            listener(reason.as_deref());
            return id;
        }
        state.listeners.push((id.0, Box::new(listener)));
        id
    }

    /// リスナーを解除
    pub fn remove_listener(&self, id: ListenerId) {
        self.lock().listeners.retain(|(i, _)| *i != id.0);
    }

    /// 登録中のリスナー数
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// 2 つのシグナルを双方向に連動させる
    ///
    /// どちらかが中断されるともう一方も同じ理由で中断される。
    /// 返り値を drop すると連動を解除する。
    pub fn link(&self, other: &AbortSignal) -> AbortLink {
        let to_other = Arc::downgrade(&other.inner);
        let forward = self.on_abort(move |reason| abort_weak(&to_other, reason));
        let to_self = Arc::downgrade(&self.inner);
        let backward = other.on_abort(move |reason| abort_weak(&to_self, reason));
        AbortLink {
            a: Arc::downgrade(&self.inner),
            a_listener: forward,
            b: Arc::downgrade(&other.inner),
            b_listener: backward,
        }
    }
}

fn abort_weak(target: &Weak<Inner>, reason: Option<&str>) {
    if let Some(inner) = target.upgrade() {
        AbortSignal { inner }.abort(reason);
    }
}

/// [`AbortSignal::link`] の連動
///
/// drop すると両方のリスナーを解除する。
#[must_use = "drop するとすぐに連動が解除される"]
pub struct AbortLink {
    a: Weak<Inner>,
    a_listener: ListenerId,
    b: Weak<Inner>,
    b_listener: ListenerId,
}

impl Drop for AbortLink {
    fn drop(&mut self) {
        if let Some(inner) = self.a.upgrade() {
            AbortSignal { inner }.remove_listener(self.a_listener);
        }
        if let Some(inner) = self.b.upgrade() {
            AbortSignal { inner }.remove_listener(self.b_listener);
        }
    }
}
