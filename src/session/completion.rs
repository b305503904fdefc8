/// 会话完成信号 (单次赋值)
/// One-shot completion signal: satisfied at most once, observers run exactly once
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use once_cell::sync::OnceCell;

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    /// 管线自然结束
    Finished,
    /// 无续期时长: 首个结果后即结束
    FirstResult,
    /// 看门狗超时
    TimedOut,
    /// 显式停止请求
    Stopped,
    /// 管线 / 帧回调失败
    PipelineFailed(String),
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::Finished => write!(f, "finished"),
            CompletionReason::FirstResult => write!(f, "first result"),
            CompletionReason::TimedOut => write!(f, "timed out"),
            CompletionReason::Stopped => write!(f, "stopped"),
            CompletionReason::PipelineFailed(e) => write!(f, "pipeline failed: {}", e),
        }
    }
}

type Observer = Box<dyn FnOnce(&CompletionReason) + Send>;

struct Inner {
    reason: OnceCell<CompletionReason>,
    observers: Mutex<Vec<Observer>>,
    done: Condvar,
}

/// 可克隆句柄, 所有克隆共享同一个信号
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("reason", &self.inner.reason.get())
            .finish()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                reason: OnceCell::new(),
                observers: Mutex::new(Vec::new()),
                done: Condvar::new(),
            }),
        }
    }

    /// 满足信号. 只有第一次调用返回 true 并在当前线程上运行观察者
    pub fn complete(&self, reason: CompletionReason) -> bool {
        let observers = {
            let mut observers = self
                .inner
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.reason.set(reason).is_err() {
                return false;
            }
            self.inner.done.notify_all();
            std::mem::take(&mut *observers)
        };

        if let Some(reason) = self.inner.reason.get() {
            for observer in observers {
                observer(reason);
            }
        }
        true
    }

    /// 注册观察者; 若信号已满足则立即在当前线程运行
    pub fn on_complete<F>(&self, observer: F)
    where
        F: FnOnce(&CompletionReason) + Send + 'static,
    {
        let mut observers = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.inner.reason.get() {
            Some(reason) => {
                drop(observers);
                observer(reason);
            }
            None => observers.push(Box::new(observer)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<CompletionReason> {
        self.inner.reason.get().cloned()
    }

    /// 阻塞等待信号满足, 超时返回 None
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CompletionReason> {
        let observers = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (_observers, _) = self
            .inner
            .done
            .wait_timeout_while(observers, timeout, |_| self.inner.reason.get().is_none())
            .unwrap_or_else(PoisonError::into_inner);
        self.reason()
    }
}
