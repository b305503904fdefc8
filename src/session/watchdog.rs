/// 会话看门狗定时器
/// Single-shot, cancellable session deadline
///
/// 每次 arm 启动一个独立线程, 在 `after(duration)` 与取消通道之间 select:
/// - 超时先到 → 调用回调
/// - 句柄被 drop (取消/重新 arm) → 取消通道断开, 线程直接退出
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, Sender};
use tracing::trace;

/// 已启动的定时器句柄, drop 即取消
#[derive(Debug)]
pub struct Watchdog {
    generation: u64,
    deadline: Instant,
    // 只用于断开通道, 从不发送
    _cancel: Sender<()>,
}

impl Watchdog {
    /// 启动定时器, 到期后在看门狗线程上调用 `on_fire(generation)`
    pub fn arm<F>(generation: u64, duration: Duration, on_fire: F) -> std::io::Result<Self>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let deadline = Instant::now() + duration;

        thread::Builder::new()
            .name(format!("session-watchdog-{}", generation))
            .spawn(move || {
                let timeout = after(duration);
                select! {
                    recv(cancel_rx) -> _ => {
                        trace!(generation, "watchdog cancelled");
                    }
                    recv(timeout) -> _ => on_fire(generation),
                }
            })?;

        Ok(Self {
            generation,
            deadline,
            _cancel: cancel_tx,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// 显式取消 (等价于 drop)
    pub fn cancel(self) {}
}
