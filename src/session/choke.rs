/// 阻塞闸门: 暂停帧处理但不销毁管线
/// Two-state gate blocking frame callbacks of a choked session
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ChokeGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Default for ChokeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ChokeGate {
    /// 新建闸门, 初始为打开
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 关闭: 只影响之后的 wait
    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// 打开并唤醒所有等待者
    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open = true;
        self.changed.notify_all();
    }

    /// 阻塞直到闸门打开, 不改变闸门状态
    pub fn wait(&self) {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .changed
            .wait_while(open, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// 带超时的 wait, 返回闸门是否已打开
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            open = self
                .changed
                .wait_timeout(open, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_open_gate_does_not_block() {
        let gate = ChokeGate::new();
        gate.wait();
        gate.wait();
        assert!(gate.is_open());
    }

    #[test]
    fn test_closed_gate_blocks_until_opened() {
        let gate = Arc::new(ChokeGate::new());
        gate.close();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait();
                Instant::now()
            })
        };
        thread::sleep(Duration::from_millis(30));
        let opened_at = Instant::now();
        gate.open();

        let released_at = waiter.join().unwrap();
        assert!(released_at >= opened_at);
        assert!(gate.is_open());
    }

    #[test]
    fn test_open_releases_all_waiters() {
        let gate = Arc::new(ChokeGate::new());
        gate.close();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait_timeout(Duration::from_secs(2)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        gate.open();
        for w in waiters {
            assert!(w.join().unwrap());
        }
    }
}
