/// 事件分发 (检测结果 / 会话状态 → 外部订阅者)
/// Fire-and-forget outbound event delivery
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use tracing::warn;

use crate::detection::DetectionResult;

/// 事件分发接口, 每个会话持有一份作为自己的调度句柄
pub trait EventDispatcher: Send + Sync {
    fn emit(&self, event: DetectionResult);
}

/// 状态事件 (running=false) 等待队列空位的上限
pub const STATUS_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// 基于 crossbeam 有界队列的分发器
///
/// 队列满时丢弃检测结果, 不阻塞帧线程; 停止状态事件等待空位
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: Sender<DetectionResult>,
}

impl ChannelDispatcher {
    /// 创建分发器及其接收端
    pub fn new(capacity: usize) -> (Self, Receiver<DetectionResult>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn emit(&self, event: DetectionResult) {
        if !event.running {
            match self.tx.send_timeout(event, STATUS_SEND_TIMEOUT) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {}
                Err(SendTimeoutError::Timeout(event)) => {
                    warn!(
                        detection_id = event.detection_id.as_deref().unwrap_or(""),
                        "⚠️ event queue stalled, stop event dropped"
                    );
                }
            }
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    detection_id = event.detection_id.as_deref().unwrap_or(""),
                    "event queue full, dropping event"
                );
            }
            // 没有订阅者
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// 丢弃所有事件
pub struct NullDispatcher;

impl EventDispatcher for NullDispatcher {
    fn emit(&self, _event: DetectionResult) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_delivery() {
        let (dispatcher, rx) = ChannelDispatcher::new(4);
        dispatcher.emit(DetectionResult::status("a", true));
        dispatcher.emit(DetectionResult::status("a", false));

        assert!(rx.recv().unwrap().running);
        assert!(!rx.recv().unwrap().running);
    }

    #[test]
    fn test_full_queue_drops() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        dispatcher.emit(DetectionResult::status("a", true));
        dispatcher.emit(DetectionResult::status("b", true));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().unwrap().detection_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_stop_event_waits_for_room() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        dispatcher.emit(DetectionResult::status("a", true));

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let first = rx.recv().unwrap();
            let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            (first, second)
        });
        dispatcher.emit(DetectionResult::status("a", false));

        let (first, second) = consumer.join().unwrap();
        assert!(first.running);
        assert!(!second.running);
    }

    #[test]
    fn test_disconnected_is_silent() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        drop(rx);
        dispatcher.emit(DetectionResult::status("a", true));
        dispatcher.emit(DetectionResult::status("a", false));
    }
}
