/// 每帧回调 (流控核心)
/// Per-frame callback: inference → event → backpressure
///
/// 执行顺序:
/// 1. 首帧诊断日志
/// 2. 推理, 有结果则打上会话 id/时间戳并发出事件
/// 3. 无续期时长 → 满足完成信号
/// 4. attached 会话 → 在阻塞闸门上等待 (背压点)
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::detection::{FrameGeometry, InferenceBackend, VideoFrame};
use crate::error::Result;
use crate::session::{CompletionReason, DetectionSession};

struct CallbackInner {
    session: Arc<DetectionSession>,
    backend: Arc<dyn InferenceBackend>,
    geometry: FrameGeometry,
    duration: Option<Duration>,
    first_frame: AtomicBool,
    frames: AtomicU64,
    events: AtomicU64,
}

/// 绑定到某个会话的帧回调, 克隆共享同一状态
#[derive(Clone)]
pub struct FrameCallback {
    inner: Arc<CallbackInner>,
}

impl FrameCallback {
    pub(crate) fn new(
        session: Arc<DetectionSession>,
        backend: Arc<dyn InferenceBackend>,
        geometry: FrameGeometry,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(CallbackInner {
                session,
                backend,
                geometry,
                duration,
                first_frame: AtomicBool::new(true),
                frames: AtomicU64::new(0),
                events: AtomicU64::new(0),
            }),
        }
    }

    pub fn session(&self) -> &Arc<DetectionSession> {
        &self.inner.session
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.inner.geometry
    }

    pub fn frames_processed(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.inner.events.load(Ordering::Relaxed)
    }

    /// 处理一帧. 推理错误原样返回给管线, 由管线决定是否结束会话
    pub fn on_frame(&self, frame: &VideoFrame) -> Result<()> {
        let inner = &*self.inner;
        let session = &inner.session;

        if inner.first_frame.swap(false, Ordering::AcqRel) {
            info!(
                session = session.id(),
                width = frame.width,
                height = frame.height,
                "🎬 first frame received"
            );
        }

        let settings = session.settings();
        let result =
            inner
                .backend
                .infer_frame(session.id(), frame, settings.as_ref(), &inner.geometry)?;
        inner.frames.fetch_add(1, Ordering::Relaxed);

        if let Some(mut result) = result {
            result.stamp(session.id());
            result.running = true;
            session.emit(result);
            inner.events.fetch_add(1, Ordering::Relaxed);
            inner.backend.on_event_emitted(settings.as_ref());
        }

        if inner.duration.is_none() {
            session.completion().complete(CompletionReason::FirstResult);
        }

        // 背压: 被阻塞的会话在这里停住, 管线本身继续存在
        if session.is_attached() {
            session.choke_gate().wait();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionModel, DetectionResult, PixelFormat, Size};
    use crate::events::ChannelDispatcher;
    use serde_json::{json, Value};
    use std::thread;

    /// 帧首字节非零才有结果
    struct FirstByteBackend;

    impl InferenceBackend for FirstByteBackend {
        fn model(&self) -> DetectionModel {
            DetectionModel {
                name: "first-byte".into(),
                classes: vec![],
                settings: vec![],
            }
        }

        fn infer_image(
            &self,
            _image: &[u8],
            _settings: Option<&Value>,
        ) -> anyhow::Result<DetectionResult> {
            anyhow::bail!("unsupported")
        }

        fn infer_frame(
            &self,
            _session_id: &str,
            frame: &VideoFrame,
            settings: Option<&Value>,
            geometry: &FrameGeometry,
        ) -> anyhow::Result<Option<DetectionResult>> {
            if settings.and_then(|s| s.get("fail")).is_some() {
                anyhow::bail!("inference failed");
            }
            if frame.data[0] == 0 {
                return Ok(None);
            }
            Ok(Some(DetectionResult::with_detections(vec![], geometry.source)))
        }

        fn input_geometry(&self, _source: Size) -> Size {
            Size::new(4, 4)
        }
    }

    fn setup(
        attached: bool,
        duration: Option<Duration>,
    ) -> (FrameCallback, crossbeam_channel::Receiver<DetectionResult>) {
        let (dispatcher, rx) = ChannelDispatcher::new(16);
        let session = Arc::new(DetectionSession::new("cb", attached, None, Arc::new(dispatcher)));
        let callback = FrameCallback::new(
            session,
            Arc::new(FirstByteBackend),
            FrameGeometry::new(Size::new(16, 16), Size::new(4, 4)),
            duration,
        );
        (callback, rx)
    }

    fn frame(first: u8) -> VideoFrame {
        let mut data = vec![0u8; 4 * 4 * 3];
        data[0] = first;
        VideoFrame::new(data, 4, 4, PixelFormat::Rgb)
    }

    #[test]
    fn test_result_is_stamped_and_emitted() {
        let (callback, rx) = setup(false, Some(Duration::from_secs(10)));
        callback.on_frame(&frame(0)).unwrap();
        assert!(rx.try_recv().is_err());

        callback.on_frame(&frame(1)).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.detection_id.as_deref(), Some("cb"));
        assert!(event.running);
        assert_eq!(event.input_dimensions, Some(Size::new(16, 16)));

        assert_eq!(callback.frames_processed(), 2);
        assert_eq!(callback.events_emitted(), 1);
        assert!(!callback.session().completion().is_complete());
    }

    #[test]
    fn test_without_duration_completes_on_first_frame() {
        let (callback, _rx) = setup(false, None);
        callback.on_frame(&frame(0)).unwrap();
        assert_eq!(
            callback.session().completion().reason(),
            Some(CompletionReason::FirstResult)
        );
    }

    #[test]
    fn test_inference_error_propagates() {
        let (callback, rx) = setup(false, Some(Duration::from_secs(10)));
        callback.session().update_settings(Some(json!({"fail": true})));
        assert!(callback.on_frame(&frame(1)).is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(callback.frames_processed(), 0);
    }

    #[test]
    fn test_attached_callback_blocks_while_choked() {
        let (callback, _rx) = setup(true, Some(Duration::from_secs(10)));
        callback.session().set_running(true);
        callback.on_frame(&frame(1)).unwrap();

        assert!(callback.session().choke());
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = {
            let callback = callback.clone();
            thread::spawn(move || {
                callback.on_frame(&frame(1)).unwrap();
                let _ = tx.send(());
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert!(callback.session().unchoke());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        worker.join().unwrap();
        assert_eq!(callback.frames_processed(), 2);
    }
}
