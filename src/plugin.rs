/// 检测插件: 会话编排核心
/// Detection plugin: session orchestration
///
/// 三类执行上下文同时修改会话状态:
/// 1. 请求上下文: detect / attach / detach / resolve_request
/// 2. 看门狗线程: 超时 → end_session
/// 3. 帧线程:     FrameCallback (可能阻塞在闸门上)
///
/// 加锁顺序固定为 注册表锁 → 会话锁, 会话锁内从不取注册表锁.
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DetectConfig;
use crate::detection::{DetectionModel, DetectionResult, FrameGeometry, InferenceBackend, Size};
use crate::error::{DetectError, Result};
use crate::events::EventDispatcher;
use crate::media::{DefaultMediaResolver, MediaObject, MediaResolver, RequestKind, StreamInput};
use crate::pipeline::{FrameCallback, FrameSource, PipelineExecutor, PipelineSpec};
use crate::session::registry::remove_if_same;
use crate::session::{CompletionReason, DetectionSession, SessionRegistry};

// ========== 请求参数与返回值 ==========

/// 会话参数: `{ detectionId, duration, settings }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// 复用 / 继续已有会话
    #[serde(default, alias = "sessionId")]
    pub detection_id: Option<String>,
    /// 毫秒; 缺省表示停止请求 (流) 或单次检测 (图片)
    #[serde(default)]
    pub duration: Option<u64>,
    /// 透传给推理后端的配置
    #[serde(default)]
    pub settings: Option<Value>,
}

impl SessionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.detection_id = Some(id.into());
        self
    }

    pub fn with_duration(mut self, millis: u64) -> Self {
        self.duration = Some(millis);
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration.map(Duration::from_millis)
    }
}

/// resolve_request 的结果
#[derive(Debug, Clone)]
pub struct Resolution {
    /// 新建会话, 调用方需要启动处理
    pub created: bool,
    pub session: Option<Arc<DetectionSession>>,
    pub status: Option<DetectionResult>,
}

/// attach 的结果
#[derive(Clone)]
pub struct Attachment {
    pub created: bool,
    pub session: Option<Arc<DetectionSession>>,
    pub status: Option<DetectionResult>,
    /// 仅新建时返回, 已接入外部管线
    pub callback: Option<FrameCallback>,
}

enum Decision {
    Stop(String, Option<Arc<DetectionSession>>),
    NotFound(String),
    Created(Arc<DetectionSession>),
    Existing(Arc<DetectionSession>),
}

// ========== 插件 ==========

struct PluginInner {
    backend: Arc<dyn InferenceBackend>,
    executor: Arc<dyn PipelineExecutor>,
    resolver: Arc<dyn MediaResolver>,
    dispatcher: Arc<dyn EventDispatcher>,
    registry: SessionRegistry,
    config: DetectConfig,
}

/// 可克隆句柄, 所有克隆共享同一注册表
#[derive(Clone)]
pub struct DetectPlugin {
    inner: Arc<PluginInner>,
}

/// DetectPlugin 构建器
pub struct DetectPluginBuilder {
    backend: Arc<dyn InferenceBackend>,
    executor: Arc<dyn PipelineExecutor>,
    dispatcher: Arc<dyn EventDispatcher>,
    resolver: Arc<dyn MediaResolver>,
    config: DetectConfig,
}

impl DetectPluginBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn MediaResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(mut self, config: DetectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DetectPlugin {
        DetectPlugin {
            inner: Arc::new(PluginInner {
                backend: self.backend,
                executor: self.executor,
                resolver: self.resolver,
                dispatcher: self.dispatcher,
                registry: SessionRegistry::new(),
                config: self.config,
            }),
        }
    }
}

impl DetectPlugin {
    pub fn builder(
        backend: Arc<dyn InferenceBackend>,
        executor: Arc<dyn PipelineExecutor>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> DetectPluginBuilder {
        DetectPluginBuilder {
            backend,
            executor,
            dispatcher,
            resolver: Arc::new(DefaultMediaResolver),
            config: DetectConfig::default(),
        }
    }

    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        executor: Arc<dyn PipelineExecutor>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self::builder(backend, executor, dispatcher).build()
    }

    fn from_weak(inner: &Weak<PluginInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &DetectConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn model(&self) -> DetectionModel {
        self.inner.backend.model()
    }

    pub fn session(&self, id: &str) -> Option<Arc<DetectionSession>> {
        self.inner.registry.get(id)
    }

    /// 查询已注册会话的运行状态
    pub fn session_status(&self, id: &str) -> Result<DetectionResult> {
        self.inner
            .registry
            .get(id)
            .map(|s| DetectionResult::status(id, s.is_running()))
            .ok_or_else(|| DetectError::SessionNotFound { id: id.to_string() })
    }

    // ========== 会话决策 ==========

    /// 决定新建 / 复用 / 解除阻塞 / 结束
    pub fn resolve_request(&self, kind: RequestKind, params: &SessionParams) -> Result<Resolution> {
        // 图片: 不做会话记录, 调用方直接推理
        if kind.is_image() {
            return Ok(Resolution {
                created: false,
                session: None,
                status: None,
            });
        }

        let duration = params.duration();
        // 未指定 id 时只生成一次, 重试时沿用
        let id = params
            .detection_id
            .clone()
            .unwrap_or_else(|| crate::gen_detection_id(self.inner.config.detection_id_bytes));

        loop {
            let decision = self.decide(&id, kind, duration, params.settings.as_ref());

            match decision {
                Decision::Stop(id, existing) => {
                    if let Some(session) = existing {
                        self.end_session(&session, CompletionReason::Stopped);
                    }
                    return Ok(Resolution {
                        created: false,
                        session: None,
                        status: Some(DetectionResult::status(id, false)),
                    });
                }
                Decision::NotFound(id) => {
                    debug!(session = %id, "session not found and no media to start it");
                    return Ok(Resolution {
                        created: false,
                        session: None,
                        status: Some(DetectionResult::status(id, false)),
                    });
                }
                Decision::Created(session) => {
                    if let Some(duration) = duration {
                        if let Err(e) = self.arm_watchdog(&session, duration) {
                            session
                                .completion()
                                .complete(CompletionReason::PipelineFailed(e.to_string()));
                            return Err(e);
                        }
                    }
                    info!(
                        session = session.id(),
                        attached = session.is_attached(),
                        "🆕 session created"
                    );
                    return Ok(Resolution {
                        created: true,
                        session: Some(session),
                        status: None,
                    });
                }
                Decision::Existing(session) => {
                    if let Some(duration) = duration {
                        self.arm_watchdog(&session, duration)?;
                    }
                    // 续期期间会话被结束: 撤销续期, 下一轮按不存在处理
                    if !session.is_attached() && session.completion().is_complete() {
                        session.clear_watchdog();
                        debug!(session = session.id(), "renewal raced session end, retrying");
                        continue;
                    }
                    session.update_settings(params.settings.clone());
                    debug!(session = session.id(), "♻️ existing session");

                    if session.is_attached() && session.unchoke() {
                        info!(session = session.id(), "▶️ unchoked session");
                    }
                    let status = DetectionResult::status(session.id(), session.is_running());
                    return Ok(Resolution {
                        created: false,
                        session: Some(session),
                        status: Some(status),
                    });
                }
            }
        }
    }

    /// 注册表锁内的决策
    fn decide(
        &self,
        id: &str,
        kind: RequestKind,
        duration: Option<Duration>,
        settings: Option<&Value>,
    ) -> Decision {
        self.inner.registry.with_lock(|sessions| {
            let mut existing = sessions.get(id).cloned();

            // 完成信号已满足 (正在结束) 的临时会话视为不存在
            if let Some(session) = &existing {
                if !session.is_attached() && session.completion().is_complete() {
                    remove_if_same(sessions, session);
                    existing = None;
                }
            }

            if duration.is_none() {
                return Decision::Stop(id.to_string(), existing);
            }
            if let Some(session) = existing {
                return Decision::Existing(session);
            }
            if !kind.has_media() {
                return Decision::NotFound(id.to_string());
            }

            let session = Arc::new(DetectionSession::new(
                id,
                kind == RequestKind::Probe,
                settings.cloned(),
                self.inner.dispatcher.clone(),
            ));
            sessions.insert(id.to_string(), session.clone());
            self.wire_completion(&session);
            Decision::Created(session)
        })
    }

    /// 完成信号 → 唯一的收尾逻辑
    fn wire_completion(&self, session: &Arc<DetectionSession>) {
        let plugin = Arc::downgrade(&self.inner);
        let weak_session = Arc::downgrade(session);
        session.completion().on_complete(move |reason| {
            let (Some(plugin), Some(session)) = (Self::from_weak(&plugin), weak_session.upgrade())
            else {
                return;
            };
            plugin.finalize(&session, reason);
        });
    }

    fn arm_watchdog(&self, session: &Arc<DetectionSession>, duration: Duration) -> Result<()> {
        let plugin = Arc::downgrade(&self.inner);
        let weak_session = Arc::downgrade(session);
        session.arm_watchdog(duration, move |generation| {
            let (Some(plugin), Some(session)) = (Self::from_weak(&plugin), weak_session.upgrade())
            else {
                return;
            };
            plugin.on_watchdog(&session, generation);
        })?;
        Ok(())
    }

    /// 看门狗线程上执行
    fn on_watchdog(&self, session: &Arc<DetectionSession>, generation: u64) {
        if !session.take_expired(generation) {
            // 已被续期或取消
            return;
        }
        info!(session = session.id(), "⏰ session timed out");
        self.end_session(session, CompletionReason::TimedOut);
    }

    // ========== 结束 ==========

    /// 结束会话: attached 会话阻塞, 临时会话经完成信号收尾
    pub fn end_session(&self, session: &Arc<DetectionSession>, reason: CompletionReason) {
        info!(session = session.id(), %reason, "detection ended");
        session.clear_watchdog();

        if session.is_attached() {
            if session.choke() {
                info!(session = session.id(), "⏸️ choked session");
            }
            session.emit(DetectionResult::status(session.id(), false));
        } else {
            // running 保持 true: 注册表项真正移除前, 并发的续期请求不能认为它已停止
            session.completion().complete(reason);
        }
    }

    /// 完成信号的观察者, 每个会话只运行一次
    fn finalize(&self, session: &Arc<DetectionSession>, reason: &CompletionReason) {
        session.clear_watchdog();

        if session.is_attached() {
            // 外部管线仍然存在, 只阻塞
            if session.choke() {
                info!(session = session.id(), "⏸️ choked session");
            }
        } else {
            // 同 id 的新会话已接管注册表项时, 后端状态属于新会话
            if self.inner.registry.remove_session(session) {
                self.inner.backend.session_ended(session.id());
            }
            info!(session = session.id(), %reason, "🛑 session finalized");
        }
        session.emit(DetectionResult::status(session.id(), false));
    }

    // ========== 请求入口 ==========

    /// 唯一的请求入口: 图片同步检测, 视频流创建 / 续期 / 停止会话
    pub fn detect(
        &self,
        media: Option<&MediaObject>,
        params: &SessionParams,
    ) -> Result<DetectionResult> {
        let kind = RequestKind::of(media);

        if let (RequestKind::Image, Some(media)) = (kind, media) {
            let image = self.inner.resolver.image_bytes(media)?;
            let result = self
                .inner
                .backend
                .infer_image(&image, params.settings.as_ref())?;
            return Ok(result);
        }

        let resolution = self.resolve_request(kind, params)?;
        let Some(session) = resolution.session else {
            return Ok(resolution.status.unwrap_or_default());
        };
        let status = resolution
            .status
            .unwrap_or_else(|| DetectionResult::status(session.id(), session.is_running()));

        // 已有会话: attached 会话的管线不归这里管; 只有未启动的临时会话需要启动
        if !resolution.created && (session.is_attached() || session.is_running()) {
            return Ok(status);
        }
        let Some(media) = media else {
            return Ok(status);
        };

        session.set_running(true);
        let started = self
            .inner
            .resolver
            .stream_input(media)
            .and_then(|input| self.run_ephemeral(&session, params.duration(), &input));

        if let Err(e) = started {
            warn!(session = session.id(), error = %e, "❌ failed to start detection");
            session
                .completion()
                .complete(CompletionReason::PipelineFailed(e.to_string()));
            return Err(e);
        }
        Ok(DetectionResult::status(session.id(), true))
    }

    /// 为临时会话启动有时限的管线
    pub fn run_ephemeral(
        &self,
        session: &Arc<DetectionSession>,
        duration: Option<Duration>,
        input: &StreamInput,
    ) -> Result<()> {
        if session.is_attached() {
            return Err(DetectError::PipelineFailure(format!(
                "session {} is attached to an external pipeline",
                session.id()
            )));
        }

        let source_size = input.source_size(self.inner.config.default_source_size());
        let source = input.video_source();
        let target = self.inner.backend.input_geometry(source_size);
        let spec = PipelineSpec {
            session_id: session.id().to_string(),
            description: source.description(),
            source,
            source_size,
            target,
            pixel_format: self.inner.backend.pixel_format(),
        };
        let callback = self.create_frame_callback(session, duration, source_size);

        info!(
            session = session.id(),
            source = %spec.description,
            input = ?spec.target,
            "🚀 detection starting"
        );
        self.inner
            .executor
            .launch(spec, callback, session.completion().clone())
    }

    pub fn create_frame_callback(
        &self,
        session: &Arc<DetectionSession>,
        duration: Option<Duration>,
        source_size: Size,
    ) -> FrameCallback {
        let target = self.inner.backend.input_geometry(source_size);
        FrameCallback::new(
            session.clone(),
            self.inner.backend.clone(),
            FrameGeometry::new(source_size, target),
            duration,
        )
    }

    // ========== 外部管线 ==========

    /// 把外部长期管线绑定到会话
    pub fn attach(&self, source: &dyn FrameSource, params: &SessionParams) -> Result<Attachment> {
        let resolution = self.resolve_request(RequestKind::Probe, params)?;
        let session = match resolution.session {
            Some(session) if resolution.created => session,
            session => {
                return Ok(Attachment {
                    created: false,
                    session,
                    status: resolution.status,
                    callback: None,
                })
            }
        };

        session.set_running(true);
        let callback =
            self.create_frame_callback(&session, params.duration(), source.source_size());
        if let Err(e) = source.connect(callback.clone()) {
            warn!(session = session.id(), error = %e, "❌ failed to attach pipeline");
            if let Err(detach_err) = self.detach(session.id()) {
                warn!(session = session.id(), error = %detach_err, "detach after failed attach");
            }
            return Err(e);
        }

        info!(session = session.id(), "🔗 pipeline attached");
        Ok(Attachment {
            created: true,
            status: Some(DetectionResult::status(session.id(), true)),
            session: Some(session),
            callback: Some(callback),
        })
    }

    /// 解除绑定: 无条件移除并放行阻塞中的帧回调
    pub fn detach(&self, id: &str) -> Result<Arc<DetectionSession>> {
        let session = self
            .inner
            .registry
            .remove(id)
            .ok_or_else(|| DetectError::AlreadyDetached { id: id.to_string() })?;

        session.release();
        // 注册表项已由这里移除, finalize 不会再通知后端
        self.inner.backend.session_ended(id);
        if !session.is_attached() {
            // 临时管线没有外部持有者, 通过完成信号让它停下
            session.completion().complete(CompletionReason::Stopped);
        }
        info!(session = id, "🔓 pipeline detached");
        Ok(session)
    }
}
