/// 检测会话实体
///
/// 可变字段 (running / settings / 看门狗) 全部在会话自身的锁内,
/// 只能通过下面的方法访问. 加锁顺序: 注册表锁 → 会话锁, 不允许反向.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::choke::ChokeGate;
use super::completion::CompletionSignal;
use super::watchdog::Watchdog;
use crate::detection::DetectionResult;
use crate::events::EventDispatcher;

#[derive(Default)]
struct SessionState {
    running: bool,
    settings: Option<Value>,
    duration: Option<Duration>,
    watchdog: Option<Watchdog>,
    generation: u64,
}

pub struct DetectionSession {
    id: String,
    attached: bool,
    state: Mutex<SessionState>,
    choke: ChokeGate,
    completion: CompletionSignal,
    dispatcher: Arc<dyn EventDispatcher>,
    created_at: Instant,
}

impl fmt::Debug for DetectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DetectionSession")
            .field("id", &self.id)
            .field("attached", &self.attached)
            .field("running", &state.running)
            .field("duration", &state.duration)
            .field("watchdog", &state.watchdog.as_ref().map(|w| w.generation()))
            .field("completion", &self.completion)
            .finish()
    }
}

impl DetectionSession {
    pub fn new(
        id: impl Into<String>,
        attached: bool,
        settings: Option<Value>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            id: id.into(),
            attached,
            state: Mutex::new(SessionState {
                settings,
                ..Default::default()
            }),
            choke: ChokeGate::new(),
            completion: CompletionSignal::new(),
            dispatcher,
            created_at: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 是否绑定外部长期管线 (创建后不变)
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn settings(&self) -> Option<Value> {
        self.lock().settings.clone()
    }

    /// None 表示保留原设置
    pub fn update_settings(&self, settings: Option<Value>) {
        if let Some(settings) = settings {
            self.lock().settings = Some(settings);
        }
    }

    /// 最近一次续期的时长
    pub fn duration(&self) -> Option<Duration> {
        self.lock().duration
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    pub fn choke_gate(&self) -> &ChokeGate {
        &self.choke
    }

    /// 通过会话的调度句柄发出事件
    pub fn emit(&self, event: DetectionResult) {
        self.dispatcher.emit(event);
    }

    // ========== 看门狗 ==========

    /// 取消旧定时器并从现在起重新计时 (续期 = 从现在延长)
    pub fn arm_watchdog<F>(&self, duration: Duration, on_fire: F) -> std::io::Result<u64>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let mut state = self.lock();
        let generation = state.generation + 1;
        // 新定时器启动成功后才替换旧的; 失败时旧期限仍然有效
        let watchdog = Watchdog::arm(generation, duration, on_fire)?;
        state.generation = generation;
        state.watchdog = Some(watchdog);
        state.duration = Some(duration);
        Ok(generation)
    }

    pub fn clear_watchdog(&self) {
        self.lock().watchdog = None;
    }

    pub fn has_watchdog(&self) -> bool {
        self.lock().watchdog.is_some()
    }

    pub fn watchdog_remaining(&self) -> Option<Duration> {
        self.lock().watchdog.as_ref().map(Watchdog::remaining)
    }

    /// 定时器触发时调用: 只有仍是当前这一代定时器才算超时
    pub fn take_expired(&self, generation: u64) -> bool {
        let mut state = self.lock();
        match &state.watchdog {
            Some(watchdog) if watchdog.generation() == generation => {
                state.watchdog = None;
                true
            }
            _ => false,
        }
    }

    // ========== 阻塞 / 解除 ==========

    /// running → 阻塞. 返回是否发生了状态变化
    pub fn choke(&self) -> bool {
        let mut state = self.lock();
        if !state.running {
            return false;
        }
        state.running = false;
        self.choke.close();
        true
    }

    /// 阻塞 → running. 返回是否发生了状态变化
    pub fn unchoke(&self) -> bool {
        let mut state = self.lock();
        if state.running {
            return false;
        }
        state.running = true;
        self.choke.open();
        true
    }

    /// detach: 停止计时并放行所有被阻塞的帧回调
    pub fn release(&self) {
        {
            let mut state = self.lock();
            state.running = false;
            state.watchdog = None;
        }
        self.choke.open();
    }
}
