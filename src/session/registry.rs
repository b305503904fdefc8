/// 会话注册表: 会话 id → 会话
///
/// 插件级唯一的全局锁. 持有注册表锁时可以再取会话锁, 反之不行.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::detection_session::DetectionSession;

pub type SessionMap = HashMap<String, Arc<DetectionSession>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<SessionMap>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在注册表锁内执行一段决策逻辑
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut SessionMap) -> R) -> R {
        let mut sessions = self.lock();
        f(&mut sessions)
    }

    pub fn get(&self, id: &str) -> Option<Arc<DetectionSession>> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// 插入会话, 返回被替换的旧会话
    pub fn insert(&self, session: Arc<DetectionSession>) -> Option<Arc<DetectionSession>> {
        self.lock().insert(session.id().to_string(), session)
    }

    /// 无条件按 id 移除
    pub fn remove(&self, id: &str) -> Option<Arc<DetectionSession>> {
        self.lock().remove(id)
    }

    /// 只有当 id 仍指向同一个会话实例时才移除,
    /// 避免结束旧会话时误删同 id 的新会话
    pub fn remove_session(&self, session: &Arc<DetectionSession>) -> bool {
        remove_if_same(&mut self.lock(), session)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// 已持有注册表锁时使用
pub(crate) fn remove_if_same(sessions: &mut SessionMap, session: &Arc<DetectionSession>) -> bool {
    match sessions.get(session.id()) {
        Some(current) if Arc::ptr_eq(current, session) => {
            sessions.remove(session.id());
            true
        }
        _ => false,
    }
}
