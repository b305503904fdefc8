/// 检测会话系统 (Detection Session System)
///
/// - Watchdog:   可续期的单次超时
/// - ChokeGate:  暂停帧处理的闸门
/// - CompletionSignal: 会话结束的单次信号
/// - DetectionSession: 会话实体
/// - SessionRegistry:  id → 会话 注册表
pub mod choke;
pub mod completion;
pub mod detection_session;
pub mod registry;
pub mod watchdog;

pub use choke::ChokeGate;
pub use completion::{CompletionReason, CompletionSignal};
pub use detection_session::DetectionSession;
pub use registry::SessionRegistry;
pub use watchdog::Watchdog;
