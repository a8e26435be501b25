//! 意图与遥测事件定义

use chime_bus::EventBus;

use crate::PlayerState;

/// 播放意图（UI -> 控制器）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentEvent {
    /// 播放
    StartPlayback,
    /// 暂停
    PausePlayback,
    /// 重置并重新加载
    ResetPlayback,
    /// 跳转到指定位置（毫秒）
    SeekTo(u32),
    /// 开始周期性上报播放位置
    StartPositionUpdates,
    /// 停止周期性上报播放位置
    StopPositionUpdates,
}

/// 播放遥测（控制器 -> UI）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// 总时长（毫秒）
    Duration(u32),
    /// 当前位置（毫秒）
    Position(u32),
    /// 状态变更
    StateChanged(PlayerState),
    /// 曲目播放结束
    Completed,
    /// 完整的带编号日志
    LogUpdated(String),
    /// 短暂提示
    Notice(String),
}

/// 总线上传递的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Intent(IntentEvent),
    Telemetry(TelemetryEvent),
}

impl From<IntentEvent> for PlayerEvent {
    fn from(intent: IntentEvent) -> Self {
        PlayerEvent::Intent(intent)
    }
}

impl From<TelemetryEvent> for PlayerEvent {
    fn from(telemetry: TelemetryEvent) -> Self {
        PlayerEvent::Telemetry(telemetry)
    }
}

/// 播放器使用的事件总线
pub type PlayerBus = EventBus<PlayerEvent>;
