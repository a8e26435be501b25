//! UI 适配层
//!
//! [`UiAdapter`] 在 UI 线程上消费遥测并驱动 [`UiSurface`]，同时把按钮和进度条
//! 操作转换成意图发布到总线。拖动进度条期间不应用位置更新，也不发布意图；
//! 松手时发布一次 `SeekTo`。

use std::sync::{Arc, Mutex, PoisonError};

use chime_bus::{BusError, SubscriberId, ThreadMode};

use crate::{IntentEvent, PlayerBus, PlayerEvent, TelemetryEvent};

/// 松手后最多丢弃这么多个不在窗口内的位置
const MAX_REJECTED_SAMPLES: u32 = 10;

/// 渲染面
pub trait UiSurface {
    /// 替换日志文本并滚动到末尾
    fn render_log(&mut self, text: &str);
    fn set_slider_max(&mut self, max_ms: u32);
    fn set_slider_value(&mut self, value_ms: u32);
    /// 短暂提示
    fn show_notice(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy)]
struct Settling {
    target: u32,
    rejected: u32,
}

/// 拖动状态和松手后的位置过滤
///
/// 松手后进入短暂的稳定期：只接受 `target <= p < target + window`、`p == 0`，
/// 或者连续丢弃若干次之后的位置，用来过滤 seek 之前就已发出的旧采样。
#[derive(Debug, Clone)]
pub struct SeekTracker {
    user_seeking: bool,
    settling: Option<Settling>,
    window_ms: u32,
}

impl SeekTracker {
    pub fn new(window_ms: u32) -> Self {
        Self {
            user_seeking: false,
            settling: None,
            window_ms,
        }
    }

    pub fn is_user_seeking(&self) -> bool {
        self.user_seeking
    }

    pub fn begin_drag(&mut self) {
        self.user_seeking = true;
        self.settling = None;
    }

    pub fn end_drag(&mut self, target: u32) {
        self.user_seeking = false;
        self.settling = Some(Settling {
            target,
            rejected: 0,
        });
    }

    /// 是否把该位置应用到进度条
    pub fn accept(&mut self, position: u32) -> bool {
        if self.user_seeking {
            return false;
        }
        let Some(settling) = self.settling.as_mut() else {
            return true;
        };

        let window = settling.target..settling.target.saturating_add(self.window_ms);
        if position == 0 || window.contains(&position) || settling.rejected >= MAX_REJECTED_SAMPLES
        {
            self.settling = None;
            return true;
        }

        settling.rejected += 1;
        false
    }
}

/// UI 适配器
pub struct UiAdapter<S> {
    bus: Arc<PlayerBus>,
    surface: S,
    seek: SeekTracker,
    /// 进度条当前显示的位置
    slider_position: u32,
    drag_position: u32,
}

impl<S: UiSurface> UiAdapter<S> {
    pub fn new(bus: Arc<PlayerBus>, surface: S, settle_window_ms: u32) -> Self {
        Self {
            bus,
            surface,
            seek: SeekTracker::new(settle_window_ms),
            slider_position: 0,
            drag_position: 0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn is_user_seeking(&self) -> bool {
        self.seek.is_user_seeking()
    }

    /// 处理一条遥测（必须在 UI 线程上调用）
    pub fn handle(&mut self, telemetry: &TelemetryEvent) {
        match telemetry {
            TelemetryEvent::Duration(duration_ms) => self.surface.set_slider_max(*duration_ms),
            TelemetryEvent::Position(position_ms) => {
                if self.seek.accept(*position_ms) {
                    self.slider_position = *position_ms;
                    self.surface.set_slider_value(*position_ms);
                }
            }
            TelemetryEvent::StateChanged(state) => {
                self.surface.show_notice(&format!("State changed to:{}", state));
            }
            TelemetryEvent::LogUpdated(text) => self.surface.render_log(text),
            TelemetryEvent::Notice(message) => self.surface.show_notice(message),
            TelemetryEvent::Completed => {}
        }
    }

    fn publish(&self, intent: IntentEvent) {
        self.bus.publish(intent.into());
    }

    pub fn play(&self) {
        self.publish(IntentEvent::StartPlayback);
    }

    pub fn pause(&self) {
        self.publish(IntentEvent::PausePlayback);
    }

    pub fn reset(&self) {
        self.publish(IntentEvent::ResetPlayback);
    }

    pub fn start_position_updates(&self) {
        self.publish(IntentEvent::StartPositionUpdates);
    }

    pub fn stop_position_updates(&self) {
        self.publish(IntentEvent::StopPositionUpdates);
    }

    /// 开始拖动；没有移动就松手时 seek 到进度条当前位置
    pub fn on_start_tracking_touch(&mut self) {
        self.seek.begin_drag();
        self.drag_position = self.slider_position;
    }

    /// 进度条数值变化；只有用户操作才进入拖动
    pub fn on_progress_changed(&mut self, progress_ms: u32, from_user: bool) {
        if !from_user {
            return;
        }
        if !self.seek.is_user_seeking() {
            self.on_start_tracking_touch();
        }
        self.drag_position = progress_ms;
        self.slider_position = progress_ms;
    }

    /// 松手：发布 `SeekTo`
    pub fn on_stop_tracking_touch(&mut self) {
        if !self.seek.is_user_seeking() {
            return;
        }
        self.seek.end_drag(self.drag_position);
        self.publish(IntentEvent::SeekTo(self.drag_position));
    }
}

impl<S: UiSurface + Send + 'static> UiAdapter<S> {
    /// 以 UI 线程模式订阅遥测；总线只持有弱引用
    pub fn subscribe(adapter: &Arc<Mutex<Self>>) -> Result<SubscriberId, BusError> {
        let bus = Arc::clone(&adapter.lock().unwrap_or_else(PoisonError::into_inner).bus);
        let weak = Arc::downgrade(adapter);

        bus.subscribe_fn(
            move |event: &PlayerEvent| {
                if let (PlayerEvent::Telemetry(telemetry), Some(adapter)) = (event, weak.upgrade())
                {
                    adapter
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .handle(telemetry);
                }
                Ok(())
            },
            ThreadMode::Ui,
        )
    }
}
