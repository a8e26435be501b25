//! 应用状态

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chime_player::{
    Controller, DeviceEngine, MediaSource, PlayerBus, PlayerConfig, UiAdapter, UiSurface,
};

/// 提示显示时长
pub const NOTICE_TTL: Duration = Duration::from_millis(2500);

/// egui 渲染面：保存最近一次遥测，由各面板读取
#[derive(Debug, Default)]
pub struct GuiSurface {
    pub log: String,
    pub slider_max: u32,
    pub slider_value: u32,
    pub notice: Option<(String, Instant)>,
}

impl GuiSurface {
    /// 当前提示及其剩余可见度（0..=1）
    pub fn visible_notice(&self) -> Option<(&str, f32)> {
        let (message, shown_at) = self.notice.as_ref()?;
        let elapsed = shown_at.elapsed();
        if elapsed >= NOTICE_TTL {
            return None;
        }
        let alpha = 1.0 - elapsed.as_secs_f32() / NOTICE_TTL.as_secs_f32();
        Some((message.as_str(), alpha))
    }
}

impl UiSurface for GuiSurface {
    fn render_log(&mut self, text: &str) {
        self.log = text.to_string();
    }

    fn set_slider_max(&mut self, max_ms: u32) {
        self.slider_max = max_ms;
    }

    fn set_slider_value(&mut self, value_ms: u32) {
        self.slider_value = value_ms;
    }

    fn show_notice(&mut self, message: &str) {
        self.notice = Some((message.to_string(), Instant::now()));
    }
}

/// 应用状态
pub struct AppState {
    bus: Arc<PlayerBus>,
    ui: Arc<Mutex<UiAdapter<GuiSurface>>>,
    controller: Option<Controller>,
    config: PlayerConfig,
    pub current_file: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl AppState {
    /// 必须在 UI 线程上创建
    pub fn new(config: PlayerConfig) -> Self {
        let bus = Arc::new(PlayerBus::new());
        bus.attach_ui_thread();

        let ui = Arc::new(Mutex::new(UiAdapter::new(
            Arc::clone(&bus),
            GuiSurface::default(),
            config.settle_window_ms,
        )));
        let last_error = UiAdapter::subscribe(&ui)
            .err()
            .map(|e| format!("Failed to subscribe UI: {}", e));

        Self {
            bus,
            ui,
            controller: None,
            config,
            current_file: None,
            last_error,
        }
    }

    /// 打开文件：释放旧控制器，创建新的并加载
    pub fn open(&mut self, path: &Path) {
        if let Some(mut old) = self.controller.take() {
            old.release();
        }
        self.poll();
        self.with_ui(|ui| *ui.surface_mut() = GuiSurface::default());

        let controller = Controller::new(
            Arc::clone(&self.bus),
            MediaSource::file(path),
            DeviceEngine::factory(self.config.output_buffer_size),
            &self.config,
        )
        .and_then(|mut controller| {
            controller.create()?;
            Ok(controller)
        });

        match controller {
            Ok(controller) => {
                log::info!("Opened {}", path.display());
                self.controller = Some(controller);
                self.current_file = Some(path.to_path_buf());
                self.last_error = None;
            }
            Err(e) => {
                log::error!("Failed to open {}: {}", path.display(), e);
                self.last_error = Some(e.to_string());
                self.current_file = None;
            }
        }
    }

    pub fn has_track(&self) -> bool {
        self.controller.is_some()
    }

    /// 在 UI 线程上投递待处理的遥测
    pub fn poll(&self) -> usize {
        self.bus.dispatch_ui()
    }

    /// 持锁访问 UI 适配器；闭包内不能调用 [`AppState::poll`]
    pub fn with_ui<R>(&self, f: impl FnOnce(&mut UiAdapter<GuiSurface>) -> R) -> R {
        let mut ui = self.ui.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ui)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_fades_out() {
        let mut surface = GuiSurface::default();
        assert!(surface.visible_notice().is_none());

        surface.show_notice("State changed to:Playing");
        let (message, alpha) = surface.visible_notice().unwrap();
        assert_eq!(message, "State changed to:Playing");
        assert!(alpha > 0.9);

        surface.notice = Some(("old".to_string(), Instant::now() - NOTICE_TTL));
        assert!(surface.visible_notice().is_none());
    }
}
