//! 播放控制栏：按钮、进度条和提示

use egui::{RichText, Ui};

use crate::state::{AppState, GuiSurface};
use crate::ui::theme::ChimeTheme;
use chime_player::UiAdapter;

pub struct PlayerDeck;

impl PlayerDeck {
    pub fn show(ui: &mut Ui, state: &AppState) {
        let enabled = state.has_track();

        state.with_ui(|adapter| {
            egui::Frame::none()
                .fill(ChimeTheme::BG_SURFACE)
                .inner_margin(egui::Margin::symmetric(16.0, 12.0))
                .show(ui, |ui| {
                    ui.set_width(ui.available_width());
                    ui.add_enabled_ui(enabled, |ui| {
                        Self::transport_controls(ui, adapter);
                        ui.add_space(6.0);
                        Self::seek_bar(ui, adapter);
                    });
                    ui.add_space(4.0);
                    Self::notice_line(ui, adapter.surface());
                });
        });
    }

    fn transport_controls(ui: &mut Ui, adapter: &UiAdapter<GuiSurface>) {
        ui.horizontal(|ui| {
            if ui.button(RichText::new("▶ Play").size(16.0)).clicked() {
                adapter.play();
            }
            if ui.button(RichText::new("⏸ Pause").size(16.0)).clicked() {
                adapter.pause();
            }
            if ui.button(RichText::new("⟲ Reset").size(16.0)).clicked() {
                adapter.reset();
            }
        });
    }

    /// 拖动时只更新本地数值，松手才发 seek；单击直接 seek
    fn seek_bar(ui: &mut Ui, adapter: &mut UiAdapter<GuiSurface>) {
        ui.horizontal(|ui| {
            let max = adapter.surface().slider_max;
            let mut value = adapter.surface().slider_value.min(max);

            ui.label(
                RichText::new(format_ms(value))
                    .color(ChimeTheme::TEXT_MUTED)
                    .size(11.0),
            );

            let slider = egui::Slider::new(&mut value, 0..=max.max(1))
                .show_value(false)
                .trailing_fill(true);
            let response = ui.add(slider);

            if response.drag_started() {
                adapter.on_start_tracking_touch();
            }
            if response.changed() {
                adapter.surface_mut().slider_value = value;
                adapter.on_progress_changed(value, true);
                if !response.dragged() {
                    adapter.on_stop_tracking_touch();
                }
            }
            if response.drag_stopped() {
                adapter.on_stop_tracking_touch();
            }

            ui.label(
                RichText::new(format_ms(max))
                    .color(ChimeTheme::TEXT_MUTED)
                    .size(11.0),
            );
        });
    }

    fn notice_line(ui: &mut Ui, surface: &GuiSurface) {
        // 固定高度，提示出现时不跳动
        ui.allocate_ui(egui::vec2(ui.available_width(), 18.0), |ui| {
            if let Some((message, alpha)) = surface.visible_notice() {
                ui.label(
                    RichText::new(message)
                        .color(ChimeTheme::notice_color(alpha))
                        .size(13.0),
                );
            }
        });
    }
}

fn format_ms(ms: u32) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
