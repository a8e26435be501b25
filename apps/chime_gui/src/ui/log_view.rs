//! 活动日志面板

use egui::{RichText, ScrollArea, Ui};

use crate::state::AppState;
use crate::ui::theme::ChimeTheme;

pub struct LogView;

impl LogView {
    pub fn show(ui: &mut Ui, state: &AppState) {
        ui.label(
            RichText::new("Activity log")
                .color(ChimeTheme::TEXT_MUTED)
                .size(12.0),
        );

        // 新日志到达时自动停在末尾
        ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                state.with_ui(|adapter| {
                    ui.label(
                        RichText::new(&adapter.surface().log)
                            .monospace()
                            .color(ChimeTheme::TEXT_PRIMARY),
                    );
                });
            });
    }
}
