//! 主题定义

use egui::{Color32, Rounding, Stroke, Style, Visuals};

/// 深色主题，青色强调
pub struct ChimeTheme;

impl ChimeTheme {
    pub const BG_DEEP: Color32 = Color32::from_rgb(16, 20, 24);
    pub const BG_SURFACE: Color32 = Color32::from_rgb(26, 32, 38);
    pub const BG_ELEVATED: Color32 = Color32::from_rgb(36, 44, 52);
    pub const ACCENT: Color32 = Color32::from_rgb(64, 196, 212);
    pub const NOTICE: Color32 = Color32::from_rgb(250, 200, 90);
    pub const ERROR: Color32 = Color32::from_rgb(235, 90, 80);
    pub const TEXT_PRIMARY: Color32 = Color32::from_rgb(232, 236, 240);
    pub const TEXT_MUTED: Color32 = Color32::from_rgb(140, 150, 160);
    pub const BORDER: Color32 = Color32::from_rgb(54, 64, 74);

    /// 按剩余可见度淡出的提示颜色
    pub fn notice_color(alpha: f32) -> Color32 {
        Self::NOTICE.gamma_multiply(alpha.clamp(0.0, 1.0))
    }

    pub fn apply(ctx: &egui::Context) {
        let mut visuals = Visuals::dark();

        visuals.panel_fill = Self::BG_DEEP;
        visuals.window_fill = Self::BG_SURFACE;
        visuals.extreme_bg_color = Self::BG_DEEP;
        visuals.faint_bg_color = Self::BG_SURFACE;

        let rounding = Rounding::same(6.0);
        for (widget, fill, text) in [
            (&mut visuals.widgets.noninteractive, Self::BG_SURFACE, Self::TEXT_MUTED),
            (&mut visuals.widgets.inactive, Self::BG_ELEVATED, Self::TEXT_PRIMARY),
            (&mut visuals.widgets.hovered, Self::ACCENT.gamma_multiply(0.3), Self::TEXT_PRIMARY),
            (&mut visuals.widgets.active, Self::ACCENT, Self::BG_DEEP),
        ] {
            widget.bg_fill = fill;
            widget.fg_stroke = Stroke::new(1.0, text);
            widget.rounding = rounding;
        }

        visuals.selection.bg_fill = Self::ACCENT.gamma_multiply(0.5);
        visuals.selection.stroke = Stroke::new(1.0, Self::ACCENT);
        visuals.window_stroke = Stroke::new(1.0, Self::BORDER);

        let mut style = Style {
            visuals,
            ..Style::default()
        };
        style.spacing.item_spacing = egui::vec2(8.0, 6.0);
        style.spacing.button_padding = egui::vec2(14.0, 6.0);
        style.spacing.slider_width = 360.0;

        ctx.set_style(style);
    }
}
