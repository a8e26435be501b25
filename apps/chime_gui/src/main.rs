//! Chime GUI

mod state;
mod ui;

use std::path::PathBuf;
use std::time::Duration;

use chime_player::PlayerConfig;
use eframe::egui;

use state::AppState;
use ui::{ChimeTheme, LogView, PlayerDeck};

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let initial_file = std::env::args().nth(1).map(PathBuf::from);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([640.0, 520.0])
            .with_min_inner_size([420.0, 320.0])
            .with_title("Chime"),
        ..Default::default()
    };

    eframe::run_native(
        "Chime",
        options,
        Box::new(move |cc| {
            ChimeTheme::apply(&cc.egui_ctx);

            // 创建回调运行在 UI 线程上
            let mut state = AppState::new(PlayerConfig::default());
            if let Some(path) = initial_file {
                state.open(&path);
            }

            Ok(Box::new(ChimeApp { state }))
        }),
    )
}

struct ChimeApp {
    state: AppState,
}

impl ChimeApp {
    fn pick_file(&mut self) {
        let picked = rfd::FileDialog::new()
            .add_filter("Audio", &["mp3", "ogg", "flac", "wav"])
            .pick_file();
        if let Some(path) = picked {
            self.state.open(&path);
        }
    }

    fn header(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Open…").clicked() {
                self.pick_file();
            }

            let title = self
                .state
                .current_file
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "No track loaded".to_string());
            ui.label(
                egui::RichText::new(title)
                    .color(ChimeTheme::TEXT_PRIMARY)
                    .size(16.0)
                    .strong(),
            );
        });

        if let Some(error) = &self.state.last_error {
            ui.label(egui::RichText::new(error).color(ChimeTheme::ERROR));
        }
    }
}

impl eframe::App for ChimeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 先投递遥测，再绘制
        self.state.poll();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(6.0);
            self.header(ui);
            ui.add_space(6.0);
        });

        egui::TopBottomPanel::bottom("player_deck")
            .resizable(false)
            .show(ctx, |ui| {
                PlayerDeck::show(ui, &self.state);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            LogView::show(ui, &self.state);
        });

        // 遥测来自其他线程，定时重绘以便排空 UI 队列
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
