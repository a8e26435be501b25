//! UI 模块

pub mod deck;
pub mod log_view;
pub mod theme;

pub use deck::PlayerDeck;
pub use log_view::LogView;
pub use theme::ChimeTheme;
