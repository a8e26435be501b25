//! chime_player - 单曲播放控制器
//!
//! 状态机、位置采样和事件总线上的意图/遥测协议；音频由
//! [`DeviceEngine`]（symphonia + cpal）或 [`SimulatedEngine`] 提供。

mod config;
mod controller;
mod decoder;
mod device;
mod engine;
mod event;
mod log_buffer;
mod output;
mod sampler;
mod simulated;
mod source;
mod state;
mod ui;

pub use config::*;
pub use controller::*;
pub use decoder::*;
pub use device::*;
pub use engine::*;
pub use event::*;
pub use log_buffer::*;
pub use output::*;
pub use simulated::*;
pub use source::*;
pub use state::*;
pub use ui::*;

pub use chime_bus::{BusError, HandlerError, SubscriberId, ThreadMode};
