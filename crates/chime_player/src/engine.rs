//! 音频引擎接口
//!
//! 控制器只通过 [`AudioEngine`] 操作解码/输出设备。引擎放在 [`SharedEngine`]
//! 的互斥锁后面，每次只持锁完成一个引擎调用：工作线程调用可变方法，
//! 采样线程只读位置。

use std::sync::{Arc, Mutex, PoisonError};

use crate::{DecoderError, MediaSource, OutputError};

/// 引擎错误
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("No data source set")]
    NoSource,
    #[error("Engine is not prepared")]
    NotPrepared,
    #[error("Engine has been released")]
    Released,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
    #[error("{0}")]
    Other(String),
}

/// 播放结束回调，可能在引擎内部线程上触发
pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;

/// 创建引擎的工厂，`create()` 时在工作线程上调用一次
pub type EngineFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioEngine>, EngineError> + Send>;

/// 音频引擎
pub trait AudioEngine: Send {
    fn set_source(&mut self, source: &MediaSource) -> Result<(), EngineError>;

    /// 同步准备，返回时时长可用
    fn prepare(&mut self) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// 回到未设置音源的状态
    fn reset(&mut self) -> Result<(), EngineError>;

    fn seek_to(&mut self, position_ms: u32) -> Result<(), EngineError>;

    fn is_playing(&self) -> bool;

    fn current_position(&self) -> u32;

    fn duration(&self) -> u32;

    fn set_on_completion(&mut self, callback: CompletionCallback);

    /// 释放设备资源，之后引擎不可再用
    fn release(&mut self);
}

/// 共享的引擎句柄
#[derive(Clone)]
pub struct SharedEngine(Arc<Mutex<Box<dyn AudioEngine>>>);

impl SharedEngine {
    pub fn new(engine: Box<dyn AudioEngine>) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    /// 持锁执行一次引擎调用
    pub fn call<R>(&self, f: impl FnOnce(&mut dyn AudioEngine) -> R) -> R {
        let mut engine = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(engine.as_mut())
    }

    /// 采样用：一次持锁读取播放标志和位置
    pub fn sample(&self) -> Option<u32> {
        self.call(|engine| engine.is_playing().then(|| engine.current_position()))
    }
}
