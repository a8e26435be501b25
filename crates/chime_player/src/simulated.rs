//! 模拟引擎
//!
//! 不需要声卡：位置按墙钟（可加速）推进，播放到结尾时由内部计时线程
//! 触发结束回调。可注入失败并记录每次调用，供测试和 `--simulate` 使用。

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, Sender};

use crate::{AudioEngine, CompletionCallback, EngineError, EngineFactory, MediaSource};

/// 记录下来的引擎调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCall {
    SetSource,
    Prepare,
    Start,
    Pause,
    Reset,
    SeekTo(u32),
    Release,
}

/// 需要注入失败的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailurePlan {
    pub set_source: bool,
    pub prepare: bool,
    pub start: bool,
    pub pause: bool,
    pub reset: bool,
    pub seek: bool,
}

struct SimState {
    source: Option<MediaSource>,
    prepared: bool,
    released: bool,
    playing: bool,
    /// `anchor` 时刻的位置
    base_ms: u32,
    anchor: Instant,
    speed: f64,
    generation: u64,
    /// 丢弃即取消计时线程
    timer_cancel: Option<Sender<()>>,
    failures: FailurePlan,
    calls: Vec<EngineCall>,
}

struct SimInner {
    duration_ms: u32,
    state: Mutex<SimState>,
    on_completion: Mutex<Option<CompletionCallback>>,
}

/// 模拟引擎；克隆共享同一个实例，便于测试在交给控制器后继续观察
#[derive(Clone)]
pub struct SimulatedEngine {
    inner: Arc<SimInner>,
}

impl SimState {
    fn position(&self, duration_ms: u32) -> u32 {
        if !self.playing {
            return self.base_ms;
        }
        let advanced = self.anchor.elapsed().as_secs_f64() * 1000.0 * self.speed;
        let position = f64::from(self.base_ms) + advanced;
        position.min(f64::from(duration_ms)) as u32
    }

    fn cancel_timer(&mut self) {
        self.generation += 1;
        self.timer_cancel = None;
    }
}

impl SimulatedEngine {
    pub fn new(duration_ms: u32) -> Self {
        Self {
            inner: Arc::new(SimInner {
                duration_ms,
                state: Mutex::new(SimState {
                    source: None,
                    prepared: false,
                    released: false,
                    playing: false,
                    base_ms: 0,
                    anchor: Instant::now(),
                    speed: 1.0,
                    generation: 0,
                    timer_cancel: None,
                    failures: FailurePlan::default(),
                    calls: Vec::new(),
                }),
                on_completion: Mutex::new(None),
            }),
        }
    }

    /// 播放速度倍率（> 0）
    pub fn with_speed(self, speed: f64) -> Self {
        self.lock().speed = speed.max(f64::EPSILON);
        self
    }

    pub fn with_failures(self, failures: FailurePlan) -> Self {
        self.set_failures(failures);
        self
    }

    pub fn set_failures(&self, failures: FailurePlan) {
        self.lock().failures = failures;
    }

    /// 交给控制器的工厂，内部共享同一个实例
    pub fn factory(&self) -> EngineFactory {
        let engine = self.clone();
        Box::new(move || Ok(Box::new(engine) as Box<dyn AudioEngine>))
    }

    /// 到目前为止的调用记录
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn position(&self) -> u32 {
        self.lock().position(self.inner.duration_ms)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: EngineCall) -> std::sync::MutexGuard<'_, SimState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    fn arm_timer(&self, state: &mut SimState) -> Result<(), EngineError> {
        state.cancel_timer();

        let remaining_ms = self.inner.duration_ms.saturating_sub(state.base_ms);
        let wait = Duration::from_secs_f64(f64::from(remaining_ms) / 1000.0 / state.speed);
        let generation = state.generation;
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let inner: Weak<SimInner> = Arc::downgrade(&self.inner);

        thread::Builder::new()
            .name("chime-sim-timer".to_string())
            .spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {}
                    recv(after(wait)) -> _ => {
                        if let Some(inner) = inner.upgrade() {
                            complete(&inner, generation);
                        }
                    }
                }
            })?;

        state.timer_cancel = Some(cancel_tx);
        Ok(())
    }
}

fn complete(inner: &SimInner, generation: u64) {
    {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation || !state.playing {
            return;
        }
        state.playing = false;
        state.base_ms = inner.duration_ms;
        state.timer_cancel = None;
    }

    // 回调在计时线程上触发，和真实设备一样不持有引擎锁
    let callback = inner
        .on_completion
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(callback) = callback.as_ref() {
        callback();
    }
}

fn check(failed: bool, op: &str) -> Result<(), EngineError> {
    if failed {
        Err(EngineError::Other(format!("simulated {} failure", op)))
    } else {
        Ok(())
    }
}

impl AudioEngine for SimulatedEngine {
    fn set_source(&mut self, source: &MediaSource) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::SetSource);
        if state.released {
            return Err(EngineError::Released);
        }
        check(state.failures.set_source, "setSource")?;
        state.source = Some(source.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::Prepare);
        if state.released {
            return Err(EngineError::Released);
        }
        if state.source.is_none() {
            return Err(EngineError::NoSource);
        }
        check(state.failures.prepare, "prepare")?;
        state.prepared = true;
        state.base_ms = 0;
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::Start);
        if !state.prepared {
            return Err(EngineError::NotPrepared);
        }
        check(state.failures.start, "start")?;
        if state.playing {
            return Ok(());
        }
        state.anchor = Instant::now();
        state.playing = true;
        self.arm_timer(&mut state)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::Pause);
        if !state.prepared {
            return Err(EngineError::NotPrepared);
        }
        check(state.failures.pause, "pause")?;
        if state.playing {
            state.base_ms = state.position(self.inner.duration_ms);
            state.playing = false;
            state.cancel_timer();
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::Reset);
        if state.released {
            return Err(EngineError::Released);
        }
        check(state.failures.reset, "reset")?;
        state.cancel_timer();
        state.playing = false;
        state.prepared = false;
        state.source = None;
        state.base_ms = 0;
        Ok(())
    }

    fn seek_to(&mut self, position_ms: u32) -> Result<(), EngineError> {
        let mut state = self.record(EngineCall::SeekTo(position_ms));
        if !state.prepared {
            return Err(EngineError::NotPrepared);
        }
        check(state.failures.seek, "seek")?;
        state.base_ms = position_ms.min(self.inner.duration_ms);
        state.anchor = Instant::now();
        if state.playing {
            self.arm_timer(&mut state)?;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn current_position(&self) -> u32 {
        self.position()
    }

    fn duration(&self) -> u32 {
        if self.lock().prepared {
            self.inner.duration_ms
        } else {
            0
        }
    }

    fn set_on_completion(&mut self, callback: CompletionCallback) {
        let mut slot = self
            .inner
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(callback);
    }

    fn release(&mut self) {
        {
            let mut state = self.record(EngineCall::Release);
            state.cancel_timer();
            state.playing = false;
            state.prepared = false;
            state.released = true;
            state.source = None;
        }
        let mut slot = self
            .inner
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn prepared(duration_ms: u32, speed: f64) -> SimulatedEngine {
        let mut engine = SimulatedEngine::new(duration_ms).with_speed(speed);
        engine.set_source(&MediaSource::embedded("sim", Vec::new())).unwrap();
        engine.prepare().unwrap();
        engine
    }

    #[test]
    fn test_prepare_requires_source() {
        let mut engine = SimulatedEngine::new(1000);
        assert!(matches!(engine.prepare(), Err(EngineError::NoSource)));
        assert_eq!(engine.duration(), 0);
    }

    #[test]
    fn test_position_advances_only_while_playing() {
        let mut engine = prepared(60_000, 10.0);
        assert_eq!(engine.current_position(), 0);

        engine.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.pause().unwrap();
        let paused_at = engine.current_position();
        assert!(paused_at >= 400, "position {}", paused_at);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(engine.current_position(), paused_at);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let mut engine = prepared(5_000, 1.0);
        engine.seek_to(9_000).unwrap();
        assert_eq!(engine.current_position(), 5_000);
        assert_eq!(engine.calls().last(), Some(&EngineCall::SeekTo(9_000)));
    }

    #[test]
    fn test_completion_fires_once() {
        let mut engine = prepared(1_000, 20.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        engine.set_on_completion(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        engine.start().unwrap();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!engine.is_playing());
        assert_eq!(engine.current_position(), 1_000);
    }

    #[test]
    fn test_pause_cancels_completion() {
        let mut engine = prepared(1_000, 10.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        engine.set_on_completion(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        engine.start().unwrap();
        engine.pause().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_injected_failure() {
        let mut engine = prepared(1_000, 1.0).with_failures(FailurePlan {
            start: true,
            ..Default::default()
        });
        assert!(engine.start().is_err());
        assert!(!engine.is_playing());
    }
}
