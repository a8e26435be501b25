//! 播放控制器
//!
//! 控制器拥有一个 `chime-controller` 工作线程，所有状态和引擎的修改都在这个
//! 线程上串行执行。意图从总线的后台线程转发进来，引擎的结束回调也只是往
//! 工作线程投递任务，不直接改状态。
//!
//! ```text
//! UI ──Intent──▶ EventBus ──▶ forwarder ──▶ chime-controller ──▶ AudioEngine
//!  ▲                                             │
//!  └──────────── Telemetry ◀── EventBus ◀────────┘◀── chime-sampler
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chime_bus::{BusError, SubscriberId, ThreadMode};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::sampler::PositionSampler;
use crate::state::StateCell;
use crate::{
    EngineError, EngineFactory, IllegalTransition, IntentEvent, LogBuffer, MediaSource,
    PlayerBus, PlayerConfig, PlayerEvent, PlayerState, SharedEngine, TelemetryEvent, Transition,
};

/// 控制器错误
#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("Failed to spawn controller worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Controller worker is gone")]
    WorkerGone,
    #[error("Controller has been released")]
    Released,
}

/// 工作线程任务
enum ControllerTask {
    Create(Sender<Result<(), EngineError>>),
    Intent(IntentEvent),
    EngineCompleted,
    /// 处理完之前的任务后应答
    Sync(Sender<()>),
    Release(Sender<()>),
}

/// 播放控制器
pub struct Controller {
    bus: Arc<PlayerBus>,
    tasks: Sender<ControllerTask>,
    worker: Option<JoinHandle<()>>,
    subscription: Option<SubscriberId>,
    state: StateCell,
    sampler_active: Arc<AtomicBool>,
    released: bool,
}

impl Controller {
    /// 启动工作线程；引擎在 [`Controller::create`] 时才分配
    pub fn new(
        bus: Arc<PlayerBus>,
        source: MediaSource,
        factory: EngineFactory,
        config: &PlayerConfig,
    ) -> Result<Self, ControllerError> {
        let (tasks, task_rx) = unbounded();
        let state = StateCell::default();
        let sampler = PositionSampler::new(Arc::clone(&bus), config.sampler_period());
        let sampler_active = sampler.active();

        let worker = Worker {
            bus: Arc::clone(&bus),
            source,
            factory: Some(factory),
            engine: None,
            sampler,
            state: PlayerState::Idle,
            cell: state.clone(),
            log: LogBuffer::new(),
            duration_ms: 0,
            tasks: tasks.clone(),
        };

        let handle = thread::Builder::new()
            .name("chime-controller".to_string())
            .spawn(move || worker.run(task_rx))?;

        Ok(Self {
            bus,
            tasks,
            worker: Some(handle),
            subscription: None,
            state,
            sampler_active,
            released: false,
        })
    }

    /// 订阅意图，分配引擎并加载音源
    ///
    /// 加载失败不算错误：控制器停在 `Initialized`，失败写进日志。
    pub fn create(&mut self) -> Result<(), ControllerError> {
        if self.released {
            return Err(ControllerError::Released);
        }

        if self.subscription.is_none() {
            let forward = self.tasks.clone();
            let id = self.bus.subscribe_fn(
                move |event: &PlayerEvent| {
                    if let PlayerEvent::Intent(intent) = event {
                        // 工作线程退出后直接丢弃
                        let _ = forward.send(ControllerTask::Intent(*intent));
                    }
                    Ok(())
                },
                ThreadMode::Background,
            )?;
            self.subscription = Some(id);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.tasks
            .send(ControllerTask::Create(reply_tx))
            .map_err(|_| ControllerError::WorkerGone)?;
        reply_rx.recv().map_err(|_| ControllerError::WorkerGone)??;
        Ok(())
    }

    /// 直接向工作线程投递意图（不经过总线）
    pub fn send(&self, intent: IntentEvent) {
        let _ = self.tasks.send(ControllerTask::Intent(intent));
    }

    pub fn play(&self) {
        self.send(IntentEvent::StartPlayback);
    }

    pub fn pause(&self) {
        self.send(IntentEvent::PausePlayback);
    }

    pub fn reset(&self) {
        self.send(IntentEvent::ResetPlayback);
    }

    pub fn seek_to(&self, position_ms: u32) {
        self.send(IntentEvent::SeekTo(position_ms));
    }

    pub fn start_position_updates(&self) {
        self.send(IntentEvent::StartPositionUpdates);
    }

    pub fn stop_position_updates(&self) {
        self.send(IntentEvent::StopPositionUpdates);
    }

    pub fn state(&self) -> PlayerState {
        self.state.get()
    }

    pub fn sampler_active(&self) -> bool {
        self.sampler_active.load(Ordering::Acquire)
    }

    pub fn bus(&self) -> &Arc<PlayerBus> {
        &self.bus
    }

    /// 等待工作线程处理完此前投递的所有任务
    pub fn sync(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tasks.send(ControllerTask::Sync(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// 同步释放：取消订阅、停止采样、释放引擎并回收工作线程。可重复调用。
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe_id(id);
        }

        let (ack_tx, ack_rx) = bounded(1);
        if self.tasks.send(ControllerTask::Release(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Controller worker panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// 工作线程
// ============================================================================

struct Worker {
    bus: Arc<PlayerBus>,
    source: MediaSource,
    factory: Option<EngineFactory>,
    engine: Option<SharedEngine>,
    sampler: PositionSampler,
    state: PlayerState,
    cell: StateCell,
    log: LogBuffer,
    duration_ms: u32,
    /// 给引擎结束回调用
    tasks: Sender<ControllerTask>,
}

impl Worker {
    fn run(mut self, task_rx: Receiver<ControllerTask>) {
        for task in task_rx.iter() {
            match task {
                ControllerTask::Create(reply) => {
                    let _ = reply.send(self.on_create());
                }
                ControllerTask::Intent(intent) => self.on_intent(intent),
                ControllerTask::EngineCompleted => self.on_completed(),
                ControllerTask::Sync(ack) => {
                    let _ = ack.send(());
                }
                ControllerTask::Release(ack) => {
                    self.on_release();
                    let _ = ack.send(());
                    break;
                }
            }
        }
        log::debug!("Controller worker exiting");
    }

    fn publish(&self, telemetry: TelemetryEvent) {
        self.bus.publish(telemetry.into());
    }

    fn log(&mut self, message: impl Into<String>) {
        let text = self.log.push(message);
        self.publish(TelemetryEvent::LogUpdated(text));
    }

    fn set_state(&mut self, next: PlayerState) {
        self.state = next;
        self.cell.set(next);
        self.publish(TelemetryEvent::StateChanged(next));
    }

    /// 校验迁移；非法时记录并返回 `None`
    fn check(&mut self, transition: Transition) -> Option<PlayerState> {
        match self.state.apply(transition) {
            Ok(next) => Some(next),
            Err(e) => {
                self.reject(e);
                None
            }
        }
    }

    fn reject(&mut self, e: IllegalTransition) {
        log::info!("Ignored: {}", e);
        self.log(e.to_string());
    }

    fn engine_failed(&mut self, operation: &str, e: EngineError) {
        log::warn!("{} failed: {}", operation, e);
        self.log(format!("{} failed: {}", operation, e));
    }

    fn start_sampler(&mut self, engine: &SharedEngine) {
        if let Err(e) = self.sampler.start(engine) {
            log::error!("Failed to start position sampler: {}", e);
            self.log(format!("position updates failed: {}", e));
        }
    }

    fn on_create(&mut self) -> Result<(), EngineError> {
        let Some(next) = self.check(Transition::Create) else {
            return Ok(());
        };
        let factory = self
            .factory
            .take()
            .ok_or_else(|| EngineError::Other("engine factory already used".to_string()))?;
        let engine = SharedEngine::new(factory()?);

        let tasks = self.tasks.clone();
        engine.call(|e| {
            e.set_on_completion(Box::new(move || {
                let _ = tasks.send(ControllerTask::EngineCompleted);
            }))
        });
        self.engine = Some(engine.clone());

        self.set_state(next);
        self.log("create() engine allocated");

        if self.load(&engine) {
            self.init_seekbar(&engine);
            self.loaded(next);
        }
        Ok(())
    }

    /// 加载成功：经 `Load` 迁移到 Prepared
    fn loaded(&mut self, from: PlayerState) {
        match from.apply(Transition::Load) {
            Ok(next) => self.set_state(next),
            Err(e) => self.reject(e),
        }
    }

    /// setSource + prepare；失败时写日志并返回 false
    fn load(&mut self, engine: &SharedEngine) -> bool {
        self.log("load() {1. setDataSource}");
        let source = self.source.clone();
        if let Err(e) = engine.call(|e| e.set_source(&source)) {
            self.engine_failed("setDataSource", e);
            return false;
        }

        self.log("load() {2. prepare}");
        if let Err(e) = engine.call(|e| e.prepare()) {
            self.engine_failed("prepare", e);
            return false;
        }
        true
    }

    fn init_seekbar(&mut self, engine: &SharedEngine) {
        let duration_ms = engine.call(|e| e.duration());
        self.duration_ms = duration_ms;
        self.publish(TelemetryEvent::Duration(duration_ms));
        self.log(format!("setting seekbar max {} sec", duration_ms / 1000));
    }

    fn on_intent(&mut self, intent: IntentEvent) {
        match intent {
            IntentEvent::StartPlayback => self.play(),
            IntentEvent::PausePlayback => self.pause(),
            IntentEvent::ResetPlayback => self.reset(),
            IntentEvent::SeekTo(position_ms) => self.seek_to(position_ms),
            IntentEvent::StartPositionUpdates => {
                if self.state != PlayerState::Playing {
                    log::debug!("Position updates requested in state {}", self.state);
                    return;
                }
                if let Some(engine) = self.engine.clone() {
                    self.start_sampler(&engine);
                }
            }
            IntentEvent::StopPositionUpdates => self.sampler.stop(),
        }
    }

    fn play(&mut self) {
        let from = self.state;
        let Some(next) = self.check(Transition::Play) else {
            return;
        };
        let Some(engine) = self.engine.clone() else {
            return;
        };

        if from == PlayerState::Completed {
            if let Err(e) = engine.call(|e| e.seek_to(0)) {
                self.engine_failed("seekTo", e);
                return;
            }
        }
        if let Err(e) = engine.call(|e| e.start()) {
            self.engine_failed("start", e);
            return;
        }

        self.log(format!("start() {}", self.source.name()));
        self.set_state(next);
        self.start_sampler(&engine);
    }

    fn pause(&mut self) {
        let next = match self.state.apply(Transition::Pause) {
            Ok(next) => next,
            Err(e) => {
                self.publish(TelemetryEvent::Notice("Can't pause if not playing".to_string()));
                self.reject(e);
                return;
            }
        };
        let Some(engine) = self.engine.clone() else {
            return;
        };

        if let Err(e) = engine.call(|e| e.pause()) {
            self.engine_failed("pause", e);
            return;
        }

        self.sampler.stop();
        self.log("pause()");
        self.set_state(next);
    }

    fn reset(&mut self) {
        let Some(reset) = self.check(Transition::Reset) else {
            return;
        };
        let Some(engine) = self.engine.clone() else {
            return;
        };

        self.log("reset()");
        // 引擎重置失败时保持原状态，采样继续
        if let Err(e) = engine.call(|e| e.reset()) {
            self.engine_failed("reset", e);
            return;
        }
        self.sampler.stop();
        self.publish(TelemetryEvent::Position(0));

        if self.load(&engine) {
            self.init_seekbar(&engine);
            self.loaded(reset);
        } else {
            // 引擎已重置但未准备好
            self.duration_ms = 0;
            self.set_state(reset);
        }
    }

    fn seek_to(&mut self, position_ms: u32) {
        if self.check(Transition::Seek).is_none() {
            return;
        }
        let Some(engine) = self.engine.clone() else {
            return;
        };

        let target = position_ms.min(self.duration_ms);
        self.log(format!("seekTo() {} ms", target));
        if let Err(e) = engine.call(|e| e.seek_to(target)) {
            self.engine_failed("seekTo", e);
        }
    }

    fn on_completed(&mut self) {
        let Ok(next) = self.state.apply(Transition::Complete) else {
            log::info!("Ignored engine completion in state {}", self.state);
            return;
        };

        self.sampler.stop();
        self.log("playback completed");
        self.publish(TelemetryEvent::Completed);
        self.publish(TelemetryEvent::Position(0));
        self.set_state(next);
    }

    fn on_release(&mut self) {
        let Ok(next) = self.state.apply(Transition::Release) else {
            return;
        };

        self.sampler.stop();
        if let Some(engine) = self.engine.take() {
            engine.call(|e| e.release());
        }
        self.log("release()");
        self.set_state(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{EngineCall, FailurePlan, SimulatedEngine};
    use chime_bus::HandlerError;
    use std::time::Duration;

    struct Harness {
        controller: Controller,
        engine: SimulatedEngine,
        telemetry: Receiver<TelemetryEvent>,
    }

    fn harness(engine: SimulatedEngine) -> Harness {
        let bus = Arc::new(PlayerBus::new());
        let (tx, telemetry) = unbounded();
        bus.subscribe_fn(
            move |event: &PlayerEvent| {
                if let PlayerEvent::Telemetry(t) = event {
                    tx.send(t.clone()).map_err(|e| HandlerError(e.to_string()))?;
                }
                Ok(())
            },
            ThreadMode::Background,
        )
        .unwrap();

        let controller = Controller::new(
            bus,
            MediaSource::embedded("tone.ogg", Vec::new()),
            engine.factory(),
            &PlayerConfig::default(),
        )
        .unwrap();

        Harness {
            controller,
            engine,
            telemetry,
        }
    }

    impl Harness {
        fn drain(&self) -> Vec<TelemetryEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.telemetry.recv_timeout(Duration::from_millis(100)) {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn test_create_loads_and_announces_duration() {
        let mut h = harness(SimulatedEngine::new(30_000));
        h.controller.create().unwrap();
        assert_eq!(h.controller.state(), PlayerState::Prepared);

        let events = h.drain();
        let duration = events
            .iter()
            .position(|e| *e == TelemetryEvent::Duration(30_000))
            .unwrap();
        let prepared = events
            .iter()
            .position(|e| *e == TelemetryEvent::StateChanged(PlayerState::Prepared))
            .unwrap();
        assert!(duration < prepared);
        assert_eq!(
            h.engine.calls(),
            vec![EngineCall::SetSource, EngineCall::Prepare]
        );
    }

    #[test]
    fn test_prepare_failure_stays_initialized() {
        let engine = SimulatedEngine::new(30_000).with_failures(FailurePlan {
            prepare: true,
            ..Default::default()
        });
        let mut h = harness(engine);
        h.controller.create().unwrap();
        assert_eq!(h.controller.state(), PlayerState::Initialized);

        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            TelemetryEvent::LogUpdated(text) if text.ends_with("prepare failed: simulated prepare failure")
        )));
    }

    #[test]
    fn test_play_pause_drive_sampler() {
        let mut h = harness(SimulatedEngine::new(60_000));
        h.controller.create().unwrap();

        h.controller.play();
        h.controller.sync();
        assert_eq!(h.controller.state(), PlayerState::Playing);
        assert!(h.controller.sampler_active());

        h.controller.pause();
        h.controller.sync();
        assert_eq!(h.controller.state(), PlayerState::Paused);
        assert!(!h.controller.sampler_active());
    }

    #[test]
    fn test_start_failure_keeps_state() {
        let engine = SimulatedEngine::new(60_000);
        let mut h = harness(engine.clone());
        h.controller.create().unwrap();

        engine.set_failures(FailurePlan {
            start: true,
            ..Default::default()
        });
        h.controller.play();
        h.controller.sync();

        assert_eq!(h.controller.state(), PlayerState::Prepared);
        assert!(!h.controller.sampler_active());
    }

    #[test]
    fn test_reset_failure_keeps_playing() {
        let engine = SimulatedEngine::new(60_000);
        let mut h = harness(engine.clone());
        h.controller.create().unwrap();
        h.controller.seek_to(10_000);
        h.controller.play();
        h.controller.sync();
        std::thread::sleep(Duration::from_millis(150));
        while h.telemetry.try_recv().is_ok() {}

        engine.set_failures(FailurePlan {
            reset: true,
            ..Default::default()
        });
        h.controller.reset();
        h.controller.sync();
        std::thread::sleep(Duration::from_millis(250));

        assert_eq!(h.controller.state(), PlayerState::Playing);
        assert!(h.controller.sampler_active());

        let events: Vec<_> = h.telemetry.try_iter().collect();
        assert!(!events.contains(&TelemetryEvent::Position(0)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TelemetryEvent::StateChanged(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, TelemetryEvent::Position(p) if *p >= 10_000)));
        assert!(events.iter().any(|e| matches!(
            e,
            TelemetryEvent::LogUpdated(text) if text.ends_with("reset failed: simulated reset failure")
        )));
        assert_eq!(
            h.engine.calls().iter().filter(|c| **c == EngineCall::Prepare).count(),
            1
        );
    }

    #[test]
    fn test_reset_reload_failure_lands_in_initialized() {
        let engine = SimulatedEngine::new(60_000);
        let mut h = harness(engine.clone());
        h.controller.create().unwrap();
        h.controller.play();
        h.controller.sync();

        engine.set_failures(FailurePlan {
            prepare: true,
            ..Default::default()
        });
        h.controller.reset();
        h.controller.sync();

        assert_eq!(h.controller.state(), PlayerState::Initialized);
        assert!(!h.controller.sampler_active());
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let mut h = harness(SimulatedEngine::new(10_000));
        h.controller.create().unwrap();

        h.controller.seek_to(11_000);
        h.controller.sync();
        assert_eq!(h.engine.calls().last(), Some(&EngineCall::SeekTo(10_000)));
    }

    #[test]
    fn test_intents_rejected_before_create() {
        let h = harness(SimulatedEngine::new(10_000));
        h.controller.play();
        h.controller.seek_to(100);
        h.controller.sync();

        assert_eq!(h.controller.state(), PlayerState::Idle);
        assert!(h.engine.calls().is_empty());
    }

    #[test]
    fn test_position_updates_only_while_playing() {
        let mut h = harness(SimulatedEngine::new(60_000));
        h.controller.create().unwrap();

        h.controller.start_position_updates();
        h.controller.sync();
        assert!(!h.controller.sampler_active());

        h.controller.play();
        h.controller.stop_position_updates();
        h.controller.stop_position_updates();
        h.controller.sync();
        assert_eq!(h.controller.state(), PlayerState::Playing);
        assert!(!h.controller.sampler_active());

        h.controller.start_position_updates();
        h.controller.sync();
        assert!(h.controller.sampler_active());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut h = harness(SimulatedEngine::new(60_000));
        h.controller.create().unwrap();
        h.controller.play();

        h.controller.release();
        h.controller.release();
        assert_eq!(h.controller.state(), PlayerState::Released);
        assert!(!h.controller.sampler_active());
        assert_eq!(h.controller.bus().subscriber_count(), 1);
        assert_eq!(
            h.engine.calls().iter().filter(|c| **c == EngineCall::Release).count(),
            1
        );
        assert!(matches!(
            h.controller.create(),
            Err(ControllerError::Released)
        ));
    }
}
