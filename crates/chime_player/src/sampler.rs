//! 周期性位置采样
//!
//! 每次 `start` 启动一个 `chime-sampler` 线程：立即采样一次，之后每个周期采样一次，
//! 引擎报告正在播放时发布 `Position(p)`。`stop` 会 join 该线程，返回后不会再有
//! 这一轮的位置事件。

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

use crate::{PlayerBus, SharedEngine, TelemetryEvent};

struct SamplerRun {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub(crate) struct PositionSampler {
    bus: Arc<PlayerBus>,
    period: Duration,
    run: Option<SamplerRun>,
    active: Arc<AtomicBool>,
}

impl PositionSampler {
    pub(crate) fn new(bus: Arc<PlayerBus>, period: Duration) -> Self {
        Self {
            bus,
            period,
            run: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 与控制器共享的运行标志
    pub(crate) fn active(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    pub(crate) fn start(&mut self, engine: &SharedEngine) -> io::Result<()> {
        if self.run.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded(1);
        let engine = engine.clone();
        let bus = Arc::clone(&self.bus);
        let period = self.period;

        let handle = thread::Builder::new()
            .name("chime-sampler".to_string())
            .spawn(move || run_sampler(engine, bus, period, stop_rx))?;

        self.run = Some(SamplerRun { stop_tx, handle });
        self.active.store(true, Ordering::Release);
        log::debug!("Position sampler started ({:?})", self.period);
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        let _ = run.stop_tx.send(());
        if run.handle.join().is_err() {
            log::error!("Position sampler panicked");
        }
        self.active.store(false, Ordering::Release);
        log::debug!("Position sampler stopped");
    }
}

impl Drop for PositionSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sampler(engine: SharedEngine, bus: Arc<PlayerBus>, period: Duration, stop_rx: Receiver<()>) {
    let ticker = tick(period);

    loop {
        if let Some(position) = engine.sample() {
            // 采样期间收到 stop 就丢弃这一次
            if !stop_rx.is_empty() {
                break;
            }
            bus.publish(TelemetryEvent::Position(position).into());
        }

        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioEngine, MediaSource, PlayerEvent, SimulatedEngine};
    use chime_bus::{HandlerError, ThreadMode};
    use crossbeam_channel::unbounded;

    fn playing_engine() -> (SimulatedEngine, SharedEngine) {
        let mut sim = SimulatedEngine::new(60_000);
        sim.set_source(&MediaSource::embedded("tone", Vec::new())).unwrap();
        sim.prepare().unwrap();
        sim.start().unwrap();
        let shared = SharedEngine::new(Box::new(sim.clone()));
        (sim, shared)
    }

    fn position_feed(bus: &PlayerBus) -> Receiver<u32> {
        let (tx, rx) = unbounded();
        bus.subscribe_fn(
            move |event: &PlayerEvent| {
                if let PlayerEvent::Telemetry(TelemetryEvent::Position(p)) = event {
                    tx.send(*p).map_err(|e| HandlerError(e.to_string()))?;
                }
                Ok(())
            },
            ThreadMode::Background,
        )
        .unwrap();
        rx
    }

    #[test]
    fn test_ticks_immediately_then_periodically() {
        let bus = Arc::new(PlayerBus::new());
        let positions = position_feed(&bus);
        let (_sim, engine) = playing_engine();

        let mut sampler = PositionSampler::new(Arc::clone(&bus), Duration::from_millis(800));
        sampler.start(&engine).unwrap();
        assert!(sampler.active().load(Ordering::Acquire));

        // 第一次采样不等周期
        let first = positions.recv_timeout(Duration::from_millis(400)).unwrap();
        let second = positions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second >= first);
        sampler.stop();
    }

    #[test]
    fn test_no_positions_after_stop() {
        let bus = Arc::new(PlayerBus::new());
        let positions = position_feed(&bus);
        let (_sim, engine) = playing_engine();

        let mut sampler = PositionSampler::new(Arc::clone(&bus), Duration::from_millis(5));
        sampler.start(&engine).unwrap();
        thread::sleep(Duration::from_millis(30));
        sampler.stop();
        assert!(!sampler.active().load(Ordering::Acquire));

        // 排空 stop 之前已发布的事件
        thread::sleep(Duration::from_millis(50));
        while positions.try_recv().is_ok() {}

        thread::sleep(Duration::from_millis(50));
        assert!(positions.try_recv().is_err());
    }

    #[test]
    fn test_silent_while_engine_paused() {
        let bus = Arc::new(PlayerBus::new());
        let positions = position_feed(&bus);
        let (mut sim, engine) = playing_engine();
        sim.pause().unwrap();

        let mut sampler = PositionSampler::new(Arc::clone(&bus), Duration::from_millis(5));
        sampler.start(&engine).unwrap();
        thread::sleep(Duration::from_millis(40));
        sampler.stop();

        assert!(positions.try_recv().is_err());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let bus = Arc::new(PlayerBus::new());
        let (_sim, engine) = playing_engine();
        let mut sampler = PositionSampler::new(bus, Duration::from_millis(10));

        let active = sampler.active();

        sampler.stop();
        sampler.start(&engine).unwrap();
        sampler.start(&engine).unwrap();
        assert!(active.load(Ordering::Acquire));
        sampler.stop();
        sampler.stop();
        assert!(!active.load(Ordering::Acquire));
    }
}
