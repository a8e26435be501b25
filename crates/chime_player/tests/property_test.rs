//! 属性测试：随机意图序列下的不变量

use std::sync::Arc;
use std::time::Duration;

use chime_player::{
    Controller, HandlerError, IntentEvent, LogBuffer, MediaSource, PlayerBus, PlayerConfig,
    PlayerEvent, PlayerState, SimulatedEngine, TelemetryEvent, ThreadMode,
};
use crossbeam_channel::{unbounded, Receiver};
use proptest::prelude::*;

const DURATION_MS: u32 = 600_000;

// ===== Helpers =====

/// 不含 Start/StopPositionUpdates 的播放意图
fn playback_intent() -> impl Strategy<Value = IntentEvent> {
    prop_oneof![
        Just(IntentEvent::StartPlayback),
        Just(IntentEvent::PausePlayback),
        Just(IntentEvent::ResetPlayback),
        (0u32..DURATION_MS + 5_000).prop_map(IntentEvent::SeekTo),
    ]
}

fn any_intent() -> impl Strategy<Value = IntentEvent> {
    prop_oneof![
        playback_intent(),
        Just(IntentEvent::StartPositionUpdates),
        Just(IntentEvent::StopPositionUpdates),
    ]
}

fn controller(engine: &SimulatedEngine) -> (Controller, Receiver<TelemetryEvent>) {
    let bus = Arc::new(PlayerBus::new());
    let (tx, rx) = unbounded();
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

    let mut controller = Controller::new(
        bus,
        MediaSource::embedded("tone.ogg", Vec::new()),
        engine.factory(),
        &PlayerConfig::default(),
    )
    .unwrap();
    controller.create().unwrap();
    (controller, rx)
}

// ===== Property Tests =====

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// 采样器运行 ⇔ Playing
    #[test]
    fn sampler_runs_iff_playing(intents in prop::collection::vec(playback_intent(), 1..12)) {
        let engine = SimulatedEngine::new(DURATION_MS);
        let (mut controller, _telemetry) = controller(&engine);

        for intent in intents {
            controller.send(intent);
            controller.sync();
            let playing = controller.state() == PlayerState::Playing;
            prop_assert_eq!(controller.sampler_active(), playing, "after {:?}", intent);
        }

        controller.release();
        prop_assert!(!controller.sampler_active());
    }

    /// 非播放状态下 seek 后引擎位置等于截断后的目标
    #[test]
    fn seek_reaches_requested_position(
        intents in prop::collection::vec(playback_intent(), 0..8),
        target in 0u32..DURATION_MS + 5_000,
    ) {
        let engine = SimulatedEngine::new(DURATION_MS);
        let (controller, _telemetry) = controller(&engine);

        for intent in intents {
            controller.send(intent);
        }
        controller.pause();
        controller.seek_to(target);
        controller.sync();

        if controller.state() != PlayerState::Playing {
            prop_assert_eq!(engine.position(), target.min(DURATION_MS));
        }
    }

    /// Released 之后不再有任何遥测
    #[test]
    fn no_telemetry_after_release(
        before in prop::collection::vec(any_intent(), 0..8),
        after in prop::collection::vec(any_intent(), 1..8),
    ) {
        let engine = SimulatedEngine::new(DURATION_MS);
        let (mut controller, telemetry) = controller(&engine);

        for intent in before {
            controller.send(intent);
        }
        controller.release();
        let bus = Arc::clone(controller.bus());

        let mut last = None;
        while let Ok(event) = telemetry.recv_timeout(Duration::from_millis(100)) {
            if !matches!(event, TelemetryEvent::LogUpdated(_)) {
                last = Some(event);
            }
        }
        prop_assert_eq!(last, Some(TelemetryEvent::StateChanged(PlayerState::Released)));

        let calls = engine.calls();
        for intent in after {
            bus.publish(intent.into());
            controller.send(intent);
        }
        prop_assert!(telemetry.recv_timeout(Duration::from_millis(50)).is_err());
        prop_assert_eq!(engine.calls(), calls);
    }

    /// 日志文本是完整的带编号历史
    #[test]
    fn log_text_is_numbered_history(messages in prop::collection::vec("[a-zA-Z(){}. ]{1,24}", 1..20)) {
        let mut log = LogBuffer::new();
        let mut text = String::new();
        for message in &messages {
            text = log.push(message.as_str());
        }

        let expected: Vec<String> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{} - {}", i, m))
            .collect();
        prop_assert_eq!(text, expected.join("\n"));
    }
}
