//! 播放状态机

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use strum::{Display, EnumIter, FromRepr};

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum PlayerState {
    #[default]
    Idle,
    Initialized,
    Prepared,
    Playing,
    Paused,
    Completed,
    Released,
}

/// 触发状态迁移的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Transition {
    /// `create()` 分配引擎
    Create,
    /// `load()` 设置音源并 prepare
    Load,
    Play,
    Pause,
    /// 跳转，不改变状态
    Seek,
    /// 引擎播放结束回调
    Complete,
    /// 重置引擎，之后需要重新 `Load`
    Reset,
    Release,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{transition} is not permitted in state {from}")]
pub struct IllegalTransition {
    pub from: PlayerState,
    pub transition: Transition,
}

impl PlayerState {
    /// 唯一的迁移函数
    pub fn apply(self, transition: Transition) -> Result<PlayerState, IllegalTransition> {
        use PlayerState::*;

        let next = match (self, transition) {
            (Released, _) => None,
            (Idle, Transition::Create) => Some(Initialized),
            (Initialized, Transition::Load) => Some(Prepared),
            (Prepared | Paused | Completed, Transition::Play) => Some(Playing),
            (Playing, Transition::Pause) => Some(Paused),
            (Playing, Transition::Complete) => Some(Completed),
            (Prepared | Playing | Paused | Completed, Transition::Seek) => Some(self),
            // Idle 时还没有引擎可以重置
            (Idle, Transition::Reset) => None,
            (_, Transition::Reset) => Some(Initialized),
            (_, Transition::Release) => Some(Released),
            _ => None,
        };

        next.ok_or(IllegalTransition {
            from: self,
            transition,
        })
    }

}

/// 跨线程只读的状态镜像，只由控制器工作线程写入
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn get(&self) -> PlayerState {
        PlayerState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn set(&self, state: PlayerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_permitted_transitions() {
        use PlayerState::*;

        assert_eq!(Idle.apply(Transition::Create), Ok(Initialized));
        assert_eq!(Initialized.apply(Transition::Load), Ok(Prepared));
        assert_eq!(Prepared.apply(Transition::Play), Ok(Playing));
        assert_eq!(Paused.apply(Transition::Play), Ok(Playing));
        assert_eq!(Completed.apply(Transition::Play), Ok(Playing));
        assert_eq!(Playing.apply(Transition::Pause), Ok(Paused));
        assert_eq!(Playing.apply(Transition::Complete), Ok(Completed));
        assert_eq!(Playing.apply(Transition::Reset), Ok(Initialized));
        assert_eq!(Completed.apply(Transition::Reset), Ok(Initialized));
    }

    #[test]
    fn test_rejected_transitions() {
        use PlayerState::*;

        assert!(Playing.apply(Transition::Play).is_err());
        assert!(Paused.apply(Transition::Pause).is_err());
        assert!(Prepared.apply(Transition::Complete).is_err());
        assert!(Idle.apply(Transition::Play).is_err());
        assert!(Idle.apply(Transition::Reset).is_err());

        let err = Paused.apply(Transition::Pause).unwrap_err();
        assert_eq!(err.to_string(), "Pause is not permitted in state Paused");
    }

    #[test]
    fn test_release_is_terminal() {
        for state in PlayerState::iter().filter(|s| *s != PlayerState::Released) {
            assert_eq!(state.apply(Transition::Release), Ok(PlayerState::Released));
        }
        for transition in Transition::iter() {
            assert!(PlayerState::Released.apply(transition).is_err());
        }
    }

    #[test]
    fn test_seek_acceptance() {
        let accepted: Vec<_> = PlayerState::iter()
            .filter(|s| s.apply(Transition::Seek).is_ok())
            .collect();
        assert_eq!(
            accepted,
            vec![
                PlayerState::Prepared,
                PlayerState::Playing,
                PlayerState::Paused,
                PlayerState::Completed
            ]
        );
    }

    #[test]
    fn test_reset_then_load_lands_in_prepared() {
        for state in PlayerState::iter().filter(|s| s.apply(Transition::Reset).is_ok()) {
            let reset = state.apply(Transition::Reset).unwrap();
            assert_eq!(reset.apply(Transition::Load), Ok(PlayerState::Prepared));
        }
    }

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), PlayerState::Idle);
        for state in PlayerState::iter() {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}
