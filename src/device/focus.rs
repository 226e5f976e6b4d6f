//! Directional focus navigation for D-pad driven (TV) form factors.
//!
//! Walks focus toward a target element one key press at a time, re-resolving
//! both the focused and the target element between presses since either may
//! move as focus changes.
use rand::Rng;

use crate::agent::actions::{AgentAction, KeyCode};
use crate::device::Device;
use crate::errors::{PilotError, PilotResult};
use crate::perception::element::ElementIdentifier;
use crate::perception::tree::Rect;

const MAX_FOCUS_MOVES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn key(self) -> KeyCode {
        match self {
            Direction::Up => KeyCode::DpadUp,
            Direction::Down => KeyCode::DpadDown,
            Direction::Left => KeyCode::DpadLeft,
            Direction::Right => KeyCode::DpadRight,
        }
    }
}

/// Moves focus until the focused element's bounds overlap the target's on
/// both axes. Fails when the target disappears from the hierarchy or the
/// move budget runs out.
pub async fn move_focus_to_element(
    device: &dyn Device,
    target: &ElementIdentifier,
) -> PilotResult<()> {
    for moves in 0..=MAX_FOCUS_MOVES {
        let list = device.element_list().await?;
        let target_element = list.find(target).ok_or_else(|| {
            PilotError::Perception(format!(
                "focus target {}#{} no longer present in hierarchy",
                target.fingerprint, target.occurrence
            ))
        })?;
        let focused = list
            .focused()
            .ok_or_else(|| PilotError::Device("no focused element on screen".into()))?;

        if focused.bounds.intersects(&target_element.bounds) {
            tracing::debug!(moves, "focus reached target");
            return Ok(());
        }
        if moves == MAX_FOCUS_MOVES {
            break;
        }

        let direction = {
            let mut rng = rand::thread_rng();
            choose_direction(&focused.bounds, &target_element.bounds, &mut rng)
        };
        tracing::debug!(?direction, moves, "stepping focus");
        device
            .execute_actions(&[AgentAction::PressKey {
                key: direction.key(),
            }])
            .await?;
        device.wait_for_settle().await?;
    }
    Err(PilotError::Agent(format!(
        "focus navigation did not reach target within {MAX_FOCUS_MOVES} moves"
    )))
}

/// Direction heuristic: prefer the axis the boxes already share, otherwise
/// pick one of the two diagonal candidates at random.
pub(crate) fn choose_direction<R: Rng>(from: &Rect, to: &Rect, rng: &mut R) -> Direction {
    let vertical = if to.center_y() < from.center_y() {
        Direction::Up
    } else {
        Direction::Down
    };
    let horizontal = if to.center_x() < from.center_x() {
        Direction::Left
    } else {
        Direction::Right
    };

    if from.overlaps_horizontally(to) {
        vertical
    } else if from.overlaps_vertically(to) {
        horizontal
    } else if rng.gen_bool(0.5) {
        vertical
    } else {
        horizontal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn x_overlap_prefers_vertical() {
        let from = Rect::new(0, 500, 100, 600);
        let above = Rect::new(20, 100, 80, 200);
        let below = Rect::new(20, 900, 80, 1000);
        assert_eq!(choose_direction(&from, &above, &mut rng()), Direction::Up);
        assert_eq!(choose_direction(&from, &below, &mut rng()), Direction::Down);
    }

    #[test]
    fn y_overlap_prefers_horizontal() {
        let from = Rect::new(500, 0, 600, 100);
        let left = Rect::new(100, 20, 200, 80);
        let right = Rect::new(900, 20, 1000, 80);
        assert_eq!(choose_direction(&from, &left, &mut rng()), Direction::Left);
        assert_eq!(
            choose_direction(&from, &right, &mut rng()),
            Direction::Right
        );
    }

    #[test]
    fn diagonal_picks_one_of_the_two_candidates() {
        let from = Rect::new(0, 0, 100, 100);
        let to = Rect::new(500, 500, 600, 600);
        let mut r = rng();
        for _ in 0..20 {
            let d = choose_direction(&from, &to, &mut r);
            assert!(d == Direction::Down || d == Direction::Right);
        }
    }
}
