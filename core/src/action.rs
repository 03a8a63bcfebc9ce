//! Drag-and-drop actions and the local policy choosing between them.

use bitflags::bitflags;

/// A single drag-and-drop disposition, valued like the Wayland
/// `wl_data_device_manager.dnd_action` enum.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Action {
    #[default]
    None,
    Copy,
    Move,
    Ask,
}

bitflags! {
    /// A set of [`Action`]s, as carried by `set_actions` and `source_actions`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Actions: u32 {
        const COPY = 1;
        const MOVE = 2;
        const ASK = 4;
    }
}

impl Action {
    #[must_use]
    pub const fn as_set(self) -> Actions {
        match self {
            Self::None => Actions::empty(),
            Self::Copy => Actions::COPY,
            Self::Move => Actions::MOVE,
            Self::Ask => Actions::ASK,
        }
    }

    /// Decodes a single action from its wire value. Unknown or multi-bit
    /// values yield `None`.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::None),
            1 => Some(Self::Copy),
            2 => Some(Self::Move),
            4 => Some(Self::Ask),
            _ => None,
        }
    }
}

/// Surface-local pointer position, in surface coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

/// Picks the action to request while a drag hovers at `position`.
///
/// The surface is split into a 2x2 grid at its midpoints: top-left is
/// [`Action::None`], bottom-left [`Action::Copy`], top-right [`Action::Move`]
/// and bottom-right [`Action::Ask`]. Positions are truncated to whole
/// surface units and a point exactly on a midpoint belongs to the right or
/// bottom half.
#[must_use]
pub fn action_for(position: Position, surface: SurfaceSize) -> Action {
    let right = position.x.floor() >= f64::from(surface.width / 2);
    let bottom = position.y.floor() >= f64::from(surface.height / 2);

    match (right, bottom) {
        (false, false) => Action::None,
        (false, true) => Action::Copy,
        (true, false) => Action::Move,
        (true, true) => Action::Ask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: SurfaceSize = SurfaceSize {
        width: 400,
        height: 400,
    };

    fn at(x: f64, y: f64) -> Action {
        action_for(Position { x, y }, SURFACE)
    }

    #[test]
    fn quadrants() {
        assert_eq!(at(10., 10.), Action::None);
        assert_eq!(at(10., 390.), Action::Copy);
        assert_eq!(at(390., 10.), Action::Move);
        assert_eq!(at(390., 390.), Action::Ask);
    }

    #[test]
    fn midpoint_belongs_to_greater_side() {
        assert_eq!(at(200., 0.), Action::Move);
        assert_eq!(at(0., 200.), Action::Copy);
        assert_eq!(at(200., 200.), Action::Ask);
        assert_eq!(at(199.99, 199.99), Action::None);
    }

    #[test]
    fn deterministic() {
        for _ in 0..3 {
            assert_eq!(at(250.5, 12.25), Action::Move);
        }
    }

    #[test]
    fn odd_sizes_split_at_truncated_midpoint() {
        let surface = SurfaceSize {
            width: 401,
            height: 3,
        };
        assert_eq!(
            action_for(Position { x: 200., y: 0. }, surface),
            Action::Move
        );
        assert_eq!(
            action_for(Position { x: 199.5, y: 1. }, surface),
            Action::Copy
        );
    }

    #[test]
    fn wire_values() {
        for action in [Action::None, Action::Copy, Action::Move, Action::Ask] {
            assert_eq!(Action::from_bits(action.as_set().bits()), Some(action));
        }
        assert_eq!(Action::from_bits(3), None);
    }
}
