use crate::protocol::{Command, Edge};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub fn all() -> &'static [Direction] {
        &[
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
        ]
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Direction::North => "NORTH",
            Direction::South => "SOUTH",
            Direction::East => "EAST",
            Direction::West => "WEST",
        }
    }

    /// Next heading in the rotation the spiral search walks.
    pub fn clockwise(&self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    /// Unit vector with north along +y and east along +x.
    pub fn unit_vector(&self) -> na::Vector2<f64> {
        match self {
            Direction::North => na::Vector2::new(0.0, 1.0),
            Direction::South => na::Vector2::new(0.0, -1.0),
            Direction::East => na::Vector2::new(1.0, 0.0),
            Direction::West => na::Vector2::new(-1.0, 0.0),
        }
    }

    fn index(&self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown direction {0:?}")]
pub struct UnknownDirection(String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "north" => Ok(Direction::North),
            "s" | "south" => Ok(Direction::South),
            "e" | "east" => Ok(Direction::East),
            "w" | "west" => Ok(Direction::West),
            _ => Err(UnknownDirection(s.to_owned())),
        }
    }
}

/// What a press-start turned into.
#[derive(Debug, PartialEq, Eq)]
pub enum PressStart {
    Start(Command),
    /// The spiral owns the rover. The press cancels it and is consumed.
    PreemptSpiral,
    AlreadyPressed,
}

/// Edge tracking for the four direction buttons.
#[derive(Debug, Default)]
pub struct DirectionSession {
    pressed: [bool; 4],
}

impl DirectionSession {
    pub fn is_pressed(&self, direction: Direction) -> bool {
        self.pressed[direction.index()]
    }

    pub fn any_pressed(&self) -> bool {
        self.pressed.iter().any(|pressed| *pressed)
    }

    pub fn press_start(&mut self, direction: Direction, spiral_active: bool) -> PressStart {
        if spiral_active {
            // not marked as pressed, so the matching release stays silent
            return PressStart::PreemptSpiral;
        }
        let pressed = &mut self.pressed[direction.index()];
        if *pressed {
            return PressStart::AlreadyPressed;
        }
        *pressed = true;
        PressStart::Start(Command::Direction(direction, Edge::Start))
    }

    pub fn press_end(&mut self, direction: Direction, spiral_active: bool) -> Option<Command> {
        let pressed = &mut self.pressed[direction.index()];
        if !*pressed {
            return None;
        }
        *pressed = false;
        if spiral_active {
            None
        } else {
            Some(Command::Direction(direction, Edge::Stop))
        }
    }

    /// Forget every press without emitting anything. Used when the link goes away.
    pub fn release_all(&mut self) {
        self.pressed = [false; 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_stop() {
        let mut session = DirectionSession::default();
        for direction in Direction::all() {
            assert_eq!(
                session.press_start(*direction, false),
                PressStart::Start(Command::Direction(*direction, Edge::Start))
            );
            assert!(session.is_pressed(*direction));
            assert_eq!(
                session.press_end(*direction, false),
                Some(Command::Direction(*direction, Edge::Stop))
            );
            assert!(!session.is_pressed(*direction));
        }
    }

    #[test]
    fn repeated_press_starts_once() {
        let mut session = DirectionSession::default();
        assert!(matches!(
            session.press_start(Direction::East, false),
            PressStart::Start(_)
        ));
        assert_eq!(
            session.press_start(Direction::East, false),
            PressStart::AlreadyPressed
        );
    }

    #[test]
    fn release_without_press_is_silent() {
        let mut session = DirectionSession::default();
        assert_eq!(session.press_end(Direction::West, false), None);
    }

    #[test]
    fn duplicate_release_stops_once() {
        // up followed by cancel
        let mut session = DirectionSession::default();
        session.press_start(Direction::South, false);
        assert!(session.press_end(Direction::South, false).is_some());
        assert_eq!(session.press_end(Direction::South, false), None);
    }

    #[test]
    fn press_during_spiral_preempts_and_release_is_swallowed() {
        let mut session = DirectionSession::default();
        assert_eq!(
            session.press_start(Direction::North, true),
            PressStart::PreemptSpiral
        );
        assert!(!session.is_pressed(Direction::North));
        assert_eq!(session.press_end(Direction::North, false), None);
    }

    #[test]
    fn release_while_spiral_active_is_swallowed() {
        let mut session = DirectionSession::default();
        session.press_start(Direction::North, false);
        assert_eq!(session.press_end(Direction::North, true), None);
        assert!(!session.any_pressed());
    }

    #[test]
    fn release_all_clears_presses() {
        let mut session = DirectionSession::default();
        session.press_start(Direction::North, false);
        session.press_start(Direction::West, false);
        session.release_all();
        assert!(!session.any_pressed());
        assert_eq!(session.press_end(Direction::North, false), None);
    }

    #[test]
    fn clockwise_visits_every_heading() {
        let mut heading = Direction::North;
        let mut visited = vec![];
        for _ in 0..4 {
            visited.push(heading);
            heading = heading.clockwise();
        }
        assert_eq!(heading, Direction::North);
        assert_eq!(
            visited,
            vec![
                Direction::North,
                Direction::East,
                Direction::South,
                Direction::West
            ]
        );
    }

    #[test]
    fn parse_direction() {
        assert_eq!("north".parse::<Direction>(), Ok(Direction::North));
        assert_eq!("W".parse::<Direction>(), Ok(Direction::West));
        assert!("up".parse::<Direction>().is_err());
    }
}
