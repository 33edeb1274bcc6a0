use crate::{
    direction::Direction,
    protocol::{Command, Edge, SpiralCommand},
};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::time::Instant;
use tracing::*;

/// Spiral speed multiplier, always in `1..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Speed(u8);

impl Speed {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    /// 1 -> 2 -> 3 -> 1
    pub fn cycle(self) -> Self {
        if self.0 >= Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 + 1)
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SpiralConfig {
    /// Duration of the first leg at speed 1
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Each leg is this much longer than the one before
    #[serde(default = "default_growth")]
    pub growth: f64,
    /// Legs walked before the search gives up on its own
    #[serde(default = "default_max_legs")]
    pub max_legs: u32,
}

fn default_step_ms() -> u64 {
    100
}

fn default_growth() -> f64 {
    1.5
}

fn default_max_legs() -> u32 {
    12
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
            growth: default_growth(),
            max_legs: default_max_legs(),
        }
    }
}

impl SpiralConfig {
    /// Upper bound on `max_legs` accepted from configuration.
    pub const LEG_LIMIT: u32 = 64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpiralState {
    Inactive,
    Active,
}

#[derive(Debug, Default)]
struct Trajectory {
    leg: u32,
    open_pulse: Option<Direction>,
    offset: na::Vector2<f64>,
}

/// Drives the expanding square spiral.
///
/// The controller does no scheduling itself. The owner sleeps until
/// [`SpiralController::next_deadline`] and then calls [`SpiralController::tick`];
/// stopping clears the deadline so a pending wake-up turns into a no-op.
#[derive(Debug)]
pub struct SpiralController {
    config: SpiralConfig,
    state: SpiralState,
    speed: Speed,
    trajectory: Trajectory,
    deadline: Option<Instant>,
}

impl SpiralController {
    pub fn new(config: SpiralConfig) -> Self {
        Self {
            config,
            state: SpiralState::Inactive,
            speed: Speed::default(),
            trajectory: Trajectory::default(),
            deadline: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SpiralState::Active
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Legs completed since the search started.
    pub fn leg(&self) -> u32 {
        self.trajectory.leg
    }

    /// Logical distance covered so far, in first-leg units.
    pub fn estimated_offset(&self) -> na::Vector2<f64> {
        self.trajectory.offset
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Real time duration of `leg` at the current speed.
    ///
    /// `None` when the leg is too long, or otherwise not a valid duration.
    pub fn leg_duration(&self, leg: u32) -> Option<Duration> {
        let seconds = self.config.step_ms as f64 / 1000.0 * self.leg_length(leg)
            / f64::from(self.speed.value());
        Duration::try_from_secs_f64(seconds).ok()
    }

    fn leg_length(&self, leg: u32) -> f64 {
        self.config
            .growth
            .powi(i32::try_from(leg).unwrap_or(i32::MAX))
    }

    fn leg_deadline(&self, now: Instant, leg: u32) -> Option<Instant> {
        self.leg_duration(leg)
            .and_then(|duration| now.checked_add(duration))
    }

    pub fn start(&mut self, now: Instant) -> Option<Command> {
        if self.is_active() {
            return None;
        }
        // first leg opens one step after the rover acknowledges the mode change
        let Some(deadline) = self.leg_deadline(now, 0) else {
            warn!(
                "Spiral step of {}ms cannot be scheduled, not starting",
                self.config.step_ms
            );
            return None;
        };
        self.state = SpiralState::Active;
        self.trajectory = Trajectory::default();
        self.deadline = Some(deadline);
        info!("Spiral search started at speed {}", self.speed);
        Some(Command::Spiral(SpiralCommand::Start(self.speed)))
    }

    pub fn stop(&mut self) -> Option<Command> {
        if !self.is_active() {
            return None;
        }
        self.deactivate();
        info!("Spiral search stopped");
        Some(Command::Spiral(SpiralCommand::Stop))
    }

    /// Drop to inactive without telling the rover. The link is already gone.
    pub fn force_inactive(&mut self) {
        if self.is_active() {
            debug!("Spiral search dropped without a link");
        }
        self.deactivate();
    }

    fn deactivate(&mut self) {
        self.state = SpiralState::Inactive;
        self.deadline = None;
        self.trajectory.open_pulse = None;
    }

    /// Advance the speed. Progress is kept; only later legs use the new speed.
    pub fn cycle_speed(&mut self) -> Option<Command> {
        self.speed = self.speed.cycle();
        if self.is_active() {
            Some(Command::Spiral(SpiralCommand::SpeedSet(self.speed)))
        } else {
            None
        }
    }

    /// Close the running pulse and open the next one if its deadline passed.
    pub fn tick(&mut self, now: Instant) -> Vec<Command> {
        let mut commands = vec![];
        if !self.is_active() {
            return commands;
        }
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return commands,
        }

        if let Some(direction) = self.trajectory.open_pulse.take() {
            commands.push(Command::Direction(direction, Edge::Stop));
            let length = self.leg_length(self.trajectory.leg);
            self.trajectory.offset += direction.unit_vector() * length;
            self.trajectory.leg += 1;
        }

        if self.trajectory.leg >= self.config.max_legs {
            info!("Spiral search finished after {} legs", self.trajectory.leg);
            self.finish(&mut commands);
            return commands;
        }

        let leg = self.trajectory.leg;
        let Some(deadline) = self.leg_deadline(now, leg) else {
            warn!("Spiral leg {} cannot be scheduled, finishing search", leg);
            self.finish(&mut commands);
            return commands;
        };
        let direction = heading_for_leg(leg);
        trace!(
            leg,
            %direction,
            offset_x = self.trajectory.offset.x,
            offset_y = self.trajectory.offset.y,
            "Opening spiral pulse"
        );
        commands.push(Command::Direction(direction, Edge::Start));
        self.trajectory.open_pulse = Some(direction);
        self.deadline = Some(deadline);
        commands
    }

    fn finish(&mut self, commands: &mut Vec<Command>) {
        self.deactivate();
        commands.push(Command::Spiral(SpiralCommand::Stop));
    }
}

fn heading_for_leg(leg: u32) -> Direction {
    (0..leg % 4).fold(Direction::North, |heading, _| heading.clockwise())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> SpiralController {
        SpiralController::new(SpiralConfig::default())
    }

    #[test]
    fn speed_cycles_through_three_values() {
        let start = Speed::default();
        let values: Vec<u8> = std::iter::successors(Some(start), |speed| Some(speed.cycle()))
            .take(7)
            .map(|speed| speed.value())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 1, 2, 3, 1]);
        assert_eq!(start.cycle().cycle().cycle(), start);
    }

    #[test]
    fn start_and_stop_emit_lifecycle() {
        let mut spiral = controller();
        let now = Instant::now();
        assert_eq!(
            spiral.start(now),
            Some(Command::Spiral(SpiralCommand::Start(Speed::default())))
        );
        assert!(spiral.is_active());
        assert_eq!(spiral.start(now), None);
        assert_eq!(spiral.stop(), Some(Command::Spiral(SpiralCommand::Stop)));
        assert_eq!(spiral.stop(), None);
        assert_eq!(spiral.next_deadline(), None);
    }

    #[test]
    fn cycle_speed_only_emits_while_active() {
        let mut spiral = controller();
        assert_eq!(spiral.cycle_speed(), None);
        assert_eq!(spiral.speed().value(), 2);
        spiral.start(Instant::now());
        let speed = spiral.speed().cycle();
        assert_eq!(
            spiral.cycle_speed(),
            Some(Command::Spiral(SpiralCommand::SpeedSet(speed)))
        );
    }

    #[test]
    fn tick_before_deadline_does_nothing() {
        let mut spiral = controller();
        let now = Instant::now();
        spiral.start(now);
        assert!(spiral.tick(now).is_empty());
    }

    #[test]
    fn tick_after_stop_does_nothing() {
        let mut spiral = controller();
        let now = Instant::now();
        spiral.start(now);
        spiral.stop();
        assert!(spiral.tick(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn legs_rotate_and_grow() {
        let mut spiral = controller();
        let mut now = Instant::now();
        spiral.start(now);
        now += spiral.leg_duration(0).unwrap();

        assert_eq!(
            spiral.tick(now),
            vec![Command::Direction(Direction::North, Edge::Start)]
        );
        let expected = [
            (Direction::North, Direction::East),
            (Direction::East, Direction::South),
            (Direction::South, Direction::West),
            (Direction::West, Direction::North),
        ];
        for (leg, (closing, opening)) in expected.iter().enumerate() {
            let deadline = spiral.next_deadline().unwrap();
            assert_eq!(Some(deadline - now), spiral.leg_duration(leg as u32));
            now = deadline;
            assert_eq!(
                spiral.tick(now),
                vec![
                    Command::Direction(*closing, Edge::Stop),
                    Command::Direction(*opening, Edge::Start)
                ]
            );
        }
        assert_eq!(spiral.leg(), 4);
    }

    #[test]
    fn leg_duration_grows_geometrically_and_scales_with_speed() {
        let mut spiral = controller();
        let seconds =
            |spiral: &SpiralController, leg| spiral.leg_duration(leg).unwrap().as_secs_f64();
        assert_relative_eq!(seconds(&spiral, 0), 0.1, epsilon = 1e-6);
        assert_relative_eq!(seconds(&spiral, 1), 0.15, epsilon = 1e-6);
        assert_relative_eq!(seconds(&spiral, 2), 0.225, epsilon = 1e-6);
        spiral.cycle_speed();
        spiral.cycle_speed();
        assert_relative_eq!(seconds(&spiral, 1), 0.05, epsilon = 1e-6);
    }

    #[test]
    fn speed_change_keeps_progress() {
        let mut spiral = controller();
        let mut now = Instant::now();
        spiral.start(now);
        for _ in 0..3 {
            now = spiral.next_deadline().unwrap();
            spiral.tick(now);
        }
        let leg = spiral.leg();
        let deadline = spiral.next_deadline();
        spiral.cycle_speed();
        assert_eq!(spiral.leg(), leg);
        assert_eq!(spiral.next_deadline(), deadline);
        assert!(spiral.is_active());

        // the running south leg is closed, the next one opens at the new speed
        now = spiral.next_deadline().unwrap();
        assert_eq!(
            spiral.tick(now),
            vec![
                Command::Direction(Direction::South, Edge::Stop),
                Command::Direction(Direction::West, Edge::Start)
            ]
        );
        assert_eq!(
            spiral.next_deadline(),
            spiral.leg_duration(leg + 1).map(|duration| now + duration)
        );
    }

    #[test]
    fn offset_tracks_the_walked_square() {
        let mut spiral = controller();
        let mut now = Instant::now();
        spiral.start(now);
        // open north, then close north, east, south
        for _ in 0..4 {
            now = spiral.next_deadline().unwrap();
            spiral.tick(now);
        }
        let offset = spiral.estimated_offset();
        assert_relative_eq!(offset.x, 1.5, epsilon = 1e-6);
        assert_relative_eq!(offset.y, 1.0 - 2.25, epsilon = 1e-6);
    }

    #[test]
    fn finishes_after_max_legs() {
        let mut spiral = SpiralController::new(SpiralConfig {
            max_legs: 2,
            ..Default::default()
        });
        let mut now = Instant::now();
        spiral.start(now);
        now = spiral.next_deadline().unwrap();
        spiral.tick(now);
        now = spiral.next_deadline().unwrap();
        spiral.tick(now);
        now = spiral.next_deadline().unwrap();
        assert_eq!(
            spiral.tick(now),
            vec![
                Command::Direction(Direction::East, Edge::Stop),
                Command::Spiral(SpiralCommand::Stop)
            ]
        );
        assert!(!spiral.is_active());
        assert_eq!(spiral.next_deadline(), None);
    }

    #[test]
    fn force_inactive_is_silent() {
        let mut spiral = controller();
        spiral.start(Instant::now());
        spiral.force_inactive();
        assert!(!spiral.is_active());
        assert_eq!(spiral.stop(), None);
    }

    #[test]
    fn unschedulable_leg_ends_the_search() {
        let mut spiral = SpiralController::new(SpiralConfig {
            growth: -1.5,
            ..Default::default()
        });
        let mut now = Instant::now();
        spiral.start(now);
        now = spiral.next_deadline().unwrap();
        spiral.tick(now);
        now = spiral.next_deadline().unwrap();
        assert_eq!(
            spiral.tick(now),
            vec![
                Command::Direction(Direction::North, Edge::Stop),
                Command::Spiral(SpiralCommand::Stop)
            ]
        );
        assert!(!spiral.is_active());
        assert_eq!(spiral.next_deadline(), None);
    }

    #[test]
    fn overflowing_legs_have_no_duration() {
        let spiral = controller();
        assert_eq!(spiral.leg_duration(1800), None);
    }
}
