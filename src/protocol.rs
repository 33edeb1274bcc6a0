use crate::{direction::Direction, spiral::Speed};
use bytes::{BufMut, BytesMut};
use std::{fmt, io};
use tokio_util::codec::Encoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    Stop,
}

impl Edge {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Edge::Start => "START",
            Edge::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiralCommand {
    Start(Speed),
    Stop,
    SpeedSet(Speed),
}

/// One line of the rover protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Direction(Direction, Edge),
    Spiral(SpiralCommand),
}

impl Command {
    /// Wire text including the terminating newline.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

/// Comma separated tokens without the line terminator.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Direction(direction, edge) => {
                write!(f, "{},{}", direction.wire_name(), edge.wire_name())
            }
            Command::Spiral(SpiralCommand::Start(speed)) => write!(f, "SPIRAL,START,{}", speed),
            Command::Spiral(SpiralCommand::Stop) => f.write_str("SPIRAL,STOP"),
            Command::Spiral(SpiralCommand::SpeedSet(speed)) => {
                write!(f, "SPIRAL,SPEED,{}", speed)
            }
        }
    }
}

/// Line codec for the rover. The rover never answers so there is no decoder.
pub struct RoverProtocol;

impl Encoder<Command> for RoverProtocol {
    type Error = io::Error;

    fn encode(&mut self, command: Command, buf: &mut BytesMut) -> Result<(), io::Error> {
        let encoded = command.encode();
        buf.reserve(encoded.len());
        buf.put_slice(encoded.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_edges() {
        assert_eq!(
            Command::Direction(Direction::North, Edge::Start).encode(),
            "NORTH,START\n"
        );
        assert_eq!(
            Command::Direction(Direction::West, Edge::Stop).encode(),
            "WEST,STOP\n"
        );
    }

    #[test]
    fn spiral_lifecycle() {
        let speed = Speed::default().cycle().cycle();
        assert_eq!(
            Command::Spiral(SpiralCommand::Start(Speed::default())).encode(),
            "SPIRAL,START,1\n"
        );
        assert_eq!(
            Command::Spiral(SpiralCommand::SpeedSet(speed)).encode(),
            "SPIRAL,SPEED,3\n"
        );
        assert_eq!(
            Command::Spiral(SpiralCommand::Stop).encode(),
            "SPIRAL,STOP\n"
        );
    }

    #[test]
    fn encoding_is_single_ascii_line() {
        let encoded = Command::Direction(Direction::East, Edge::Start).encode();
        assert!(encoded.is_ascii());
        assert_eq!(encoded.matches('\n').count(), 1);
        assert!(encoded.ends_with('\n'));
    }

    #[test]
    fn codec_appends_to_buffer() {
        let mut buffer = BytesMut::new();
        RoverProtocol
            .encode(Command::Direction(Direction::South, Edge::Start), &mut buffer)
            .unwrap();
        RoverProtocol
            .encode(Command::Direction(Direction::South, Edge::Stop), &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..], b"SOUTH,START\nSOUTH,STOP\n");
    }
}
