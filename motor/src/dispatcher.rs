use std::time::Duration;

use binbot_common::command::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::driver::{MotorDriver, MotorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    /// A directional move is in flight until `deadline`.
    Moving { command: Command, deadline: Instant },
}

/// Open-loop command executor. Each move runs for a fixed duration; a newer
/// command replaces the current one and restarts the clock.
pub struct Dispatcher<D> {
    driver: D,
    state: DispatchState,
    motor: MotorState,
    move_duration: Duration,
    speed: u8,
}

impl<D: MotorDriver> Dispatcher<D> {
    pub fn new(driver: D, move_duration: Duration, speed: u8) -> Self {
        Self {
            driver,
            state: DispatchState::Idle,
            motor: MotorState::neutral(),
            move_duration,
            speed,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn motor_state(&self) -> &MotorState {
        &self.motor
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Feed one byte from the command link. Returns the command it carried,
    /// if any; other bytes leave the state untouched.
    pub fn handle_byte(&mut self, byte: u8, now: Instant) -> Result<Option<Command>, D::Error> {
        let Some(command) = Command::from_wire_byte(byte) else {
            if !byte.is_ascii_whitespace() {
                debug!(byte, "ignoring unrecognised command byte");
            }
            return Ok(None);
        };
        self.execute(command, now)?;
        Ok(Some(command))
    }

    pub fn execute(&mut self, command: Command, now: Instant) -> Result<(), D::Error> {
        match command {
            Command::Stop => {
                if matches!(self.state, DispatchState::Moving { .. }) {
                    info!("MOVING→IDLE: stop command");
                }
                self.state = DispatchState::Idle;
            }
            _ => {
                let deadline = now + self.move_duration;
                info!(command = command.as_str(), duration_ms = self.move_duration.as_millis() as u64, "executing move");
                self.state = DispatchState::Moving { command, deadline };
            }
        }
        self.program(MotorState::for_command(command, self.speed))
    }

    /// Periodic check. Returns true when an expired move was stopped.
    pub fn tick(&mut self, now: Instant) -> Result<bool, D::Error> {
        let DispatchState::Moving { command, deadline } = self.state else {
            return Ok(false);
        };
        if now < deadline {
            return Ok(false);
        }
        info!(command = command.as_str(), "MOVING→IDLE: move duration elapsed");
        self.state = DispatchState::Idle;
        self.program(MotorState::neutral())?;
        Ok(true)
    }

    /// Drop any move in flight and de-energise both channels.
    pub fn halt(&mut self) -> Result<(), D::Error> {
        self.state = DispatchState::Idle;
        self.program(MotorState::neutral())
    }

    fn program(&mut self, state: MotorState) -> Result<(), D::Error> {
        self.driver.apply(&state)?;
        self.motor = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    #[derive(Default)]
    struct RecordingDriver {
        applied: Vec<MotorState>,
    }

    impl MotorDriver for RecordingDriver {
        type Error = Infallible;

        fn apply(&mut self, state: &MotorState) -> Result<(), Self::Error> {
            self.applied.push(*state);
            Ok(())
        }
    }

    const MOVE: Duration = Duration::from_millis(500);

    fn dispatcher() -> Dispatcher<RecordingDriver> {
        Dispatcher::new(RecordingDriver::default(), MOVE, 200)
    }

    #[test]
    fn move_left_is_active_until_deadline() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert_eq!(d.handle_byte(b'L', t0).unwrap(), Some(Command::MoveLeft));

        let left = MotorState::for_command(Command::MoveLeft, 200);
        assert_eq!(*d.motor_state(), left);
        assert!(!d.tick(t0 + MOVE - Duration::from_millis(1)).unwrap());
        assert_eq!(*d.motor_state(), left);

        assert!(d.tick(t0 + MOVE).unwrap());
        assert!(d.motor_state().is_neutral());
        assert_eq!(d.state(), DispatchState::Idle);
    }

    #[test]
    fn newer_command_supersedes_and_restarts_deadline() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        d.handle_byte(b'L', t0).unwrap();
        let t1 = t0 + Duration::from_millis(300);
        d.handle_byte(b'R', t1).unwrap();

        assert_eq!(
            d.state(),
            DispatchState::Moving {
                command: Command::MoveRight,
                deadline: t1 + MOVE,
            }
        );
        // first command's deadline has passed, second's has not
        assert!(!d.tick(t0 + MOVE).unwrap());
        assert_eq!(*d.motor_state(), MotorState::for_command(Command::MoveRight, 200));
        assert!(d.tick(t1 + MOVE).unwrap());
        assert!(d.motor_state().is_neutral());
    }

    #[test]
    fn stop_de_energises_immediately() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        d.handle_byte(b'R', t0).unwrap();
        d.handle_byte(b'S', t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(d.state(), DispatchState::Idle);
        assert!(d.motor_state().is_neutral());
        assert!(!d.tick(t0 + MOVE).unwrap());
    }

    #[test]
    fn unknown_bytes_change_nothing() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        d.handle_byte(b'L', t0).unwrap();
        let before = d.state();
        for byte in [b'\n', b'x', b'l', 0xFF] {
            assert_eq!(d.handle_byte(byte, t0 + Duration::from_millis(100)).unwrap(), None);
        }
        assert_eq!(d.state(), before);
        assert_eq!(d.driver().applied.len(), 1);
    }

    #[test]
    fn idle_tick_is_a_no_op() {
        let mut d = dispatcher();
        assert!(!d.tick(Instant::now()).unwrap());
        assert!(d.driver().applied.is_empty());
    }
}
