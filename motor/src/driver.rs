use std::convert::Infallible;

use binbot_common::command::Command;
use tracing::info;

/// One H-bridge channel: PWM enable level plus the two direction inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub enable: u8,
    pub in1: bool,
    pub in2: bool,
}

impl ChannelState {
    pub const NEUTRAL: ChannelState = ChannelState {
        enable: 0,
        in1: false,
        in2: false,
    };

    pub fn is_energized(&self) -> bool {
        self.enable > 0 && self.in1 != self.in2
    }
}

/// Both motor channels. Only the dispatcher mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    pub channels: [ChannelState; 2],
}

impl MotorState {
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Channel programming for a command. Left and Right drive both channels
    /// with opposite polarity; Stop de-energises them.
    pub fn for_command(command: Command, speed: u8) -> Self {
        let channel = match command {
            Command::MoveLeft => ChannelState {
                enable: speed,
                in1: true,
                in2: false,
            },
            Command::MoveRight => ChannelState {
                enable: speed,
                in1: false,
                in2: true,
            },
            Command::Stop => ChannelState::NEUTRAL,
        };
        Self {
            channels: [channel; 2],
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.channels.iter().all(|c| *c == ChannelState::NEUTRAL)
    }
}

/// Hardware seam: something that can put a `MotorState` onto the pins.
pub trait MotorDriver {
    type Error: std::fmt::Display;

    fn apply(&mut self, state: &MotorState) -> Result<(), Self::Error>;
}

/// Driver for hosts without motor hardware: logs each change of output.
#[derive(Debug, Default)]
pub struct LoggingDriver {
    last: MotorState,
}

impl MotorDriver for LoggingDriver {
    type Error = Infallible;

    fn apply(&mut self, state: &MotorState) -> Result<(), Self::Error> {
        if *state != self.last {
            let [a, b] = state.channels;
            info!(
                ena = a.enable,
                in1 = a.in1 as u8,
                in2 = a.in2 as u8,
                enb = b.enable,
                in3 = b.in1 as u8,
                in4 = b.in2 as u8,
                energized = a.is_energized() || b.is_energized(),
                "motor outputs"
            );
            self.last = *state;
        }
        Ok(())
    }
}
