use serde::Serialize;

/// Directional instruction sent from the host to the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Command {
    MoveLeft,
    MoveRight,
    Stop,
}

impl Command {
    /// Single byte used on the motor link.
    pub fn wire_byte(self) -> u8 {
        match self {
            Command::MoveLeft => b'L',
            Command::MoveRight => b'R',
            Command::Stop => b'S',
        }
    }

    /// Parse a motor-link byte. Anything other than `L`, `R`, `S` is not a command.
    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            b'L' => Some(Command::MoveLeft),
            b'R' => Some(Command::MoveRight),
            b'S' => Some(Command::Stop),
            _ => None,
        }
    }

    /// Name used in `Executing: <name>` acknowledgements.
    pub fn display_name(self) -> &'static str {
        match self {
            Command::MoveLeft => "Move Left",
            Command::MoveRight => "Move Right",
            Command::Stop => "Stop",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Move Left" => Some(Command::MoveLeft),
            "Move Right" => Some(Command::MoveRight),
            "Stop" => Some(Command::Stop),
            _ => None,
        }
    }

    /// Stable lowercase label for logs and the detection table.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::MoveLeft => "move_left",
            Command::MoveRight => "move_right",
            Command::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_are_l_r_s() {
        assert_eq!(Command::MoveLeft.wire_byte(), b'L');
        assert_eq!(Command::MoveRight.wire_byte(), b'R');
        assert_eq!(Command::Stop.wire_byte(), b'S');
        for cmd in [Command::MoveLeft, Command::MoveRight, Command::Stop] {
            assert_eq!(Command::from_wire_byte(cmd.wire_byte()), Some(cmd));
        }
    }

    #[test]
    fn other_bytes_are_not_commands() {
        for byte in [b'l', b'r', b's', b'\n', b'\r', b'X', 0x00, 0xFF] {
            assert_eq!(Command::from_wire_byte(byte), None);
        }
    }

    #[test]
    fn display_names_parse_back() {
        assert_eq!(Command::from_display_name(" Move Right"), Some(Command::MoveRight));
        assert_eq!(Command::from_display_name("Stay"), None);
    }
}
