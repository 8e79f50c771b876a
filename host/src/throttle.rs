use binbot_common::command::Command;

/// Decides which commands actually go out on the motor link: a command is
/// forwarded when it changes, and the current one is repeated every
/// `resend_every` cycles so a dropped byte does not leave the bin idle.
#[derive(Debug, Clone)]
pub struct CommandThrottle {
    resend_every: u32,
    last: Option<Command>,
    cycles_since_send: u32,
}

impl CommandThrottle {
    /// `resend_every = 0` only sends on change.
    pub fn new(resend_every: u32) -> Self {
        Self {
            resend_every,
            last: None,
            cycles_since_send: 0,
        }
    }

    pub fn should_send(&mut self, command: Command) -> bool {
        if self.last != Some(command) {
            self.mark_sent(command);
            return true;
        }
        self.cycles_since_send += 1;
        if self.resend_every > 0 && self.cycles_since_send >= self.resend_every {
            self.mark_sent(command);
            return true;
        }
        false
    }

    /// Forget the last command, so the next one is always sent.
    pub fn reset(&mut self) {
        self.last = None;
        self.cycles_since_send = 0;
    }

    fn mark_sent(&mut self, command: Command) {
        self.last = Some(command);
        self.cycles_since_send = 0;
    }
}
