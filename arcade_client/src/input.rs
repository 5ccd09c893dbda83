//! Input sampling.
//!
//! A windowed front end feeds key state into [`InputState`]; the headless
//! binary drives it from console commands. Either way one mask is produced
//! per client tick.

use arcade_shared::net::InputMask;

/// Held logical keys at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub shoot: bool,
    pub charge: bool,
}

impl InputState {
    pub fn mask(self) -> InputMask {
        let mut mask = InputMask::empty();
        mask.set(InputMask::UP, self.up);
        mask.set(InputMask::DOWN, self.down);
        mask.set(InputMask::LEFT, self.left);
        mask.set(InputMask::RIGHT, self.right);
        mask.set(InputMask::SHOOT, self.shoot);
        mask.set(InputMask::CHARGE, self.charge);
        mask
    }

    /// Parses a key string such as `"wd "` or `"s+"`.
    ///
    /// `w a s d` move, space shoots, `+` charges; other characters are
    /// ignored.
    pub fn from_keys(keys: &str) -> Self {
        let mut state = Self::default();
        for c in keys.chars() {
            match c.to_ascii_lowercase() {
                'w' => state.up = true,
                's' => state.down = true,
                'a' => state.left = true,
                'd' => state.right = true,
                ' ' => state.shoot = true,
                '+' => state.charge = true,
                _ => {}
            }
        }
        state
    }
}

/// Tracks the last mask sent so idle ticks can skip the wire.
#[derive(Debug, Default)]
pub struct InputSampler {
    current: InputState,
    last_sent: Option<InputMask>,
}

impl InputSampler {
    pub fn set(&mut self, state: InputState) {
        self.current = state;
    }

    pub fn current(&self) -> InputState {
        self.current
    }

    /// Mask to send this tick, or `None` when nothing is held and the
    /// previous frame already said so.
    pub fn sample(&mut self) -> Option<InputMask> {
        let mask = self.current.mask();
        if mask.is_empty() && self.last_sent == Some(mask) {
            return None;
        }
        self.last_sent = Some(mask);
        Some(mask)
    }
}
