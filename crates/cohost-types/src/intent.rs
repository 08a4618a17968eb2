//! Input intents decoded from the data channel.
//!
//! Keys and mouse buttons share one code space: codes below a small
//! threshold are mouse buttons, everything else is a keyboard key.

/// An input action a client wants applied to the shared desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputIntent {
    /// Absolute pointer position.
    Move { x: i16, y: i16 },

    /// Scroll by a delta on both axes.
    Scroll { dx: i16, dy: i16 },

    KeyDown(u32),
    KeyUp(u32),
    ButtonDown(u32),
    ButtonUp(u32),
}

impl InputIntent {
    /// Reclassify key and button intents by code.
    ///
    /// A code below `button_threshold` is a mouse button regardless of which
    /// event code carried it; any other code is a keyboard key.
    #[must_use]
    pub fn classify(self, button_threshold: u32) -> Self {
        match self {
            Self::KeyDown(code) | Self::ButtonDown(code) => {
                if code < button_threshold {
                    Self::ButtonDown(code)
                } else {
                    Self::KeyDown(code)
                }
            }
            Self::KeyUp(code) | Self::ButtonUp(code) => {
                if code < button_threshold {
                    Self::ButtonUp(code)
                } else {
                    Self::KeyUp(code)
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_codes_become_buttons() {
        assert_eq!(InputIntent::KeyDown(1).classify(8), InputIntent::ButtonDown(1));
        assert_eq!(InputIntent::KeyUp(3).classify(8), InputIntent::ButtonUp(3));
    }

    #[test]
    fn high_codes_become_keys() {
        assert_eq!(InputIntent::ButtonDown(0xff0d).classify(8), InputIntent::KeyDown(0xff0d));
        assert_eq!(InputIntent::ButtonUp(8).classify(8), InputIntent::KeyUp(8));
    }

    #[test]
    fn pointer_intents_unchanged() {
        let mv = InputIntent::Move { x: 1, y: 2 };
        assert_eq!(mv.classify(8), mv);
        let scroll = InputIntent::Scroll { dx: -1, dy: 5 };
        assert_eq!(scroll.classify(8), scroll);
    }
}
