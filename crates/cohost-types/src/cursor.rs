//! Cursor image and position types.

use serde::{Deserialize, Serialize};

/// Raw cursor image as reported by the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u16,
    pub height: u16,
    pub x_hot: u16,
    pub y_hot: u16,
    /// RGBA8 pixels, row-major, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl CursorImage {
    /// Number of bytes `pixels` must hold for the declared size.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        usize::from(self.width) * usize::from(self.height) * 4
    }
}

/// A cursor position in desktop pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
}

impl CursorPosition {
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}
