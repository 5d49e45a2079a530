#![forbid(unsafe_code)]

//! Frame payloads for character/pixel screens.
//!
//! The devices this runtime targets expose two display primitives: a row of
//! text lines (`display_data`) and a packed monochrome bitmap
//! (`display_image`). [`ScreenFrame`] is the union of the two, used both on
//! the way to the hardware and as the cached frame returned by context image
//! queries (screenshots, lock-screen peeking).
//!
//! Rendering — fonts, widgets, layout — is out of scope here; these are pure
//! payload types.

use serde::{Deserialize, Serialize};

use crate::error::IoError;

/// A packed 1-bit-per-pixel image.
///
/// Layout: row-major, eight horizontal pixels per byte, most significant bit
/// leftmost, rows padded to a whole byte. A 128x64 image is exactly
/// `16 * 64 = 1024` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonoImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MonoImage {
    /// Create an image, validating that `data` matches the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, IoError> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(IoError::InvalidImage {
                width,
                height,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create an all-dark image of the given size.
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Byte length implied by a width/height pair.
    #[must_use]
    pub fn byte_len(width: u32, height: u32) -> usize {
        (width as usize).div_ceil(8) * height as usize
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed pixel bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// One full frame as accepted by a screen or cached by an output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenFrame {
    /// Character-mode content, one string per display row.
    Text(Vec<String>),
    /// Pixel-mode content.
    Image(MonoImage),
}

impl ScreenFrame {
    /// Build a text frame from anything stringly.
    #[must_use]
    pub fn text<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Text(lines.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_rounds_width_up_to_bytes() {
        assert_eq!(MonoImage::byte_len(128, 64), 1024);
        assert_eq!(MonoImage::byte_len(10, 2), 4);
        assert_eq!(MonoImage::byte_len(8, 1), 1);
    }

    #[test]
    fn new_rejects_short_payloads() {
        let err = MonoImage::new(128, 64, vec![0; 512]).unwrap_err();
        assert!(matches!(
            err,
            IoError::InvalidImage {
                expected: 1024,
                got: 512,
                ..
            }
        ));
    }

    #[test]
    fn blank_matches_declared_size() {
        let img = MonoImage::blank(21, 3);
        assert_eq!(img.data().len(), MonoImage::byte_len(21, 3));
        assert!(img.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn text_frame_collects_lines() {
        let frame = ScreenFrame::text(["Clock", "12:34"]);
        match frame {
            ScreenFrame::Text(lines) => assert_eq!(lines, vec!["Clock", "12:34"]),
            ScreenFrame::Image(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn frames_round_trip_through_serde() {
        let frame = ScreenFrame::Image(MonoImage::blank(16, 8));
        let json = serde_json::to_string(&frame).unwrap();
        let back: ScreenFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
