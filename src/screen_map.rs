//! One bit per device pixel, used to skip sub-pixel features whose pixel is already
//! painted.

use crate::types::{DeviceRect, Envelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenMap {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    words: Vec<u64>,
}

impl ScreenMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_origin(0, 0, width, height)
    }

    /// Map addressed in device coordinates starting at `(x, y)`.
    pub fn with_origin(x: i32, y: i32, width: u32, height: u32) -> Self {
        let bits = u64::from(width) * u64::from(height);
        Self {
            x,
            y,
            width,
            height,
            words: vec![0; bits.div_ceil(64) as usize],
        }
    }

    pub fn for_device(rect: &DeviceRect) -> Self {
        Self::with_origin(rect.x, rect.y, rect.width, rect.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn bit(&self, x: i32, y: i32) -> Option<(usize, u64)> {
        let dx = i64::from(x) - i64::from(self.x);
        let dy = i64::from(y) - i64::from(self.y);
        if dx < 0 || dy < 0 || dx >= i64::from(self.width) || dy >= i64::from(self.height) {
            return None;
        }
        let index = dy as u64 * u64::from(self.width) + dx as u64;
        Some(((index / 64) as usize, 1u64 << (index % 64)))
    }

    /// Out-of-range pixels are ignored.
    pub fn set(&mut self, x: i32, y: i32, value: bool) {
        if let Some((word, mask)) = self.bit(x, y) {
            if value {
                self.words[word] |= mask;
            } else {
                self.words[word] &= !mask;
            }
        }
    }

    /// Out-of-range pixels read as unset.
    pub fn get(&self, x: i32, y: i32) -> bool {
        self.bit(x, y)
            .is_some_and(|(word, mask)| self.words[word] & mask != 0)
    }

    pub fn set_all(&mut self, value: bool) {
        let fill = if value { u64::MAX } else { 0 };
        self.words.fill(fill);
        if value {
            self.clear_tail();
        }
    }

    /// Keep bits past `width * height` at zero so `covered_count` stays exact.
    fn clear_tail(&mut self) {
        let bits = u64::from(self.width) * u64::from(self.height);
        let used = (bits % 64) as u32;
        if used != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << used) - 1;
        }
    }

    /// Mark `(x, y)` and report whether it was free. Returns `true` for out-of-range
    /// pixels: nothing can be elided off-screen.
    pub fn check_and_set(&mut self, x: i32, y: i32) -> bool {
        match self.bit(x, y) {
            Some((word, mask)) => {
                let free = self.words[word] & mask == 0;
                self.words[word] |= mask;
                free
            }
            None => true,
        }
    }

    /// True when a screen-space envelope fits inside one pixel span.
    pub fn can_simplify(&self, envelope: &Envelope, span_x: f64, span_y: f64) -> bool {
        !envelope.is_empty() && envelope.width() < span_x && envelope.height() < span_y
    }

    pub fn covered_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
