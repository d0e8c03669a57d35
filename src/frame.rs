use crate::DisplayError;

/// Bytes per pixel of a frame.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Depth {
    U8 = 1,
    U16 = 2,
    U32 = 4,
}

impl Depth {
    pub fn from_bytes(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Full-scale pixel value for this depth.
    pub fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
        }
    }

    /// Write `value` at pixel index `idx` of `data` in native byte order.
    pub fn store(self, data: &mut [u8], idx: usize, value: u64) {
        let off = idx * self.bytes();
        match self {
            Self::U8 => data[off] = value as u8,
            Self::U16 => data[off..off + 2].copy_from_slice(&(value as u16).to_ne_bytes()),
            Self::U32 => data[off..off + 4].copy_from_slice(&(value as u32).to_ne_bytes()),
        }
    }

    /// Read pixel index `idx` of `data` in native byte order.
    pub fn load(self, data: &[u8], idx: usize) -> u64 {
        let off = idx * self.bytes();
        match self {
            Self::U8 => data[off] as u64,
            Self::U16 => u16::from_ne_bytes([data[off], data[off + 1]]) as u64,
            Self::U32 => {
                u32::from_ne_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]) as u64
            }
        }
    }
}

/// Selects whether the synthetic test pattern replaces live data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TestImage {
    #[default]
    Off,
    Pattern,
}

impl TestImage {
    pub fn toggled(self) -> Self {
        match self {
            TestImage::Off => TestImage::Pattern,
            TestImage::Pattern => TestImage::Off,
        }
    }
}

/// Borrowed view of the frame that would be rendered.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub depth: Depth,
    pub data: &'a [u8],
}

impl FrameView<'_> {
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> u64 {
        self.depth.load(self.data, y * self.width + x)
    }

    /// Smallest and largest pixel value, or `None` for an empty frame.
    pub fn value_range(&self) -> Option<(u64, u64)> {
        (0..self.pixels()).fold(None, |acc, idx| {
            let v = self.depth.load(self.data, idx);
            match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            }
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Shape {
    width: usize,
    height: usize,
    depth: Depth,
}

impl Shape {
    fn len(&self) -> usize {
        self.width * self.height * self.depth.bytes()
    }
}

/// Owned pixel buffer with an optional synthetic test image laid over it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    shape: Option<Shape>,
    data: Vec<u8>,
    test_mode: TestImage,
    test_data: Vec<u8>,
    generation: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    /// Replace the frame. The previous frame is kept untouched on error.
    pub fn set_buffer(
        &mut self,
        bytes: &[u8],
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<(), DisplayError> {
        let invalid = || DisplayError::InvalidDimensions {
            len: bytes.len(),
            width,
            height,
            depth,
        };
        let depth_kind = Depth::from_bytes(depth).ok_or_else(invalid)?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        let shape = Shape {
            width,
            height,
            depth: depth_kind,
        };
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(depth))
            .ok_or_else(invalid)?;
        if bytes.len() != expected {
            return Err(invalid());
        }

        let resized = self.shape != Some(shape);
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.shape = Some(shape);
        if resized && self.test_mode == TestImage::Pattern {
            self.build_test_image();
        }
        self.generation += 1;
        Ok(())
    }

    /// Switch the synthetic pattern on or off. Returns true if the rendered
    /// frame changes as a result.
    pub fn set_test_image(&mut self, mode: TestImage) -> bool {
        if mode == self.test_mode {
            return false;
        }
        self.test_mode = mode;
        match mode {
            TestImage::Pattern => self.build_test_image(),
            TestImage::Off => self.test_data = Vec::new(),
        }
        if self.shape.is_some() {
            self.generation += 1;
            true
        } else {
            false
        }
    }

    pub fn test_image(&self) -> TestImage {
        self.test_mode
    }

    /// Changes whenever the active frame changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dimensions(&self) -> Option<(usize, usize, usize)> {
        self.shape.map(|s| (s.width, s.height, s.depth.bytes()))
    }

    /// The frame to render: the test image while active, live data otherwise.
    pub fn active(&self) -> Option<FrameView<'_>> {
        let shape = self.shape?;
        let data = match self.test_mode {
            TestImage::Pattern => &self.test_data,
            TestImage::Off => &self.data,
        };
        Some(FrameView {
            width: shape.width,
            height: shape.height,
            depth: shape.depth,
            data,
        })
    }

    fn build_test_image(&mut self) {
        let Some(shape) = self.shape else {
            return;
        };
        let mut data = vec![0u8; shape.len()];
        let max = shape.depth.max_value();
        let span = (shape.width + shape.height) as u64;
        for i in 0..shape.height {
            for j in 0..shape.width {
                let value = (i + j) as u64 * max / span;
                shape.depth.store(&mut data, i * shape.width + j, value);
            }
        }
        self.test_data = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_buffer_accepts_every_depth() {
        for depth in [1, 2, 4] {
            let mut fb = FrameBuffer::new();
            let payload: Vec<u8> = (0..3 * 5 * depth).map(|b| b as u8).collect();
            fb.set_buffer(&payload, 3, 5, depth).unwrap();
            let view = fb.active().unwrap();
            assert_eq!((view.width, view.height, view.depth.bytes()), (3, 5, depth));
            assert_eq!(view.data, &payload[..]);
        }
    }

    #[test]
    fn mismatched_payload_keeps_previous_frame() {
        let mut fb = FrameBuffer::new();
        fb.set_buffer(&[7u8; 4], 2, 2, 1).unwrap();
        let gen = fb.generation();

        let err = fb.set_buffer(&[1u8; 5], 2, 2, 1).unwrap_err();
        assert!(matches!(err, DisplayError::InvalidDimensions { len: 5, .. }));
        assert!(fb.set_buffer(&[1u8; 12], 2, 2, 3).is_err());
        assert!(fb.set_buffer(&[], 0, 2, 1).is_err());

        assert_eq!(fb.generation(), gen);
        assert_eq!(fb.active().unwrap().data, &[7u8; 4]);
    }

    #[test]
    fn test_pattern_differs_from_zero_frame() {
        let mut fb = FrameBuffer::new();
        fb.set_buffer(&[0u8; 16], 4, 4, 1).unwrap();
        assert!(fb.set_test_image(TestImage::Pattern));

        let view = fb.active().unwrap();
        assert_eq!((view.width, view.height, view.depth), (4, 4, Depth::U8));
        assert_ne!(view.data, &[0u8; 16]);
        // gradient grows along both axes
        assert_eq!(view.pixel(0, 0), 0);
        assert_eq!(view.pixel(3, 3), 6 * 255 / 8);

        assert!(fb.set_test_image(TestImage::Off));
        assert_eq!(fb.active().unwrap().data, &[0u8; 16]);
    }

    #[test]
    fn test_pattern_waits_for_dimensions() {
        let mut fb = FrameBuffer::new();
        assert!(!fb.set_test_image(TestImage::Pattern));
        assert!(fb.active().is_none());

        fb.set_buffer(&[0u8; 8], 2, 2, 2).unwrap();
        let view = fb.active().unwrap();
        assert_eq!(view.pixel(1, 1), 2 * 65535 / 4);

        assert!(fb.set_test_image(TestImage::Off));
        assert_eq!(fb.active().unwrap().data, &[0u8; 8]);
    }

    #[test]
    fn value_range_reads_native_endian_pixels() {
        let mut fb = FrameBuffer::new();
        let mut payload = Vec::new();
        for v in [5u16, 900, 3, 40] {
            payload.extend_from_slice(&v.to_ne_bytes());
        }
        fb.set_buffer(&payload, 2, 2, 2).unwrap();
        assert_eq!(fb.active().unwrap().value_range(), Some((3, 900)));
    }
}
