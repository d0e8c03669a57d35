use crate::FrameView;
use serde::Deserialize;

/// Intensity window applied when a frame is drawn.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Norm {
    pub min: u64,
    pub max: u64,
    pub auto_range: bool,
}

impl Default for Norm {
    fn default() -> Self {
        Self {
            min: 0,
            max: 0,
            auto_range: true,
        }
    }
}

impl Norm {
    /// Fit the window to `frame` when auto ranging.
    pub fn fit(&mut self, frame: &FrameView<'_>) {
        if !self.auto_range {
            return;
        }
        if let Some((lo, hi)) = frame.value_range() {
            self.min = lo;
            self.max = hi;
        }
    }

    /// Map a raw pixel value to 0..=255.
    pub fn level(&self, value: u64) -> u8 {
        if self.max <= self.min {
            return if value > self.min { u8::MAX } else { 0 };
        }
        let clamped = value.clamp(self.min, self.max);
        ((clamped - self.min) as u128 * 255 / (self.max - self.min) as u128) as u8
    }
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Grayscale,
    Temperature,
}

const TEMPERATURE: [(f32, f32, f32); 4] = [
    (0.0, 0.0, 1.0), // blue
    (0.0, 1.0, 0.0), // green
    (1.0, 1.0, 0.0), // yellow
    (1.0, 0.0, 0.0), // red
];

impl Colormap {
    pub fn rgb(self, level: u8) -> (u8, u8, u8) {
        match self {
            Colormap::Grayscale => (level, level, level),
            Colormap::Temperature => {
                let segments = (TEMPERATURE.len() - 1) as f32;
                let pos = level as f32 / 255.0 * segments;
                let base = (pos as usize).min(TEMPERATURE.len() - 2);
                let factor = pos - base as f32;
                let (a, b) = (TEMPERATURE[base], TEMPERATURE[base + 1]);
                let mix = |x: f32, y: f32| ((x * (1.0 - factor) + y * factor) * 255.0).round() as u8;
                (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Depth;

    #[test]
    fn auto_range_fits_frame() {
        let data = [10u8, 20, 30, 250];
        let frame = FrameView {
            width: 2,
            height: 2,
            depth: Depth::U8,
            data: &data,
        };
        let mut norm = Norm::default();
        norm.fit(&frame);
        assert_eq!((norm.min, norm.max), (10, 250));
        assert_eq!(norm.level(10), 0);
        assert_eq!(norm.level(250), 255);
        assert_eq!(norm.level(130), 127);
    }

    #[test]
    fn manual_range_is_kept() {
        let data = [0u8, 255];
        let frame = FrameView {
            width: 2,
            height: 1,
            depth: Depth::U8,
            data: &data,
        };
        let mut norm = Norm {
            min: 100,
            max: 200,
            auto_range: false,
        };
        norm.fit(&frame);
        assert_eq!((norm.min, norm.max), (100, 200));
        assert_eq!(norm.level(50), 0);
        assert_eq!(norm.level(255), 255);
    }

    #[test]
    fn flat_frame_does_not_divide_by_zero() {
        let norm = Norm {
            min: 7,
            max: 7,
            auto_range: true,
        };
        assert_eq!(norm.level(7), 0);
        assert_eq!(norm.level(8), 255);
    }

    #[test]
    fn temperature_runs_blue_to_red() {
        assert_eq!(Colormap::Temperature.rgb(0), (0, 0, 255));
        assert_eq!(Colormap::Temperature.rgb(255), (255, 0, 0));
        assert_eq!(Colormap::Grayscale.rgb(42), (42, 42, 42));
    }
}
