use crate::Depth;
use ndarray::{s, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Gaussian spot: centre, full width at half maximum, peak height.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GaussPeak {
    pub x0: f64,
    pub y0: f64,
    pub fwhm: f64,
    pub max: f64,
}

impl GaussPeak {
    pub const fn new(x0: f64, y0: f64, fwhm: f64, max: f64) -> Self {
        Self { x0, y0, fwhm, max }
    }
}

pub const DEFAULT_PEAKS: [GaussPeak; 4] = [
    GaussPeak::new(924.0, 512.0, 100.0, 100.0),
    GaussPeak::new(757.0, 512.0, 30.0, 80.0),
    GaussPeak::new(562.0, 512.0, 50.0, 120.0),
    GaussPeak::new(652.0, 512.0, 10.0, 130.0),
];

pub const DEFAULT_PEAK_ANGLES: [f64; 4] = [180.0, 110.0, 20.0, 305.0];

/// Peaks are evaluated within this many FWHM of their centre.
const SUPPORT: f64 = 3.0;

/// Synthesises frames of Gaussian peaks that rotate about the frame centre.
#[derive(Debug)]
pub struct FrameBuilder {
    width: usize,
    height: usize,
    depth: Depth,
    peaks: Vec<GaussPeak>,
    angles: Vec<f64>,
    rotation_speed: f64,
    noise: u64,
    rng: StdRng,
    frame_nr: u64,
}

impl FrameBuilder {
    pub fn new(width: usize, height: usize, depth: Depth) -> Self {
        Self {
            width,
            height,
            depth,
            peaks: Vec::new(),
            angles: Vec::new(),
            rotation_speed: 0.0,
            noise: 0,
            rng: StdRng::from_os_rng(),
            frame_nr: 0,
        }
    }

    pub fn with_default_peaks(mut self) -> Self {
        self.set_peaks(&DEFAULT_PEAKS);
        self.set_peak_angles(&DEFAULT_PEAK_ANGLES);
        self
    }

    /// Uniform noise in `0..=amplitude` added to every pixel.
    pub fn with_noise(mut self, amplitude: u64) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn set_peaks(&mut self, peaks: &[GaussPeak]) {
        self.peaks = peaks.to_vec();
    }

    /// Starting angle of each peak, in degrees. Missing entries mean 0.
    pub fn set_peak_angles(&mut self, angles: &[f64]) {
        self.angles = angles.to_vec();
    }

    /// Degrees per frame.
    pub fn set_rotation_speed(&mut self, speed: f64) {
        self.rotation_speed = speed;
    }

    pub fn dimensions(&self) -> (usize, usize, Depth) {
        (self.width, self.height, self.depth)
    }

    pub fn reset(&mut self) {
        self.frame_nr = 0;
    }

    /// Centre of every peak in frame `frame_nr`.
    pub fn peak_positions(&self, frame_nr: u64) -> Vec<(f64, f64)> {
        let cx = self.width as f64 / 2.0;
        let cy = self.height as f64 / 2.0;
        self.peaks
            .iter()
            .enumerate()
            .map(|(i, peak)| {
                let start = self.angles.get(i).copied().unwrap_or(0.0);
                let angle = (start + frame_nr as f64 * self.rotation_speed).to_radians();
                let (dx, dy) = (peak.x0 - cx, peak.y0 - cy);
                let (sin, cos) = angle.sin_cos();
                (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
            })
            .collect()
    }

    /// Noise-free intensity of frame `frame_nr`, indexed `[row, column]`.
    pub fn render(&self, frame_nr: u64) -> Array2<f64> {
        let mut image = Array2::<f64>::zeros((self.height, self.width));
        for (peak, (px, py)) in self.peaks.iter().zip(self.peak_positions(frame_nr)) {
            if peak.fwhm <= 0.0 {
                continue;
            }
            let reach = SUPPORT * peak.fwhm;
            let x0 = (px - reach).floor().max(0.0) as usize;
            let y0 = (py - reach).floor().max(0.0) as usize;
            let x1 = ((px + reach).ceil().max(0.0) as usize).min(self.width);
            let y1 = ((py + reach).ceil().max(0.0) as usize).min(self.height);
            if x0 >= x1 || y0 >= y1 {
                continue;
            }
            // exp(-4 ln2 r^2 / fwhm^2) is 1/2 at r = fwhm/2
            let k = 4.0 * std::f64::consts::LN_2 / (peak.fwhm * peak.fwhm);
            let mut window = image.slice_mut(s![y0..y1, x0..x1]);
            for ((r, c), value) in window.indexed_iter_mut() {
                let dx = (x0 + c) as f64 - px;
                let dy = (y0 + r) as f64 - py;
                *value += peak.max * (-k * (dx * dx + dy * dy)).exp();
            }
        }
        image
    }

    /// Encode the next frame in native byte order and advance.
    pub fn next_frame(&mut self) -> Vec<u8> {
        let image = self.render(self.frame_nr);
        let full_scale = self.depth.max_value();
        let mut out = vec![0u8; self.width * self.height * self.depth.bytes()];
        for (idx, value) in image.iter().enumerate() {
            let noise = if self.noise > 0 {
                self.rng.random_range(0..=self.noise)
            } else {
                0
            };
            let level = (value.round() as u64).saturating_add(noise).min(full_scale);
            self.depth.store(&mut out, idx, level);
        }
        self.frame_nr += 1;
        out
    }
}
