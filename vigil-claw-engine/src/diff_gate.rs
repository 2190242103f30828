//! Pixel-diff gate — skip model evaluation when the screen hasn't changed.

use crate::types::Frame;

/// Downsampled copy of the previous frame, kept per job.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Downsampled {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Compares consecutive frames; `should_evaluate` returns true when enough
/// pixels changed since the last call.
#[derive(Debug, Clone)]
pub struct DiffGate {
    downsample_width: u32,
    pixel_threshold: u8,
    change_ratio: f64,
    last: Option<Downsampled>,
    last_change_ratio: f64,
}

impl DiffGate {
    #[must_use]
    pub fn new(downsample_width: u32, pixel_threshold: u8, change_ratio: f64) -> Self {
        Self {
            downsample_width: downsample_width.max(1),
            pixel_threshold,
            change_ratio,
            last: None,
            last_change_ratio: 0.0,
        }
    }

    /// Fraction of pixels that changed on the most recent call.
    #[must_use]
    pub fn last_change_ratio(&self) -> f64 {
        self.last_change_ratio
    }

    /// Decide whether `frame` differs enough from the previous one to be
    /// worth a vision call. The first frame always does; so does any frame
    /// whose dimensions differ from the previous (window resizes break
    /// direct comparison).
    pub fn should_evaluate(&mut self, frame: &Frame) -> bool {
        let current = self.downsample(frame);

        let Some(previous) = self.last.take() else {
            self.last_change_ratio = 1.0;
            self.last = Some(current);
            return true;
        };

        if previous.width != current.width || previous.height != current.height {
            self.last_change_ratio = 1.0;
            self.last = Some(current);
            return true;
        }

        let changed = previous
            .pixels
            .iter()
            .zip(current.pixels.iter())
            .filter(|(a, b)| a.abs_diff(**b) > self.pixel_threshold)
            .count();
        self.last_change_ratio = changed as f64 / current.pixels.len().max(1) as f64;
        self.last = Some(current);

        self.last_change_ratio > self.change_ratio
    }

    /// Forget the previous frame; the next call evaluates unconditionally.
    pub fn reset(&mut self) {
        self.last = None;
        self.last_change_ratio = 0.0;
    }

    /// Integer-stride downsample so the wider dimension is at most
    /// `downsample_width`.
    fn downsample(&self, frame: &Frame) -> Downsampled {
        let wider = frame.width.max(frame.height).max(1);
        let stride = wider.div_ceil(self.downsample_width).max(1) as usize;

        let out_w = (frame.width as usize).div_ceil(stride);
        let out_h = (frame.height as usize).div_ceil(stride);
        let mut pixels = Vec::with_capacity(out_w * out_h * 3);

        let row_bytes = frame.width as usize * 3;
        for y in (0..frame.height as usize).step_by(stride) {
            let row = &frame.pixels[y * row_bytes..(y + 1) * row_bytes];
            for x in (0..frame.width as usize).step_by(stride) {
                pixels.extend_from_slice(&row[x * 3..x * 3 + 3]);
            }
        }

        Downsampled {
            width: out_w as u32,
            height: out_h as u32,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(width, height, vec![value; (width * height * 3) as usize])
    }

    fn gate() -> DiffGate {
        DiffGate::new(320, 10, 0.01)
    }

    #[test]
    fn test_first_frame_always_evaluates() {
        let mut gate = gate();
        assert!(gate.should_evaluate(&solid_frame(64, 64, 100)));
        assert!((gate.last_change_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_identical_frames_skip_after_first() {
        let mut gate = gate();
        let frame = solid_frame(64, 64, 100);
        assert!(gate.should_evaluate(&frame));
        for _ in 0..5 {
            assert!(!gate.should_evaluate(&frame));
        }
    }

    #[test]
    fn test_full_change_evaluates() {
        let mut gate = gate();
        assert!(gate.should_evaluate(&solid_frame(64, 64, 0)));
        assert!(gate.should_evaluate(&solid_frame(64, 64, 255)));
        assert!((gate.last_change_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sub_threshold_intensity_change_skips() {
        let mut gate = gate();
        assert!(gate.should_evaluate(&solid_frame(64, 64, 100)));
        // Every pixel moves by less than the per-channel threshold.
        assert!(!gate.should_evaluate(&solid_frame(64, 64, 105)));
    }

    #[test]
    fn test_small_region_change_skips() {
        let mut gate = gate();
        let base = solid_frame(100, 100, 0);
        assert!(gate.should_evaluate(&base));

        // Flip a handful of pixels — well under 1% of the frame.
        let mut nudged = base.clone();
        for i in 0..5 {
            nudged.pixels[i * 3] = 255;
        }
        assert!(!gate.should_evaluate(&nudged));
    }

    #[test]
    fn test_large_region_change_evaluates() {
        let mut gate = gate();
        let base = solid_frame(100, 100, 0);
        assert!(gate.should_evaluate(&base));

        // Repaint the top 10% of rows.
        let mut changed = base.clone();
        for px in changed.pixels[..100 * 10 * 3].iter_mut() {
            *px = 255;
        }
        assert!(gate.should_evaluate(&changed));
        assert!(gate.last_change_ratio() > 0.05);
    }

    #[test]
    fn test_dimension_change_evaluates() {
        let mut gate = gate();
        assert!(gate.should_evaluate(&solid_frame(64, 64, 0)));
        assert!(gate.should_evaluate(&solid_frame(80, 64, 0)));
    }

    #[test]
    fn test_reset_forces_next_evaluation() {
        let mut gate = gate();
        let frame = solid_frame(64, 64, 100);
        assert!(gate.should_evaluate(&frame));
        assert!(!gate.should_evaluate(&frame));
        gate.reset();
        assert!(gate.should_evaluate(&frame));
    }

    #[test]
    fn test_downsample_bounds_wider_dimension() {
        let gate = DiffGate::new(320, 10, 0.01);
        let frame = solid_frame(1920, 1080, 7);
        let down = gate.downsample(&frame);
        assert!(down.width <= 320);
        assert!(down.height <= 320);
        assert_eq!(down.pixels.len(), (down.width * down.height * 3) as usize);
    }

    #[test]
    fn test_downsample_is_deterministic() {
        let gate = DiffGate::new(320, 10, 0.01);
        let frame = solid_frame(640, 480, 42);
        assert_eq!(gate.downsample(&frame), gate.downsample(&frame));
    }

    #[test]
    fn test_small_frame_not_upsampled() {
        let gate = DiffGate::new(320, 10, 0.01);
        let frame = solid_frame(100, 50, 1);
        let down = gate.downsample(&frame);
        assert_eq!((down.width, down.height), (100, 50));
    }
}
