//! Linear Resampler
//!
//! Converts interleaved stereo blocks from a source rate to a destination
//! rate by linear interpolation between adjacent source frames. A
//! fractional phase is carried across calls so successive blocks line up
//! without clicks at the seams.
//!
//! The interpolation anchor starts as a silent frame, so the very first
//! output interpolates up from zero (a one-frame fade-in) and every call
//! spans exactly its input's worth of source time - the per-call output
//! length is always within one frame of `input_frames * dst / src`.
//!
//! Quality note: linear interpolation aliases on strong high-frequency
//! content. It is cheap, allocation-free after warm-up, and good enough
//! for reconciling nearby device rates (44.1k vs 48k).

/// Stateful stereo resampler between two fixed rates.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    /// Last source frame consumed, interpolation anchor for the next block
    prev: [f32; 2],
    /// Position of the next output sample, in source frames past `prev`
    frac: f64,
}

impl LinearResampler {
    /// Rates must be positive; equal rates make the resampler an identity.
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        debug_assert!(src_rate > 0 && dst_rate > 0);
        Self {
            src_rate,
            dst_rate,
            prev: [0.0; 2],
            frac: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.src_rate == self.dst_rate
    }

    /// Source frames consumed per output frame.
    fn step(&self) -> f64 {
        self.src_rate as f64 / self.dst_rate as f64
    }

    /// Upper bound on output frames produced for `input_frames`, used to
    /// reserve buffer capacity up front.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        if self.is_identity() {
            return input_frames;
        }
        (input_frames as f64 * self.dst_rate as f64 / self.src_rate as f64).ceil() as usize + 1
    }

    /// Resample one interleaved stereo block, appending to `out`.
    ///
    /// The input length must be even (whole frames). Output length is
    /// deterministic given the input length, the rates, and the phase
    /// carried from prior calls.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        debug_assert!(input.len() % 2 == 0, "input must be whole stereo frames");

        if self.is_identity() {
            out.extend_from_slice(input);
            return;
        }

        let frames = input.len() / 2;
        if frames == 0 {
            return;
        }

        let frame = |i: usize| [input[2 * i], input[2 * i + 1]];
        let step = self.step();
        let mut prev = self.prev;
        let mut frac = self.frac;
        // Next input frame to fold into the anchor; the anchor sits at
        // relative position 0, input frame i at position i + 1
        let mut idx = 0;

        loop {
            // Advance the anchor until it brackets the output position
            while frac >= 1.0 && idx < frames {
                prev = frame(idx);
                idx += 1;
                frac -= 1.0;
            }
            if frac >= 1.0 || idx >= frames {
                // Ran out of source; the residue carries into the next call
                break;
            }

            let next = frame(idx);
            let t = frac as f32;
            out.push(prev[0] + (next[0] - prev[0]) * t);
            out.push(prev[1] + (next[1] - prev[1]) * t);
            frac += step;
        }

        // At exit every input frame has been folded into the anchor, so
        // `frac` is the residual position past the block's last frame and
        // the next call lines up exactly
        self.prev = prev;
        self.frac = frac;
    }

    /// Clear the phase and the stored anchor frame.
    pub fn reset(&mut self) {
        self.prev = [0.0; 2];
        self.frac = 0.0;
    }
}
