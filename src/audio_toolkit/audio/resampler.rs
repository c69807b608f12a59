use std::time::Duration;

/// Converts arbitrary-length mono buffers at the capture rate into
/// fixed-size PCM16 frames at the transport rate.
///
/// Runs inside the audio callback, so every call is synchronous and does a
/// bounded amount of work: no I/O, no locks, and scratch buffers that never
/// grow past one input buffer plus one frame.
pub struct FrameResampler {
    /// Source samples consumed per emitted sample (input rate / output rate).
    step: f64,
    /// Fractional read position into `in_buf`.
    src_pos: f64,
    /// Input samples not yet fully consumed by interpolation.
    in_buf: Vec<f32>,
    frame_samples: usize,
    /// Quantized output waiting to fill a complete frame.
    pending: Vec<i16>,
}

impl FrameResampler {
    pub fn new(in_hz: u32, out_hz: u32, frame_dur: Duration) -> Self {
        let frame_samples = (out_hz as f64 * frame_dur.as_secs_f64()).round() as usize;
        assert!(frame_samples > 0, "frame duration too short");
        assert!(in_hz > 0 && out_hz > 0, "sample rates must be nonzero");

        Self {
            step: in_hz as f64 / out_hz as f64,
            src_pos: 0.0,
            in_buf: Vec::new(),
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Feed one capture buffer, invoking `emit` once per completed frame.
    ///
    /// Every emitted slice has exactly `frame_samples` samples; a trailing
    /// partial frame stays buffered until later input completes it.
    pub fn push(&mut self, src: &[f32], mut emit: impl FnMut(&[i16])) {
        self.in_buf.extend_from_slice(src);

        loop {
            let base = self.src_pos as usize;
            // Interpolation needs the sample after `base`; wait for more input.
            if base + 1 >= self.in_buf.len() {
                break;
            }
            let t = self.src_pos - base as f64;
            let a = self.in_buf[base] as f64;
            let b = self.in_buf[base + 1] as f64;
            self.pending.push(quantize(a * (1.0 - t) + b * t));
            self.src_pos += self.step;

            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }

        // Drop input that interpolation has moved past, keeping the pair
        // still referenced by the cursor.
        let consumed = (self.src_pos as usize).min(self.in_buf.len());
        if consumed > 0 {
            self.in_buf.drain(..consumed);
            self.src_pos -= consumed as f64;
        }
    }
}

/// Clamp to the legal float range, then round into i16.
///
/// Clamping comes first: capture transients can exceed full scale and must
/// not wrap during integer conversion.
fn quantize(x: f64) -> i16 {
    (x.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_20MS: Duration = Duration::from_millis(20);

    /// Reference: resample the whole signal in one pass with the same
    /// cursor rule the streaming path uses.
    fn reference_resample(input: &[f32], in_hz: u32, out_hz: u32) -> Vec<i16> {
        let step = in_hz as f64 / out_hz as f64;
        let mut out = Vec::new();
        let mut pos = 0.0f64;
        loop {
            let base = pos as usize;
            if base + 1 >= input.len() {
                break;
            }
            let t = pos - base as f64;
            let v = input[base] as f64 * (1.0 - t) + input[base + 1] as f64 * t;
            out.push(quantize(v));
            pos += step;
        }
        out
    }

    fn collect_frames(
        resampler: &mut FrameResampler,
        input: &[f32],
        chunk: usize,
    ) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        for part in input.chunks(chunk) {
            resampler.push(part, |frame| frames.push(frame.to_vec()));
        }
        frames
    }

    #[test]
    fn frames_always_have_configured_size() {
        let input: Vec<f32> = (0..48_000).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
        for chunk in [1usize, 7, 480, 1024, 4096] {
            let mut rs = FrameResampler::new(48_000, 16_000, FRAME_20MS);
            let frames = collect_frames(&mut rs, &input, chunk);
            assert!(!frames.is_empty());
            for frame in &frames {
                assert_eq!(frame.len(), 320);
            }
        }
    }

    #[test]
    fn chunking_does_not_change_the_signal() {
        let input: Vec<f32> = (0..9_600)
            .map(|i| (i as f32 * 0.013).sin() * 0.8)
            .collect();
        let reference = reference_resample(&input, 48_000, 16_000);

        for chunk in [3usize, 100, 480, 1000] {
            let mut rs = FrameResampler::new(48_000, 16_000, FRAME_20MS);
            let emitted: Vec<i16> = collect_frames(&mut rs, &input, chunk)
                .into_iter()
                .flatten()
                .collect();
            // The tail past the last complete frame is still buffered.
            assert_eq!(emitted[..], reference[..emitted.len()]);
            assert!(reference.len() - emitted.len() < 320);
        }
    }

    #[test]
    fn upsampling_interpolates_between_neighbors() {
        // 250us at 16 kHz = 4-sample frames, so the doubled signal fits one frame.
        let mut rs = FrameResampler::new(8_000, 16_000, Duration::from_micros(250));
        let mut out = Vec::new();
        rs.push(&[0.0, 1.0, 0.0], |frame| out.extend_from_slice(frame));
        // Positions 0, 0.5, 1.0, 1.5 over [0, 1, 0].
        assert_eq!(out, vec![0, 16384, 32767, 16384]);
    }

    #[test]
    fn identity_rate_passes_samples_through() {
        let input: Vec<f32> = (0..640).map(|i| (i as f32 / 640.0) - 0.5).collect();
        let mut rs = FrameResampler::new(16_000, 16_000, FRAME_20MS);
        let mut out = Vec::new();
        rs.push(&input, |frame| out.extend_from_slice(frame));
        let reference = reference_resample(&input, 16_000, 16_000);
        assert_eq!(out[..], reference[..out.len()]);
    }

    #[test]
    fn clamps_out_of_range_transients() {
        let mut rs = FrameResampler::new(16_000, 16_000, Duration::from_millis(1));
        let loud = vec![4.0f32; 40];
        let mut out = Vec::new();
        rs.push(&loud, |frame| out.extend_from_slice(frame));
        assert!(!out.is_empty());
        assert!(out.iter().all(|&s| s == 32767));

        let mut rs = FrameResampler::new(16_000, 16_000, Duration::from_millis(1));
        let quietest = vec![-4.0f32; 40];
        out.clear();
        rs.push(&quietest, |frame| out.extend_from_slice(frame));
        assert!(out.iter().all(|&s| s == -32767));
    }

    #[test]
    fn partial_frame_is_never_emitted() {
        let mut rs = FrameResampler::new(16_000, 16_000, FRAME_20MS);
        let mut frames = 0usize;
        // 319 output samples: one short of a frame.
        rs.push(&vec![0.1f32; 320], |_| frames += 1);
        assert_eq!(frames, 0);
        // One more buffer completes it.
        rs.push(&vec![0.1f32; 320], |_| frames += 1);
        assert_eq!(frames, 1);
    }

    #[test]
    fn carry_buffer_stays_bounded() {
        let mut rs = FrameResampler::new(48_000, 16_000, FRAME_20MS);
        for _ in 0..100 {
            rs.push(&vec![0.0f32; 480], |_| {});
            assert!(rs.in_buf.len() <= 480 + 2);
            assert!(rs.pending.len() < rs.frame_samples);
        }
    }
}
