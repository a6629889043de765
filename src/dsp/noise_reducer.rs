//! Single-channel STFT noise reducer: windowed overlap-add analysis,
//! noise-profile learning, spectral-subtraction gain, synthesis
//! (spec.md §4.3).

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::dsp::stft::StftState;
use crate::dsp::window::hann_window;
use crate::error::{PipelineError, Result};

const EPS: f32 = 1e-10;

/// Steady-state overlap-add denominator for windowing applied at both
/// analysis and synthesis: at hop-aligned output position `i` (0 <= i <
/// hop_size), every frame boundary that ever contributes to that sample
/// lands `hop_size` apart, so the total weight is the sum of
/// `analysis[p] * synthesis[p]` over `p = i, i + hop_size, i + 2*hop_size,
/// ...` within one frame. A matched Hann pair at 50% overlap sums to a
/// constant; this works for any configured overlap, not just 50%.
fn overlap_add_norm(
    analysis: &[f32],
    synthesis: &[f32],
    frame_size: usize,
    hop_size: usize,
) -> Vec<f32> {
    let mut norm = vec![0.0f32; hop_size];
    for (i, slot) in norm.iter_mut().enumerate() {
        let mut pos = i;
        let mut sum = 0.0f32;
        while pos < frame_size {
            sum += analysis[pos] * synthesis[pos];
            pos += hop_size;
        }
        *slot = sum;
    }
    norm
}

/// The only currently-supported noise-reduction algorithm
/// (spec.md §4.3). New variants would be added here and dispatched on
/// in `NoiseReducer::process_block`, not accepted as opaque strings at
/// runtime (spec.md §9 design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    SpectralSubtraction,
}

impl Algorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "spectral_subtraction" => Ok(Algorithm::SpectralSubtraction),
            other => Err(PipelineError::Config(format!(
                "unknown noise reduction algorithm: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoiseReducerConfig {
    pub frame_size: usize,
    pub overlap: usize,
    pub algorithm: Algorithm,
    /// Oversubtraction factor (alpha), default 2.0.
    pub oversubtraction: f32,
    /// Gain floor (beta), default 0.1.
    pub floor: f32,
    /// A posteriori SNR gate (theta), default 0.05.
    pub snr_gate: f32,
}

impl Default for NoiseReducerConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            overlap: 512,
            algorithm: Algorithm::SpectralSubtraction,
            oversubtraction: 2.0,
            floor: 0.1,
            snr_gate: 0.05,
        }
    }
}

/// Learned noise magnitude spectrum, bins `[0, F/2]` (spec.md §3).
#[derive(Debug, Clone)]
pub struct NoiseProfile {
    bins: Vec<f32>,
    ready: bool,
}

impl NoiseProfile {
    fn new(nyq_bins: usize) -> Self {
        Self {
            bins: vec![0.0; nyq_bins],
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    fn reset(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0.0);
        self.ready = false;
    }
}

/// Per-channel STFT noise reducer. One instance per microphone channel
/// (the Pipeline owns `N` of these); each learns its own noise profile.
pub struct NoiseReducer {
    config: NoiseReducerConfig,
    hop_size: usize,
    nyq: usize,

    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,

    analysis_window: Vec<f32>,
    synthesis_window: Vec<f32>,

    state: StftState,
    profile: NoiseProfile,

    // Scratch reused across calls; allocated once at init.
    spectrum: Vec<Complex<f32>>,
    magnitude: Vec<f32>,
    phase: Vec<f32>,
    synth_time: Vec<f32>,
    hop_out: Vec<f32>,

    // Running-mean accumulator for `update_noise_profile`.
    profile_accum: Vec<f32>,
    profile_frame_count: usize,

    input_scratch: Vec<f32>,

    /// Steady-state overlap-add denominator, length `hop_size`: the sum
    /// of `analysis_window[i] * synthesis_window[i]` across every frame
    /// that overlaps output position `i` (see `overlap_add_norm`).
    /// Dividing each emitted hop by this makes windowed overlap-add
    /// reconstruct a pass-through signal exactly instead of amplitude
    /// modulating it.
    ola_norm: Vec<f32>,
}

impl NoiseReducer {
    pub fn new(config: NoiseReducerConfig) -> Result<Self> {
        let f = config.frame_size;
        if f == 0 || (f & (f - 1)) != 0 {
            return Err(PipelineError::InvalidParam(format!(
                "frame_size {f} is not a power of two"
            )));
        }
        if config.overlap >= f {
            return Err(PipelineError::InvalidParam(format!(
                "overlap {} must be < frame_size {f}",
                config.overlap
            )));
        }

        let hop_size = f - config.overlap;
        let nyq = f / 2;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(f);
        let ifft = planner.plan_fft_inverse(f);
        let fft_scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let ifft_scratch = vec![Complex::default(); ifft.get_inplace_scratch_len()];

        let window = hann_window(f);
        let ola_norm = overlap_add_norm(&window, &window, f, hop_size);

        Ok(Self {
            config,
            hop_size,
            nyq,
            fft,
            ifft,
            fft_scratch,
            ifft_scratch,
            analysis_window: window.clone(),
            synthesis_window: window,
            state: StftState::new(f, hop_size),
            profile: NoiseProfile::new(nyq + 1),
            spectrum: vec![Complex::default(); f],
            magnitude: vec![0.0; nyq + 1],
            phase: vec![0.0; nyq + 1],
            synth_time: vec![0.0; f],
            hop_out: vec![0.0; hop_size],
            profile_accum: vec![0.0; nyq + 1],
            profile_frame_count: 0,
            input_scratch: vec![0.0; f],
            ola_norm,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn profile(&self) -> &NoiseProfile {
        &self.profile
    }

    pub fn reset_noise_profile(&mut self) {
        self.profile.reset();
        self.profile_accum.iter_mut().for_each(|v| *v = 0.0);
        self.profile_frame_count = 0;
    }

    /// Analysis-windows + forward-FFTs `frame` into `self.spectrum`,
    /// `self.magnitude`, `self.phase`.
    fn analyze(&mut self, frame: &[f32]) {
        for (i, (&s, &w)) in frame.iter().zip(self.analysis_window.iter()).enumerate() {
            self.spectrum[i] = Complex::new(s * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.fft_scratch);
        for k in 0..=self.nyq {
            self.magnitude[k] = self.spectrum[k].norm();
            self.phase[k] = self.spectrum[k].im.atan2(self.spectrum[k].re);
        }
    }

    /// Accumulates one half-frame into the running mean noise profile
    /// (spec.md §4.3 "Noise profile training").
    fn train_frame(&mut self, frame: &[f32]) {
        self.analyze(frame);
        self.profile_frame_count += 1;
        let n = self.profile_frame_count as f32;
        for k in 0..=self.nyq {
            self.profile_accum[k] += self.magnitude[k];
            self.profile.bins[k] = self.profile_accum[k] / n;
        }
        self.profile.ready = true;
    }

    /// Processes `samples` as non-overlapping frames strided by this
    /// reducer's configured hop size (DESIGN.md's resolution of
    /// spec.md §9's stride ambiguity). Frames past the last full
    /// `frame_size` window are not consumed. Does nothing if
    /// `samples.len() < frame_size`.
    pub fn update_noise_profile(&mut self, samples: &[f32]) {
        let f = self.config.frame_size;
        if samples.len() < f {
            return;
        }
        let mut pos = 0usize;
        while pos + f <= samples.len() {
            let frame = samples[pos..pos + f].to_vec();
            self.train_frame(&frame);
            pos += self.hop_size;
        }
    }

    /// Literal reading of spec.md §4.3: trains on non-overlapping
    /// half-frames strided by `frame_size / 2`, regardless of the
    /// configured `overlap`/hop (DESIGN.md's Open Question resolution
    /// #2 — `update_noise_profile` above strides by the configured hop
    /// instead; this preserves the spec's literal text for callers that
    /// want it).
    pub fn train_fixed_stride(&mut self, samples: &[f32]) {
        let f = self.config.frame_size;
        if samples.len() < f {
            return;
        }
        let stride = (f / 2).max(1);
        let mut pos = 0usize;
        while pos + f <= samples.len() {
            let frame = samples[pos..pos + f].to_vec();
            self.train_frame(&frame);
            pos += stride;
        }
    }

    fn compute_gain(&self, k: usize) -> f32 {
        let alpha = self.config.oversubtraction;
        let beta = self.config.floor;
        let theta = self.config.snr_gate;

        if !self.profile.is_ready() {
            return 1.0;
        }
        let m_k = self.magnitude[k];
        let n_k = self.profile.bins[k];
        let rho_k = m_k / (n_k + EPS);

        let g_k = if rho_k > theta {
            1.0 - alpha * (n_k / m_k.max(EPS))
        } else {
            beta
        };
        g_k.clamp(beta, 1.0)
    }

    /// Processes one frame once it's ready: applies spectral-subtraction
    /// gain, inverse-FFTs, windows for synthesis, and overlap-adds,
    /// emitting `hop_size` samples into `self.hop_out`.
    fn process_ready_frame(&mut self) {
        let frame = self.state.frame().to_vec();
        self.analyze(&frame);

        for k in 0..=self.nyq {
            let g = self.compute_gain(k);
            let mag = g * self.magnitude[k];
            let phi = self.phase[k];
            self.spectrum[k] = Complex::new(mag * phi.cos(), mag * phi.sin());
        }
        // Restore conjugate symmetry so the inverse transform is real.
        for k in 1..self.nyq {
            self.spectrum[self.config.frame_size - k] = self.spectrum[k].conj();
        }

        self.ifft.process_with_scratch(&mut self.spectrum, &mut self.ifft_scratch);

        let norm = 1.0 / self.config.frame_size as f32;
        for i in 0..self.config.frame_size {
            self.synth_time[i] = self.spectrum[i].re * norm * self.synthesis_window[i];
        }

        let mut hop_out = std::mem::take(&mut self.hop_out);
        self.state.overlap_add(&self.synth_time, &mut hop_out);
        for (s, n) in hop_out.iter_mut().zip(self.ola_norm.iter()) {
            *s /= n.max(EPS);
        }
        self.hop_out = hop_out;

        self.state.shift_input();
    }

    /// Processes a block of 16-bit PCM samples in place, noise-reducing
    /// the channel and returning the same number of samples it can
    /// currently emit (bounded by complete hops produced).
    pub fn process_block(&mut self, input: &[i16], output: &mut Vec<i16>) {
        let mut remaining = input;
        while !remaining.is_empty() {
            let space = self.state.space_left();
            debug_assert!(space > 0, "accumulation buffer must have room after a shift");
            let take = remaining.len().min(space);
            let slice = &remaining[..take];

            let buf = &mut self.input_scratch[..take];
            for (dst, &s) in buf.iter_mut().zip(slice.iter()) {
                *dst = s as f32 / 32768.0;
            }
            let consumed = self.state.push_samples(&self.input_scratch[..take]);
            debug_assert_eq!(consumed, take);

            if self.state.frame_ready() {
                self.process_ready_frame();
                for &s in &self.hop_out {
                    let clamped = s.clamp(-1.0, 1.0);
                    output.push(symmetric_round_i16(clamped));
                }
            }
            remaining = &remaining[take..];
        }
    }
}

fn symmetric_round_i16(x: f32) -> i16 {
    let scaled = x * 32767.0;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    rounded.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two_frame() {
        let cfg = NoiseReducerConfig {
            frame_size: 1000,
            ..Default::default()
        };
        assert!(NoiseReducer::new(cfg).is_err());
    }

    #[test]
    fn rejects_overlap_ge_frame_size() {
        let cfg = NoiseReducerConfig {
            frame_size: 512,
            overlap: 512,
            ..Default::default()
        };
        assert!(NoiseReducer::new(cfg).is_err());
    }

    #[test]
    fn gain_bounds_hold_for_all_bins() {
        let cfg = NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        };
        let mut nr = NoiseReducer::new(cfg).unwrap();
        let noise = vec![0.01f32; 64];
        nr.update_noise_profile(&noise);
        assert!(nr.profile().is_ready());

        let frame: Vec<f32> = sine(1000.0, 16000.0, 64, 0.5);
        nr.analyze(&frame);
        for k in 0..=nr.nyq {
            let g = nr.compute_gain(k);
            assert!(g >= nr.config.floor - 1e-6 && g <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn profile_averaging_matches_single_frame_after_identical_training() {
        let cfg = NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        };
        let mut nr = NoiseReducer::new(cfg).unwrap();
        let noise = sine(500.0, 16000.0, 64, 0.2);

        // Feed the identical 64-sample frame many times by disabling
        // stride advancement: call update_noise_profile repeatedly with
        // exactly one frame's worth of samples each time.
        for _ in 0..5 {
            nr.update_noise_profile(&noise);
        }

        let mut reference = NoiseReducer::new(NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        })
        .unwrap();
        reference.analyze(&noise);

        for (a, b) in nr.profile().bins().iter().zip(reference.magnitude.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn fixed_stride_training_matches_single_frame_for_identical_noise() {
        let cfg = NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        };
        let mut nr = NoiseReducer::new(cfg).unwrap();
        let noise = vec![0.02f32; 192]; // 3 fixed-stride (32-sample) frames worth

        nr.train_fixed_stride(&noise);
        assert!(nr.profile().is_ready());

        let mut reference = NoiseReducer::new(NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        })
        .unwrap();
        reference.analyze(&noise[..64]);

        for (a, b) in nr.profile().bins().iter().zip(reference.magnitude.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn short_training_input_is_ignored() {
        let cfg = NoiseReducerConfig {
            frame_size: 64,
            overlap: 32,
            ..Default::default()
        };
        let mut nr = NoiseReducer::new(cfg).unwrap();
        nr.update_noise_profile(&[0.0; 10]);
        assert!(!nr.profile().is_ready());
    }

    #[test]
    fn out_of_band_noise_is_reduced_by_at_least_6db_after_training() {
        // spec.md §8 scenario E3: train on the noise alone, then mix it
        // with a 1 kHz test tone; the noise residual (well clear of the
        // tone) must drop by >= 6 dB relative to running the same mix
        // through an untrained reducer.
        let cfg = NoiseReducerConfig {
            frame_size: 1024,
            overlap: 512,
            ..Default::default()
        };
        let sr = 16000.0;
        let noise_freq = 300.0;
        let tone_freq = 1000.0;

        let noise_train = sine(noise_freq, sr, 1024 * 8, 0.25);
        let mut trained = NoiseReducer::new(cfg).unwrap();
        trained.update_noise_profile(&noise_train);
        assert!(trained.profile().is_ready());

        let n_samples = 1024 * 6;
        let mixed: Vec<i16> = (0..n_samples)
            .map(|i| {
                let t = i as f32 / sr;
                let s = 0.4 * (2.0 * std::f32::consts::PI * tone_freq * t).sin()
                    + 0.25 * (2.0 * std::f32::consts::PI * noise_freq * t).sin();
                symmetric_round_i16(s)
            })
            .collect();

        let mut trained_out = Vec::new();
        trained.process_block(&mixed, &mut trained_out);

        let mut untrained = NoiseReducer::new(NoiseReducerConfig {
            frame_size: 1024,
            overlap: 512,
            ..Default::default()
        })
        .unwrap();
        let mut untrained_out = Vec::new();
        untrained.process_block(&mixed, &mut untrained_out);

        // Single-frequency magnitude projection (a manual DFT bin),
        // skipping the first frame's transient.
        fn tone_magnitude(samples: &[i16], freq: f32, sr: f32, skip: usize) -> f64 {
            let xs = &samples[skip..];
            let n = xs.len();
            let (mut re, mut im) = (0.0f64, 0.0f64);
            for (i, &s) in xs.iter().enumerate() {
                let phase = 2.0 * std::f64::consts::PI * freq as f64 * i as f64 / sr as f64;
                let x = s as f64 / 32768.0;
                re += x * phase.cos();
                im += x * phase.sin();
            }
            2.0 * (re * re + im * im).sqrt() / n as f64
        }

        let skip = 1024;
        assert!(untrained_out.len() > skip && trained_out.len() > skip);
        let before = tone_magnitude(&untrained_out, noise_freq, sr, skip);
        let after = tone_magnitude(&trained_out, noise_freq, sr, skip);
        let reduction_db = 20.0 * (before / after.max(1e-9)).log10();
        assert!(
            reduction_db >= 6.0,
            "only {reduction_db:.2} dB reduction (before={before:.5} after={after:.5})"
        );
    }

    #[test]
    fn passthrough_identity_without_profile() {
        let cfg = NoiseReducerConfig {
            frame_size: 256,
            overlap: 128,
            oversubtraction: 0.0,
            ..Default::default()
        };
        let mut nr = NoiseReducer::new(cfg).unwrap();

        let sr = 16000.0;
        let float_in = sine(1000.0, sr, 256 * 6, 0.4);
        let input: Vec<i16> = float_in
            .iter()
            .map(|&s| symmetric_round_i16(s))
            .collect();

        let mut output = Vec::new();
        nr.process_block(&input, &mut output);

        // Skip transients from the first frame; compare RMS over the
        // remainder against the (delayed) input RMS.
        let tail = &output[256..];
        let ref_tail = &input[..tail.len()];
        let rms = |xs: &[i16]| -> f64 {
            let sum: f64 = xs.iter().map(|&x| (x as f64) * (x as f64)).sum();
            (sum / xs.len() as f64).sqrt()
        };
        let a = rms(tail);
        let b = rms(ref_tail);
        assert!((a - b).abs() / b.max(1.0) < 0.05);
    }
}
