//! Time-difference-of-arrival localiser: per-pair delay estimation via
//! normalised cross-correlation, TDOA-to-position solve by Gaussian
//! elimination (spec.md §4.4).

use crate::mic::{DelayVector, MicPosition, SoundLocation};

const MAX_DELAY_SAMPLES: usize = 1000;
const DEFAULT_SPEED_OF_SOUND: f32 = 343.0;
const PIVOT_EPS: f32 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct LocaliserConfig {
    pub sample_rate: f32,
    pub speed_of_sound: f32,
    pub min_confidence_threshold: f32,
}

impl Default for LocaliserConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000.0,
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
            min_confidence_threshold: 0.3,
        }
    }
}

pub struct Localiser {
    config: LocaliserConfig,
    mic_positions: Vec<MicPosition>,
    max_delay_samples: usize,
}

impl Localiser {
    pub fn new(config: LocaliserConfig, mic_positions: Vec<MicPosition>) -> Self {
        let max_inter_mic_distance = max_pairwise_distance(&mic_positions, 0);
        let d = ((2.0 * max_inter_mic_distance * config.sample_rate) / config.speed_of_sound)
            .ceil() as usize;
        let max_delay_samples = d.min(MAX_DELAY_SAMPLES).max(1);

        Self {
            config,
            mic_positions,
            max_delay_samples,
        }
    }

    pub fn num_mics(&self) -> usize {
        self.mic_positions.len()
    }

    /// Estimates the delay of `channel` relative to `reference` by
    /// normalised cross-correlation scan over `[-D, D]`. Returns
    /// `(tau_samples, confidence)` where confidence is `R(tau*)`.
    fn estimate_delay(&self, reference: &[f32], channel: &[f32]) -> (i32, f32) {
        let d = self.max_delay_samples as i32;
        let n = reference.len().min(channel.len());

        let mut energy_ref = 0.0f32;
        for &s in &reference[..n] {
            energy_ref += s * s;
        }
        let mut energy_ch = 0.0f32;
        for &s in &channel[..n] {
            energy_ch += s * s;
        }
        let norm = (energy_ref * energy_ch).sqrt();
        if norm <= f32::EPSILON {
            return (0, 0.0);
        }

        let mut best_tau = 0i32;
        let mut best_r = f32::MIN;

        for tau in -d..=d {
            let mut sum = 0.0f32;
            // R(tau) = sum(s0[n] * si[n+tau]) / sqrt(sum(s0^2)*sum(si^2))
            for i in 0..n as i32 {
                let j = i + tau;
                if j < 0 || j >= n as i32 {
                    continue;
                }
                sum += reference[i as usize] * channel[j as usize];
            }
            let r = sum / norm;
            if r > best_r {
                best_r = r;
                best_tau = tau;
            }
        }

        (best_tau, best_r)
    }

    /// Computes per-pair delays against channel 0, and the mean
    /// confidence (spec.md §4.4 "Block-level confidence").
    fn estimate_delays(&self, channels: &[Vec<f32>]) -> DelayVector {
        let n = channels.len();
        let mut dv = DelayVector::new(n);
        if n == 0 {
            return dv;
        }
        let reference = &channels[0];
        for i in 1..n {
            let (tau, r) = self.estimate_delay(reference, &channels[i]);
            dv.delay_seconds[i] = tau as f32 / self.config.sample_rate;
            dv.confidence[i] = r;
        }
        dv
    }

    /// Produces one `SoundLocation` from `N` aligned channel buffers
    /// (spec.md §4.4).
    pub fn locate(&self, channels: &[Vec<f32>], correlation_window_size: usize) -> SoundLocation {
        let n = channels.len();

        if n < 4 {
            return SoundLocation::origin_with_confidence(0.0);
        }
        if channels.iter().any(|c| c.len() < correlation_window_size) {
            return SoundLocation::origin_with_confidence(0.0);
        }

        let dv = self.estimate_delays(channels);
        let mean_confidence = dv.mean_confidence();

        if mean_confidence < self.config.min_confidence_threshold {
            return SoundLocation::origin_with_confidence(mean_confidence);
        }

        let c = self.config.speed_of_sound;
        let pos0 = self.mic_positions[0];

        // Build the first three usable pairs' linear equations:
        // 2*dx*x + 2*dy*y + 2*dz*z = delta_d^2 - (dx^2+dy^2+dz^2)
        let mut rows: Vec<[f32; 4]> = Vec::with_capacity(3);
        for i in 1..n {
            if rows.len() == 3 {
                break;
            }
            let delta_d = dv.delay_seconds[i] * c;
            let pos_i = self.mic_positions[i];
            let dx = pos_i.x - pos0.x;
            let dy = pos_i.y - pos0.y;
            let dz = pos_i.z - pos0.z;
            let rhs = delta_d * delta_d - (dx * dx + dy * dy + dz * dz);
            rows.push([2.0 * dx, 2.0 * dy, 2.0 * dz, rhs]);
        }

        match solve_3x3(&mut rows) {
            Some((x, y, z)) => SoundLocation {
                x,
                y,
                z,
                confidence: mean_confidence,
            },
            None => SoundLocation::origin_with_confidence(mean_confidence),
        }
    }
}

fn max_pairwise_distance(mics: &[MicPosition], _unused: usize) -> f32 {
    let mut max_d = 0.0f32;
    for i in 0..mics.len() {
        for j in (i + 1)..mics.len() {
            max_d = max_d.max(mics[i].distance_to(&mics[j]));
        }
    }
    max_d
}

/// Gaussian elimination with partial pivoting on a 3x3 augmented
/// system. Returns `None` if any pivot magnitude falls below `1e-10`
/// (spec.md §4.4's degenerate-system case).
fn solve_3x3(rows: &mut [[f32; 4]]) -> Option<(f32, f32, f32)> {
    if rows.len() != 3 {
        return None;
    }
    let n = 3;

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = rows[col][col].abs();
        for r in (col + 1)..n {
            if rows[r][col].abs() > pivot_val {
                pivot_val = rows[r][col].abs();
                pivot_row = r;
            }
        }
        if pivot_val < PIVOT_EPS {
            return None;
        }
        rows.swap(col, pivot_row);

        for r in (col + 1)..n {
            let factor = rows[r][col] / rows[col][col];
            for k in col..=n {
                rows[r][k] -= factor * rows[col][k];
            }
        }
    }

    let mut sol = [0.0f32; 3];
    for i in (0..n).rev() {
        let mut sum = rows[i][n];
        for j in (i + 1)..n {
            sum -= rows[i][j] * sol[j];
        }
        sol[i] = sum / rows[i][i];
    }
    Some((sol[0], sol[1], sol[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mic::default_circular_layout;

    fn sine(freq: f32, sr: f32, n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    fn delay_signal(signal: &[f32], delay_samples: i32) -> Vec<f32> {
        let n = signal.len() as i32;
        (0..n)
            .map(|i| {
                let src = i - delay_samples;
                if src >= 0 && src < n {
                    signal[src as usize]
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn confidence_is_bounded() {
        let mics = default_circular_layout(4, 0.015);
        let loc = Localiser::new(LocaliserConfig::default(), mics);
        let sr = 16000.0;
        let base = sine(1000.0, sr, 2048, 0.5);
        let channels = vec![base.clone(), base.clone(), base.clone(), base.clone()];
        let result = loc.locate(&channels, 256);
        assert!(result.confidence.abs() <= 1.0);
    }

    #[test]
    fn fewer_than_four_mics_returns_origin() {
        let mics = default_circular_layout(3, 0.015);
        let loc = Localiser::new(LocaliserConfig::default(), mics);
        let base = sine(1000.0, 16000.0, 1024, 0.5);
        let channels = vec![base.clone(), base.clone(), base];
        let result = loc.locate(&channels, 256);
        assert_eq!(result, SoundLocation::origin_with_confidence(0.0));
    }

    #[test]
    fn short_block_returns_origin() {
        let mics = default_circular_layout(4, 0.015);
        let loc = Localiser::new(LocaliserConfig::default(), mics);
        let base = sine(1000.0, 16000.0, 100, 0.5);
        let channels = vec![base.clone(), base.clone(), base.clone(), base];
        let result = loc.locate(&channels, 256);
        assert_eq!(result, SoundLocation::origin_with_confidence(0.0));
    }

    #[test]
    fn below_threshold_confidence_yields_origin_position() {
        let mics = default_circular_layout(4, 0.015);
        let mut cfg = LocaliserConfig::default();
        cfg.min_confidence_threshold = 2.0; // unreachable, forces the gate
        let loc = Localiser::new(cfg, mics);
        let base = sine(1000.0, 16000.0, 2048, 0.5);
        let channels = vec![base.clone(), base.clone(), base.clone(), base];
        let result = loc.locate(&channels, 256);
        assert_eq!(result.x, 0.0);
        assert_eq!(result.y, 0.0);
        assert_eq!(result.z, 0.0);
    }

    #[test]
    fn direction_sanity_source_ahead_on_x_axis() {
        // spec.md §8 property 7 / scenario E4.
        let sr = 16000.0;
        let mics = vec![
            MicPosition::new(0.015, 0.015, 0.0),
            MicPosition::new(0.015, -0.015, 0.0),
            MicPosition::new(-0.015, 0.015, 0.0),
            MicPosition::new(-0.015, -0.015, 0.0),
        ];
        let source = MicPosition::new(1.0, 0.0, 0.0);
        let c = DEFAULT_SPEED_OF_SOUND;

        let n = 4096;
        let base = sine(1000.0, sr, n + 64, 0.5);
        let channels: Vec<Vec<f32>> = mics
            .iter()
            .map(|m| {
                let dist = source.distance_to(m);
                let dist0 = source.distance_to(&mics[0]);
                let extra_delay = ((dist - dist0) / c * sr).round() as i32;
                delay_signal(&base[..n], extra_delay)
            })
            .collect();

        let mut cfg = LocaliserConfig::default();
        cfg.sample_rate = sr;
        cfg.min_confidence_threshold = 0.3;
        let loc = Localiser::new(cfg, mics);
        let result = loc.locate(&channels, 256);

        assert!(result.confidence >= 0.3, "confidence {}", result.confidence);
        assert!(result.x > 0.0, "x = {}", result.x);
        let azimuth = result.y.atan2(result.x).to_degrees();
        assert!(azimuth.abs() < 15.0, "azimuth = {azimuth}");
    }

    #[test]
    fn degenerate_system_yields_origin_with_confidence() {
        // Collinear mics on the x-axis: the derived 3x3 system is
        // singular in y/z, so the solver must report degeneracy rather
        // than divide by a near-zero pivot.
        let mics = vec![
            MicPosition::new(0.0, 0.0, 0.0),
            MicPosition::new(0.02, 0.0, 0.0),
            MicPosition::new(0.04, 0.0, 0.0),
            MicPosition::new(0.06, 0.0, 0.0),
        ];
        let loc = Localiser::new(LocaliserConfig::default(), mics);
        let base = sine(1000.0, 16000.0, 2048, 0.5);
        let channels: Vec<Vec<f32>> = (0..4).map(|_| base.clone()).collect();
        let result = loc.locate(&channels, 256);
        // Either low confidence (gated) or degenerate (origin from the
        // solver): either way, the position must be the origin.
        assert_eq!(result.x, 0.0);
        assert_eq!(result.y, 0.0);
        assert_eq!(result.z, 0.0);
    }
}
