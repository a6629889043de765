//! Validated pipeline configuration (spec.md §6's configuration
//! surface). The INI parser that populates this struct is external
//! (spec.md §1 Non-goals); this crate owns the struct, its defaults,
//! and `validate()`.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::mic::MicPosition;

/// Explicit microphone positions, overriding the default circular
/// layout (spec.md §6 `mic_positions`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MicLayout {
    pub positions: Vec<(f32, f32, f32)>,
}

impl MicLayout {
    pub fn to_mic_positions(&self) -> Vec<MicPosition> {
        self.positions
            .iter()
            .map(|&(x, y, z)| MicPosition::new(x, y, z))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub num_microphones: u32,
    pub mic_spacing: f32,
    pub sample_rate: u32,
    pub dma_buffer_size: u32,
    pub noise_reduction_enable: bool,
    pub noise_threshold: f32,
    pub algorithm: String,
    pub volume: f32,
    pub min_confidence_threshold: f32,
    pub mic_positions: Option<MicLayout>,
}

impl PipelineConfig {
    /// spec.md §8 scenario E1.
    pub fn set_defaults() -> Self {
        Self {
            num_microphones: 8,
            mic_spacing: 15.0,
            sample_rate: 16000,
            dma_buffer_size: 512,
            noise_reduction_enable: true,
            noise_threshold: 0.05,
            algorithm: "spectral_subtraction".to_string(),
            volume: 0.8,
            min_confidence_threshold: 0.3,
            mic_positions: None,
        }
    }

    /// Returns the first violated constraint, short-circuiting rather
    /// than collecting all of them (DESIGN.md's validation note).
    /// spec.md §8 scenario E2.
    pub fn validate(&self) -> Result<()> {
        if self.num_microphones == 0 || self.num_microphones > 16 {
            return Err(PipelineError::Config(format!(
                "num_microphones {} out of range 1..16",
                self.num_microphones
            )));
        }
        if self.mic_spacing <= 0.0 {
            return Err(PipelineError::Config(format!(
                "mic_spacing {} must be > 0",
                self.mic_spacing
            )));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::Config("sample_rate must be > 0".to_string()));
        }
        if self.dma_buffer_size == 0 || self.dma_buffer_size > 8192 {
            return Err(PipelineError::Config(format!(
                "dma_buffer_size {} out of range 1..8192",
                self.dma_buffer_size
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(PipelineError::Config(format!(
                "volume {} out of range 0..1",
                self.volume
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            return Err(PipelineError::Config(format!(
                "min_confidence_threshold {} out of range 0..1",
                self.min_confidence_threshold
            )));
        }
        if self.algorithm != "spectral_subtraction" {
            return Err(PipelineError::Config(format!(
                "unknown algorithm: {}",
                self.algorithm
            )));
        }
        if let Some(layout) = &self.mic_positions {
            if layout.positions.len() != self.num_microphones as usize {
                return Err(PipelineError::Config(format!(
                    "mic_positions has {} entries, expected {}",
                    layout.positions.len(),
                    self.num_microphones
                )));
            }
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::set_defaults()
    }
}
