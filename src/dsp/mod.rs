//! DSP building blocks for the per-channel noise reduction stage
//! (spec.md §4.3): the analysis/synthesis window, the STFT accumulator
//! state, and the spectral-subtraction noise reducer built on top of
//! them.

pub mod noise_reducer;
pub mod stft;
pub mod utils;
pub mod window;

pub use noise_reducer::{Algorithm, NoiseProfile, NoiseReducer, NoiseReducerConfig};
pub use stft::StftState;
pub use window::hann_window;
