//! Real-time multi-microphone capture, per-channel spectral noise
//! reduction, TDOA source localisation, and stereo rendering for an
//! embedded microphone array (spec.md §1).
//!
//! The data path: `AudioCapture` → [`demux::FrameDemuxer`] → one
//! [`ring::RingChannelBuffer`] per microphone → the worker thread in
//! [`pipeline::Pipeline`] drains aligned frames, runs
//! [`dsp::NoiseReducer`] per channel, [`localiser::Localiser`] across
//! channels, mixes to mono, applies [`panner::StereoPanner`], and
//! writes stereo PCM to an `AudioSink`.

pub mod capture;
pub mod config;
pub mod demux;
pub mod dsp;
pub mod error;
pub mod levels;
pub mod localiser;
pub mod logging;
pub mod mic;
pub mod panner;
pub mod pipeline;
pub mod ring;

pub use config::{MicLayout, PipelineConfig};
pub use error::{PipelineError, Result};
pub use mic::{MicPosition, SoundLocation};
pub use pipeline::{Pipeline, PipelineState};
