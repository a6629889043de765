//! Owns every subcomponent and runs the capture → demux → per-channel
//! noise reduction → localise → monomix → pan → sink loop (spec.md
//! §4.6). Grounded on `roderickvd-pleezer`'s headless worker-thread
//! service shape, combined with the teacher's allocate-at-init /
//! release-at-cleanup discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{AudioCapture, AudioSink};
use crate::config::PipelineConfig;
use crate::demux::FrameDemuxer;
use crate::dsp::noise_reducer::{NoiseReducer, NoiseReducerConfig};
use crate::dsp::utils::frame_rms;
use crate::error::{PipelineError, Result};
use crate::levels::LevelsPublisher;
use crate::localiser::{Localiser, LocaliserConfig};
use crate::logging::{LogSink, StructuredRecord};
use crate::mic::{default_circular_layout, MicPosition, SoundLocation};
use crate::panner::StereoPanner;
use crate::ring::RingChannelBuffer;

/// `spec.md` §4.6's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialised,
    Initialised,
    Running,
    Stopped,
    Cleaned,
}

const RING_CAPACITY_MULTIPLE: usize = 4;
const WORKER_POLL: Duration = Duration::from_micros(100);

struct Shared {
    rings: Vec<Arc<RingChannelBuffer>>,
    location: Mutex<SoundLocation>,
    levels: LevelsPublisher,
    running: AtomicBool,
}

/// Owns the full DSP pipeline: demuxer, per-channel noise reducers,
/// localiser, panner, and the worker thread that drives them.
pub struct Pipeline {
    state: PipelineState,
    config: PipelineConfig,
    block_size: usize,

    shared: Arc<Shared>,
    demux: Option<FrameDemuxer>,
    worker: Option<JoinHandle<()>>,

    capture: Option<Box<dyn AudioCapture>>,
    sink: Option<Box<dyn AudioSink>>,
    log_sink: Option<Arc<dyn LogSink>>,

    mic_positions: Vec<MicPosition>,
    noise_reduction_enable: bool,
    noise_reducer_config: NoiseReducerConfig,
    localiser_config: LocaliserConfig,
}

impl Pipeline {
    /// `spec.md` §4.6: constructs in `Uninitialised`; call `init` next.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let num_mics = config.num_microphones as usize;
        // mic_spacing is configured in mm (spec.md §6); the circular
        // layout formula works in metres (spec.md §9).
        let mic_positions = match &config.mic_positions {
            Some(layout) => layout.to_mic_positions(),
            None => default_circular_layout(num_mics, config.mic_spacing / 1000.0),
        };

        let capacity = (config.dma_buffer_size as usize).max(1) * RING_CAPACITY_MULTIPLE;
        let rings: Vec<Arc<RingChannelBuffer>> = (0..num_mics)
            .map(|_| Arc::new(RingChannelBuffer::new(capacity)))
            .collect();

        let block_size = config.dma_buffer_size as usize;
        let algorithm = crate::dsp::Algorithm::parse(&config.algorithm)?;

        Ok(Self {
            state: PipelineState::Uninitialised,
            block_size,
            shared: Arc::new(Shared {
                rings,
                location: Mutex::new(SoundLocation::ORIGIN),
                levels: LevelsPublisher::new(num_mics),
                running: AtomicBool::new(false),
            }),
            demux: None,
            worker: None,
            capture: None,
            sink: None,
            log_sink: None,
            mic_positions,
            noise_reduction_enable: config.noise_reduction_enable,
            noise_reducer_config: NoiseReducerConfig {
                algorithm,
                snr_gate: config.noise_threshold,
                ..NoiseReducerConfig::default()
            },
            localiser_config: LocaliserConfig {
                sample_rate: config.sample_rate as f32,
                min_confidence_threshold: config.min_confidence_threshold,
                ..LocaliserConfig::default()
            },
            config,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Acquires every resource (demuxer, noise reducers handed to the
    /// worker, capture/sink handles). Failures here release whatever
    /// was already acquired (spec.md §5's partial-init-failure rule).
    pub fn init(
        &mut self,
        capture: Box<dyn AudioCapture>,
        sink: Box<dyn AudioSink>,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<()> {
        if !matches!(self.state, PipelineState::Uninitialised) {
            return Err(PipelineError::Init(
                "init called outside Uninitialised".to_string(),
            ));
        }
        self.demux = Some(FrameDemuxer::new(self.shared.rings.clone()));
        self.capture = Some(capture);
        self.sink = Some(sink);
        self.log_sink = Some(log_sink);
        self.state = PipelineState::Initialised;
        Ok(())
    }

    /// `start` is legal only from `Initialised` or `Stopped`; a second
    /// `start` from `Running` is a no-op (spec.md §4.6).
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running => return Ok(()),
            PipelineState::Initialised | PipelineState::Stopped => {}
            _ => {
                return Err(PipelineError::Init(
                    "start is only legal from Initialised or Stopped".to_string(),
                ))
            }
        }

        let capture = self
            .capture
            .take()
            .ok_or_else(|| PipelineError::Init("capture not initialised".to_string()))?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| PipelineError::Init("sink not initialised".to_string()))?;
        let log_sink = self
            .log_sink
            .clone()
            .ok_or_else(|| PipelineError::Init("log sink not initialised".to_string()))?;

        let noise_reducers = (0..self.mic_positions.len())
            .map(|_| NoiseReducer::new(self.noise_reducer_config))
            .collect::<Result<Vec<_>>>()?;
        let localiser = Localiser::new(self.localiser_config, self.mic_positions.clone());
        let panner = StereoPanner::new();

        self.shared.running.store(true, Ordering::Release);

        let worker_ctx = WorkerContext {
            shared: Arc::clone(&self.shared),
            capture,
            sink,
            log_sink,
            noise_reducers,
            noise_reduction_enable: self.noise_reduction_enable,
            localiser,
            panner,
            block_size: self.block_size,
            volume: self.config.volume,
        };
        self.worker = Some(std::thread::spawn(move || worker_ctx.run()));
        self.state = PipelineState::Running;
        Ok(())
    }

    /// `stop` is only legal from `Running`; it joins the worker before
    /// returning (spec.md §4.6, §5 cancellation).
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, PipelineState::Running) {
            return Ok(());
        }
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.state = PipelineState::Stopped;
        Ok(())
    }

    /// Idempotent; implies `stop()` first (spec.md §4.6).
    pub fn cleanup(&mut self) -> Result<()> {
        if matches!(self.state, PipelineState::Running) {
            self.stop()?;
        }
        self.demux = None;
        self.capture = None;
        self.sink = None;
        self.log_sink = None;
        self.state = PipelineState::Cleaned;
        Ok(())
    }

    /// Consistent snapshot of the last-published location (spec.md
    /// §6 "last-published SoundLocation readable via get_location").
    pub fn get_location(&self) -> SoundLocation {
        *self.shared.location.lock().unwrap()
    }

    pub fn get_levels(&self) -> Vec<crate::levels::ChannelLevels> {
        self.shared.levels.snapshot()
    }

    /// Feeds one interleaved capture block through the demuxer
    /// directly (used by tests and by a capture thread driving this
    /// pipeline externally instead of the internal worker poll).
    pub fn push_capture_block(&mut self, interleaved: &[i16]) {
        if let Some(demux) = &mut self.demux {
            demux.demux(interleaved);
        }
    }
}

struct WorkerContext {
    shared: Arc<Shared>,
    capture: Box<dyn AudioCapture>,
    sink: Box<dyn AudioSink>,
    log_sink: Arc<dyn LogSink>,
    noise_reducers: Vec<NoiseReducer>,
    noise_reduction_enable: bool,
    localiser: Localiser,
    panner: StereoPanner,
    block_size: usize,
    volume: f32,
}

impl WorkerContext {
    fn run(mut self) {
        let num_channels = self.shared.rings.len();
        let mut demux = FrameDemuxer::new(self.shared.rings.clone());
        let mut capture_buf = vec![0i16; self.block_size * num_channels.max(1)];
        let mut channel_buf = vec![0i16; self.block_size];
        let mut reduced: Vec<Vec<i16>> = vec![Vec::new(); num_channels];
        let mut float_channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];

        while self.shared.running.load(Ordering::Acquire) {
            match self.capture.fill_block(&mut capture_buf) {
                Ok(0) => {
                    std::thread::sleep(WORKER_POLL);
                    continue;
                }
                Ok(_) => demux.demux(&capture_buf),
                Err(e) => {
                    log::warn!("capture error: {e}");
                    continue;
                }
            }

            let ready = self
                .shared
                .rings
                .iter()
                .all(|r| r.level() >= self.block_size);
            if !ready {
                std::thread::sleep(WORKER_POLL);
                continue;
            }

            for (ch, ring) in self.shared.rings.iter().enumerate() {
                ring.pop(&mut channel_buf);
                let before_rms = frame_rms(&pcm_to_float(&channel_buf));

                reduced[ch].clear();
                if self.noise_reduction_enable {
                    self.noise_reducers[ch].process_block(&channel_buf, &mut reduced[ch]);
                } else {
                    // noise_reduction_enable=false skips §4.3 entirely
                    // (spec.md §6): pass samples through untouched.
                    reduced[ch].extend_from_slice(&channel_buf);
                }

                let after_floats = pcm_to_float(&reduced[ch]);
                let after_rms = frame_rms(&after_floats);
                self.shared.levels.set(ch, after_rms);

                let reduction_db = if before_rms > f32::EPSILON && after_rms > f32::EPSILON {
                    20.0 * (before_rms / after_rms).log10()
                } else {
                    0.0
                };
                self.log_sink.record(StructuredRecord::Noise {
                    before_rms,
                    after_rms,
                    reduction_db,
                });

                float_channels[ch] = if after_floats.is_empty() {
                    pcm_to_float(&channel_buf)
                } else {
                    after_floats
                };
            }

            let window = float_channels[0].len().min(self.block_size);
            let location = self.localiser.locate(&float_channels, window);
            *self.shared.location.lock().unwrap() = location;
            self.log_sink.record(StructuredRecord::Location {
                x: location.x,
                y: location.y,
                z: location.z,
                confidence: location.confidence,
            });
            self.log_sink.record(StructuredRecord::Levels {
                per_channel_rms: self
                    .shared
                    .levels
                    .snapshot()
                    .into_iter()
                    .map(|l| l.rms)
                    .collect(),
            });

            let n = reduced.iter().map(|c| c.len()).min().unwrap_or(0);
            let mut stereo = Vec::with_capacity(n * 2);
            for i in 0..n {
                let sum: i32 = reduced.iter().map(|c| c[i] as i32).sum();
                let mono = (sum / num_channels.max(1) as i32)
                    .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                let gains = self.panner.compute_gains(&location);
                let (l, r) = self.panner.apply(mono, gains);
                stereo.push(scale_volume(l, self.volume));
                stereo.push(scale_volume(r, self.volume));
            }

            if !stereo.is_empty() {
                if self.sink.write_interleaved(&stereo).is_err() {
                    log::warn!("sink underrun, re-preparing");
                    if self.sink.prepare().is_ok() {
                        let _ = self.sink.write_interleaved(&stereo);
                    }
                }
            }
        }
    }
}

fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

fn scale_volume(sample: i16, volume: f32) -> i16 {
    ((sample as f32) * volume)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
