//! Structured log records and the sink boundary the pipeline emits
//! through (SPEC_FULL.md §2, spec.md §6's observable-outputs table).
//!
//! The teacher's `debug.rs` keeps its own lock-free ring because it
//! logs from inside the real-time audio callback. Here the worker
//! thread is the only caller and a record is only produced once per
//! fully processed block, so a plain trait object is enough — no ring
//! is needed between producer and consumer.

/// One structured record named in spec.md §6.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredRecord {
    Location {
        x: f32,
        y: f32,
        z: f32,
        confidence: f32,
    },
    Noise {
        before_rms: f32,
        after_rms: f32,
        reduction_db: f32,
    },
    Levels {
        per_channel_rms: Vec<f32>,
    },
}

/// External collaborator that accepts structured records (spec.md §6's
/// "out of scope" logging subsystem). The pipeline depends only on
/// this trait, never on a concrete backend.
pub trait LogSink: Send + Sync {
    fn record(&self, record: StructuredRecord);
}

/// Forwards structured records to the `log` facade (as the teacher's
/// `ml_denoise.rs` does for its own diagnostics), so a host binary can
/// wire in any `log`-compatible backend (`env_logger`, as
/// `roderickvd-pleezer` does at its own entry point) without this
/// crate depending on one.
#[derive(Debug, Default)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn record(&self, record: StructuredRecord) {
        match record {
            StructuredRecord::Location {
                x,
                y,
                z,
                confidence,
            } => {
                log::info!("LOCATION x={x:.4} y={y:.4} z={z:.4} confidence={confidence:.3}");
            }
            StructuredRecord::Noise {
                before_rms,
                after_rms,
                reduction_db,
            } => {
                log::info!(
                    "NOISE before={before_rms:.6} after={after_rms:.6} reduction_db={reduction_db:.2}"
                );
            }
            StructuredRecord::Levels { per_channel_rms } => {
                log::debug!("LEVELS {per_channel_rms:?}");
            }
        }
    }
}

/// In-memory sink for tests: collects every record it receives.
#[derive(Debug, Default)]
pub struct VecSink {
    records: std::sync::Mutex<Vec<StructuredRecord>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StructuredRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl LogSink for VecSink {
    fn record(&self, record: StructuredRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_collects_records_in_order() {
        let sink = VecSink::new();
        sink.record(StructuredRecord::Location {
            x: 1.0,
            y: 0.0,
            z: 0.0,
            confidence: 0.9,
        });
        sink.record(StructuredRecord::Levels {
            per_channel_rms: vec![0.1, 0.2],
        });
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], StructuredRecord::Location { .. }));
        assert!(matches!(records[1], StructuredRecord::Levels { .. }));
    }

    #[test]
    fn log_crate_sink_does_not_panic_without_a_backend_installed() {
        let sink = LogCrateSink::default();
        sink.record(StructuredRecord::Noise {
            before_rms: 0.2,
            after_rms: 0.05,
            reduction_db: 12.0,
        });
    }

    #[test]
    fn composes_with_a_real_log_backend() {
        // A host binary wires a concrete backend (e.g. env_logger, as
        // roderickvd-pleezer does at its entry point); this crate only
        // needs the `log` facade to be present.
        let _ = env_logger::try_init();
        let sink = LogCrateSink::default();
        sink.record(StructuredRecord::Location {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            confidence: 1.0,
        });
    }
}
