//! Lock-free per-channel level metering, published once per processed
//! block alongside the current `SoundLocation` (SPEC_FULL.md §3).
//!
//! Generalises the teacher's `meters.rs` `AtomicF32` trick (store an
//! `f32`'s bits in an `AtomicU32`) from a fixed stereo L/R pair to an
//! `N`-channel vector sized at `init`.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct AtomicF32 {
    inner: AtomicU32,
}

impl AtomicF32 {
    pub const fn new(value: f32) -> Self {
        Self {
            inner: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn store(&self, value: f32, order: Ordering) {
        self.inner.store(value.to_bits(), order);
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.inner.load(order))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// One channel's RMS snapshot, as published by `LevelsPublisher::snapshot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLevels {
    pub rms: f32,
}

/// Lock-free multi-channel level meter: one `AtomicF32` per channel,
/// written by the worker thread and readable from any thread without a
/// lock, matching the teacher's `Meters` discipline.
pub struct LevelsPublisher {
    rms: Vec<AtomicF32>,
}

impl LevelsPublisher {
    pub fn new(num_channels: usize) -> Self {
        Self {
            rms: (0..num_channels).map(|_| AtomicF32::new(0.0)).collect(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.rms.len()
    }

    pub fn set(&self, channel: usize, rms: f32) {
        self.rms[channel].store(rms, Ordering::Relaxed);
    }

    pub fn get(&self, channel: usize) -> ChannelLevels {
        ChannelLevels {
            rms: self.rms[channel].load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> Vec<ChannelLevels> {
        (0..self.rms.len()).map(|i| self.get(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bit_cast() {
        let a = AtomicF32::new(0.0);
        a.store(-0.375, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), -0.375);
    }

    #[test]
    fn publisher_tracks_one_value_per_channel() {
        let pub_ = LevelsPublisher::new(3);
        pub_.set(0, 0.1);
        pub_.set(1, 0.2);
        pub_.set(2, 0.3);
        let snap = pub_.snapshot();
        assert_eq!(snap[0].rms, 0.1);
        assert_eq!(snap[1].rms, 0.2);
        assert_eq!(snap[2].rms, 0.3);
    }

    #[test]
    fn unset_channel_defaults_to_zero() {
        let pub_ = LevelsPublisher::new(2);
        assert_eq!(pub_.get(1).rms, 0.0);
    }
}
