//! Splits an interleaved multi-channel capture block into per-channel
//! samples and enqueues them into the per-channel rings (spec.md §4.2).
//!
//! No allocation on the hot path: `demux` only indexes into the caller's
//! slice and the pre-allocated rings.

use std::sync::Arc;

use crate::ring::RingChannelBuffer;

pub struct FrameDemuxer {
    channels: Vec<Arc<RingChannelBuffer>>,
    overrun_frames: usize,
}

impl FrameDemuxer {
    pub fn new(channels: Vec<Arc<RingChannelBuffer>>) -> Self {
        Self {
            channels,
            overrun_frames: 0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames dropped whole (all channels together) because at least one
    /// ring had no room.
    pub fn overrun_frames(&self) -> usize {
        self.overrun_frames
    }

    /// Consumes `interleaved` of layout `[ch0_s0, ch1_s0, ..., chN-1_s0,
    /// ch0_s1, ...]`. `interleaved.len()` must be a multiple of the
    /// channel count; any remainder samples are ignored.
    ///
    /// A frame (one sample per channel) is accepted or dropped as a
    /// unit: if any channel's ring is full, the whole frame is dropped
    /// so that every channel's accepted-sample count stays in lock
    /// step (spec.md §9 REDESIGN FLAGS — corrects the original
    /// de-interleave's per-sample bounds check).
    pub fn demux(&mut self, interleaved: &[i16]) {
        let n = self.channels.len();
        if n == 0 {
            return;
        }
        let frames = interleaved.len() / n;
        for f in 0..frames {
            let frame = &interleaved[f * n..f * n + n];
            let all_have_room = self
                .channels
                .iter()
                .all(|ch| ch.level() < ch.capacity());

            if all_have_room {
                for (ch, &sample) in self.channels.iter().zip(frame.iter()) {
                    ch.push(&[sample]);
                }
            } else {
                self.overrun_frames += 1;
            }
        }
    }
}
