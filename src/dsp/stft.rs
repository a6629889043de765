//! Per-channel STFT state: input accumulation buffer, fill position,
//! and synthesis overlap tail, grouped into one value per spec.md §9's
//! design note ("group into a single state struct per channel rather
//! than five parallel arrays").

/// `frame_size` input accumulation buffer + `frame_size - hop` overlap
/// tail + fill position, per spec.md §3's `STFTState` entity.
pub struct StftState {
    frame_size: usize,
    hop_size: usize,
    /// Input accumulation buffer, length `frame_size`.
    accum: Vec<f32>,
    /// Fill position in `accum`, always in `[0, frame_size]`.
    pos: usize,
    /// Retained overlap-add tail from the previous synthesis, length
    /// `frame_size - hop_size`.
    overlap_tail: Vec<f32>,
}

impl StftState {
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        assert!(hop_size > 0 && hop_size <= frame_size);
        Self {
            frame_size,
            hop_size,
            accum: vec![0.0; frame_size],
            pos: 0,
            overlap_tail: vec![0.0; frame_size - hop_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Appends as many of `samples` as fit before the accumulation
    /// buffer is full. Returns the number consumed.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let space = self.frame_size - self.pos;
        let n = samples.len().min(space);
        self.accum[self.pos..self.pos + n].copy_from_slice(&samples[..n]);
        self.pos += n;
        n
    }

    /// True once a full `frame_size`-sample frame is available at the
    /// head of the accumulation buffer.
    pub fn frame_ready(&self) -> bool {
        self.pos == self.frame_size
    }

    /// How many more samples `push_samples` would currently accept.
    pub fn space_left(&self) -> usize {
        self.frame_size - self.pos
    }

    pub fn frame(&self) -> &[f32] {
        &self.accum
    }

    /// Shifts the accumulation buffer left by `hop_size`, per spec.md
    /// §4.3 step 9, making room for the next `hop_size` input samples.
    pub fn shift_input(&mut self) {
        let hop = self.hop_size;
        self.accum.copy_within(hop.., 0);
        self.pos = self.frame_size - hop;
    }

    /// Overlap-adds `synth` (a full `frame_size`-length synthesised
    /// frame) onto the retained tail, emits `hop_size` output samples,
    /// and stores the new tail (spec.md §4.3 step 8).
    pub fn overlap_add(&mut self, synth: &[f32], out: &mut [f32]) {
        debug_assert_eq!(synth.len(), self.frame_size);
        debug_assert_eq!(out.len(), self.hop_size);

        let tail_len = self.overlap_tail.len();
        for i in 0..self.frame_size {
            let acc = if i < tail_len {
                self.overlap_tail[i] + synth[i]
            } else {
                synth[i]
            };
            if i < self.hop_size {
                out[i] = acc;
            } else {
                self.overlap_tail[i - self.hop_size] = acc;
            }
        }
    }
}
