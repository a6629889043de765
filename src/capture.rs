//! External collaborators named in spec.md §6: an interleaved PCM
//! capture source and a stereo PCM sink. Both are out of scope as
//! concrete devices (spec.md §1 Non-goals); this module only owns the
//! trait boundary and the in-memory test doubles that exercise it.

use crate::error::{PipelineError, Result};

/// Abstract capture source (spec.md §6's "capture source contract").
/// A real implementation wraps the kernel I2S/DMA driver; `fill_block`
/// stands in for the registered `on_block` callback, returning the
/// interleaved PCM for one block.
pub trait AudioCapture: Send {
    /// Reads one block of `block_samples` interleaved samples into
    /// `out`. Returns the number of samples actually written.
    fn fill_block(&mut self, out: &mut [i16]) -> Result<usize>;
}

/// Abstract stereo sink (spec.md §6's "sink contract").
pub trait AudioSink: Send {
    /// Writes interleaved stereo PCM. Returns the number of frames
    /// accepted. An underrun is recoverable: callers re-prepare via
    /// `prepare` and retry once (spec.md §7).
    fn write_interleaved(&mut self, pcm: &[i16]) -> Result<usize>;

    /// Re-establishes the sink after a recoverable write failure.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory capture source for tests: yields pre-recorded blocks in
/// order, then reports empty (0 samples written, not an error).
pub struct VecCapture {
    blocks: Vec<Vec<i16>>,
    next: usize,
}

impl VecCapture {
    pub fn new(blocks: Vec<Vec<i16>>) -> Self {
        Self { blocks, next: 0 }
    }
}

impl AudioCapture for VecCapture {
    fn fill_block(&mut self, out: &mut [i16]) -> Result<usize> {
        if self.next >= self.blocks.len() {
            return Ok(0);
        }
        let block = &self.blocks[self.next];
        let n = block.len().min(out.len());
        out[..n].copy_from_slice(&block[..n]);
        self.next += 1;
        Ok(n)
    }
}

/// In-memory sink for tests: appends every write, optionally injecting
/// one recoverable underrun (spec.md §8 scenario E6).
#[derive(Default)]
pub struct VecSink {
    pub written: Vec<i16>,
    inject_underrun_once: bool,
    prepared: bool,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            inject_underrun_once: false,
            prepared: true,
        }
    }

    pub fn with_one_underrun() -> Self {
        Self {
            written: Vec::new(),
            inject_underrun_once: true,
            prepared: true,
        }
    }
}

impl AudioSink for VecSink {
    fn write_interleaved(&mut self, pcm: &[i16]) -> Result<usize> {
        if self.inject_underrun_once {
            self.inject_underrun_once = false;
            self.prepared = false;
            return Err(PipelineError::Sink("underrun".to_string()));
        }
        if !self.prepared {
            return Err(PipelineError::Sink("sink not prepared".to_string()));
        }
        self.written.extend_from_slice(pcm);
        Ok(pcm.len() / 2)
    }

    fn prepare(&mut self) -> Result<()> {
        self.prepared = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_capture_yields_blocks_then_zero() {
        let mut cap = VecCapture::new(vec![vec![1, 2, 3, 4]]);
        let mut buf = [0i16; 4];
        assert_eq!(cap.fill_block(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(cap.fill_block(&mut buf).unwrap(), 0);
    }

    #[test]
    fn vec_sink_recovers_from_injected_underrun() {
        let mut sink = VecSink::with_one_underrun();
        assert!(sink.write_interleaved(&[1, 2]).is_err());
        sink.prepare().unwrap();
        assert_eq!(sink.write_interleaved(&[1, 2]).unwrap(), 1);
        assert_eq!(sink.written, vec![1, 2]);
    }
}
