//! Bounded trace of controller FSM transitions during a transfer.

use log::debug;

use super::{constant::SDEDM_FSM_MASK, RegisterTransport, SdHost, SDEDM};

pub const SAMPLE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticSample {
    pub fsm_state: u32,
    pub timestamp_us: u64,
    pub tag: u32,
}

#[derive(Debug)]
pub struct Sampler {
    samples: [DiagnosticSample; SAMPLE_CAPACITY],
    len: usize,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub const fn new() -> Self {
        Self {
            samples: [DiagnosticSample {
                fsm_state: 0,
                timestamp_us: 0,
                tag: 0,
            }; SAMPLE_CAPACITY],
            len: 0,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Append a sample if it is forced, the first one, or the FSM state or
    /// tag moved since the last sample. Returns whether it was stored.
    pub fn record(&mut self, edm: u32, now_us: u64, tag: u32, force: bool) -> bool {
        if self.len == SAMPLE_CAPACITY {
            return false;
        }
        let fsm_state = edm & SDEDM_FSM_MASK;
        let changed = match self.samples[..self.len].last() {
            None => true,
            Some(last) => last.fsm_state != fsm_state || last.tag != tag,
        };
        if !(force || changed) {
            return false;
        }
        self.samples[self.len] = DiagnosticSample {
            fsm_state,
            timestamp_us: now_us,
            tag,
        };
        self.len += 1;
        true
    }

    pub fn samples(&self) -> &[DiagnosticSample] {
        &self.samples[..self.len]
    }

    pub fn is_full(&self) -> bool {
        self.len == SAMPLE_CAPACITY
    }
}

impl<T: RegisterTransport> SdHost<T> {
    pub(crate) fn sample(&mut self, tag: u32, force: bool) {
        if self.sampler.is_full() {
            return;
        }
        let edm = self.read_reg(SDEDM);
        let now = self.transport.now_us();
        self.sampler.record(edm, now, tag, force);
    }

    pub fn samples(&self) -> &[DiagnosticSample] {
        self.sampler.samples()
    }

    pub fn dump_samples(&self) {
        let samples = self.sampler.samples();
        let Some(first) = samples.first() else {
            return;
        };
        for (i, s) in samples.iter().enumerate() {
            debug!(
                "sample {}: tag {} fsm {:#x} +{}us",
                i,
                s.tag,
                s.fsm_state,
                s.timestamp_us - first.timestamp_us
            );
        }
    }
}
