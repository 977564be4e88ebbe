//! Bounded waits.
//!
//! The driver never spins open-ended. A [`Budget`] caps a polling loop by
//! iteration count and paces it with a fixed delay; a [`Deadline`] caps it by
//! the transport's free-running microsecond counter.

use crate::sdhost::RegisterTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub iterations: u32,
    pub pace_us: u32,
}

impl Budget {
    pub const fn new(iterations: u32, pace_us: u32) -> Self {
        Self { iterations, pace_us }
    }

    pub fn countdown(&self) -> Countdown {
        Countdown {
            remaining: self.iterations,
            pace_us: self.pace_us,
        }
    }

    /// Worst-case time spent in delays when the budget runs out.
    pub fn max_wait_us(&self) -> u64 {
        self.iterations as u64 * self.pace_us as u64
    }
}

#[derive(Debug)]
pub struct Countdown {
    remaining: u32,
    pace_us: u32,
}

impl Countdown {
    /// Consume one iteration, sleeping for the pacing delay.
    /// Returns `false` once the budget is spent.
    pub fn tick<T: RegisterTransport>(&mut self, transport: &mut T) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        if self.pace_us != 0 {
            transport.delay_us(self.pace_us);
        }
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at_us: u64,
}

impl Deadline {
    pub fn after<T: RegisterTransport>(transport: &T, timeout_us: u64) -> Self {
        Self {
            at_us: transport.now_us().saturating_add(timeout_us),
        }
    }

    pub fn expired<T: RegisterTransport>(&self, transport: &T) -> bool {
        transport.now_us() >= self.at_us
    }
}
