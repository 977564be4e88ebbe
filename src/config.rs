//! Tunables for the SDHOST driver.
//!
//! Every wait in the driver is bounded by one of the [`Budget`]s or deadlines
//! held here, so a wedged card or controller ends in an error instead of a hang.

use crate::timer::Budget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Wait for SDCMD NEW to clear, before and after a command.
    pub cmd_budget: Budget,
    /// Wait for one FIFO word during a read.
    pub fifo_budget: Budget,
    /// Stale words drained before a read, and by `stop`.
    pub drain_budget: Budget,
    /// Wall-clock bound on one pumped command: busy phase plus data phase.
    /// Covers the card holding DAT0 busy after a multi-block STOP.
    pub pump_timeout_us: u64,
    /// Polls for FIFO room during a PIO burst.
    pub pio_budget: Budget,
    /// Wait for the FSM to go idle after the last block.
    pub complete_timeout_us: u64,

    pub arrival_polls: u32,
    pub arrival_interval_us: u32,

    pub status_polls: u32,
    pub status_poll_interval_us: u32,
    /// Transport failures tolerated during one status poll.
    pub status_retries: u32,

    /// Discarding reads of sector 0 after identification.
    pub flush_reads: u32,

    pub ident_cdiv: u32,
    pub stop_cdiv: u32,
    /// Data-mode divider; SDCDIV is programmed with `clock_div - 2`.
    pub clock_div: u32,
    pub read_threshold: u32,
    pub write_threshold: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cmd_budget: Budget::new(100_000, 10),
            fifo_budget: Budget::new(100_000, 5),
            drain_budget: Budget::new(1_000, 0),
            pump_timeout_us: 500_000,
            pio_budget: Budget::new(500_000, 1),
            complete_timeout_us: 200_000,
            arrival_polls: 10_000,
            arrival_interval_us: 100,
            status_polls: 1_000,
            status_poll_interval_us: 1_000,
            status_retries: 5,
            flush_reads: 3,
            ident_cdiv: 0x148,
            stop_cdiv: 0x1FB,
            clock_div: 5,
            read_threshold: 4,
            write_threshold: 4,
        }
    }
}

impl HostConfig {
    pub fn with_cmd_budget(mut self, budget: Budget) -> Self {
        self.cmd_budget = budget;
        self
    }

    pub fn with_fifo_budget(mut self, budget: Budget) -> Self {
        self.fifo_budget = budget;
        self
    }

    pub fn with_pump_timeout(mut self, timeout_us: u64) -> Self {
        self.pump_timeout_us = timeout_us;
        self
    }

    pub fn with_arrival(mut self, polls: u32, interval_us: u32) -> Self {
        self.arrival_polls = polls;
        self.arrival_interval_us = interval_us;
        self
    }

    pub fn with_status_poll(mut self, polls: u32, interval_us: u32, retries: u32) -> Self {
        self.status_polls = polls;
        self.status_poll_interval_us = interval_us;
        self.status_retries = retries;
        self
    }

    pub fn with_flush_reads(mut self, reads: u32) -> Self {
        self.flush_reads = reads;
        self
    }

    pub fn with_clock_div(mut self, div: u32) -> Self {
        self.clock_div = div;
        self
    }

    /// Rough upper bound on how long identification may wait for the card.
    pub fn arrival_timeout_us(&self) -> u64 {
        self.arrival_polls as u64 * self.arrival_interval_us as u64
    }
}
