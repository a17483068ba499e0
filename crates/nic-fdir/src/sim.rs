//! Simulated register file
//!
//! Stands in for device BAR space in tests and benchmarks. Records every
//! write and raises `FDIRCTL.INITDONE` on a configurable poll after each
//! control or flex register write.

use crate::regs::{self, RegisterIo};
use std::cell::Cell;
use std::collections::BTreeMap;

/// Receive buffer 0 size out of reset
pub const SIM_PB0_SIZE: u32 = 512 * 1024;

/// Receive buffers 1..8 are nonzero out of reset
pub const SIM_PBN_SIZE: u32 = 64 * 1024;

/// In-memory flow director register block
#[derive(Debug)]
pub struct SimulatedDevice {
    regs: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    /// Poll (1-based) on which init-done is reported; `None` never
    init_done_on_poll: Option<u32>,
    polls: Cell<u32>,
    delays_ms: u64,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Device out of reset that completes init on the first poll
    pub fn new() -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(regs::pbrxsize(0), SIM_PB0_SIZE);
        for i in 1..regs::PBRX_COUNT {
            regs.insert(regs::pbrxsize(i), SIM_PBN_SIZE);
        }
        Self {
            regs,
            writes: Vec::new(),
            init_done_on_poll: Some(1),
            polls: Cell::new(0),
            delays_ms: 0,
        }
    }

    /// Report init-done on poll `k` (1-based)
    pub fn with_init_done_on_poll(mut self, k: u32) -> Self {
        self.init_done_on_poll = Some(k);
        self
    }

    /// Never report init-done
    pub fn with_init_never_done(mut self) -> Self {
        self.init_done_on_poll = None;
        self
    }

    /// Stop reporting init-done from now on
    pub fn stall_init(&mut self) {
        self.init_done_on_poll = None;
    }

    /// Register value without counting as a poll
    pub fn peek(&self, reg: u32) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    /// Set a register without recording a write
    pub fn poke(&mut self, reg: u32, value: u32) {
        self.regs.insert(reg, value);
    }

    /// Every write in order
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Register was written at least once
    pub fn was_written(&self, reg: u32) -> bool {
        self.writes.iter().any(|&(r, _)| r == reg)
    }

    /// Number of writes to `reg`
    pub fn write_count(&self, reg: u32) -> usize {
        self.writes.iter().filter(|&&(r, _)| r == reg).count()
    }

    /// Init-done polls since the last control or flex write
    pub fn polls(&self) -> u32 {
        self.polls.get()
    }

    /// Total simulated delay
    pub fn delays_ms(&self) -> u64 {
        self.delays_ms
    }

    /// Forget recorded writes and delays
    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.delays_ms = 0;
    }

    fn restarts_init(reg: u32) -> bool {
        reg == regs::FDIRCTL
            || (regs::fdirflexcfg(0)..regs::fdirflexcfg(regs::FDIRFLEXCFG_COUNT)).contains(&reg)
    }
}

impl RegisterIo for SimulatedDevice {
    fn read32(&self, reg: u32) -> u32 {
        let value = self.peek(reg);
        if reg != regs::FDIRCTL {
            return value;
        }
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        match self.init_done_on_poll {
            Some(k) if polls >= k => value | regs::FDIRCTL_INITDONE,
            _ => value,
        }
    }

    fn write32(&mut self, reg: u32, value: u32) {
        self.writes.push((reg, value));
        if Self::restarts_init(reg) {
            self.polls.set(0);
        }
        let stored = if reg == regs::FDIRCTL {
            value & !regs::FDIRCTL_INITDONE
        } else {
            value
        };
        self.regs.insert(reg, stored);
    }

    fn delay_ms(&mut self, ms: u64) {
        self.delays_ms += ms;
    }
}
