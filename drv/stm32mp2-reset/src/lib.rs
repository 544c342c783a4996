// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reset controller for the STM32MP2 RCC.
//!
//! A line identifier packs the RCC register holding the line and the bit
//! within it: `id = (offset / 4) << 5 | bit`, which is the encoding used by
//! the `stm32mp25-resets` devicetree bindings.
//!
//! Most lines are level resets: the bit is set to hold the peripheral in
//! reset and cleared to release it. CPU lines are different. Their bit in
//! `RCC_CxRSTCSETR` is a self-clearing pulse, and whether the core runs
//! after the pulse is decided by its hold-boot bit in `RCC_CPUBOOTCR`. For
//! those, "assert" means "hold the core and reset it" and "deassert" means
//! "release the hold and reset it so it boots".

#![cfg_attr(not(test), no_std)]

use drv_reset_api::{ResetDriver, ResetError, NO_TIMEOUT};
use mmio::{poll_timeout, Clock, Regs};
use ringbuf::*;

/// Reset set/clear register of CPU1, the Cortex-A35 cluster.
pub const C1RSTCSETR: usize = 0x404;
/// Boot control register, holding the per-CPU hold-boot bits.
pub const CPUBOOTCR: usize = 0x434;

const ID_SHIFT: u32 = 5;
const BIT_MASK: u32 = 0x1f;
/// The controller decodes line offsets over 1024 registers.
const OFFSET_MAX: usize = 1024 * 4;

/// Builds a line identifier from its register offset and bit number.
pub const fn line(offset: usize, bit: u32) -> u32 {
    ((offset as u32 / 4) << ID_SHIFT) | (bit & BIT_MASK)
}

/// Cortex-A35 cluster reset.
pub const CPU1_R: u32 = line(C1RSTCSETR, 0);
/// OCTOSPI1 and its delay block.
pub const OSPI1_R: u32 = line(0x514, 0);
pub const OSPI1DLL_R: u32 = line(0x514, 16);

fn offset(id: u32) -> usize {
    (id >> ID_SHIFT) as usize * 4
}

fn mask(id: u32) -> u32 {
    1 << (id & BIT_MASK)
}

fn cpuboot_mask(offset: usize) -> u32 {
    if offset == C1RSTCSETR {
        1 << 1
    } else {
        1 << 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Assert(u32),
    Deassert(u32),
    CpuHold(u32),
    CpuRelease(u32),
    Timeout { offset: u16, mask: u32 },
    BadLine(u32),
}

ringbuf!(Trace, 16, Trace::None);

/// Whether a line is a plain level reset or a CPU pulse-and-hold reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineKind {
    Level,
    Cpu,
}

pub struct Stm32Reset<R, C> {
    regs: R,
    clock: C,
}

impl<R: Regs, C: Clock> Stm32Reset<R, C> {
    pub const fn new(regs: R, clock: C) -> Self {
        Self { regs, clock }
    }

    pub fn kind(id: u32) -> LineKind {
        if offset(id) == C1RSTCSETR {
            LineKind::Cpu
        } else {
            LineKind::Level
        }
    }

    fn check(id: u32) -> Result<(usize, u32), ResetError> {
        let off = offset(id);
        if off >= OFFSET_MAX {
            ringbuf_entry!(Trace::BadLine(id));
            return Err(ResetError::InvalidLine);
        }
        Ok((off, mask(id)))
    }

    fn wait(
        &self,
        off: usize,
        mask: u32,
        set: bool,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        let cond = |v: u32| if set { v & mask != 0 } else { v & mask == 0 };
        poll_timeout(&self.regs, &self.clock, off, cond, timeout_us)
            .map(|_| ())
            .map_err(|_| {
                ringbuf_entry!(Trace::Timeout {
                    offset: off as u16,
                    mask
                });
                ResetError::Timeout
            })
    }

    /// Sets the line's bit and, with a timeout hint, waits until the
    /// pulse has self-cleared.
    fn pulse(
        &self,
        off: usize,
        mask: u32,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        self.regs.set_bits(off, mask);
        if timeout_us == NO_TIMEOUT {
            return Ok(());
        }
        self.wait(off, mask, false, timeout_us)
    }

    fn cpu_assert(
        &self,
        off: usize,
        mask: u32,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        let hold = cpuboot_mask(off);

        // Hold the core first so that it stays parked after the pulse.
        self.regs.clear_bits(CPUBOOTCR, hold);
        self.wait(CPUBOOTCR, hold, false, timeout_us)?;

        self.pulse(off, mask, timeout_us)
    }

    fn cpu_deassert(
        &self,
        off: usize,
        mask: u32,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        let hold = cpuboot_mask(off);

        self.regs.set_bits(CPUBOOTCR, hold);
        self.wait(CPUBOOTCR, hold, true, timeout_us)?;

        self.pulse(off, mask, timeout_us)
    }
}

impl<R: Regs, C: Clock> ResetDriver for Stm32Reset<R, C> {
    fn assert_level(&self, id: u32, timeout_us: u32) -> Result<(), ResetError> {
        let (off, mask) = Self::check(id)?;
        match Self::kind(id) {
            LineKind::Cpu => {
                ringbuf_entry!(Trace::CpuHold(id));
                self.cpu_assert(off, mask, timeout_us)
            }
            LineKind::Level => {
                ringbuf_entry!(Trace::Assert(id));
                self.regs.set_bits(off, mask);
                if timeout_us == NO_TIMEOUT {
                    return Ok(());
                }
                self.wait(off, mask, true, timeout_us)
            }
        }
    }

    fn deassert_level(
        &self,
        id: u32,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        let (off, mask) = Self::check(id)?;
        match Self::kind(id) {
            LineKind::Cpu => {
                ringbuf_entry!(Trace::CpuRelease(id));
                self.cpu_deassert(off, mask, timeout_us)
            }
            LineKind::Level => {
                ringbuf_entry!(Trace::Deassert(id));
                self.regs.clear_bits(off, mask);
                if timeout_us == NO_TIMEOUT {
                    return Ok(());
                }
                self.wait(off, mask, false, timeout_us)
            }
        }
    }

    fn status(&self, id: u32) -> Result<bool, ResetError> {
        let (off, mask) = Self::check(id)?;
        Ok(match Self::kind(id) {
            // A CPU is "in reset" for as long as it is held.
            LineKind::Cpu => self.regs.read(CPUBOOTCR) & cpuboot_mask(off) == 0,
            LineKind::Level => self.regs.read(off) & mask != 0,
        })
    }

    fn reset(&self, id: u32) -> Result<(), ResetError> {
        self.assert_level(id, NO_TIMEOUT)?;
        self.deassert_level(id, NO_TIMEOUT)
    }
}
