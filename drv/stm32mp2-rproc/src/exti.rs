// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software wake events through the EXTI controller.

use mmio::Regs;

/// Event line that wakes the Cortex-A35 cluster out of WFI on EXTI1.
pub const A35_WAKE_EVENT: u32 = 64;

/// Software interrupt event register of bank 0; banks are 0x20 apart.
const SWIER: usize = 0x08;
const BANK_STRIDE: usize = 0x20;
/// CPU1 interrupt mask register of bank 0; banks are 0x10 apart.
const C1IMR: usize = 0x80;
const C1IMR_STRIDE: usize = 0x10;

/// A way to nudge a sleeping core.
pub trait WakeEvent: Sync {
    /// Lets the event reach the core.
    fn unmask(&self);
    /// Raises the event.
    fn trigger(&self);
}

/// One EXTI event line, routed to CPU1.
pub struct ExtiWakeEvent<R> {
    regs: R,
    event: u32,
}

impl<R: Regs> ExtiWakeEvent<R> {
    pub const fn new(regs: R, event: u32) -> Self {
        Self { regs, event }
    }

    fn bank(&self) -> usize {
        (self.event / 32) as usize
    }

    fn mask(&self) -> u32 {
        1 << (self.event % 32)
    }

    pub(crate) fn imr(&self) -> usize {
        C1IMR + C1IMR_STRIDE * self.bank()
    }

    pub(crate) fn swier(&self) -> usize {
        SWIER + BANK_STRIDE * self.bank()
    }
}

impl<R: Regs> WakeEvent for ExtiWakeEvent<R> {
    fn unmask(&self) {
        self.regs.set_bits(self.imr(), self.mask());
    }

    fn trigger(&self) {
        self.regs.set_bits(self.swier(), self.mask());
    }
}
