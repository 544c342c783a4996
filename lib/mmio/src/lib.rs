// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to 32-bit peripheral register windows.
//!
//! Drivers for the STM32MP2 blocks we touch (RCC, EXTI) have no PAC to lean
//! on, so they are written against the [`Regs`] trait: a window of 32-bit
//! registers addressed by byte offset. On target this is [`Mmio`]; host
//! tests use the register file from the `fake` module.

#![cfg_attr(not(any(test, feature = "fake")), no_std)]

/// A window of 32-bit registers, addressed by byte offset from its base.
pub trait Regs: Sync {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);

    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let v = self.read(offset);
        self.write(offset, f(v));
    }

    fn set_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v | mask);
    }

    fn clear_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v & !mask);
    }
}

impl<R: Regs + ?Sized> Regs for &R {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Monotonic microsecond time source used to bound register polling.
pub trait Clock: Sync {
    fn now_us(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// Returned by [`poll_timeout`] when the condition never held.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimedOut;

/// Reads the register at `offset` until `cond` holds or `timeout_us`
/// microseconds have passed.
///
/// The register is always sampled once more after the deadline, so a
/// condition that became true while we were preempted is not reported as a
/// timeout.
pub fn poll_timeout(
    regs: &impl Regs,
    clock: &impl Clock,
    offset: usize,
    cond: impl Fn(u32) -> bool,
    timeout_us: u32,
) -> Result<u32, TimedOut> {
    let start = clock.now_us();
    loop {
        let v = regs.read(offset);
        if cond(v) {
            return Ok(v);
        }
        if clock.now_us().saturating_sub(start) >= u64::from(timeout_us) {
            break;
        }
        core::hint::spin_loop();
    }

    let v = regs.read(offset);
    if cond(v) {
        Ok(v)
    } else {
        Err(TimedOut)
    }
}

/// A memory-mapped register window.
#[derive(Copy, Clone, Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a device register window that is valid
    /// for volatile 32-bit access at every offset the driver using it will
    /// touch, for the lifetime of the program.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl Regs for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // Safety: validity of the window is the contract of `Mmio::new`.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&self, offset: usize, value: u32) {
        // Safety: validity of the window is the contract of `Mmio::new`.
        unsafe {
            core::ptr::write_volatile((self.base + offset) as *mut u32, value)
        }
    }
}

#[cfg(any(test, feature = "fake"))]
pub mod fake {
    use super::{Clock, Regs};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::vec::Vec;

    /// A host-side register file of `N` 32-bit registers.
    ///
    /// Individual bits can be made self-clearing (a write of 1 reads back as
    /// 0, like a pulse register) or stuck (writes never change them), and
    /// every write is journaled so tests can check ordering.
    pub struct FakeRegs<const N: usize> {
        regs: [AtomicU32; N],
        self_clearing: [AtomicU32; N],
        stuck: [AtomicU32; N],
        writes: Mutex<Vec<(usize, u32)>>,
    }

    impl<const N: usize> Default for FakeRegs<N> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<const N: usize> FakeRegs<N> {
        pub fn new() -> Self {
            Self {
                regs: core::array::from_fn(|_| AtomicU32::new(0)),
                self_clearing: core::array::from_fn(|_| AtomicU32::new(0)),
                stuck: core::array::from_fn(|_| AtomicU32::new(0)),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn index(offset: usize) -> usize {
            assert_eq!(offset % 4, 0, "unaligned register offset {offset:#x}");
            offset / 4
        }

        /// Sets a register without going through the write path.
        pub fn poke(&self, offset: usize, value: u32) {
            self.regs[Self::index(offset)].store(value, Ordering::SeqCst);
        }

        pub fn peek(&self, offset: usize) -> u32 {
            self.regs[Self::index(offset)].load(Ordering::SeqCst)
        }

        pub fn set_self_clearing(&self, offset: usize, mask: u32) {
            self.self_clearing[Self::index(offset)].store(mask, Ordering::SeqCst);
        }

        pub fn set_stuck(&self, offset: usize, mask: u32) {
            self.stuck[Self::index(offset)].store(mask, Ordering::SeqCst);
        }

        /// Every `(offset, value)` written so far, oldest first.
        pub fn writes(&self) -> Vec<(usize, u32)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl<const N: usize> Regs for FakeRegs<N> {
        fn read(&self, offset: usize) -> u32 {
            self.peek(offset)
        }

        fn write(&self, offset: usize, value: u32) {
            let i = Self::index(offset);
            self.writes.lock().unwrap().push((offset, value));
            let old = self.regs[i].load(Ordering::SeqCst);
            let stuck = self.stuck[i].load(Ordering::SeqCst);
            let clearing = self.self_clearing[i].load(Ordering::SeqCst);
            let v = ((value & !stuck) | (old & stuck)) & !clearing;
            self.regs[i].store(v, Ordering::SeqCst);
        }
    }

    /// A clock that advances by a fixed step every time it is read, so that
    /// polling loops always terminate.
    pub struct FakeClock {
        now: AtomicU64,
        step: u64,
    }

    impl FakeClock {
        pub const fn new(step: u64) -> Self {
            Self {
                now: AtomicU64::new(0),
                step,
            }
        }
    }

    impl Clock for FakeClock {
        fn now_us(&self) -> u64 {
            self.now.fetch_add(self.step, Ordering::SeqCst)
        }
    }
}
