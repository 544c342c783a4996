// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Cortex-A35 cluster.
//!
//! Out of reset the cluster sits in WFI with every EXTI line masked, so
//! before it can be released its wake event has to be unmasked, and on
//! every start the event is raised between assert and deassert.

use crate::{RprocConfig, Variant, WakeEvent};
use drv_rproc_api::RprocError;
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Unmask,
    Start,
    AssertFailed(i32),
    Wake,
    DeassertFailed(i32),
    Stop,
}

ringbuf!(Trace, 8, Trace::None);

pub struct Stm32mp2A35<W> {
    wake: W,
}

impl<W: WakeEvent> Stm32mp2A35<W> {
    pub const fn new(wake: W) -> Self {
        Self { wake }
    }
}

impl<W: WakeEvent> Variant for Stm32mp2A35<W> {
    fn init(&self, _: &RprocConfig<'_>) -> Result<(), RprocError> {
        ringbuf_entry!(Trace::Unmask);
        self.wake.unmask();
        Ok(())
    }

    fn start(&self, cfg: &RprocConfig<'_>) -> Result<(), RprocError> {
        ringbuf_entry!(Trace::Start);
        cfg.reset.assert().map_err(|e| {
            ringbuf_entry!(Trace::AssertFailed(e.errno()));
            RprocError::from(e)
        })?;

        ringbuf_entry!(Trace::Wake);
        self.wake.trigger();

        cfg.reset.deassert().map_err(|e| {
            ringbuf_entry!(Trace::DeassertFailed(e.errno()));
            RprocError::from(e)
        })
    }

    fn stop(&self, cfg: &RprocConfig<'_>) -> Result<(), RprocError> {
        ringbuf_entry!(Trace::Stop);
        cfg.reset.assert()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_device_api::Device;
    use drv_reset_api::{ResetControl, ResetDevice, ResetDriver, ResetError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Everything that happens to the core, in order.
    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<&'static str>>,
        fail_assert: AtomicBool,
        fail_deassert: AtomicBool,
    }

    impl Journal {
        fn push(&self, what: &'static str) {
            self.events.lock().unwrap().push(what);
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ResetDriver for Journal {
        fn assert_level(&self, _: u32, _: u32) -> Result<(), ResetError> {
            self.push("assert");
            if self.fail_assert.load(Ordering::SeqCst) {
                return Err(ResetError::Timeout);
            }
            Ok(())
        }

        fn deassert_level(&self, _: u32, _: u32) -> Result<(), ResetError> {
            self.push("deassert");
            if self.fail_deassert.load(Ordering::SeqCst) {
                return Err(ResetError::Timeout);
            }
            Ok(())
        }
    }

    impl WakeEvent for &Journal {
        fn unmask(&self) {
            self.push("unmask");
        }

        fn trigger(&self) {
            self.push("wake");
        }
    }

    fn with_a35(
        j: &Journal,
        f: impl FnOnce(&Stm32mp2A35<&Journal>, &RprocConfig<'_>),
    ) {
        let rst: ResetDevice<'_> = Device::new("rcc", j);
        rst.set_ready(true);
        let cfg = RprocConfig {
            reset: ResetControl::new(&rst, 0),
        };
        f(&Stm32mp2A35::new(j), &cfg);
    }

    #[test]
    fn start_wakes_between_assert_and_deassert() {
        let j = Journal::default();
        with_a35(&j, |a35, cfg| {
            a35.init(cfg).unwrap();
            a35.start(cfg).unwrap();
            a35.stop(cfg).unwrap();
        });
        assert_eq!(
            j.events(),
            ["unmask", "assert", "wake", "deassert", "assert"]
        );
    }

    #[test]
    fn failed_assert_stops_the_start() {
        let j = Journal::default();
        j.fail_assert.store(true, Ordering::SeqCst);
        with_a35(&j, |a35, cfg| {
            assert_eq!(a35.start(cfg), Err(RprocError::HardwareFailure(-116)));
        });
        assert_eq!(j.events(), ["assert"]);
    }

    #[test]
    fn failed_deassert_is_reported() {
        let j = Journal::default();
        j.fail_deassert.store(true, Ordering::SeqCst);
        with_a35(&j, |a35, cfg| {
            assert_eq!(a35.start(cfg), Err(RprocError::HardwareFailure(-116)));
        });
        assert_eq!(j.events(), ["assert", "wake", "deassert"]);
    }

    #[test]
    fn stop_leaves_reset_asserted() {
        let j = Journal::default();
        j.fail_assert.store(true, Ordering::SeqCst);
        with_a35(&j, |a35, cfg| {
            assert_eq!(a35.stop(cfg), Err(RprocError::HardwareFailure(-116)));
        });
        assert_eq!(j.events(), ["assert"]);
    }
}
