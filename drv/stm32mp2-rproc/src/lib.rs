// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote-processor driver for the STM32MP2 companion cores.
//!
//! The generic part owns the lifecycle bookkeeping and the board
//! configuration of one core; how that core is actually started and stopped
//! is up to its [`Variant`].

#![cfg_attr(not(test), no_std)]

mod a35;
mod exti;

pub use a35::Stm32mp2A35;
pub use exti::{ExtiWakeEvent, WakeEvent, A35_WAKE_EVENT};

use drv_reset_api::ResetControl;
use drv_rproc_api::{RemoteProc, RprocError, RprocSpec, Sequencing};

/// Board configuration of one remote core.
#[derive(Copy, Clone, Debug)]
pub struct RprocConfig<'a> {
    /// Reset line holding the core.
    pub reset: ResetControl<'a>,
}

/// Per-core operations. Anything a variant leaves out is reported as
/// [`RprocError::NotSupported`], except `init`, which succeeds.
pub trait Variant: Sync {
    fn init(&self, cfg: &RprocConfig<'_>) -> Result<(), RprocError> {
        let _ = cfg;
        Ok(())
    }

    fn start(&self, cfg: &RprocConfig<'_>) -> Result<(), RprocError> {
        let _ = cfg;
        Err(RprocError::NotSupported)
    }

    fn stop(&self, cfg: &RprocConfig<'_>) -> Result<(), RprocError> {
        let _ = cfg;
        Err(RprocError::NotSupported)
    }
}

pub struct Stm32Rproc<'a, V> {
    spec: RprocSpec,
    variant: V,
    config: RprocConfig<'a>,
}

impl<'a, V: Variant> Stm32Rproc<'a, V> {
    pub const fn new(
        variant: V,
        config: RprocConfig<'a>,
        sequencing: Sequencing,
    ) -> Self {
        Self {
            spec: RprocSpec::new(sequencing),
            variant,
            config,
        }
    }

    /// Device init hook. The lifecycle state is reset to Offline whether or
    /// not the variant init succeeds; the variant's result is returned.
    pub fn init(&self) -> Result<(), RprocError> {
        let r = self.variant.init(&self.config);
        self.spec.init();
        r
    }
}

impl<V: Variant> RemoteProc for Stm32Rproc<'_, V> {
    fn rproc(&self) -> Option<&RprocSpec> {
        Some(&self.spec)
    }

    fn start(&self, _: &RprocSpec) -> Result<(), RprocError> {
        self.variant.start(&self.config)
    }

    fn stop(&self, _: &RprocSpec) -> Result<(), RprocError> {
        self.variant.stop(&self.config)
    }
}
