// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reset-line control.
//!
//! A reset controller implements [`ResetDriver`] and is published as a
//! [`ResetDevice`]. Consumers hold a [`ResetControl`], which names one line
//! on one controller, and never talk to the driver directly: every operation
//! first checks that the controller is ready and bound.

#![cfg_attr(not(test), no_std)]

use drv_device_api::Device;

/// Timeout hint meaning "do not wait for the line to settle".
pub const NO_TIMEOUT: u32 = 0;

/// Error numbers of the Arm GNU toolchain's C library, which is what the C
/// side of the secure firmware reports.
pub mod errno {
    pub const EINVAL: i32 = 22;
    pub const ENODEV: i32 = 19;
    pub const ENOSYS: i32 = 88;
    pub const ETIMEDOUT: i32 = 116;
    pub const ENOTSUP: i32 = 134;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetError {
    /// The controller device is missing or not ready.
    NoSuchDevice,
    /// The controller device has no driver bound.
    NotSupported,
    /// The driver does not implement this operation.
    NotImplemented,
    /// The line did not reach the requested level in time.
    Timeout,
    /// The line identifier is outside the controller's range.
    InvalidLine,
}

impl ResetError {
    /// Negative errno, as reported across the C ABI.
    pub fn errno(self) -> i32 {
        -match self {
            Self::NoSuchDevice => errno::ENODEV,
            Self::NotSupported => errno::ENOTSUP,
            Self::NotImplemented => errno::ENOSYS,
            Self::Timeout => errno::ETIMEDOUT,
            Self::InvalidLine => errno::EINVAL,
        }
    }
}

/// Operations of a reset controller on its lines.
///
/// `timeout_us` is a hint; a controller that cannot wait for its lines may
/// ignore it. Operations a controller does not provide report
/// [`ResetError::NotImplemented`].
pub trait ResetDriver: Sync {
    fn assert_level(&self, id: u32, timeout_us: u32) -> Result<(), ResetError> {
        let _ = (id, timeout_us);
        Err(ResetError::NotImplemented)
    }

    fn deassert_level(
        &self,
        id: u32,
        timeout_us: u32,
    ) -> Result<(), ResetError> {
        let _ = (id, timeout_us);
        Err(ResetError::NotImplemented)
    }

    /// Returns `true` if the line is currently asserted.
    fn status(&self, id: u32) -> Result<bool, ResetError> {
        let _ = id;
        Err(ResetError::NotImplemented)
    }

    /// Pulses the line.
    fn reset(&self, id: u32) -> Result<(), ResetError> {
        let _ = id;
        Err(ResetError::NotImplemented)
    }
}

pub type ResetDevice<'a> = Device<'a, dyn ResetDriver + 'a>;

/// One reset line on one controller.
#[derive(Copy, Clone)]
pub struct ResetControl<'a> {
    dev: &'a ResetDevice<'a>,
    id: u32,
}

impl<'a> ResetControl<'a> {
    pub const fn new(dev: &'a ResetDevice<'a>, id: u32) -> Self {
        Self { dev, id }
    }

    fn driver(&self) -> Result<&'a (dyn ResetDriver + 'a), ResetError> {
        if !self.dev.is_ready() {
            return Err(ResetError::NoSuchDevice);
        }
        self.dev.api().ok_or(ResetError::NotSupported)
    }

    pub fn assert(&self) -> Result<(), ResetError> {
        self.assert_timeout(NO_TIMEOUT)
    }

    pub fn assert_timeout(&self, timeout_us: u32) -> Result<(), ResetError> {
        self.driver()?.assert_level(self.id, timeout_us)
    }

    pub fn deassert(&self) -> Result<(), ResetError> {
        self.deassert_timeout(NO_TIMEOUT)
    }

    pub fn deassert_timeout(&self, timeout_us: u32) -> Result<(), ResetError> {
        self.driver()?.deassert_level(self.id, timeout_us)
    }

    pub fn status(&self) -> Result<bool, ResetError> {
        self.driver()?.status(self.id)
    }

    pub fn reset(&self) -> Result<(), ResetError> {
        self.driver()?.reset(self.id)
    }
}

impl core::fmt::Debug for ResetControl<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResetControl")
            .field("dev", &self.dev.name())
            .field("id", &self.id)
            .finish()
    }
}
