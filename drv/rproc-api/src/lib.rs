// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common definitions for remote processors: the lifecycle state shared by
//! the lifecycle controller, the per-core drivers and the CPU service.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use drv_device_api::Device;
use drv_reset_api::ResetError;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use spin::{Mutex, MutexGuard};

pub use drv_reset_api::errno;

/// Lifecycle state of a remote processor.
///
/// The discriminants are part of the CPU service wire format.
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    /// Powered off or held in reset.
    Offline = 0,
    /// Suspended; needs to be woken up to receive a message. Reserved for
    /// power-management flows, never entered by the lifecycle controller.
    Suspended = 1,
    /// Up and running.
    Running = 2,
    /// Crashed. Terminal until reinitialized by a full reset.
    Crashed = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RprocError {
    /// The device does not resolve, is not ready, or is not a remote
    /// processor.
    NoSuchDevice,
    /// The bound driver does not implement the operation.
    NotSupported,
    /// The operation is not allowed in the current lifecycle state.
    InvalidState,
    /// The request does not apply to this processor.
    InvalidArgument,
    /// The underlying hardware operation failed with this (negative) errno.
    HardwareFailure(i32),
}

impl RprocError {
    /// Negative errno, as carried in the CPU service `status` word.
    pub fn errno(self) -> i32 {
        match self {
            Self::NoSuchDevice => -errno::ENODEV,
            Self::NotSupported => -errno::ENOTSUP,
            Self::InvalidState | Self::InvalidArgument => -errno::EINVAL,
            Self::HardwareFailure(e) => e,
        }
    }

    /// Maps a negative errno back to an error. `InvalidState` and
    /// `InvalidArgument` share `EINVAL` and come back as `InvalidState`.
    pub fn from_errno(e: i32) -> Self {
        match e.checked_neg() {
            Some(errno::ENODEV) => Self::NoSuchDevice,
            Some(errno::ENOTSUP) => Self::NotSupported,
            Some(errno::EINVAL) => Self::InvalidState,
            _ => Self::HardwareFailure(e),
        }
    }
}

impl From<ResetError> for RprocError {
    fn from(e: ResetError) -> Self {
        Self::HardwareFailure(e.errno())
    }
}

/// How concurrent boot/shutdown calls on one processor are ordered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sequencing {
    /// Only the use count is atomic. Two callers can interleave between the
    /// state check, the count update, the hardware call and the state
    /// update.
    Unguarded,
    /// A per-processor lock is held across the whole boot or shutdown
    /// sequence.
    Serialized,
}

/// Lifecycle bookkeeping of one remote processor, embedded in its driver's
/// private data and reached through the owning device.
pub struct RprocSpec {
    state: AtomicU8,
    use_count: AtomicU32,
    sequencing: Sequencing,
    lock: Mutex<()>,
}

impl RprocSpec {
    pub const fn new(sequencing: Sequencing) -> Self {
        Self {
            state: AtomicU8::new(CpuState::Offline as u8),
            use_count: AtomicU32::new(0),
            sequencing,
            lock: Mutex::new(()),
        }
    }

    /// Returns to Offline with no users. Only driver init and a
    /// full system reset do this.
    pub fn init(&self) {
        self.use_count.store(0, Ordering::SeqCst);
        self.state.store(CpuState::Offline as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> CpuState {
        // Only valid states are ever stored, so anything else means memory
        // corruption; report it as a crash rather than trusting it.
        CpuState::from_u8(self.state.load(Ordering::SeqCst))
            .unwrap_or(CpuState::Crashed)
    }

    pub fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Moves to `state` unless the processor has crashed, in one atomic
    /// step. Returns false, leaving the state alone, if it had.
    pub fn advance(&self, state: CpuState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                (cur != CpuState::Crashed as u8).then_some(state as u8)
            })
            .is_ok()
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::SeqCst)
    }

    /// Adds a user and returns the count from before the increment.
    pub fn acquire(&self) -> u32 {
        self.use_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Drops a user and returns the count from before the decrement, or
    /// `None` if there were no users. The count never goes below zero.
    pub fn release(&self) -> Option<u32> {
        self.use_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .ok()
    }

    /// Enters the boot/shutdown sequence. Under [`Sequencing::Serialized`]
    /// the returned guard must be held until the sequence completes.
    pub fn sequence(&self) -> Option<MutexGuard<'_, ()>> {
        match self.sequencing {
            Sequencing::Unguarded => None,
            Sequencing::Serialized => Some(self.lock.lock()),
        }
    }
}

impl core::fmt::Debug for RprocSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RprocSpec")
            .field("state", &self.state())
            .field("use_count", &self.use_count())
            .field("sequencing", &self.sequencing)
            .finish()
    }
}

/// Driver interface of a remote processor.
pub trait RemoteProc: Sync {
    /// The lifecycle bookkeeping of this processor, if it has any.
    fn rproc(&self) -> Option<&RprocSpec>;

    /// Powers the processor on and lets it boot.
    fn start(&self, rproc: &RprocSpec) -> Result<(), RprocError>;

    /// Powers the processor off.
    fn stop(&self, rproc: &RprocSpec) -> Result<(), RprocError>;
}

pub type RprocDevice<'a> = Device<'a, dyn RemoteProc + 'a>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_spec_is_offline() {
        let spec = RprocSpec::new(Sequencing::Serialized);
        assert_eq!(spec.state(), CpuState::Offline);
        assert_eq!(spec.use_count(), 0);
    }

    #[test]
    fn release_saturates_at_zero() {
        let spec = RprocSpec::new(Sequencing::Unguarded);
        assert_eq!(spec.release(), None);
        assert_eq!(spec.use_count(), 0);

        assert_eq!(spec.acquire(), 0);
        assert_eq!(spec.acquire(), 1);
        assert_eq!(spec.release(), Some(2));
        assert_eq!(spec.release(), Some(1));
        assert_eq!(spec.release(), None);
    }

    #[test]
    fn init_clears_crash() {
        let spec = RprocSpec::new(Sequencing::Unguarded);
        spec.acquire();
        spec.set_state(CpuState::Crashed);
        spec.init();
        assert_eq!(spec.state(), CpuState::Offline);
        assert_eq!(spec.use_count(), 0);
    }

    #[test]
    fn advance_never_leaves_crashed() {
        let spec = RprocSpec::new(Sequencing::Serialized);
        assert!(spec.advance(CpuState::Running));
        assert_eq!(spec.state(), CpuState::Running);

        spec.set_state(CpuState::Crashed);
        assert!(!spec.advance(CpuState::Running));
        assert!(!spec.advance(CpuState::Offline));
        assert_eq!(spec.state(), CpuState::Crashed);
    }

    #[test]
    fn sequence_guard_only_when_serialized() {
        assert!(RprocSpec::new(Sequencing::Unguarded).sequence().is_none());

        let spec = RprocSpec::new(Sequencing::Serialized);
        let guard = spec.sequence();
        assert!(guard.is_some());
        assert!(spec.lock.try_lock().is_none());
        drop(guard);
        assert!(spec.lock.try_lock().is_some());
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(RprocError::NoSuchDevice.errno(), -19);
        assert_eq!(RprocError::InvalidState.errno(), -22);
        assert_eq!(
            RprocError::from(ResetError::Timeout),
            RprocError::HardwareFailure(-116)
        );
        for e in [
            RprocError::NoSuchDevice,
            RprocError::NotSupported,
            RprocError::InvalidState,
            RprocError::HardwareFailure(-116),
        ] {
            assert_eq!(RprocError::from_errno(e.errno()), e);
        }
    }
}
