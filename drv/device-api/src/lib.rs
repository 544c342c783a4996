// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device handles shared between drivers and their consumers.
//!
//! A [`Device`] binds a name to a capability object (the driver's API, as a
//! trait object) and a readiness flag. Devices are statically allocated and
//! collected into a [`DeviceTable`], which is built once at startup and
//! handed to every consumer that needs to look devices up by [`DeviceId`].

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

/// Logical identifier of a device: its index in the device table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    NotFound,
}

/// A device exposing the capability `A`.
pub struct Device<'a, A: ?Sized> {
    name: &'static str,
    ready: AtomicBool,
    api: Option<&'a A>,
}

impl<'a, A: ?Sized> Device<'a, A> {
    pub const fn new(name: &'static str, api: &'a A) -> Self {
        Self {
            name,
            ready: AtomicBool::new(false),
            api: Some(api),
        }
    }

    /// A device that is declared but has no driver bound to it.
    pub const fn unbound(name: &'static str) -> Self {
        Self {
            name,
            ready: AtomicBool::new(false),
            api: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn api(&self) -> Option<&'a A> {
        self.api
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Runs the driver's init hook and marks the device ready if it
    /// succeeds. A device with no driver bound never becomes ready.
    pub fn init<E>(
        &self,
        hook: impl FnOnce(&'a A) -> Result<(), E>,
    ) -> Option<Result<(), E>> {
        let api = self.api?;
        let r = hook(api);
        self.set_ready(r.is_ok());
        Some(r)
    }
}

/// Resolves device identifiers to devices.
pub trait Registry<'a, A: ?Sized + 'a> {
    fn resolve(&self, id: DeviceId) -> Result<&Device<'a, A>, DeviceError>;

    fn is_ready(&self, id: DeviceId) -> bool {
        self.resolve(id).map(Device::is_ready).unwrap_or(false)
    }
}

/// A fixed table of devices indexed by [`DeviceId`].
pub struct DeviceTable<'a, A: ?Sized> {
    devices: &'a [Device<'a, A>],
}

impl<'a, A: ?Sized> DeviceTable<'a, A> {
    pub const fn new(devices: &'a [Device<'a, A>]) -> Self {
        Self { devices }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Device<'a, A>)> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, d)| (DeviceId(i as u32), d))
    }
}

impl<'a, A: ?Sized + 'a> Registry<'a, A> for DeviceTable<'a, A> {
    fn resolve(&self, id: DeviceId) -> Result<&Device<'a, A>, DeviceError> {
        self.devices
            .get(id.0 as usize)
            .ok_or(DeviceError::NotFound)
    }
}
