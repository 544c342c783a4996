// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote-processor lifecycle controller.
//!
//! Several secure services may want the same companion core running, so
//! each remote processor carries a use count. The first `boot` starts the
//! hardware and the last `shutdown` stops it; everyone in between only moves
//! the count. A core that has been reported crashed refuses to boot until
//! its spec is reinitialized.
//!
//! The operations take a device handle. [`Rprocs`] offers the same
//! operations by [`DeviceId`] through an injected device registry.

#![cfg_attr(not(test), no_std)]

use drv_device_api::{DeviceId, Registry};
use drv_rproc_api::{
    CpuState, RemoteProc, RprocDevice, RprocError, RprocSpec,
};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    NoDevice(&'static str),
    BootCrashed(&'static str),
    BootShared { name: &'static str, users: u32 },
    Start(&'static str),
    StartFailed { name: &'static str, err: RprocError },
    Running(&'static str),
    CrashedDuringStart(&'static str),
    ShutdownOffline(&'static str),
    ShutdownUnowned(&'static str),
    ShutdownShared { name: &'static str, users: u32 },
    Stop(&'static str),
    StopFailed { name: &'static str, err: RprocError },
    Stopped { name: &'static str, state: CpuState },
    Crash(&'static str),
}

#[cfg(not(test))]
ringbuf!(Trace, 32, Trace::None);
// Tests run in parallel and read the buffer back.
#[cfg(test)]
ringbuf!(Trace, 1024, Trace::None);

fn bind<'a>(
    dev: &RprocDevice<'a>,
) -> Result<(&'a (dyn RemoteProc + 'a), &'a RprocSpec), RprocError> {
    let found = dev
        .is_ready()
        .then(|| dev.api())
        .flatten()
        .and_then(|drv| drv.rproc().map(|spec| (drv, spec)));
    found.ok_or_else(|| {
        ringbuf_entry!(Trace::NoDevice(dev.name()));
        RprocError::NoSuchDevice
    })
}

/// Takes a reference on the remote processor, starting it if this is the
/// first one.
///
/// A failed start leaves the use count and state as they were.
pub fn boot(dev: &RprocDevice<'_>) -> Result<(), RprocError> {
    let (drv, spec) = bind(dev)?;
    let name = dev.name();
    let _seq = spec.sequence();

    if spec.state() == CpuState::Crashed {
        ringbuf_entry!(Trace::BootCrashed(name));
        return Err(RprocError::InvalidState);
    }

    let users = spec.acquire();
    if users >= 1 {
        ringbuf_entry!(Trace::BootShared { name, users });
        return Ok(());
    }

    ringbuf_entry!(Trace::Start(name));
    if let Err(err) = drv.start(spec) {
        ringbuf_entry!(Trace::StartFailed { name, err });
        spec.release();
        return Err(err);
    }

    // A crash reported while the core was coming up wins. The caller still
    // holds its reference and drops it with `shutdown`.
    if spec.advance(CpuState::Running) {
        ringbuf_entry!(Trace::Running(name));
    } else {
        ringbuf_entry!(Trace::CrashedDuringStart(name));
    }
    Ok(())
}

/// Drops a reference on the remote processor, stopping it if this was the
/// last one. Shutting down an offline processor does nothing.
pub fn shutdown(dev: &RprocDevice<'_>) -> Result<(), RprocError> {
    let (drv, spec) = bind(dev)?;
    let name = dev.name();
    let _seq = spec.sequence();

    if spec.state() == CpuState::Offline {
        ringbuf_entry!(Trace::ShutdownOffline(name));
        return Ok(());
    }

    match spec.release() {
        None => {
            ringbuf_entry!(Trace::ShutdownUnowned(name));
            Ok(())
        }
        Some(users) if users > 1 => {
            ringbuf_entry!(Trace::ShutdownShared { name, users });
            Ok(())
        }
        Some(_) => {
            ringbuf_entry!(Trace::Stop(name));
            if let Err(err) = drv.stop(spec) {
                ringbuf_entry!(Trace::StopFailed { name, err });
                spec.acquire();
                return Err(err);
            }

            // A crash outlives the stop; only a reinit clears it.
            spec.advance(CpuState::Offline);
            ringbuf_entry!(Trace::Stopped {
                name,
                state: spec.state()
            });
            Ok(())
        }
    }
}

pub fn status(dev: &RprocDevice<'_>) -> Result<CpuState, RprocError> {
    let (_, spec) = bind(dev)?;
    Ok(spec.state())
}

/// Marks the remote processor as crashed. Further boots are refused until
/// its lifecycle state is reinitialized.
///
/// This never waits for a boot or shutdown in progress, so it may be called
/// from the core's own start path or from an interrupt.
pub fn report_crash(dev: &RprocDevice<'_>) -> Result<(), RprocError> {
    let (_, spec) = bind(dev)?;
    ringbuf_entry!(Trace::Crash(dev.name()));
    spec.set_state(CpuState::Crashed);
    Ok(())
}

/// Lifecycle operations on remote processors named by [`DeviceId`].
#[derive(Copy, Clone)]
pub struct Rprocs<'r, 'a> {
    registry: &'r dyn Registry<'a, dyn RemoteProc + 'a>,
}

impl<'r, 'a> Rprocs<'r, 'a> {
    pub fn new(registry: &'r dyn Registry<'a, dyn RemoteProc + 'a>) -> Self {
        Self { registry }
    }

    pub fn device(
        &self,
        id: DeviceId,
    ) -> Result<&'r RprocDevice<'a>, RprocError> {
        self.registry
            .resolve(id)
            .map_err(|_| RprocError::NoSuchDevice)
    }

    pub fn boot(&self, id: DeviceId) -> Result<(), RprocError> {
        boot(self.device(id)?)
    }

    pub fn shutdown(&self, id: DeviceId) -> Result<(), RprocError> {
        shutdown(self.device(id)?)
    }

    pub fn status(&self, id: DeviceId) -> Result<CpuState, RprocError> {
        status(self.device(id)?)
    }

    pub fn report_crash(&self, id: DeviceId) -> Result<(), RprocError> {
        report_crash(self.device(id)?)
    }
}
