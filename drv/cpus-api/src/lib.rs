// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire format of the CPU service, and a client for it.
//!
//! Requests and responses cross the secure/non-secure boundary as fixed-size
//! buffers: an 8-byte [`CpuServiceArgs`] in, and a 40-byte response out,
//! whose layout depends on the request type. Errors come back on two levels.
//! The [`PlatformError`] returned by the transport only says whether the
//! service understood the request; whether the CPU actually did what was
//! asked is in the response's `status` word, which holds either a
//! [`CpuState`] or a negative errno.

#![cfg_attr(not(test), no_std)]

use drv_rproc_api::{CpuState, RprocError};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, IntoBytes};

pub use drv_rproc_api::errno;

/// Longest CPU name carried in a response, as in devicetree.
pub const CPU_MAX_NAME_LEN: usize = 31;

pub const REQUEST_SIZE: usize = 8;
pub const RESPONSE_SIZE: usize = 40;

/// Platform ioctl requests.
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum IoctlRequest {
    CpuService = 0,
}

/// Transport-level result of a platform ioctl.
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum PlatformError {
    Success = 0,
    SystemError = 1,
    InvalidParam = 2,
    NotSupported = 3,
}

impl PlatformError {
    pub fn into_result(self) -> Result<(), PlatformError> {
        match self {
            Self::Success => Ok(()),
            e => Err(e),
        }
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum ServiceType {
    /// Number of CPUs managed.
    ServiceInfo = 0,
    /// State, control method and name of one CPU.
    Info = 1,
    Start = 2,
    Stop = 3,
}

/// How a CPU is controlled.
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(i32)]
pub enum CtrlMethod {
    /// Not controllable; always on if enabled.
    None = 0,
    /// Booted and shut down through the remote-processor framework.
    RemoteProc = 1,
    /// Declares a control method we don't know how to use.
    Inval = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuCommand {
    Start,
    Stop,
}

impl From<CpuCommand> for ServiceType {
    fn from(cmd: CpuCommand) -> Self {
        match cmd {
            CpuCommand::Start => Self::Start,
            CpuCommand::Stop => Self::Stop,
        }
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
pub struct CpuServiceArgs {
    /// A [`ServiceType`].
    pub kind: u32,
    /// Ignored for [`ServiceType::ServiceInfo`].
    pub cpu_id: u32,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
pub struct ServiceInfo {
    pub nb_cpu: i32,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
pub struct CpuInfoRes {
    pub status: i32,
    /// A [`CtrlMethod`].
    pub method: i32,
    /// Not NUL-terminated when the name fills it.
    pub name: [u8; CPU_MAX_NAME_LEN],
    _pad: u8,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
pub struct CpuCmdRes {
    pub status: i32,
}

const_assert_eq!(core::mem::size_of::<CpuServiceArgs>(), REQUEST_SIZE);
const_assert_eq!(core::mem::size_of::<CpuInfoRes>(), RESPONSE_SIZE);
const_assert_eq!(core::mem::size_of::<ServiceInfo>(), 4);
const_assert_eq!(core::mem::size_of::<CpuCmdRes>(), 4);

/// Interprets a `status` word: a CPU state, or a negative errno.
pub fn decode_status(status: i32) -> Result<CpuState, RprocError> {
    if status < 0 {
        return Err(RprocError::from_errno(status));
    }
    u8::try_from(status)
        .ok()
        .and_then(CpuState::from_u8)
        .ok_or(RprocError::InvalidArgument)
}

/// The `status` word for the outcome of a CPU operation.
pub fn encode_status(r: Result<CpuState, RprocError>) -> i32 {
    match r {
        Ok(state) => state as i32,
        Err(e) => e.errno(),
    }
}

impl CpuInfoRes {
    pub fn new(status: i32, method: CtrlMethod, name: &str) -> Self {
        let mut res = Self {
            status,
            method: method as i32,
            ..Self::default()
        };
        res.set_name(name);
        res
    }

    /// Copies at most [`CPU_MAX_NAME_LEN`] bytes of `name` and zero-fills
    /// the rest, like `strncpy`.
    pub fn set_name(&mut self, name: &str) {
        let n = name.len().min(CPU_MAX_NAME_LEN);
        self.name = [0; CPU_MAX_NAME_LEN];
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }

    /// The name up to its first NUL. A name cut in the middle of a UTF-8
    /// sequence loses the partial character.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CPU_MAX_NAME_LEN);
        let bytes = &self.name[..end];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or("")
            }
        }
    }

    pub fn state(&self) -> Result<CpuState, RprocError> {
        decode_status(self.status)
    }

    pub fn ctrl_method(&self) -> Option<CtrlMethod> {
        CtrlMethod::from_i32(self.method)
    }
}

/// The platform ioctl transport.
pub trait PlatformIoctl {
    fn ioctl(
        &self,
        request: IoctlRequest,
        input: &[u8],
        output: &mut [u8],
    ) -> PlatformError;
}

impl<T: PlatformIoctl + ?Sized> PlatformIoctl for &T {
    fn ioctl(
        &self,
        request: IoctlRequest,
        input: &[u8],
        output: &mut [u8],
    ) -> PlatformError {
        (**self).ioctl(request, input, output)
    }
}

/// Client side of the CPU service.
pub struct Cpus<T> {
    transport: T,
}

impl<T: PlatformIoctl> Cpus<T> {
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    fn call<R: FromBytes>(
        &self,
        kind: ServiceType,
        cpu_id: u32,
    ) -> Result<R, PlatformError> {
        let args = CpuServiceArgs {
            kind: kind as u32,
            cpu_id,
        };
        let mut out = [0u8; RESPONSE_SIZE];
        self.transport
            .ioctl(IoctlRequest::CpuService, args.as_bytes(), &mut out)
            .into_result()?;
        R::read_from_prefix(&out)
            .map(|(r, _)| r)
            .map_err(|_| PlatformError::SystemError)
    }

    pub fn service_info(&self) -> Result<ServiceInfo, PlatformError> {
        self.call(ServiceType::ServiceInfo, 0)
    }

    pub fn info(&self, cpu_id: u32) -> Result<CpuInfoRes, PlatformError> {
        self.call(ServiceType::Info, cpu_id)
    }

    /// Sends a command. The outer result is the transport's; the inner one
    /// is what became of the CPU.
    pub fn send_cmd(
        &self,
        cpu_id: u32,
        cmd: CpuCommand,
    ) -> Result<Result<CpuState, RprocError>, PlatformError> {
        let res: CpuCmdRes = self.call(cmd.into(), cpu_id)?;
        Ok(decode_status(res.status))
    }

    pub fn start(
        &self,
        cpu_id: u32,
    ) -> Result<Result<CpuState, RprocError>, PlatformError> {
        self.send_cmd(cpu_id, CpuCommand::Start)
    }

    pub fn stop(
        &self,
        cpu_id: u32,
    ) -> Result<Result<CpuState, RprocError>, PlatformError> {
        self.send_cmd(cpu_id, CpuCommand::Stop)
    }
}
