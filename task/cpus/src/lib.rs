// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPU service.
//!
//! Exposes the board's CPUs to the non-secure world through the platform
//! ioctl: how many there are, what state each one is in, and start/stop
//! for those controlled as remote processors. Requests that are well formed
//! always succeed at the transport level; what happened to the CPU is in
//! the response's `status` word.

#![cfg_attr(not(test), no_std)]

use drv_cpus_api::{
    encode_status, CpuCmdRes, CpuCommand, CpuInfoRes, CpuServiceArgs,
    CtrlMethod, IoctlRequest, PlatformError, PlatformIoctl, ServiceInfo,
    ServiceType, REQUEST_SIZE, RESPONSE_SIZE,
};
use drv_device_api::DeviceId;
use drv_rproc_api::{CpuState, RprocError};
use drv_rproc_core::Rprocs;
use num_traits::FromPrimitive;
use ringbuf::*;
use zerocopy::{FromBytes, IntoBytes};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    StartupBoot(u32),
    StartupFailed { cpu: u32, err: RprocError },
    BadLength { input: usize, output: usize },
    UnknownRequest(u32),
    UnknownType(u32),
    Request { kind: ServiceType, cpu: u32 },
    UnknownCpu(u32),
    Command { cpu: u32, cmd: CpuCommand, status: i32 },
}

#[cfg(not(test))]
ringbuf!(Trace, 32, Trace::None);
#[cfg(test)]
ringbuf!(Trace, 256, Trace::None);

/// `nb_cpu` of a table with `len` entries.
fn cpu_count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// A CPU known to the service.
#[derive(Copy, Clone, Debug)]
pub struct CpuInfo {
    pub name: &'static str,
    pub method: CtrlMethod,
    /// Remote-processor device, for [`CtrlMethod::RemoteProc`].
    pub ctrl: Option<DeviceId>,
    pub enable_at_startup: bool,
}

pub struct CpuService<'r, 'a> {
    cpus: &'r [CpuInfo],
    rprocs: Rprocs<'r, 'a>,
}

impl<'r, 'a> CpuService<'r, 'a> {
    pub fn new(cpus: &'r [CpuInfo], rprocs: Rprocs<'r, 'a>) -> Self {
        Self { cpus, rprocs }
    }

    fn cpu(&self, id: u32) -> Option<&'r CpuInfo> {
        self.cpus.get(id as usize)
    }

    /// The controller of a CPU we know how to control. A CPU declared as a
    /// remote processor with no device behind it still counts; operations
    /// on it report `NoSuchDevice`.
    fn controller(cpu: &CpuInfo) -> Option<Result<DeviceId, RprocError>> {
        match cpu.method {
            CtrlMethod::RemoteProc => {
                Some(cpu.ctrl.ok_or(RprocError::NoSuchDevice))
            }
            CtrlMethod::None | CtrlMethod::Inval => None,
        }
    }

    fn status_of(&self, ctrl: Result<DeviceId, RprocError>) -> i32 {
        encode_status(ctrl.and_then(|dev| self.rprocs.status(dev)))
    }

    /// Boots every controllable CPU that is enabled at startup and not
    /// already running. A CPU that fails to boot doesn't stop the others;
    /// the last failure is returned.
    pub fn init(&self) -> Result<(), RprocError> {
        let mut result = Ok(());
        for (id, cpu) in (0u32..).zip(self.cpus) {
            let Some(ctrl) = Self::controller(cpu) else {
                continue;
            };
            if !cpu.enable_at_startup {
                continue;
            }

            let booted = ctrl.and_then(|dev| {
                if self.rprocs.status(dev) == Ok(CpuState::Running) {
                    return Ok(());
                }
                ringbuf_entry!(Trace::StartupBoot(id));
                self.rprocs.boot(dev)
            });
            if let Err(err) = booted {
                ringbuf_entry!(Trace::StartupFailed { cpu: id, err });
                result = Err(err);
            }
        }
        result
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            nb_cpu: cpu_count(self.cpus.len()),
        }
    }

    pub fn info(&self, id: u32) -> CpuInfoRes {
        let Some(cpu) = self.cpu(id) else {
            ringbuf_entry!(Trace::UnknownCpu(id));
            return CpuInfoRes::new(
                RprocError::NoSuchDevice.errno(),
                CtrlMethod::Inval,
                "",
            );
        };

        let status = match Self::controller(cpu) {
            Some(ctrl) => self.status_of(ctrl),
            None if cpu.enable_at_startup => CpuState::Running as i32,
            None => CpuState::Offline as i32,
        };
        CpuInfoRes::new(status, cpu.method, cpu.name)
    }

    pub fn send_cmd(&self, id: u32, cmd: CpuCommand) -> CpuCmdRes {
        let result = match self.cpu(id) {
            None => Err(RprocError::NoSuchDevice),
            Some(cpu) => match Self::controller(cpu) {
                None => Err(RprocError::NotSupported),
                Some(ctrl) => ctrl.and_then(|dev| {
                    match cmd {
                        CpuCommand::Start => self.rprocs.boot(dev)?,
                        CpuCommand::Stop => self.rprocs.shutdown(dev)?,
                    }
                    self.rprocs.status(dev)
                }),
            },
        };

        let status = encode_status(result);
        ringbuf_entry!(Trace::Command {
            cpu: id,
            cmd,
            status
        });
        CpuCmdRes { status }
    }

    /// Decodes a request, runs it, and encodes the response into `output`.
    pub fn handle(&self, input: &[u8], output: &mut [u8]) -> PlatformError {
        if input.len() != REQUEST_SIZE || output.len() != RESPONSE_SIZE {
            ringbuf_entry!(Trace::BadLength {
                input: input.len(),
                output: output.len(),
            });
            return PlatformError::InvalidParam;
        }
        let Ok(args) = CpuServiceArgs::read_from_bytes(input) else {
            return PlatformError::InvalidParam;
        };
        let Some(kind) = ServiceType::from_u32(args.kind) else {
            ringbuf_entry!(Trace::UnknownType(args.kind));
            return PlatformError::NotSupported;
        };
        ringbuf_entry!(Trace::Request {
            kind,
            cpu: args.cpu_id
        });

        output.fill(0);
        let written = match kind {
            ServiceType::ServiceInfo => {
                self.service_info().write_to_prefix(output).is_ok()
            }
            ServiceType::Info => {
                self.info(args.cpu_id).write_to_prefix(output).is_ok()
            }
            ServiceType::Start => self
                .send_cmd(args.cpu_id, CpuCommand::Start)
                .write_to_prefix(output)
                .is_ok(),
            ServiceType::Stop => self
                .send_cmd(args.cpu_id, CpuCommand::Stop)
                .write_to_prefix(output)
                .is_ok(),
        };
        if written {
            PlatformError::Success
        } else {
            PlatformError::SystemError
        }
    }
}

/// Secure side of the platform ioctl.
pub fn platform_ioctl(
    svc: &CpuService<'_, '_>,
    request: u32,
    input: &[u8],
    output: &mut [u8],
) -> PlatformError {
    match IoctlRequest::from_u32(request) {
        Some(IoctlRequest::CpuService) => svc.handle(input, output),
        None => {
            ringbuf_entry!(Trace::UnknownRequest(request));
            PlatformError::NotSupported
        }
    }
}

/// Lets a client in the same image call the service directly.
impl PlatformIoctl for CpuService<'_, '_> {
    fn ioctl(
        &self,
        request: IoctlRequest,
        input: &[u8],
        output: &mut [u8],
    ) -> PlatformError {
        platform_ioctl(self, request as u32, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_cpus_api::{decode_status, Cpus};
    use drv_device_api::{Device, DeviceTable};
    use drv_reset_api::{ResetControl, ResetDevice};
    use drv_rproc_api::{RemoteProc, RprocDevice, Sequencing};
    use drv_stm32mp2_reset::{Stm32Reset, CPU1_R, CPUBOOTCR, C1RSTCSETR};
    use drv_stm32mp2_rproc::{
        ExtiWakeEvent, RprocConfig, Stm32Rproc, Stm32mp2A35, A35_WAKE_EVENT,
    };
    use mmio::fake::{FakeClock, FakeRegs};

    type Rcc = FakeRegs<1024>;
    type Exti = FakeRegs<64>;

    const CPU0: u32 = 0;
    const A35: u32 = 1;
    const M0: u32 = 2;
    const GHOST: u32 = 3;

    const BOARD: [CpuInfo; 4] = [
        CpuInfo {
            name: "cpu0",
            method: CtrlMethod::None,
            ctrl: None,
            enable_at_startup: true,
        },
        CpuInfo {
            name: "a35",
            method: CtrlMethod::RemoteProc,
            ctrl: Some(DeviceId(0)),
            enable_at_startup: true,
        },
        CpuInfo {
            name: "m0",
            method: CtrlMethod::Inval,
            ctrl: None,
            enable_at_startup: false,
        },
        CpuInfo {
            name: "ghost",
            method: CtrlMethod::RemoteProc,
            ctrl: Some(DeviceId(9)),
            enable_at_startup: false,
        },
    ];

    /// Builds the A35 on fake RCC and EXTI blocks and hands the service to
    /// `f`.
    fn with_board(
        cpus: &[CpuInfo],
        f: impl FnOnce(&CpuService<'_, '_>, &Rcc, &RprocDevice<'_>),
    ) {
        let rcc = Rcc::new();
        rcc.set_self_clearing(C1RSTCSETR, 1);
        let exti = Exti::new();

        let reset = Stm32Reset::new(&rcc, FakeClock::new(1));
        let rst: ResetDevice<'_> = Device::new("rcc", &reset);
        rst.set_ready(true);

        let rp = Stm32Rproc::new(
            Stm32mp2A35::new(ExtiWakeEvent::new(&exti, A35_WAKE_EVENT)),
            RprocConfig {
                reset: ResetControl::new(&rst, CPU1_R),
            },
            Sequencing::Serialized,
        );
        let devs: [RprocDevice<'_>; 1] = [Device::new("a35", &rp)];
        assert_eq!(devs[0].init(|_| rp.init()), Some(Ok(())));

        let table = DeviceTable::new(&devs);
        let svc = CpuService::new(cpus, Rprocs::new(&table));
        f(&svc, &rcc, &devs[0]);
    }

    fn traced(t: Trace) -> bool {
        let mut found = false;
        __RINGBUF.for_each(|e| found |= e.payload == t);
        found
    }

    fn request(kind: u32, cpu_id: u32) -> [u8; REQUEST_SIZE] {
        let mut buf = [0; REQUEST_SIZE];
        buf.copy_from_slice(CpuServiceArgs { kind, cpu_id }.as_bytes());
        buf
    }

    #[test]
    fn startup_boots_enabled_remote_procs() {
        with_board(&BOARD, |svc, rcc, a35| {
            assert_eq!(svc.info(A35).state(), Ok(CpuState::Offline));

            assert_eq!(svc.init(), Ok(()));
            assert_eq!(svc.info(A35).state(), Ok(CpuState::Running));
            assert_eq!(rcc.peek(CPUBOOTCR), 0b10);

            // Already running: no second reference.
            assert_eq!(svc.init(), Ok(()));
            assert_eq!(a35.api().unwrap().rproc().unwrap().use_count(), 1);
        });
    }

    #[test]
    fn startup_keeps_going_past_failures() {
        let mut cpus = BOARD;
        cpus[GHOST as usize].enable_at_startup = true;
        cpus.swap(A35 as usize, GHOST as usize);

        // The ghost comes first and fails; the A35 after it still boots.
        with_board(&cpus, |svc, _, _| {
            assert_eq!(svc.init(), Err(RprocError::NoSuchDevice));
            let a35 = svc.info(GHOST);
            assert_eq!(a35.name_str(), "a35");
            assert_eq!(a35.state(), Ok(CpuState::Running));
        });
    }

    #[test]
    fn info_for_every_kind_of_cpu() {
        with_board(&BOARD, |svc, _, _| {
            assert_eq!(svc.service_info().nb_cpu, 4);

            let cpu0 = svc.info(CPU0);
            assert_eq!(cpu0.state(), Ok(CpuState::Running));
            assert_eq!(cpu0.ctrl_method(), Some(CtrlMethod::None));
            assert_eq!(cpu0.name_str(), "cpu0");

            let m0 = svc.info(M0);
            assert_eq!(m0.state(), Ok(CpuState::Offline));
            assert_eq!(m0.ctrl_method(), Some(CtrlMethod::Inval));

            let ghost = svc.info(GHOST);
            assert_eq!(ghost.state(), Err(RprocError::NoSuchDevice));
            assert_eq!(ghost.name_str(), "ghost");

            let unknown = svc.info(17);
            assert_eq!(unknown.status, -19);
            assert_eq!(unknown.ctrl_method(), Some(CtrlMethod::Inval));
            assert_eq!(unknown.name_str(), "");
        });
    }

    #[test]
    fn start_and_stop_through_the_client() {
        with_board(&BOARD, |svc, rcc, _| {
            let cpus = Cpus::new(svc);

            assert_eq!(cpus.start(A35), Ok(Ok(CpuState::Running)));
            assert_eq!(cpus.start(A35), Ok(Ok(CpuState::Running)));
            assert_eq!(cpus.stop(A35), Ok(Ok(CpuState::Running)));
            assert_eq!(rcc.peek(CPUBOOTCR), 0b10);
            assert_eq!(cpus.stop(A35), Ok(Ok(CpuState::Offline)));
            assert_eq!(rcc.peek(CPUBOOTCR), 0);
            assert_eq!(cpus.stop(A35), Ok(Ok(CpuState::Offline)));

            let info = cpus.info(A35).unwrap();
            assert_eq!(info.name_str(), "a35");
            assert_eq!(info.state(), Ok(CpuState::Offline));
            assert_eq!(cpus.service_info().map(|s| s.nb_cpu), Ok(4));
        });
    }

    #[test]
    fn command_failures_stay_in_the_status_word() {
        with_board(&BOARD, |svc, rcc, _| {
            let cpus = Cpus::new(svc);

            assert_eq!(cpus.start(CPU0), Ok(Err(RprocError::NotSupported)));
            assert_eq!(cpus.stop(M0), Ok(Err(RprocError::NotSupported)));
            assert_eq!(cpus.start(GHOST), Ok(Err(RprocError::NoSuchDevice)));
            assert_eq!(cpus.start(42), Ok(Err(RprocError::NoSuchDevice)));

            // The hold bit never lands, so the core can't be released.
            rcc.set_stuck(CPUBOOTCR, 0b10);
            assert_eq!(
                cpus.start(A35),
                Ok(Err(RprocError::HardwareFailure(-116)))
            );
            assert_eq!(
                decode_status(svc.info(A35).status),
                Ok(CpuState::Offline)
            );
        });
    }

    #[test]
    fn crashed_cpu_refuses_to_start() {
        with_board(&BOARD, |svc, _, a35| {
            drv_rproc_core::report_crash(a35).unwrap();
            assert_eq!(
                svc.send_cmd(A35, CpuCommand::Start).status,
                RprocError::InvalidState.errno()
            );
            assert_eq!(svc.info(A35).state(), Ok(CpuState::Crashed));
        });
    }

    #[test]
    fn malformed_requests() {
        with_board(&BOARD, |svc, _, _| {
            let mut out = [0xaa; RESPONSE_SIZE];

            assert_eq!(
                svc.handle(&request(0, 0)[..4], &mut out),
                PlatformError::InvalidParam
            );
            assert_eq!(
                svc.handle(&request(0, 0), &mut out[..39]),
                PlatformError::InvalidParam
            );
            assert_eq!(
                svc.handle(&request(0x4d41_4c46, 0), &mut out),
                PlatformError::NotSupported
            );
            // Nothing was written for any of them.
            assert!(out.iter().all(|&b| b == 0xaa));

            assert_eq!(
                platform_ioctl(svc, 0x4d41_4c46, &request(0, 0), &mut out),
                PlatformError::NotSupported
            );

            assert!(traced(Trace::BadLength {
                input: 4,
                output: RESPONSE_SIZE
            }));
            assert!(traced(Trace::BadLength {
                input: REQUEST_SIZE,
                output: 39
            }));
            assert!(traced(Trace::UnknownType(0x4d41_4c46)));
            assert!(traced(Trace::UnknownRequest(0x4d41_4c46)));
        });
    }

    #[test]
    fn cpu_count_saturates() {
        assert_eq!(cpu_count(BOARD.len()), 4);
        assert_eq!(cpu_count(i32::MAX as usize), i32::MAX);
        assert_eq!(cpu_count(usize::MAX), i32::MAX);
    }

    #[test]
    fn raw_service_info() {
        with_board(&BOARD, |svc, _, _| {
            let mut out = [0xaa; RESPONSE_SIZE];
            assert_eq!(
                platform_ioctl(svc, 0, &request(0, 0), &mut out),
                PlatformError::Success
            );
            assert_eq!(&out[..4], &4i32.to_ne_bytes());
            assert!(out[4..].iter().all(|&b| b == 0));
        });
    }
}
