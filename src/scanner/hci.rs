//! Raw HCI socket backend.
//!
//! Talks to the controller through a raw Linux HCI socket, bypassing the
//! BlueZ daemon. Requires CAP_NET_RAW and CAP_NET_ADMIN or root privileges.

use super::{HciChannel, HciFilter, Received, ScanError};
use crate::record::Timestamp;
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use std::future::Future;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::ptr;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_CHANNEL_RAW: u16 = 0;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_TIME_STAMP: c_int = 3;
const HCI_CMSG_TSTAMP: c_int = 2;

// Device enumeration
const HCI_MAX_DEV: usize = 16;
const HCI_UP: u32 = 0;
const HCIGETDEVLIST: u32 = 0x800448d2;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct HciDevReq {
    dev_id: u16,
    dev_opt: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct HciDevListReq {
    dev_num: u16,
    dev_req: [HciDevReq; HCI_MAX_DEV],
}

impl HciDevListReq {
    /// First listed controller that is powered up.
    fn first_up(&self) -> Option<u16> {
        let listed = usize::from(self.dev_num).min(HCI_MAX_DEV);
        self.dev_req[..listed]
            .iter()
            .find(|req| req.dev_opt & (1 << HCI_UP) != 0)
            .map(|req| req.dev_id)
    }
}

/// Open a raw HCI socket
fn open_hci_socket() -> io::Result<OwnedFd> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Ask the kernel for the first controller that is up.
fn default_device(fd: &OwnedFd) -> Result<u16, ScanError> {
    let mut list = HciDevListReq {
        dev_num: HCI_MAX_DEV as u16,
        ..HciDevListReq::default()
    };

    let ret = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            HCIGETDEVLIST as _,
            &mut list as *mut HciDevListReq as *mut c_void,
        )
    };
    if ret < 0 {
        return Err(ScanError::DeviceUnavailable(format!(
            "failed to list HCI devices: {}",
            io::Error::last_os_error()
        )));
    }

    list.first_up()
        .ok_or_else(|| ScanError::DeviceUnavailable("no HCI device is up".to_string()))
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> io::Result<()> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_option<T>(fd: RawFd, name: c_int, value: &T) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_HCI,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read one packet plus the kernel receive timestamp, if attached.
fn recv_timestamped(fd: RawFd, buf: &mut [u8]) -> io::Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    // u64 elements keep the control buffer aligned for cmsghdr.
    let mut control = [0u64; 8];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let ret = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut timestamp = None;
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    while !cmsg.is_null() {
        let header = unsafe { &*cmsg };
        if header.cmsg_level == SOL_HCI && header.cmsg_type == HCI_CMSG_TSTAMP {
            let tv = unsafe { ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::timeval) };
            timestamp = Some(Timestamp::new(tv.tv_sec as i64, tv.tv_usec as i64));
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
    }

    Ok(Received {
        len: ret as usize,
        timestamp,
    })
}

/// A raw HCI socket bound to one controller.
#[derive(Debug)]
pub struct HciSocket {
    fd: AsyncFd<OwnedFd>,
}

impl HciSocket {
    /// Open `hci<device>`, or the first controller that is up when `device` is `None`.
    pub fn open(device: Option<u16>) -> Result<Self, ScanError> {
        let fd = open_hci_socket().map_err(|e| {
            ScanError::DeviceUnavailable(format!("failed to create HCI socket: {e}"))
        })?;

        let device = match device {
            Some(device) => device,
            None => default_device(&fd)?,
        };
        bind_hci_socket(&fd, device).map_err(|e| {
            ScanError::DeviceUnavailable(format!("failed to bind hci{device}: {e}"))
        })?;

        let fd = AsyncFd::new(fd).map_err(ScanError::Channel)?;
        info!(device, "opened HCI socket");
        Ok(Self { fd })
    }
}

impl HciChannel for HciSocket {
    fn send_command(&mut self, packet: &[u8]) -> io::Result<()> {
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret as usize != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short HCI command write: {ret} of {} bytes", packet.len()),
            ));
        }
        debug!(len = packet.len(), "sent HCI command");
        Ok(())
    }

    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        set_option(self.fd.as_raw_fd(), HCI_FILTER, filter)
    }

    fn enable_timestamps(&mut self) -> io::Result<()> {
        let enable: c_int = 1;
        set_option(self.fd.as_raw_fd(), HCI_TIME_STAMP, &enable)
    }

    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<Received>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|inner| recv_timestamped(inner.as_raw_fd(), buf)) {
                    Ok(result) => return result,
                    // WouldBlock - readiness was stale
                    Err(_) => continue,
                }
            }
        })
    }
}
