/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-protocol-sockets-sock-dgram
 *
*/
use super::cglue;
use crate::prelude::*;
use std::io;
use std::mem;
use std::os::raw::{c_char, c_int, c_void};

pub trait CanIFaceFrom<T> {
    fn map_can_iface(sock: c_int, iface: T) -> c_int;
}

impl CanIFaceFrom<&str> for SockBcmHandle {
    fn map_can_iface(sock: c_int, iface: &str) -> c_int {
        let mut ifreq: cglue::ifreq = unsafe { mem::zeroed() };

        let iname = iface.as_bytes();

        // keep the trailing zero
        for idx in 0..cglue::can_SOCK_x_IFACE_LEN as usize - 1 {
            if idx == iname.len() {
                break;
            };
            unsafe { ifreq.ifr_ifrn.ifrn_name[idx] = iname[idx] as c_char };
        }

        // get Can iface index
        let rc = unsafe { cglue::ioctl(sock, cglue::can_SOCK_x_GETIFINDEX as _, &mut ifreq as *mut cglue::ifreq) };

        if rc < 0 {
            rc
        } else {
            unsafe { ifreq.ifr_ifru.ifru_ivalue } //ifr.ifr_if index
        }
    }
}

impl CanIFaceFrom<u32> for SockBcmHandle {
    fn map_can_iface(_sock: c_int, iface: u32) -> c_int {
        iface as c_int
    }
}

/// Connected CAN_BCM datagram socket.
pub struct SockBcmHandle {
    sockfd: c_int,
    ifindex: c_int,
}

impl SockBcmHandle {
    pub fn open_bcm<T>(candev: T) -> Result<SockBcmHandle, BcmError>
    where
        SockBcmHandle: CanIFaceFrom<T>,
    {
        let sockfd = unsafe {
            cglue::socket(
                cglue::can_SOCK_x_CAN_PF as c_int,
                cglue::can_SOCK_x_DGRAM as c_int,
                cglue::can_SOCK_x_BCM as c_int,
            )
        };
        if sockfd < 0 {
            return Err(cglue::get_perror("fail-socketbcm-open"));
        }
        // from here the handle owns the fd, any early return closes it
        let mut sockbcm = SockBcmHandle { sockfd, ifindex: 0 };

        let index = SockBcmHandle::map_can_iface(sockfd, candev);
        if index < 0 {
            return Err(cglue::get_perror("fail-socketbcm-iface"));
        }
        sockbcm.ifindex = index;

        let mut canaddr: cglue::sockaddr_can = unsafe { mem::zeroed() };
        canaddr.can_family = cglue::can_SOCK_x_CAN_AF as _;
        canaddr.can_ifindex = index;

        let sockaddr = cglue::__CONST_SOCKADDR_ARG {
            __sockaddr__: &canaddr as *const _ as *const cglue::sockaddr,
        };
        let status = unsafe {
            cglue::connect(
                sockfd,
                sockaddr,
                mem::size_of::<cglue::sockaddr_can>() as cglue::socklen_t,
            )
        };
        if status < 0 {
            return Err(cglue::get_perror("fail-socketbcm-connect"));
        }

        log::debug!("bcm socket fd:{} connected on ifindex:{}", sockfd, index);
        Ok(sockbcm)
    }

    pub fn as_rawfd(&self) -> c_int {
        self.sockfd
    }

    pub fn get_ifindex(&self) -> c_int {
        self.ifindex
    }

    /// non blocking receive returns BcmRecv::WouldBlock when nothing is pending
    pub fn set_blocking(&mut self, blocking: bool) -> Result<&mut Self, BcmError> {
        // retrieve current flags
        let current_flag = unsafe { cglue::fcntl(self.sockfd, cglue::can_SOCK_x_GETFL as c_int) };
        if current_flag < 0 {
            return Err(cglue::get_perror("can-nonblock-fail"));
        }

        let new_flag = if blocking {
            current_flag & !(cglue::can_SOCK_x_NONBLOCK as c_int)
        } else {
            current_flag | cglue::can_SOCK_x_NONBLOCK as c_int
        };

        let status = unsafe { cglue::fcntl(self.sockfd, cglue::can_SOCK_x_SETFL as c_int, new_flag) };
        if status < 0 {
            return Err(cglue::get_perror("can-nonblock-fail"));
        }
        Ok(self)
    }

    pub fn close(self) {
        // fd is released by Drop
    }
}

impl Drop for SockBcmHandle {
    fn drop(&mut self) {
        unsafe { cglue::close(self.sockfd) };
    }
}

impl BcmTransport for SockBcmHandle {
    fn send(&mut self, buffer: &[u8]) -> Result<(), BcmError> {
        let count = unsafe { cglue::send(self.sockfd, buffer.as_ptr() as *const c_void, buffer.len(), 0) };
        if count != buffer.len() as isize {
            return Err(cglue::get_perror("fail-socketbcm-write"));
        }
        Ok(())
    }

    fn receive(&mut self, max_bytes: usize) -> Result<BcmRecv, BcmError> {
        let mut buffer = vec![0u8; max_bytes];
        let count = unsafe { cglue::recv(self.sockfd, buffer.as_mut_ptr() as *mut c_void, max_bytes, 0) };
        if count < 0 {
            let error = cglue::last_error();
            return match error.kind() {
                io::ErrorKind::WouldBlock => Ok(BcmRecv::WouldBlock),
                _ => Err(BcmError::new(
                    BcmErrorKind::TransportError,
                    format!("fail-socketbcm-read: {}", error),
                )),
            };
        }
        buffer.truncate(count as usize);
        Ok(BcmRecv::Data(buffer))
    }
}
