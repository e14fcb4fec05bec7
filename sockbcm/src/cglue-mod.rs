/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

#![allow(dead_code)]
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

include!("./capi/sockbcm-map.rs");

use crate::prelude::*;
use std::io;

/// errno of the last failing libc call, EAGAIN/EWOULDBLOCK map to WouldBlock
pub fn last_error() -> io::Error {
    io::Error::last_os_error()
}

pub fn get_perror(uid: &str) -> BcmError {
    BcmError::new(BcmErrorKind::TransportError, format!("{}: {}", uid, last_error()))
}
