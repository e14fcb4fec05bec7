/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
*/

//! CAN/CAN-FD Broadcast Manager (BCM) protocol codec.
//!
//! Builds byte exact BCM control messages (TX_SEND, TX_SETUP, TX_DELETE,
//! RX_SETUP, RX_DELETE) for classic or FD frames and decodes RX_CHANGED /
//! RX_TIMEOUT notifications, whose variant is only known from their size.
//! The channel itself is behind [`prelude::BcmTransport`]; the Linux socket
//! implementation needs the `kernel-bcm` feature.

#![doc(
    html_logo_url = "https://iot.bzh/images/defaults/company/512-479-max-transp.png",
    html_favicon_url = "https://iot.bzh/images/defaults/favicon.ico"
)]
extern crate bitflags;

#[cfg(feature = "serde")]
extern crate serde;

#[cfg(feature = "kernel-bcm")]
#[path = "./cglue-mod.rs"]
mod cglue;

#[path = "./utils-mod.rs"]
mod utils;

#[path = "./frame-mod.rs"]
mod frame;

#[path = "./head-mod.rs"]
mod head;

#[path = "./encoder-mod.rs"]
mod encoder;

#[path = "./cyclic-mod.rs"]
mod cyclic;

#[path = "./transport-mod.rs"]
mod transport;

#[path = "./notify-mod.rs"]
mod notify;

#[cfg(feature = "kernel-bcm")]
#[path = "./socket-bcm.rs"]
mod sockbcm;

pub mod prelude {
    pub use crate::cyclic::*;
    pub use crate::encoder::*;
    pub use crate::frame::*;
    pub use crate::head::*;
    pub use crate::notify::*;
    #[cfg(feature = "kernel-bcm")]
    pub use crate::sockbcm::*;
    pub use crate::transport::*;
    pub use crate::utils::*;
}
