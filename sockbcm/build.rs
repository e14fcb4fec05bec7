/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
*/
#[cfg(feature = "kernel-bcm")]
extern crate bindgen;

#[cfg(feature = "kernel-bcm")]
fn main() {
    // invalidate the built crate whenever the wrapper changes
    println!("cargo:rerun-if-changed=src/capi/sockbcm-map.h");

    let header = "
    // -----------------------------------------------------------------------
    //         <- private 'sockbcm' Rust/C unsafe binding ->
    // -----------------------------------------------------------------------
    //   Do not exit this file it will be regenerated automatically by cargo.
    //   Check:
    //     - build.rs at project root for dynamically mapping
    //     - src/capi/sockbcm-map.h for static values
    // -----------------------------------------------------------------------
    ";

    let sockbcm = bindgen::Builder::default()
        // main entry point for wrapper
        .header("src/capi/sockbcm-map.h")
        .raw_line(header)
        // default wrapper config
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .derive_debug(false)
        .layout_tests(false)
        .allowlist_function("socket")
        .allowlist_function("connect")
        .allowlist_function("ioctl")
        .allowlist_function("fcntl")
        .allowlist_function("send")
        .allowlist_function("recv")
        .allowlist_function("close")
        .allowlist_type("can_SOCK_x")
        .allowlist_type("sockaddr_can")
        .allowlist_type("ifreq")
        // generate sockbcm wrapper
        .generate()
        .expect("Unable to generate sockbcm");

    sockbcm
        .write_to_file("src/capi/sockbcm-map.rs")
        .expect("Couldn't write sockbcm!");
}

#[cfg(not(feature = "kernel-bcm"))]
fn main() {}
