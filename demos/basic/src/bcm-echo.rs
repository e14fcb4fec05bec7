/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 */
extern crate sockbcm;
use env_logger::Env;
use sockbcm::prelude::*;
use std::thread;
use std::time::Duration;

#[path = "./bcm-config.rs"]
mod config;
use config::DemoConfig;

const LISTEN_ID: SockCanId = 0x444;

struct EchoHandler {
    frameid: SockCanId,
    verbose: bool,
    limit: u64,
    changes: u64,
    stop: BcmStop,
    outbox: Vec<Vec<u8>>,
}

impl BcmHandler for EchoHandler {
    fn on_changed(&mut self, msg: &SockBcmMsg) {
        if self.verbose {
            match msg.to_json() {
                Ok(json) => log::info!("changed {}", json),
                Err(error) => log::warn!("changed canid:{:#x} {}", msg.get_id(), error),
            }
        }

        if let Some(frame) = msg.get_raw() {
            let echo = frame
                .with_id(self.frameid)
                .and_then(|echo| encode_send_once(echo.get_variant(), &[echo]));
            match echo {
                Ok(buffers) => self.outbox.extend(buffers),
                Err(error) => log::warn!("echo canid:{:#x} dropped {}", msg.get_id(), error),
            }
        }

        self.changes += 1;
        if self.limit > 0 && self.changes >= self.limit {
            self.stop.stop();
        }
    }

    fn on_timeout(&mut self, msg: &SockBcmMsg) {
        log::warn!("canid:{:#x} cyclic frame missing", msg.get_id());
    }

    fn on_error(&mut self, error: &BcmError) -> bool {
        log::error!("bad notification {}", error);
        true
    }
}

// returns the number of received notifications
fn echo<T>(sock: &mut T, config: &DemoConfig, stop_when_idle: bool) -> Result<u64, BcmError>
where
    T: BcmTransport + ?Sized,
{
    let mut filter = RxFilter::new(LISTEN_ID);
    filter.set_mask(&[0xFF]).set_timers(0, 2000);
    sock.send(&filter.encode(config.variant)?)?;
    log::info!("listening canid:{:#x} echo on canid:{:#x}", LISTEN_ID, config.frameid);

    let stop = BcmStop::new();
    let mut listener = BcmListener::new(stop.clone());
    let mut handler = EchoHandler {
        frameid: config.frameid,
        verbose: config.verbose,
        limit: config.count,
        changes: 0,
        stop: stop.clone(),
        outbox: Vec::new(),
    };

    while !stop.is_stopped() {
        let ready = listener.poll_once(sock, &mut handler)?;
        sock.send_all(&std::mem::take(&mut handler.outbox))?;
        if !ready {
            if stop_when_idle {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    sock.send(&encode_rx_filter_delete(config.variant, LISTEN_ID)?)?;
    Ok(listener.get_count())
}

#[cfg(feature = "kernel-bcm")]
fn run(config: &DemoConfig) -> Result<u64, BcmError> {
    let mut sock = SockBcmHandle::open_bcm(config.iface.as_str())?;
    sock.set_blocking(false)?;
    log::info!("bcm socket open on {} ifindex:{}", config.iface, sock.get_ifindex());
    echo(&mut sock, config, false)
}

#[cfg(not(feature = "kernel-bcm"))]
fn notification(opcode: CanBcmOpCode, frame: &CanAnyFrame) -> Vec<u8> {
    let mut head = BcmMsgHead::new(opcode, frame.get_variant().as_flag(), frame.get_id());
    head.nframes = 1;
    let mut buffer = Vec::new();
    head.write_to(&mut buffer);
    frame.write_to(&mut buffer);
    buffer
}

#[cfg(not(feature = "kernel-bcm"))]
fn run(config: &DemoConfig) -> Result<u64, BcmError> {
    log::info!("no kernel socket, {} replaced by in-memory loopback", config.iface);
    let mut sock = BcmLoopback::new();
    sock.push_inbound(notification(
        CanBcmOpCode::RxChanged,
        &CanAnyFrame::new(config.variant, LISTEN_ID, &[0x01, 0x11])?,
    ))
    .push_inbound(notification(
        CanBcmOpCode::RxChanged,
        &CanAnyFrame::new(config.variant, LISTEN_ID, &[0x02, 0x11])?,
    ))
    .push_inbound(notification(
        CanBcmOpCode::RxTimeout,
        &CanAnyFrame::empty(config.variant, LISTEN_ID),
    ))
    .push_inbound(vec![0u8; 3]);

    let count = echo(&mut sock, config, true)?;
    for buffer in sock.get_sent() {
        let head = BcmMsgHead::from_bytes(buffer)?;
        log::info!("sent {:?} canid:{:#x} size:{}", head.opcode, head.can_id, buffer.len());
    }
    Ok(count)
}

fn main() -> Result<(), String> {
    // Initialize logging backend for the `log` facade (idempotent).
    let env = Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();

    let config = DemoConfig::load()?;
    log::info!("bcm-echo iface:{} variant:{:?}", config.iface, config.variant);

    match run(&config) {
        Err(error) => Err(format!("bcm-echo fail {error}")),
        Ok(count) => {
            log::info!("bcm-echo stopped after {} notification(s)", count);
            Ok(())
        }
    }
}
