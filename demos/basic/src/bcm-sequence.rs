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

#[path = "./bcm-config.rs"]
mod config;
use config::DemoConfig;

fn sample_frames(variant: CanVariant) -> Result<Vec<CanAnyFrame>, BcmError> {
    let frames = match variant {
        CanVariant::Classic => vec![
            CanAnyFrame::new(variant, 0x123, &[0xDE, 0xAD, 0xBE, 0xEF])?,
            CanAnyFrame::new(variant, 0x345, &[0xC0, 0xFF, 0xEE])?,
        ],
        CanVariant::Fd => vec![
            CanAnyFrame::new(variant, 0x567, &[0xDEu8, 0xAD, 0xBE, 0xEF].repeat(4))?,
            CanAnyFrame::new(variant, 0x789, &[0xC0u8, 0xFF, 0xEE].repeat(4))?,
        ],
    };
    Ok(frames)
}

fn play<T>(sock: &mut T, variant: CanVariant) -> Result<(), BcmError>
where
    T: BcmTransport + ?Sized,
{
    let frames = sample_frames(variant)?;
    let schedule = CyclicSchedule::new(10, BcmTimeval::new(0, 500), BcmTimeval::new(1, 0));
    let mut registry = CyclicRegistry::new();

    log::info!("TX_SEND {} frame(s)", frames.len());
    sock.send_all(&encode_send_once(variant, &frames)?)?;

    // one kernel task per frame
    let plan = plan_independent(variant, &frames, &[schedule, schedule])?;
    registry.install(sock, &plan)?;
    log::info!("TX_SETUP independent tasks:{}", registry.task_count());

    let refresh = CanAnyFrame::new(variant, frames[0].get_id(), &[0x01, 0x02, 0x03, 0x04])?;
    registry.update_task(sock, variant, &[refresh], true)?;

    for frame in &frames {
        registry.delete_task(sock, variant, frame.get_id())?;
    }

    // one kernel task walking the frame list
    let plan = plan_sequence(variant, &frames, schedule)?;
    registry.install(sock, &plan)?;
    log::info!("TX_SETUP sequence addressed by canid:{:#x}", frames[0].get_id());

    if let Err(error) = registry.delete_task(sock, variant, frames[1].get_id()) {
        log::info!("member id refused as expected {}", error);
    }
    registry.delete_task(sock, variant, frames[0].get_id())?;

    // only first byte changes are reported
    let mut filter = RxFilter::new(0x444);
    filter.set_mask(&[0xFF]);
    registry.add_filter(sock, variant, filter)?;
    log::info!("RX_SETUP masked filter on canid:0x444");
    registry.delete_filter(sock, variant, 0x444)?;

    log::info!(
        "done tasks:{} filters:{}",
        registry.task_count(),
        registry.filter_count()
    );
    Ok(())
}

#[cfg(feature = "kernel-bcm")]
fn run(config: &DemoConfig) -> Result<(), BcmError> {
    let mut sock = SockBcmHandle::open_bcm(config.iface.as_str())?;
    log::info!("bcm socket open on {} ifindex:{}", config.iface, sock.get_ifindex());
    play(&mut sock, config.variant)
}

#[cfg(not(feature = "kernel-bcm"))]
fn run(config: &DemoConfig) -> Result<(), BcmError> {
    log::info!("no kernel socket, {} replaced by in-memory loopback", config.iface);
    let mut sock = BcmLoopback::new();
    play(&mut sock, config.variant)?;

    if config.verbose {
        for buffer in sock.get_sent() {
            let head = BcmMsgHead::from_bytes(buffer)?;
            log::info!(
                "sent {:?} canid:{:#x} flags:{:?} nframes:{} size:{}",
                head.opcode,
                head.can_id,
                head.get_flags(),
                head.nframes,
                buffer.len()
            );
        }
    }
    Ok(())
}

fn main() -> Result<(), String> {
    // Initialize logging backend for the `log` facade (idempotent).
    let env = Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();

    let config = DemoConfig::load()?;
    log::info!("bcm-sequence iface:{} variant:{:?}", config.iface, config.variant);

    if let Err(error) = run(&config) {
        return Err(format!("bcm-sequence fail {error}"));
    }
    Ok(())
}
