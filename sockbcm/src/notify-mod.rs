/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-receive-filter-timers
 *
*/
use crate::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The only two legal notification sizes: one head followed by one frame slot.
pub const BCM_NOTIFY_LENGTHS: [(usize, CanVariant); 2] = [
    (BCM_HEAD_SIZE + CAN_FRAME_SIZE, CanVariant::Classic),
    (BCM_HEAD_SIZE + CANFD_FRAME_SIZE, CanVariant::Fd),
];

// length discrimination is ambiguous if both variants share a size
const _: () = assert!(BCM_NOTIFY_LENGTHS[0].0 != BCM_NOTIFY_LENGTHS[1].0);

/// largest datagram the decoder accepts
pub const BCM_NOTIFY_MAX: usize = BCM_HEAD_SIZE + CANFD_FRAME_SIZE;

// one extra byte so an oversize datagram is not truncated to a legal size
const BCM_RECV_SIZE: usize = BCM_NOTIFY_MAX + 1;

pub fn classify_by_length(len: usize) -> Option<CanVariant> {
    BCM_NOTIFY_LENGTHS
        .iter()
        .find(|(size, _)| *size == len)
        .map(|(_, variant)| *variant)
}

/// Decoded RX_CHANGED or RX_TIMEOUT notification.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SockBcmMsg {
    opcode: CanBcmOpCode,
    variant: CanVariant,
    canid: SockCanId,
    frame: Option<CanAnyFrame>,
}

impl SockBcmMsg {
    pub fn decode(bytes: &[u8]) -> Result<SockBcmMsg, BcmError> {
        let variant = match classify_by_length(bytes.len()) {
            Some(variant) => variant,
            None => {
                return Err(BcmError::new(
                    BcmErrorKind::UnexpectedLength,
                    format!(
                        "received {} bytes, expected {} (classic) or {} (fd)",
                        bytes.len(),
                        BCM_NOTIFY_LENGTHS[0].0,
                        BCM_NOTIFY_LENGTHS[1].0
                    ),
                ))
            }
        };

        let head = BcmMsgHead::from_bytes(bytes)?;
        let frame = match head.opcode {
            CanBcmOpCode::RxChanged => Some(CanAnyFrame::from_bytes(&bytes[BCM_HEAD_SIZE..], variant)?),
            CanBcmOpCode::RxTimeout => None,
            _ => {
                return Err(BcmError::new(
                    BcmErrorKind::UnexpectedOpcode,
                    format!("canid:{:#x} unexpected notification {:?}", head.can_id, head.opcode),
                ))
            }
        };

        log::debug!("bcm decode {:?} {:?} canid:{:#x}", head.opcode, variant, head.can_id);
        Ok(SockBcmMsg {
            opcode: head.opcode,
            variant,
            canid: head.can_id,
            frame,
        })
    }

    pub fn get_opcode(&self) -> CanBcmOpCode {
        self.opcode
    }

    pub fn get_variant(&self) -> CanVariant {
        self.variant
    }

    pub fn get_id(&self) -> SockCanId {
        self.canid
    }

    pub fn is_timeout(&self) -> bool {
        self.opcode == CanBcmOpCode::RxTimeout
    }

    /// updated frame, None on timeout
    pub fn get_raw(&self) -> Option<&CanAnyFrame> {
        self.frame.as_ref()
    }

    pub fn get_len(&self) -> u8 {
        self.frame.as_ref().map_or(0, |frame| frame.get_len())
    }

    pub fn get_data(&self) -> &[u8] {
        match &self.frame {
            Some(frame) => frame.get_data(),
            None => &[],
        }
    }

    #[cfg(all(feature = "serde", feature = "serde_json"))]
    pub fn to_json(&self) -> Result<String, BcmError> {
        serde_json::to_string(self).map_err(|error| BcmError::new(BcmErrorKind::EncodingError, error.to_string()))
    }
}

/// Result of a poll on the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BcmPoll {
    Ready(SockBcmMsg),
    WouldBlock,
}

/// Pulls at most one datagram from the transport and decodes it.
pub fn receive_notification<T>(sock: &mut T) -> Result<BcmPoll, BcmError>
where
    T: BcmTransport + ?Sized,
{
    match sock.receive(BCM_RECV_SIZE)? {
        BcmRecv::WouldBlock => Ok(BcmPoll::WouldBlock),
        BcmRecv::Data(buffer) => Ok(BcmPoll::Ready(SockBcmMsg::decode(&buffer)?)),
    }
}

/// Application side of the receive loop. Recovery policy on timeout or on
/// protocol error belongs to the implementer.
pub trait BcmHandler {
    fn on_changed(&mut self, msg: &SockBcmMsg);
    fn on_timeout(&mut self, msg: &SockBcmMsg);

    /// Protocol error (length/opcode). Return false to stop the loop.
    fn on_error(&mut self, error: &BcmError) -> bool {
        log::warn!("bcm notification dropped {}", error);
        true
    }
}

pub fn dispatch<H>(msg: &SockBcmMsg, handler: &mut H)
where
    H: BcmHandler + ?Sized,
{
    match msg.get_opcode() {
        CanBcmOpCode::RxTimeout => handler.on_timeout(msg),
        _ => handler.on_changed(msg),
    }
}

/// Shared stop request for a receive loop.
#[derive(Clone, Debug, Default)]
pub struct BcmStop(Arc<AtomicBool>);

impl BcmStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Single consumer receive loop: one datagram pulled, decoded and dispatched
/// at a time.
pub struct BcmListener {
    stop: BcmStop,
    idle: Duration,
    count: u64,
}

impl BcmListener {
    pub fn new(stop: BcmStop) -> Self {
        BcmListener {
            stop,
            idle: Duration::from_millis(10),
            count: 0,
        }
    }

    /// sleep between two empty polls of a non blocking channel
    pub fn set_idle(&mut self, idle: Duration) -> &mut Self {
        self.idle = idle;
        self
    }

    /// number of notifications dispatched so far
    pub fn get_count(&self) -> u64 {
        self.count
    }

    /// One receive attempt. Returns true when a notification was dispatched.
    pub fn poll_once<T, H>(&mut self, sock: &mut T, handler: &mut H) -> Result<bool, BcmError>
    where
        T: BcmTransport + ?Sized,
        H: BcmHandler + ?Sized,
    {
        match receive_notification(sock) {
            Ok(BcmPoll::Ready(msg)) => {
                self.count += 1;
                dispatch(&msg, handler);
                Ok(true)
            }
            Ok(BcmPoll::WouldBlock) => Ok(false),
            Err(error) => match error.get_kind() {
                BcmErrorKind::UnexpectedLength | BcmErrorKind::UnexpectedOpcode | BcmErrorKind::InvalidFrameLength => {
                    if !handler.on_error(&error) {
                        self.stop.stop();
                    }
                    Ok(false)
                }
                _ => Err(error),
            },
        }
    }

    /// Loops until stop is requested. Transport failures end the loop.
    pub fn run<T, H>(&mut self, sock: &mut T, handler: &mut H) -> Result<u64, BcmError>
    where
        T: BcmTransport + ?Sized,
        H: BcmHandler + ?Sized,
    {
        while !self.stop.is_stopped() {
            if !self.poll_once(sock, handler)? && !self.stop.is_stopped() && !self.idle.is_zero() {
                thread::sleep(self.idle);
            }
        }
        Ok(self.count)
    }
}
