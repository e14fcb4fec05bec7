/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-message-sequence-transmission
 *    include/uapi/linux/can/bcm.h
 *
*/
use bitflags::bitflags;

use crate::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::mem;
use std::os::raw::c_long;
use std::time::Duration;

// struct bcm_timeval { long tv_sec; long tv_usec; }
const LONG_SIZE: usize = mem::size_of::<c_long>();
const TIMEVAL_SIZE: usize = 2 * LONG_SIZE;

const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

const OPCODE_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 4;
const COUNT_OFFSET: usize = 8;
const IVAL1_OFFSET: usize = align_up(12, LONG_SIZE);
const IVAL2_OFFSET: usize = IVAL1_OFFSET + TIMEVAL_SIZE;
const CANID_OFFSET: usize = IVAL2_OFFSET + TIMEVAL_SIZE;
const NFRAMES_OFFSET: usize = CANID_OFFSET + 4;

/// sizeof(struct bcm_msg_head), frames[] that follow are 8 bytes aligned
pub const BCM_HEAD_SIZE: usize = align_up(NFRAMES_OFFSET + 4, 8);

/// upper bound of frames in one TX_SETUP sequence
pub const BCM_MAX_FRAMES: usize = 256;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct CanBcmFlag: u32 {
        const SET_TIMER         = 0x0001;
        const START_TIMER       = 0x0002;
        const TX_COUNTEVT       = 0x0004;
        const TX_ANNOUNCE       = 0x0008;
        const TX_CP_CAN_ID      = 0x0010;
        const RX_FILTER_ID      = 0x0020;
        const RX_CHECK_DLC      = 0x0040;
        const RX_NO_AUTOTIMER   = 0x0080;
        const RX_ANNOUNCE_RESUME= 0x0100;
        const TX_RESET_MULTI_IDX= 0x0200;
        const RX_RTR_FRAME      = 0x0400;
        const FD_FRAME          = 0x0800;
        const NONE =0;
    }
}

impl CanBcmFlag {
    pub fn check(flags: CanBcmFlag, value: u32) -> bool {
        flags.bits() & value != 0
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanBcmOpCode {
    TxSetup,
    TxDelete,
    TxRead,
    TxSend,
    RxSetup,
    RxDelete,
    RxRead,
    TxStatus,
    TxExpired,
    RxStatus,
    RxTimeout,
    RxChanged,
}

impl CanBcmOpCode {
    pub fn from(opcode: u32) -> Result<CanBcmOpCode, BcmError> {
        let ope = match opcode {
            1 => CanBcmOpCode::TxSetup,
            2 => CanBcmOpCode::TxDelete,
            3 => CanBcmOpCode::TxRead,
            4 => CanBcmOpCode::TxSend,
            5 => CanBcmOpCode::RxSetup,
            6 => CanBcmOpCode::RxDelete,
            7 => CanBcmOpCode::RxRead,
            8 => CanBcmOpCode::TxStatus,
            9 => CanBcmOpCode::TxExpired,
            10 => CanBcmOpCode::RxStatus,
            11 => CanBcmOpCode::RxTimeout,
            12 => CanBcmOpCode::RxChanged,
            _ => {
                return Err(BcmError::new(
                    BcmErrorKind::UnexpectedOpcode,
                    format!("invalid bcm opcode value={}", opcode),
                ))
            }
        };
        Ok(ope)
    }

    pub fn as_u32(opcode: &CanBcmOpCode) -> u32 {
        match opcode {
            CanBcmOpCode::TxSetup => 1,
            CanBcmOpCode::TxDelete => 2,
            CanBcmOpCode::TxRead => 3,
            CanBcmOpCode::TxSend => 4,
            CanBcmOpCode::RxSetup => 5,
            CanBcmOpCode::RxDelete => 6,
            CanBcmOpCode::RxRead => 7,
            CanBcmOpCode::TxStatus => 8,
            CanBcmOpCode::TxExpired => 9,
            CanBcmOpCode::RxStatus => 10,
            CanBcmOpCode::RxTimeout => 11,
            CanBcmOpCode::RxChanged => 12,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BcmTimeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl BcmTimeval {
    pub const ZERO: BcmTimeval = BcmTimeval { tv_sec: 0, tv_usec: 0 };

    pub fn new(tv_sec: i64, tv_usec: i64) -> Self {
        BcmTimeval { tv_sec, tv_usec }
    }

    pub fn from_millis(millis: u64) -> Self {
        BcmTimeval {
            tv_sec: (millis / 1000) as i64,
            tv_usec: ((millis % 1000) * 1000) as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.tv_sec == 0 && self.tv_usec == 0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.tv_sec.max(0) as u64) + Duration::from_micros(self.tv_usec.max(0) as u64)
    }

    fn write_to(&self, buffer: &mut [u8]) {
        // truncation on 32 bit targets matches the kernel's `long`
        let sec = (self.tv_sec as c_long).to_ne_bytes();
        let usec = (self.tv_usec as c_long).to_ne_bytes();
        buffer[..LONG_SIZE].copy_from_slice(&sec);
        buffer[LONG_SIZE..TIMEVAL_SIZE].copy_from_slice(&usec);
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut sec = [0u8; LONG_SIZE];
        let mut usec = [0u8; LONG_SIZE];
        sec.copy_from_slice(&bytes[..LONG_SIZE]);
        usec.copy_from_slice(&bytes[LONG_SIZE..TIMEVAL_SIZE]);
        BcmTimeval {
            tv_sec: c_long::from_ne_bytes(sec) as i64,
            tv_usec: c_long::from_ne_bytes(usec) as i64,
        }
    }
}

impl From<Duration> for BcmTimeval {
    fn from(duration: Duration) -> Self {
        BcmTimeval {
            tv_sec: duration.as_secs() as i64,
            tv_usec: duration.subsec_micros() as i64,
        }
    }
}

/// struct bcm_msg_head, shared by classic and FD messages
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BcmMsgHead {
    pub opcode: CanBcmOpCode,
    pub flags: u32,
    pub count: u32,
    pub ival1: BcmTimeval,
    pub ival2: BcmTimeval,
    pub can_id: SockCanId,
    pub nframes: u32,
}

impl BcmMsgHead {
    pub fn new(opcode: CanBcmOpCode, flags: CanBcmFlag, canid: SockCanId) -> Self {
        BcmMsgHead {
            opcode,
            flags: flags.bits(),
            count: 0,
            ival1: BcmTimeval::ZERO,
            ival2: BcmTimeval::ZERO,
            can_id: canid,
            nframes: 0,
        }
    }

    pub fn check_flags(&self, flags: CanBcmFlag) -> bool {
        CanBcmFlag::check(flags, self.flags)
    }

    pub fn get_flags(&self) -> CanBcmFlag {
        CanBcmFlag::from_bits_retain(self.flags)
    }

    pub fn get_variant(&self) -> CanVariant {
        CanVariant::from_flags(self.get_flags())
    }

    /// appends exactly BCM_HEAD_SIZE bytes, padding zeroed
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        let mut head = [0u8; BCM_HEAD_SIZE];
        head[OPCODE_OFFSET..OPCODE_OFFSET + 4].copy_from_slice(&CanBcmOpCode::as_u32(&self.opcode).to_ne_bytes());
        head[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&self.flags.to_ne_bytes());
        head[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&self.count.to_ne_bytes());
        self.ival1.write_to(&mut head[IVAL1_OFFSET..IVAL1_OFFSET + TIMEVAL_SIZE]);
        self.ival2.write_to(&mut head[IVAL2_OFFSET..IVAL2_OFFSET + TIMEVAL_SIZE]);
        head[CANID_OFFSET..CANID_OFFSET + 4].copy_from_slice(&self.can_id.to_ne_bytes());
        head[NFRAMES_OFFSET..NFRAMES_OFFSET + 4].copy_from_slice(&self.nframes.to_ne_bytes());
        buffer.extend_from_slice(&head);
    }

    /// Reads the leading head of a BCM message. The opcode must be a known one.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BcmError> {
        if bytes.len() < BCM_HEAD_SIZE {
            return Err(BcmError::new(
                BcmErrorKind::UnexpectedLength,
                format!("bcm head needs {} bytes, got {}", BCM_HEAD_SIZE, bytes.len()),
            ));
        }
        let opcode = CanBcmOpCode::from(read_u32(bytes, OPCODE_OFFSET))?;
        Ok(BcmMsgHead {
            opcode,
            flags: read_u32(bytes, FLAGS_OFFSET),
            count: read_u32(bytes, COUNT_OFFSET),
            ival1: BcmTimeval::from_bytes(&bytes[IVAL1_OFFSET..IVAL1_OFFSET + TIMEVAL_SIZE]),
            ival2: BcmTimeval::from_bytes(&bytes[IVAL2_OFFSET..IVAL2_OFFSET + TIMEVAL_SIZE]),
            can_id: read_u32(bytes, CANID_OFFSET),
            nframes: read_u32(bytes, NFRAMES_OFFSET),
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn head_matches_linux_x86_64_abi() {
        assert_eq!(BCM_HEAD_SIZE, 56);
        assert_eq!(IVAL1_OFFSET, 16);
        assert_eq!(CANID_OFFSET, 48);
        assert_eq!(NFRAMES_OFFSET, 52);
    }

    #[test]
    fn head_field_placement() {
        let mut head = BcmMsgHead::new(
            CanBcmOpCode::TxSetup,
            CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER,
            0x123,
        );
        head.count = 10;
        head.ival1 = BcmTimeval::new(0, 500);
        head.ival2 = BcmTimeval::new(1, 0);
        head.nframes = 2;

        let mut buffer = Vec::new();
        head.write_to(&mut buffer);
        assert_eq!(buffer.len(), BCM_HEAD_SIZE);
        assert_eq!(read_u32(&buffer, OPCODE_OFFSET), 1);
        assert_eq!(read_u32(&buffer, FLAGS_OFFSET), 0x3);
        assert_eq!(read_u32(&buffer, COUNT_OFFSET), 10);
        assert_eq!(read_u32(&buffer, CANID_OFFSET), 0x123);
        assert_eq!(read_u32(&buffer, NFRAMES_OFFSET), 2);
        assert_eq!(
            &buffer[IVAL1_OFFSET + LONG_SIZE..IVAL1_OFFSET + TIMEVAL_SIZE],
            &(500 as c_long).to_ne_bytes()
        );
        assert_eq!(&buffer[IVAL2_OFFSET..IVAL2_OFFSET + LONG_SIZE], &(1 as c_long).to_ne_bytes());

        assert_eq!(BcmMsgHead::from_bytes(&buffer).unwrap(), head);
    }

    #[test]
    fn opcode_values_follow_kernel_enum() {
        for value in 1..=12u32 {
            let opcode = CanBcmOpCode::from(value).unwrap();
            assert_eq!(CanBcmOpCode::as_u32(&opcode), value);
        }
        assert_eq!(
            CanBcmOpCode::from(0).unwrap_err().get_kind(),
            BcmErrorKind::UnexpectedOpcode
        );
        assert_eq!(CanBcmOpCode::as_u32(&CanBcmOpCode::RxChanged), 12);
        assert_eq!(CanBcmOpCode::as_u32(&CanBcmOpCode::RxTimeout), 11);
    }

    #[test]
    fn timeval_conversions() {
        assert_eq!(BcmTimeval::from_millis(1500), BcmTimeval::new(1, 500_000));
        assert_eq!(BcmTimeval::from(Duration::from_micros(500)), BcmTimeval::new(0, 500));
        assert_eq!(BcmTimeval::new(1, 500).as_duration(), Duration::from_micros(1_000_500));
        assert!(BcmTimeval::ZERO.is_zero());
    }

    #[test]
    fn large_millis_do_not_overflow() {
        let timer = BcmTimeval::from_millis(u64::MAX / 100);
        assert_eq!(timer.tv_sec, (u64::MAX / 100 / 1000) as i64);
        assert_eq!(timer.tv_usec, ((u64::MAX / 100) % 1000 * 1000) as i64);
        assert!(timer.tv_usec < 1_000_000);
        assert_eq!(BcmTimeval::from_millis(999), BcmTimeval::new(0, 999_000));
    }

    #[test]
    fn short_head_is_rejected() {
        let error = BcmMsgHead::from_bytes(&[0u8; 8]).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::UnexpectedLength);
    }
}
