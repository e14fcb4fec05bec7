/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#how-to-use-socketcan
 *    https://www.kernel.org/doc/html/latest/networking/can.html#can-fd-flexible-data-rate-driver-support
 *
*/
use bitflags::bitflags;

use crate::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type SockCanId = u32;

/// payload bytes of a classic frame
pub const CAN_MAX_DLEN: usize = 8;
/// payload bytes of an FD frame
pub const CANFD_MAX_DLEN: usize = 64;
/// struct can_frame: can_id(4) len(1) pad(1) res0(1) len8_dlc(1) data(8)
pub const CAN_FRAME_SIZE: usize = 16;
/// struct canfd_frame: can_id(4) len(1) flags(1) res0(1) res1(1) data(64)
pub const CANFD_FRAME_SIZE: usize = 72;

const CAN_DATA_OFFSET: usize = 8;

// payload length an FD frame can carry on the wire (DLC 0..15)
const CANFD_VALID_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct FilterMask: SockCanId {
        /// SFF_MASK valid bits in standard frame id
        const SFF_MASK = 0x0000_07FF;
        /// EFF_MASK valid bits in extended frame id
        const EFF_MASK = 0x1FFF_FFFF;
        /// EFF_FLAG indicate 29 bit extended format
        const EFF_FLAG = 0x8000_0000;
        /// RTR_FLAG remote transmission request flag
        const RTR_FLAG = 0x4000_0000;
        /// ERR_FLAG error flag
        const ERR_FLAG = 0x2000_0000;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct CanFdFlag: u8 {
        /// bit rate switch (second bitrate for payload data)
        const BRS = 0x01;
        /// error state indicator of the transmitting node
        const ESI = 0x02;
        /// mark CAN FD for dual use of struct canfd_frame
        const FDF = 0x04;
    }
}

/// Frame layout selector. Every BCM message carries frames of one variant only.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanVariant {
    Classic,
    Fd,
}

impl CanVariant {
    /// Size of one frame slot on the wire. Depends on the variant only, the
    /// slot always reserves the maximum payload area.
    pub const fn wire_size(self) -> usize {
        match self {
            CanVariant::Classic => CAN_FRAME_SIZE,
            CanVariant::Fd => CANFD_FRAME_SIZE,
        }
    }

    pub const fn max_len(self) -> usize {
        match self {
            CanVariant::Classic => CAN_MAX_DLEN,
            CanVariant::Fd => CANFD_MAX_DLEN,
        }
    }

    pub fn from_flags(flags: CanBcmFlag) -> Self {
        if flags.contains(CanBcmFlag::FD_FRAME) {
            CanVariant::Fd
        } else {
            CanVariant::Classic
        }
    }

    /// BCM head flag selecting this variant
    pub fn as_flag(self) -> CanBcmFlag {
        match self {
            CanVariant::Classic => CanBcmFlag::NONE,
            CanVariant::Fd => CanBcmFlag::FD_FRAME,
        }
    }
}

fn check_canid(canid: SockCanId) -> Result<(), BcmError> {
    let valid = if canid & FilterMask::EFF_FLAG.bits() != 0 {
        let flags = (FilterMask::EFF_FLAG | FilterMask::RTR_FLAG | FilterMask::ERR_FLAG).bits();
        canid & !flags & !FilterMask::EFF_MASK.bits() == 0
    } else {
        let flags = (FilterMask::RTR_FLAG | FilterMask::ERR_FLAG).bits();
        canid & !flags & !FilterMask::SFF_MASK.bits() == 0
    };
    if valid {
        Ok(())
    } else {
        Err(BcmError::new(
            BcmErrorKind::InvalidCanId,
            format!("canid:{:#x} does not fit its frame format", canid),
        ))
    }
}

fn read_canid(bytes: &[u8]) -> SockCanId {
    SockCanId::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn check_slot(bytes: &[u8], variant: CanVariant) -> Result<(), BcmError> {
    if bytes.len() != variant.wire_size() {
        return Err(BcmError::new(
            BcmErrorKind::UnexpectedLength,
            format!("{:?} frame slot is {} bytes, got {}", variant, variant.wire_size(), bytes.len()),
        ));
    }
    Ok(())
}

/// Classical CAN frame structure (aka CAN 2.0B)
/// canid:     CAN ID of the frame and CAN_*_FLAG flags, see FilterMask
/// len:       CAN frame payload length in byte (0 .. 8)
/// len8_dlc:  optional DLC value (9 .. 15) at 8 byte payload length
/// data:      CAN frame payload (up to 8 byte)
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "CanFrameWire"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrameRaw {
    can_id: SockCanId,
    len: u8,
    len8_dlc: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrameRaw {
    pub fn new(canid: SockCanId, data: &[u8]) -> Result<Self, BcmError> {
        if data.len() > CAN_MAX_DLEN {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("canid:{:#x} classic payload len:{} max:{}", canid, data.len(), CAN_MAX_DLEN),
            ));
        }
        check_canid(canid)?;

        let mut buffer = [0u8; CAN_MAX_DLEN];
        buffer[..data.len()].copy_from_slice(data);
        Ok(CanFrameRaw {
            can_id: canid,
            len: data.len() as u8,
            len8_dlc: 0,
            data: buffer,
        })
    }

    pub fn empty(canid: SockCanId) -> Self {
        CanFrameRaw {
            can_id: canid,
            len: 0,
            len8_dlc: 0,
            data: [0; CAN_MAX_DLEN],
        }
    }

    /// raw DLC 9..15 for 8 byte frames, only meaningful with CAN_CTRLMODE_CC_LEN8_DLC
    pub fn set_len8_dlc(&mut self, dlc: u8) -> &mut Self {
        if self.len as usize == CAN_MAX_DLEN && (9..=15).contains(&dlc) {
            self.len8_dlc = dlc;
        }
        self
    }

    pub fn get_id(&self) -> SockCanId {
        self.can_id
    }

    pub fn get_len(&self) -> u8 {
        self.len
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.can_id.to_ne_bytes());
        buffer.push(self.len);
        buffer.push(0); // __pad
        buffer.push(0); // __res0
        buffer.push(self.len8_dlc);
        buffer.extend_from_slice(&self.data);
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BcmError> {
        check_slot(bytes, CanVariant::Classic)?;
        let len = bytes[4] as usize;
        if len > CAN_MAX_DLEN {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("classic frame declares len:{}", len),
            ));
        }
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..len].copy_from_slice(&bytes[CAN_DATA_OFFSET..CAN_DATA_OFFSET + len]);
        Ok(CanFrameRaw {
            can_id: read_canid(bytes),
            len: len as u8,
            len8_dlc: bytes[7],
            data,
        })
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "CanFdFrameWire"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFdFrameRaw {
    can_id: SockCanId,
    len: u8,
    flags: u8,
    #[cfg_attr(feature = "serde", serde(with = "fd_payload"))]
    data: [u8; CANFD_MAX_DLEN],
}

impl CanFdFrameRaw {
    pub fn new(canid: SockCanId, data: &[u8], flags: CanFdFlag) -> Result<Self, BcmError> {
        if !CANFD_VALID_LEN.contains(&data.len()) {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("canid:{:#x} fd payload len:{} max:{}", canid, data.len(), CANFD_MAX_DLEN),
            ));
        }
        check_canid(canid)?;

        let mut buffer = [0u8; CANFD_MAX_DLEN];
        buffer[..data.len()].copy_from_slice(data);
        Ok(CanFdFrameRaw {
            can_id: canid,
            len: data.len() as u8,
            flags: flags.bits(),
            data: buffer,
        })
    }

    pub fn empty(canid: SockCanId) -> Self {
        CanFdFrameRaw {
            can_id: canid,
            len: 0,
            flags: 0,
            data: [0; CANFD_MAX_DLEN],
        }
    }

    pub fn get_id(&self) -> SockCanId {
        self.can_id
    }

    pub fn get_len(&self) -> u8 {
        self.len
    }

    pub fn get_flag(&self) -> CanFdFlag {
        CanFdFlag::from_bits_retain(self.flags)
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.can_id.to_ne_bytes());
        buffer.push(self.len);
        buffer.push(self.flags);
        buffer.push(0); // __res0
        buffer.push(0); // __res1
        buffer.extend_from_slice(&self.data);
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BcmError> {
        check_slot(bytes, CanVariant::Fd)?;
        let len = bytes[4] as usize;
        if !CANFD_VALID_LEN.contains(&len) {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("fd frame declares len:{}", len),
            ));
        }
        let mut data = [0u8; CANFD_MAX_DLEN];
        data[..len].copy_from_slice(&bytes[CAN_DATA_OFFSET..CAN_DATA_OFFSET + len]);
        Ok(CanFdFrameRaw {
            can_id: read_canid(bytes),
            len: len as u8,
            flags: bytes[5],
            data,
        })
    }
}

/// Either frame layout, the variant is the enum tag.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanAnyFrame {
    RawStd(CanFrameRaw),
    RawFd(CanFdFrameRaw),
}

impl CanAnyFrame {
    /// Builds a frame of the requested variant from a payload slice.
    pub fn new(variant: CanVariant, canid: SockCanId, data: &[u8]) -> Result<Self, BcmError> {
        match variant {
            CanVariant::Classic => Ok(CanAnyFrame::RawStd(CanFrameRaw::new(canid, data)?)),
            CanVariant::Fd => Ok(CanAnyFrame::RawFd(CanFdFrameRaw::new(canid, data, CanFdFlag::empty())?)),
        }
    }

    pub fn empty(variant: CanVariant, canid: SockCanId) -> Self {
        match variant {
            CanVariant::Classic => CanAnyFrame::RawStd(CanFrameRaw::empty(canid)),
            CanVariant::Fd => CanAnyFrame::RawFd(CanFdFrameRaw::empty(canid)),
        }
    }

    pub fn get_variant(&self) -> CanVariant {
        match self {
            CanAnyFrame::RawStd(_) => CanVariant::Classic,
            CanAnyFrame::RawFd(_) => CanVariant::Fd,
        }
    }

    pub fn get_id(&self) -> SockCanId {
        match self {
            CanAnyFrame::RawStd(frame) => frame.get_id(),
            CanAnyFrame::RawFd(frame) => frame.get_id(),
        }
    }

    pub fn get_len(&self) -> u8 {
        match self {
            CanAnyFrame::RawStd(frame) => frame.get_len(),
            CanAnyFrame::RawFd(frame) => frame.get_len(),
        }
    }

    pub fn get_data(&self) -> &[u8] {
        match self {
            CanAnyFrame::RawStd(frame) => frame.get_data(),
            CanAnyFrame::RawFd(frame) => frame.get_data(),
        }
    }

    pub fn is_extended(&self) -> bool {
        self.get_id() & FilterMask::EFF_FLAG.bits() != 0
    }

    /// Same payload under another identifier.
    pub fn with_id(&self, canid: SockCanId) -> Result<Self, BcmError> {
        check_canid(canid)?;
        let mut frame = self.clone();
        match &mut frame {
            CanAnyFrame::RawStd(raw) => raw.can_id = canid,
            CanAnyFrame::RawFd(raw) => raw.can_id = canid,
        }
        Ok(frame)
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        match self {
            CanAnyFrame::RawStd(frame) => frame.write_to(buffer),
            CanAnyFrame::RawFd(frame) => frame.write_to(buffer),
        }
    }

    /// wire image of the frame slot, always `wire_size(variant)` bytes
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.get_variant().wire_size());
        self.write_to(&mut buffer);
        buffer
    }

    pub fn from_bytes(bytes: &[u8], variant: CanVariant) -> Result<Self, BcmError> {
        match variant {
            CanVariant::Classic => Ok(CanAnyFrame::RawStd(CanFrameRaw::from_bytes(bytes)?)),
            CanVariant::Fd => Ok(CanAnyFrame::RawFd(CanFdFrameRaw::from_bytes(bytes)?)),
        }
    }
}

impl From<CanFrameRaw> for CanAnyFrame {
    fn from(frame: CanFrameRaw) -> Self {
        Self::RawStd(frame)
    }
}

impl From<CanFdFrameRaw> for CanAnyFrame {
    fn from(frame: CanFdFrameRaw) -> Self {
        Self::RawFd(frame)
    }
}

// deserialized frames go through the same checks as new()
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct CanFrameWire {
    can_id: SockCanId,
    len: u8,
    len8_dlc: u8,
    data: [u8; CAN_MAX_DLEN],
}

#[cfg(feature = "serde")]
impl TryFrom<CanFrameWire> for CanFrameRaw {
    type Error = BcmError;

    fn try_from(wire: CanFrameWire) -> Result<Self, Self::Error> {
        let len = wire.len as usize;
        if len > CAN_MAX_DLEN {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("canid:{:#x} classic payload len:{} max:{}", wire.can_id, len, CAN_MAX_DLEN),
            ));
        }
        let mut frame = CanFrameRaw::new(wire.can_id, &wire.data[..len])?;
        frame.set_len8_dlc(wire.len8_dlc);
        Ok(frame)
    }
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct CanFdFrameWire {
    can_id: SockCanId,
    len: u8,
    flags: u8,
    #[serde(with = "fd_payload")]
    data: [u8; CANFD_MAX_DLEN],
}

#[cfg(feature = "serde")]
impl TryFrom<CanFdFrameWire> for CanFdFrameRaw {
    type Error = BcmError;

    fn try_from(wire: CanFdFrameWire) -> Result<Self, Self::Error> {
        let len = wire.len as usize;
        if !CANFD_VALID_LEN.contains(&len) {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFrameLength,
                format!("canid:{:#x} fd payload len:{} max:{}", wire.can_id, len, CANFD_MAX_DLEN),
            ));
        }
        CanFdFrameRaw::new(wire.can_id, &wire.data[..len], CanFdFlag::from_bits_retain(wire.flags))
    }
}

// serde only derives arrays up to 32 elements
#[cfg(feature = "serde")]
mod fd_payload {
    use super::CANFD_MAX_DLEN;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8; CANFD_MAX_DLEN], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; CANFD_MAX_DLEN], D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let mut data = [0u8; CANFD_MAX_DLEN];
        if bytes.len() > CANFD_MAX_DLEN {
            return Err(D::Error::invalid_length(bytes.len(), &"at most 64 bytes"));
        }
        data[..bytes.len()].copy_from_slice(&bytes);
        Ok(data)
    }
}
