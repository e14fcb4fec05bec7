/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-protocol-sockets-sock-dgram
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-receive-filter-timers
 *
*/
use bitvec::prelude::*;

use crate::prelude::*;

/// One outbound BCM message: head + 0..=256 frames of the same variant.
#[derive(Clone, Debug)]
pub struct SockBcmCmd {
    opcode: CanBcmOpCode,
    flags: CanBcmFlag,
    canid: SockCanId,
    count: u32,
    ival1: BcmTimeval,
    ival2: BcmTimeval,
    frames: Vec<CanAnyFrame>,
}

impl SockBcmCmd {
    /// variant is selected by `CanBcmFlag::FD_FRAME`
    pub fn new(opcode: CanBcmOpCode, flags: CanBcmFlag, canid: SockCanId) -> Self {
        SockBcmCmd {
            opcode,
            flags,
            canid,
            count: 0,
            ival1: BcmTimeval::ZERO,
            ival2: BcmTimeval::ZERO,
            frames: Vec::new(),
        }
    }

    pub fn set_timers(&mut self, ival1: BcmTimeval, ival2: BcmTimeval) -> &mut Self {
        self.ival1 = ival1;
        self.ival2 = ival2;
        self
    }

    pub fn set_count(&mut self, count: u32) -> &mut Self {
        self.count = count;
        self
    }

    pub fn add_frame(&mut self, frame: CanAnyFrame) -> &mut Self {
        self.frames.push(frame);
        self
    }

    pub fn add_frames(&mut self, frames: &[CanAnyFrame]) -> &mut Self {
        self.frames.extend_from_slice(frames);
        self
    }

    pub fn get_variant(&self) -> CanVariant {
        CanVariant::from_flags(self.flags)
    }

    pub fn get_id(&self) -> SockCanId {
        self.canid
    }

    pub fn get_opcode(&self) -> CanBcmOpCode {
        self.opcode
    }

    pub fn msg_head(&self) -> BcmMsgHead {
        BcmMsgHead {
            opcode: self.opcode,
            flags: self.flags.bits(),
            count: self.count,
            ival1: self.ival1,
            ival2: self.ival2,
            can_id: self.canid,
            nframes: self.frames.len() as u32,
        }
    }

    fn check(&self) -> Result<(), BcmError> {
        let variant = self.get_variant();
        if self.frames.len() > BCM_MAX_FRAMES {
            return Err(BcmError::new(
                BcmErrorKind::EncodingError,
                format!("canid:{:#x} nframes:{} max:{}", self.canid, self.frames.len(), BCM_MAX_FRAMES),
            ));
        }

        if let Some(frame) = self.frames.iter().find(|frame| frame.get_variant() != variant) {
            return Err(BcmError::new(
                BcmErrorKind::EncodingError,
                format!(
                    "canid:{:#x} {:?} frame in a {:?} message",
                    frame.get_id(),
                    frame.get_variant(),
                    variant
                ),
            ));
        }

        let nframes = self.frames.len();
        match self.opcode {
            CanBcmOpCode::TxSend => {
                if nframes != 1 {
                    return Err(BcmError::new(
                        BcmErrorKind::EncodingError,
                        format!("BCM:TxSend takes exactly one frame, got {}", nframes),
                    ));
                }
            }
            CanBcmOpCode::TxSetup => {
                if nframes == 0 {
                    return Err(BcmError::new(
                        BcmErrorKind::EncodingError,
                        "BCM:TxSetup no frame defined",
                    ));
                }
            }
            CanBcmOpCode::RxSetup => {
                if self.flags.contains(CanBcmFlag::RX_FILTER_ID) {
                    if nframes > 0 {
                        return Err(BcmError::new(
                            BcmErrorKind::InvalidFilter,
                            "RX_FILTER_ID and Multiplex filter are exclusive",
                        ));
                    }
                } else if nframes == 0 {
                    return Err(BcmError::new(
                        BcmErrorKind::InvalidFilter,
                        format!("BCM:{:?}Frame no filter defined", variant),
                    ));
                }
            }
            CanBcmOpCode::TxDelete | CanBcmOpCode::RxDelete | CanBcmOpCode::TxRead | CanBcmOpCode::RxRead => {
                if nframes != 0 {
                    return Err(BcmError::new(
                        BcmErrorKind::EncodingError,
                        format!("BCM:{:?} does not accept frames", self.opcode),
                    ));
                }
            }
            _ => {
                return Err(BcmError::new(
                    BcmErrorKind::EncodingError,
                    format!("BCM:{:?} is not an outbound operation", self.opcode),
                ));
            }
        }
        Ok(())
    }

    /// Serializes head and frames; the buffer is exactly
    /// `BCM_HEAD_SIZE + nframes * variant.wire_size()` bytes.
    pub fn build(&self) -> Result<Vec<u8>, BcmError> {
        self.check()?;
        let variant = self.get_variant();
        let mut buffer = Vec::with_capacity(BCM_HEAD_SIZE + self.frames.len() * variant.wire_size());
        self.msg_head().write_to(&mut buffer);
        for frame in &self.frames {
            frame.write_to(&mut buffer);
        }
        log::debug!(
            "bcm encode {:?} canid:{:#x} nframes:{} len:{}",
            self.opcode,
            self.canid,
            self.frames.len(),
            buffer.len()
        );
        Ok(buffer)
    }

    pub fn apply<T>(&self, sock: &mut T) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        let buffer = self.build()?;
        sock.send(&buffer)
    }
}

fn check_variant(variant: CanVariant, frames: &[CanAnyFrame]) -> Result<(), BcmError> {
    match frames.iter().find(|frame| frame.get_variant() != variant) {
        None => Ok(()),
        Some(frame) => Err(BcmError::new(
            BcmErrorKind::EncodingError,
            format!("canid:{:#x} is {:?}, expected {:?}", frame.get_id(), frame.get_variant(), variant),
        )),
    }
}

fn check_sequence(variant: CanVariant, frames: &[CanAnyFrame]) -> Result<SockCanId, BcmError> {
    check_variant(variant, frames)?;
    if frames.len() > BCM_MAX_FRAMES {
        return Err(BcmError::new(
            BcmErrorKind::EncodingError,
            format!("sequence of {} frames, max:{}", frames.len(), BCM_MAX_FRAMES),
        ));
    }
    match frames.first() {
        Some(frame) => Ok(frame.get_id()),
        None => Err(BcmError::new(BcmErrorKind::EncodingError, "empty frame sequence")),
    }
}

/// TX_SEND, one message per frame: the kernel only takes one frame per TX_SEND.
pub fn encode_send_once(variant: CanVariant, frames: &[CanAnyFrame]) -> Result<Vec<Vec<u8>>, BcmError> {
    check_variant(variant, frames)?;
    frames
        .iter()
        .map(|frame| {
            SockBcmCmd::new(CanBcmOpCode::TxSend, variant.as_flag(), frame.get_id())
                .add_frame(frame.clone())
                .build()
        })
        .collect()
}

/// TX_SETUP, one task per frame. Each task is addressed by its own frame id.
pub fn encode_cyclic_setup_independent(
    variant: CanVariant,
    frames: &[CanAnyFrame],
    counts: &[u32],
    short_intervals: &[BcmTimeval],
    long_intervals: &[BcmTimeval],
) -> Result<Vec<Vec<u8>>, BcmError> {
    if counts.len() != frames.len() || short_intervals.len() != frames.len() || long_intervals.len() != frames.len() {
        return Err(BcmError::new(
            BcmErrorKind::ArityMismatch,
            format!(
                "frames:{} counts:{} short:{} long:{}",
                frames.len(),
                counts.len(),
                short_intervals.len(),
                long_intervals.len()
            ),
        ));
    }
    check_variant(variant, frames)?;

    let mut buffers = Vec::with_capacity(frames.len());
    for (idx, frame) in frames.iter().enumerate() {
        let buffer = SockBcmCmd::new(
            CanBcmOpCode::TxSetup,
            variant.as_flag() | CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER,
            frame.get_id(),
        )
        .set_count(counts[idx])
        .set_timers(short_intervals[idx], long_intervals[idx])
        .add_frame(frame.clone())
        .build()?;
        buffers.push(buffer);
    }
    Ok(buffers)
}

/// TX_SETUP, one task for the whole sequence, addressed by `frames[0]` id.
pub fn encode_cyclic_setup_sequence(
    variant: CanVariant,
    frames: &[CanAnyFrame],
    count: u32,
    short_interval: BcmTimeval,
    long_interval: BcmTimeval,
) -> Result<Vec<u8>, BcmError> {
    let canid = check_sequence(variant, frames)?;
    SockBcmCmd::new(
        CanBcmOpCode::TxSetup,
        variant.as_flag() | CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER,
        canid,
    )
    .set_count(count)
    .set_timers(short_interval, long_interval)
    .add_frames(frames)
    .build()
}

/// TX_SETUP without SET_TIMER: new content for the task addressed by
/// `frames[0]`, timers untouched. `announce` sends the new content once now.
///
/// Every frame lands in that single task, so frames of several independent
/// tasks turn `frames[0]` into a sequence and leave the others unchanged.
/// Update independent tasks one call each; `CyclicTask::update` and
/// `CyclicRegistry::update_task` check the frames against the task strategy.
pub fn encode_cyclic_update(variant: CanVariant, frames: &[CanAnyFrame], announce: bool) -> Result<Vec<u8>, BcmError> {
    let canid = check_sequence(variant, frames)?;
    let mut flags = variant.as_flag();
    if announce {
        flags |= CanBcmFlag::TX_ANNOUNCE;
    }
    SockBcmCmd::new(CanBcmOpCode::TxSetup, flags, canid).add_frames(frames).build()
}

pub fn encode_cyclic_delete(variant: CanVariant, canid: SockCanId) -> Result<Vec<u8>, BcmError> {
    SockBcmCmd::new(CanBcmOpCode::TxDelete, variant.as_flag(), canid).build()
}

/// RX_SETUP, exact id filter without mask, content filter with mask.
pub fn encode_rx_filter_setup(variant: CanVariant, canid: SockCanId, mask: Option<&[u8]>) -> Result<Vec<u8>, BcmError> {
    let mut filter = RxFilter::new(canid);
    if let Some(mask) = mask {
        filter.set_mask(mask);
    }
    filter.encode(variant)
}

pub fn encode_rx_filter_delete(variant: CanVariant, canid: SockCanId) -> Result<Vec<u8>, BcmError> {
    SockBcmCmd::new(CanBcmOpCode::RxDelete, variant.as_flag(), canid).build()
}

/// Receive filter registration.
///
/// Without mask every frame matching the identifier is reported. With a mask
/// only the bits set in the mask are compared and a change is reported. Extra
/// multiplex masks make the first mask select the multiplexer bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFilter {
    canid: SockCanId,
    masks: Vec<Vec<u8>>,
    muxed: bool,
    timeout: BcmTimeval,
    throttle: BcmTimeval,
    flags: CanBcmFlag,
}

impl RxFilter {
    pub fn new(canid: SockCanId) -> Self {
        RxFilter {
            canid,
            masks: Vec::new(),
            muxed: false,
            timeout: BcmTimeval::ZERO,
            throttle: BcmTimeval::ZERO,
            flags: CanBcmFlag::NONE,
        }
    }

    pub fn get_id(&self) -> SockCanId {
        self.canid
    }

    pub fn get_mask(&self) -> Option<&[u8]> {
        self.masks.first().map(|mask| mask.as_slice())
    }

    pub fn set_mask(&mut self, mask: &[u8]) -> &mut Self {
        if self.masks.is_empty() {
            self.masks.push(mask.to_vec());
        } else {
            self.masks[0] = mask.to_vec();
        }
        self
    }

    pub fn add_multiplex(&mut self, mask: &[u8]) -> &mut Self {
        self.muxed = true;
        self.masks.push(mask.to_vec());
        self
    }

    /// throttle: minimum delay between two RX_CHANGED, timeout: RX_TIMEOUT watchdog.
    pub fn set_timers(&mut self, throttle_ms: u64, timeout_ms: u64) -> &mut Self {
        self.throttle = BcmTimeval::from_millis(throttle_ms);
        self.timeout = BcmTimeval::from_millis(timeout_ms);
        self
    }

    pub fn set_flags(&mut self, flags: CanBcmFlag) -> &mut Self {
        self.flags |= flags;
        self
    }

    pub fn command(&self, variant: CanVariant) -> Result<SockBcmCmd, BcmError> {
        if self.muxed && self.masks.len() < 2 {
            return Err(BcmError::new(
                BcmErrorKind::InvalidFilter,
                format!("canid:{:#x} multiplex filter needs a mux mask first", self.canid),
            ));
        }

        let mut flags = variant.as_flag() | self.flags;
        if self.masks.is_empty() {
            flags |= CanBcmFlag::RX_FILTER_ID;
        }
        if !self.timeout.is_zero() {
            flags |= CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER;
        } else if !self.throttle.is_zero() {
            flags |= CanBcmFlag::SET_TIMER;
        }

        let mut cmd = SockBcmCmd::new(CanBcmOpCode::RxSetup, flags, self.canid);
        cmd.set_timers(self.timeout, self.throttle);
        for mask in &self.masks {
            cmd.add_frame(CanAnyFrame::new(variant, self.canid, mask)?);
        }
        Ok(cmd)
    }

    pub fn encode(&self, variant: CanVariant) -> Result<Vec<u8>, BcmError> {
        self.command(variant)?.build()
    }

    /// Tells if a reception of `next` after `prev` is reported under this filter.
    pub fn changed(&self, prev: &[u8], next: &[u8]) -> bool {
        let mask = match self.get_mask() {
            None => return true,
            Some(mask) => mask,
        };
        if self.flags.contains(CanBcmFlag::RX_CHECK_DLC) && prev.len() != next.len() {
            return true;
        }

        let mask_bits = mask.view_bits::<Msb0>();
        if mask_bits.not_any() {
            return true;
        }
        let prev_bits = prev.view_bits::<Msb0>();
        let next_bits = next.view_bits::<Msb0>();
        mask_bits
            .iter_ones()
            .any(|idx| prev_bits.get(idx).map(|bit| *bit) != next_bits.get(idx).map(|bit| *bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic(canid: SockCanId, data: &[u8]) -> CanAnyFrame {
        CanAnyFrame::new(CanVariant::Classic, canid, data).unwrap()
    }

    fn fd(canid: SockCanId, data: &[u8]) -> CanAnyFrame {
        CanAnyFrame::new(CanVariant::Fd, canid, data).unwrap()
    }

    #[test]
    fn send_once_never_batches() {
        let frames = [classic(0x123, &[0xDE, 0xAD]), classic(0x345, &[0xC0]), classic(0x346, &[])];
        let buffers = encode_send_once(CanVariant::Classic, &frames).unwrap();
        assert_eq!(buffers.len(), 3);
        for (buffer, frame) in buffers.iter().zip(frames.iter()) {
            assert_eq!(buffer.len(), BCM_HEAD_SIZE + CAN_FRAME_SIZE);
            let head = BcmMsgHead::from_bytes(buffer).unwrap();
            assert_eq!(head.opcode, CanBcmOpCode::TxSend);
            assert_eq!(head.nframes, 1);
            assert_eq!(head.can_id, frame.get_id());
            assert_eq!(&buffer[BCM_HEAD_SIZE..], frame.as_bytes().as_slice());
        }
    }

    #[test]
    fn fd_send_sets_fd_flag() {
        let buffers = encode_send_once(CanVariant::Fd, &[fd(0x567, &[0xDE; 16])]).unwrap();
        assert_eq!(buffers[0].len(), BCM_HEAD_SIZE + CANFD_FRAME_SIZE);
        let head = BcmMsgHead::from_bytes(&buffers[0]).unwrap();
        assert!(head.check_flags(CanBcmFlag::FD_FRAME));
    }

    #[test]
    fn variant_conflict_is_rejected_before_encoding() {
        let frames = [classic(0x123, &[1]), fd(0x567, &[2])];
        let error = encode_send_once(CanVariant::Classic, &frames).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::EncodingError);

        let error = encode_cyclic_setup_sequence(
            CanVariant::Fd,
            &frames,
            0,
            BcmTimeval::ZERO,
            BcmTimeval::from_millis(100),
        )
        .unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::EncodingError);
    }

    #[test]
    fn independent_setup_arity() {
        let frames = [classic(0x123, &[1]), classic(0x345, &[2])];
        let error = encode_cyclic_setup_independent(
            CanVariant::Classic,
            &frames,
            &[10],
            &[BcmTimeval::ZERO, BcmTimeval::ZERO],
            &[BcmTimeval::ZERO, BcmTimeval::ZERO],
        )
        .unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::ArityMismatch);
    }

    #[test]
    fn sequence_is_addressed_by_first_frame() {
        let frames = [classic(0x345, &[1]), classic(0x123, &[2]), classic(0x100, &[3])];
        let buffer = encode_cyclic_setup_sequence(
            CanVariant::Classic,
            &frames,
            10,
            BcmTimeval::new(0, 500),
            BcmTimeval::new(1, 0),
        )
        .unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE + 3 * CAN_FRAME_SIZE);

        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.can_id, 0x345);
        assert_eq!(head.nframes, 3);
        assert_eq!(head.count, 10);
        assert!(head.check_flags(CanBcmFlag::SET_TIMER));
        assert!(head.check_flags(CanBcmFlag::START_TIMER));

        // frames keep declaration order
        for (idx, frame) in frames.iter().enumerate() {
            let start = BCM_HEAD_SIZE + idx * CAN_FRAME_SIZE;
            let slot = &buffer[start..start + CAN_FRAME_SIZE];
            assert_eq!(CanAnyFrame::from_bytes(slot, CanVariant::Classic).unwrap(), *frame);
        }
    }

    #[test]
    fn sequence_bounds() {
        let error =
            encode_cyclic_setup_sequence(CanVariant::Classic, &[], 0, BcmTimeval::ZERO, BcmTimeval::ZERO).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::EncodingError);

        let frames: Vec<CanAnyFrame> = (0..BCM_MAX_FRAMES as u32).map(|idx| classic(idx, &[])).collect();
        let buffer =
            encode_cyclic_setup_sequence(CanVariant::Classic, &frames, 0, BcmTimeval::ZERO, BcmTimeval::from_millis(10))
                .unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE + BCM_MAX_FRAMES * CAN_FRAME_SIZE);

        let mut frames = frames;
        frames.push(classic(0x7FF, &[]));
        let error =
            encode_cyclic_setup_sequence(CanVariant::Classic, &frames, 0, BcmTimeval::ZERO, BcmTimeval::from_millis(10))
                .unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::EncodingError);
    }

    #[test]
    fn update_keeps_timers() {
        let buffer = encode_cyclic_update(CanVariant::Classic, &[classic(0x123, &[9, 9])], true).unwrap();
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.opcode, CanBcmOpCode::TxSetup);
        assert!(!head.check_flags(CanBcmFlag::SET_TIMER));
        assert!(head.check_flags(CanBcmFlag::TX_ANNOUNCE));
        assert!(head.ival1.is_zero() && head.ival2.is_zero());

        let buffer = encode_cyclic_update(CanVariant::Classic, &[classic(0x123, &[9, 9])], false).unwrap();
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert!(!head.check_flags(CanBcmFlag::TX_ANNOUNCE));
    }

    #[test]
    fn update_addresses_first_frame_only() {
        let frames = [classic(0x123, &[1]), classic(0x345, &[2])];
        let buffer = encode_cyclic_update(CanVariant::Classic, &frames, false).unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE + 2 * CAN_FRAME_SIZE);
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.can_id, 0x123);
        assert_eq!(head.nframes, 2);
    }

    #[test]
    fn fd_independent_setup() {
        let frames = [fd(0x567, &[0xDE; 12]), fd(0x789, &[0xC0; 64])];
        let buffers = encode_cyclic_setup_independent(
            CanVariant::Fd,
            &frames,
            &[0, 5],
            &[BcmTimeval::ZERO, BcmTimeval::new(0, 500)],
            &[BcmTimeval::from_millis(100), BcmTimeval::from_millis(200)],
        )
        .unwrap();
        assert_eq!(buffers.len(), 2);
        for (buffer, frame) in buffers.iter().zip(frames.iter()) {
            assert_eq!(buffer.len(), BCM_HEAD_SIZE + CANFD_FRAME_SIZE);
            let head = BcmMsgHead::from_bytes(buffer).unwrap();
            assert_eq!(head.opcode, CanBcmOpCode::TxSetup);
            assert_eq!(head.can_id, frame.get_id());
            assert_eq!(head.nframes, 1);
            assert!(head.check_flags(CanBcmFlag::FD_FRAME | CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER));
            let slot = CanAnyFrame::from_bytes(&buffer[BCM_HEAD_SIZE..], CanVariant::Fd).unwrap();
            assert_eq!(slot, *frame);
        }
        let head = BcmMsgHead::from_bytes(&buffers[1]).unwrap();
        assert_eq!(head.count, 5);
        assert_eq!(head.ival2, BcmTimeval::new(0, 200_000));
    }

    #[test]
    fn fd_rx_filter_mask() {
        let buffer = encode_rx_filter_setup(CanVariant::Fd, 0x555, Some(&[0xFF])).unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE + CANFD_FRAME_SIZE);
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.opcode, CanBcmOpCode::RxSetup);
        assert_eq!(head.nframes, 1);
        assert!(head.check_flags(CanBcmFlag::FD_FRAME));
        assert!(!head.check_flags(CanBcmFlag::RX_FILTER_ID));
        let mask = CanAnyFrame::from_bytes(&buffer[BCM_HEAD_SIZE..], CanVariant::Fd).unwrap();
        assert_eq!(mask.get_id(), 0x555);
        assert_eq!(mask.get_data(), &[0xFF]);

        let error = encode_rx_filter_setup(CanVariant::Fd, 0x555, Some(&[0xFF; 9])).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::InvalidFrameLength);
    }

    #[test]
    fn delete_is_head_only() {
        let buffer = encode_rx_filter_delete(CanVariant::Fd, 0x333).unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE);
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.opcode, CanBcmOpCode::RxDelete);
        assert_eq!(head.can_id, 0x333);
        assert!(head.check_flags(CanBcmFlag::FD_FRAME));
    }

    #[test]
    fn rx_setup_with_and_without_mask() {
        let buffer = encode_rx_filter_setup(CanVariant::Classic, 0x222, None).unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE);
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert!(head.check_flags(CanBcmFlag::RX_FILTER_ID));
        assert_eq!(head.nframes, 0);

        let buffer = encode_rx_filter_setup(CanVariant::Classic, 0x444, Some(&[0xFF])).unwrap();
        assert_eq!(buffer.len(), BCM_HEAD_SIZE + CAN_FRAME_SIZE);
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert!(!head.check_flags(CanBcmFlag::RX_FILTER_ID));
        assert_eq!(head.nframes, 1);
        let mask = CanAnyFrame::from_bytes(&buffer[BCM_HEAD_SIZE..], CanVariant::Classic).unwrap();
        assert_eq!(mask.get_data(), &[0xFF]);
        assert_eq!(mask.get_id(), 0x444);

        let error = encode_rx_filter_setup(CanVariant::Classic, 0x444, Some(&[0xFF; 9])).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::InvalidFrameLength);
    }

    #[test]
    fn rx_filter_timers_and_multiplex() {
        let buffer = RxFilter::new(0x118)
            .set_mask(&[0xFF, 0, 0, 0, 0, 0, 0, 0])
            .add_multiplex(&[0x01, 0xFF, 0xFF])
            .add_multiplex(&[0x02, 0x00, 0xFF])
            .set_timers(500, 1000)
            .encode(CanVariant::Classic)
            .unwrap();
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.nframes, 3);
        assert_eq!(head.ival1, BcmTimeval::new(1, 0));
        assert_eq!(head.ival2, BcmTimeval::new(0, 500_000));
        assert!(head.check_flags(CanBcmFlag::SET_TIMER | CanBcmFlag::START_TIMER));

        let error = RxFilter::new(0x118).add_multiplex(&[0x01]).encode(CanVariant::Classic).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::InvalidFilter);

        let error = RxFilter::new(0x118)
            .set_mask(&[0x01])
            .set_flags(CanBcmFlag::RX_FILTER_ID)
            .encode(CanVariant::Classic)
            .unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::InvalidFilter);
    }

    #[test]
    fn masked_change_detection() {
        let exact = RxFilter::new(0x222);
        assert!(exact.changed(&[1], &[1]));

        let mut masked = RxFilter::new(0x444);
        masked.set_mask(&[0xF0]);
        assert!(!masked.changed(&[0x11], &[0x1F]));
        assert!(masked.changed(&[0x11], &[0x21]));

        let mut zero = RxFilter::new(0x444);
        zero.set_mask(&[0x00]);
        assert!(zero.changed(&[0x11], &[0x11]));

        let mut dlc = RxFilter::new(0x444);
        dlc.set_mask(&[0xF0]).set_flags(CanBcmFlag::RX_CHECK_DLC);
        assert!(dlc.changed(&[0x11], &[0x11, 0x00]));
    }

    #[test]
    fn inbound_opcode_is_not_encodable() {
        let error = SockBcmCmd::new(CanBcmOpCode::RxChanged, CanBcmFlag::NONE, 0x1).build().unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::EncodingError);
    }
}
