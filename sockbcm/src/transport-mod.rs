/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
*/
use crate::prelude::*;
use std::collections::VecDeque;

/// Outcome of one receive attempt. `WouldBlock` is not an error: nothing is
/// pending on a non blocking channel, retry later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BcmRecv {
    Data(Vec<u8>),
    WouldBlock,
}

/// Connected datagram channel to the broadcast manager. One datagram is one
/// BCM message, writes must not be interleaved.
pub trait BcmTransport {
    fn send(&mut self, buffer: &[u8]) -> Result<(), BcmError>;
    fn receive(&mut self, max_bytes: usize) -> Result<BcmRecv, BcmError>;

    fn send_all(&mut self, buffers: &[Vec<u8>]) -> Result<(), BcmError> {
        for buffer in buffers {
            self.send(buffer)?;
        }
        Ok(())
    }
}

/// In-memory channel: keeps every sent datagram and replays queued inbound
/// ones. Used by tests and by the demos when no kernel socket is available.
#[derive(Debug, Default)]
pub struct BcmLoopback {
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    closed: bool,
}

impl BcmLoopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, datagram: Vec<u8>) -> &mut Self {
        self.inbound.push_back(datagram);
        self
    }

    pub fn get_sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    fn check_open(&self) -> Result<(), BcmError> {
        if self.closed {
            Err(BcmError::new(BcmErrorKind::TransportError, "loopback channel closed"))
        } else {
            Ok(())
        }
    }
}

impl BcmTransport for BcmLoopback {
    fn send(&mut self, buffer: &[u8]) -> Result<(), BcmError> {
        self.check_open()?;
        self.sent.push(buffer.to_vec());
        Ok(())
    }

    // datagram semantic: anything beyond max_bytes is dropped
    fn receive(&mut self, max_bytes: usize) -> Result<BcmRecv, BcmError> {
        self.check_open()?;
        match self.inbound.pop_front() {
            None => Ok(BcmRecv::WouldBlock),
            Some(mut datagram) => {
                datagram.truncate(max_bytes);
                Ok(BcmRecv::Data(datagram))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_records_and_replays() {
        let mut sock = BcmLoopback::new();
        sock.send_all(&[vec![1, 2], vec![3]]).unwrap();
        assert_eq!(sock.get_sent(), &[vec![1, 2], vec![3]]);

        assert_eq!(sock.receive(16).unwrap(), BcmRecv::WouldBlock);
        sock.push_inbound(vec![9; 20]);
        assert_eq!(sock.receive(16).unwrap(), BcmRecv::Data(vec![9; 16]));
        assert_eq!(sock.pending(), 0);
    }

    #[test]
    fn closed_loopback_fails() {
        let mut sock = BcmLoopback::new();
        sock.close();
        assert_eq!(sock.send(&[1]).unwrap_err().get_kind(), BcmErrorKind::TransportError);
        assert_eq!(sock.receive(8).unwrap_err().get_kind(), BcmErrorKind::TransportError);
    }
}
