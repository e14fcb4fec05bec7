/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
*/

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of every failure the BCM codec can return.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BcmErrorKind {
    /// payload longer than the variant allows (or not a legal FD length)
    InvalidFrameLength,
    /// identifier does not fit 11 bits (standard) or 29 bits (extended)
    InvalidCanId,
    /// parallel arrays of unequal length
    ArityMismatch,
    /// frame variant conflict or frame count outside 1..=256
    EncodingError,
    /// channel level failure, not recoverable locally
    TransportError,
    UnexpectedLength,
    UnexpectedOpcode,
    /// identifier does not address a live task/filter in the local registry
    UnknownTask,
    InvalidFilter,
}

impl BcmErrorKind {
    pub fn as_uid(&self) -> &'static str {
        match self {
            BcmErrorKind::InvalidFrameLength => "invalid-frame-length",
            BcmErrorKind::InvalidCanId => "invalid-can-id",
            BcmErrorKind::ArityMismatch => "arity-mismatch",
            BcmErrorKind::EncodingError => "bcm-encoding-error",
            BcmErrorKind::TransportError => "bcm-transport-error",
            BcmErrorKind::UnexpectedLength => "bcm-unexpected-length",
            BcmErrorKind::UnexpectedOpcode => "bcm-unexpected-opcode",
            BcmErrorKind::UnknownTask => "bcm-unknown-task",
            BcmErrorKind::InvalidFilter => "invalid-bcm-filter",
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, PartialEq, Eq)]
pub struct BcmError {
    kind: BcmErrorKind,
    info: String,
}

pub trait MakeError<T> {
    fn make(kind: BcmErrorKind, msg: T) -> BcmError;
}

impl MakeError<&str> for BcmError {
    fn make(kind: BcmErrorKind, msg: &str) -> BcmError {
        BcmError { kind, info: msg.to_string() }
    }
}

impl MakeError<String> for BcmError {
    fn make(kind: BcmErrorKind, msg: String) -> BcmError {
        BcmError { kind, info: msg }
    }
}

impl BcmError {
    pub fn new<T>(kind: BcmErrorKind, msg: T) -> BcmError
    where
        BcmError: MakeError<T>,
    {
        Self::make(kind, msg)
    }

    #[must_use]
    pub fn get_kind(&self) -> BcmErrorKind {
        self.kind
    }

    #[must_use]
    pub fn get_uid(&self) -> String {
        self.kind.as_uid().to_string()
    }

    #[must_use]
    pub fn get_info(&self) -> String {
        self.info.clone()
    }
}

impl fmt::Display for BcmError {
    fn fmt(&self, format: &mut fmt::Formatter) -> fmt::Result {
        write!(format, "uid:{} info:{}", self.kind.as_uid(), self.info)
    }
}

impl fmt::Debug for BcmError {
    fn fmt(&self, format: &mut fmt::Formatter) -> fmt::Result {
        write!(format, "uid:{} info:{}", self.kind.as_uid(), self.info)
    }
}

impl std::error::Error for BcmError {}

impl From<std::io::Error> for BcmError {
    fn from(error: std::io::Error) -> Self {
        BcmError::new(BcmErrorKind::TransportError, error.to_string())
    }
}
