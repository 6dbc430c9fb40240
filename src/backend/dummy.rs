// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation.
//!
//! The backend does not decode anything. It records every call it receives in a [`BackendLog`]
//! that callers can inspect through a shared reference.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::decoder::stateless::mpeg4::params::IqMatrixBuffer;
use crate::decoder::stateless::mpeg4::params::PictureParameterBuffer;
use crate::decoder::stateless::mpeg4::params::SliceParameterBuffer;
use crate::decoder::stateless::mpeg4::ContextInfo;
use crate::decoder::stateless::mpeg4::Mpeg4Profile;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::DecodedHandle;
use crate::decoder::StreamInfo;
use crate::Resolution;

#[derive(Debug, Default)]
pub struct BackendHandle {
    pub timestamp: u64,
    pub coded_resolution: Resolution,
    /// Index of the picture in [`BackendLog::submissions`].
    pub submission: usize,
}

#[derive(Debug)]
pub struct Handle {
    pub handle: Rc<RefCell<BackendHandle>>,
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Self {
            handle: Rc::clone(&self.handle),
        }
    }
}

impl DecodedHandle for Handle {
    fn timestamp(&self) -> u64 {
        self.handle.borrow().timestamp
    }

    fn coded_resolution(&self) -> Resolution {
        self.handle.borrow().coded_resolution
    }

    fn sync(&self) -> StatelessBackendResult<()> {
        Ok(())
    }
}

/// Slice as received by the backend. The data is kept as its CRC32.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceRecord {
    pub params: SliceParameterBuffer,
    pub data_len: usize,
    pub crc: u32,
}

/// Everything attached to a picture, from its creation to its submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Submission {
    pub timestamp: u64,
    pub iq_matrix: Option<IqMatrixBuffer>,
    pub picture: Option<PictureParameterBuffer>,
    /// Timestamp of the forward reference picture.
    pub forward_reference: Option<u64>,
    /// Timestamp of the backward reference picture.
    pub backward_reference: Option<u64>,
    pub slices: Vec<SliceRecord>,
}

#[derive(Debug, Default)]
pub struct BackendLog {
    pub sequences: Vec<StreamInfo>,
    pub contexts: Vec<ContextInfo>,
    pub submissions: Vec<Submission>,
}

/// Dummy backend that can be used to exercise the decoder without hardware.
pub struct Backend {
    pub(crate) log: Rc<RefCell<BackendLog>>,
    pub(crate) surfaces_available: Rc<Cell<bool>>,
    pub(crate) fail_allocations: Rc<Cell<bool>>,
    pub(crate) supported_profiles: Vec<Mpeg4Profile>,
    pub(crate) coded_resolution: Resolution,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    pub fn new() -> Self {
        Self {
            log: Default::default(),
            surfaces_available: Rc::new(Cell::new(true)),
            fail_allocations: Rc::new(Cell::new(false)),
            supported_profiles: vec![Mpeg4Profile::Simple, Mpeg4Profile::AdvancedSimple],
            coded_resolution: Default::default(),
        }
    }

    /// Creates a backend that only accepts `profiles`.
    pub fn with_profiles(profiles: &[Mpeg4Profile]) -> Self {
        Self {
            supported_profiles: profiles.to_vec(),
            ..Self::new()
        }
    }

    /// Returns a reference to the log of received calls, that stays valid after the backend is
    /// moved into a decoder.
    pub fn log(&self) -> Rc<RefCell<BackendLog>> {
        Rc::clone(&self.log)
    }

    /// Returns the switch controlling whether surfaces are available.
    pub fn surfaces_available(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.surfaces_available)
    }

    /// Returns the switch making picture allocations fail.
    pub fn fail_allocations(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.fail_allocations)
    }
}

impl StatelessDecoderBackend for Backend {
    type Handle = Handle;
}
