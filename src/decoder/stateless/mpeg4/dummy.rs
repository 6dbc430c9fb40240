// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;

use crate::backend::dummy::*;
use crate::decoder::stateless::mpeg4::params::ParamBuffer;
use crate::decoder::stateless::mpeg4::ContextInfo;
use crate::decoder::stateless::mpeg4::Entrypoint;
use crate::decoder::stateless::mpeg4::Mpeg4;
use crate::decoder::stateless::mpeg4::Mpeg4Config;
use crate::decoder::stateless::mpeg4::Mpeg4Profile;
use crate::decoder::stateless::mpeg4::StatelessMpeg4DecoderBackend;
use crate::decoder::stateless::StatelessBackendError;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackendPicture;
use crate::decoder::BlockingMode;
use crate::decoder::DecodedHandle;
use crate::decoder::StreamInfo;

impl StatelessDecoderBackendPicture<Mpeg4> for Backend {
    type Picture = Submission;
}

impl StatelessMpeg4DecoderBackend for Backend {
    fn supports_profile(&self, profile: Mpeg4Profile, entrypoint: Entrypoint) -> bool {
        entrypoint == Entrypoint::Vld && self.supported_profiles.contains(&profile)
    }

    fn new_sequence(&mut self, stream_info: &StreamInfo) -> StatelessBackendResult<()> {
        self.log.borrow_mut().sequences.push(stream_info.clone());
        Ok(())
    }

    fn ensure_context(&mut self, context: &ContextInfo) -> StatelessBackendResult<()> {
        if !self.supported_profiles.contains(&context.profile) {
            return Err(StatelessBackendError::UnsupportedProfile);
        }

        self.coded_resolution = context.resolution;
        self.log.borrow_mut().contexts.push(context.clone());
        Ok(())
    }

    fn surface_available(&self) -> bool {
        self.surfaces_available.get()
    }

    fn new_picture(&mut self, timestamp: u64) -> StatelessBackendResult<Self::Picture> {
        if self.fail_allocations.get() {
            return Err(StatelessBackendError::OutOfResources);
        }

        Ok(Submission {
            timestamp,
            ..Default::default()
        })
    }

    fn add_buffer(
        &mut self,
        picture: &mut Self::Picture,
        buffer: ParamBuffer<'_, Self::Handle>,
    ) -> StatelessBackendResult<()> {
        match buffer {
            ParamBuffer::IqMatrix(iq) => picture.iq_matrix = Some(iq),
            ParamBuffer::Picture {
                params,
                forward_reference,
                backward_reference,
            } => {
                if picture.picture.is_some() {
                    return Err(anyhow!("picture parameters submitted twice").into());
                }

                picture.picture = Some(params);
                picture.forward_reference = forward_reference.map(DecodedHandle::timestamp);
                picture.backward_reference = backward_reference.map(DecodedHandle::timestamp);
            }
            ParamBuffer::Slice { params, data } => picture.slices.push(SliceRecord {
                params,
                data_len: data.len(),
                crc: crc32fast::hash(data),
            }),
        }

        Ok(())
    }

    fn submit_picture(&mut self, picture: Self::Picture) -> StatelessBackendResult<Self::Handle> {
        let mut log = self.log.borrow_mut();
        let handle = BackendHandle {
            timestamp: picture.timestamp,
            coded_resolution: self.coded_resolution,
            submission: log.submissions.len(),
        };
        log.submissions.push(picture);

        Ok(Handle {
            handle: Rc::new(RefCell::new(handle)),
        })
    }
}

impl StatelessDecoder<Mpeg4, Backend> {
    // Creates a new instance of the decoder using the dummy backend.
    pub fn new_dummy(blocking_mode: BlockingMode, config: Mpeg4Config) -> Self {
        Self::with_config(Backend::new(), blocking_mode, config)
    }
}
