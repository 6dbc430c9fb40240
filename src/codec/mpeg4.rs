// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MPEG-4 Part 2 (ISO/IEC 14496-2) visual elementary streams, including the H.263-compatible
//! short video header.

pub mod dpb;
pub mod packet;
pub mod parser;
pub mod short_header;
pub mod synthesizer;
pub mod timing;
