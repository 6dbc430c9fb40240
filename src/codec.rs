// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream-level code: scanning, header parsing, timing and reference management. Nothing in
//! here talks to a backend.

pub mod mpeg4;
