// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture tracking for MPEG-4 Part 2.
//!
//! MPEG-4 visual only ever needs two reference pictures: the forward (`prev`) and backward
//! (`next`) anchors of B-VOPs. Reference pictures are output once they stop being the most
//! recent anchor, and B pictures are output as soon as they are decoded.

use log::debug;

use crate::codec::mpeg4::parser::VopCodingType;

/// Index of a picture in the [`Dpb`] arena.
pub type PictureId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PictureData {
    pub coding_type: VopCodingType,
    /// Presentation timestamp.
    pub pts: u64,
    /// Position of the picture in decoding order.
    pub decode_order: u64,
    pub is_reference: bool,
}

impl PictureData {
    /// Whether a picture of `coding_type` can be referenced by later pictures.
    pub fn is_reference_type(coding_type: VopCodingType, coded: bool) -> bool {
        coded && coding_type != VopCodingType::B
    }
}

#[derive(Clone, Debug)]
pub struct DpbEntry<T> {
    pub pic: PictureData,
    /// Backend handle, set once the picture has been submitted.
    pub handle: Option<T>,
    /// Whether the picture has already been output.
    pub output: bool,
}

#[derive(Debug)]
pub struct Dpb<T> {
    entries: Vec<Option<DpbEntry<T>>>,
    /// Picture being decoded.
    curr: Option<PictureId>,
    /// Most recent reference picture.
    next: Option<PictureId>,
    /// Reference picture before `next`.
    prev: Option<PictureId>,
    /// Former `prev`, kept until the current reference picture is finished.
    displaced: Option<PictureId>,
    closed_gop: bool,
    broken_link: bool,
    /// Number of reference pictures started since the last GOV.
    refs_in_gop: usize,
}

impl<T> Default for Dpb<T> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
            curr: None,
            next: None,
            prev: None,
            displaced: None,
            closed_gop: false,
            broken_link: false,
            refs_in_gop: 0,
        }
    }
}

impl<T: Clone> Dpb<T> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn start_gop(&mut self, closed: bool, broken_link: bool) {
        self.closed_gop = closed;
        self.broken_link = broken_link;
        self.refs_in_gop = 0;
    }

    fn entry(&self, id: PictureId) -> Option<&DpbEntry<T>> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, id: PictureId) -> Option<&mut DpbEntry<T>> {
        self.entries.get_mut(id).and_then(Option::as_mut)
    }

    fn insert(&mut self, entry: DpbEntry<T>) -> PictureId {
        match self.entries.iter().position(Option::is_none) {
            Some(id) => {
                self.entries[id] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    /// Frees `id` unless one of the slots still names it.
    fn release(&mut self, id: PictureId) {
        if [self.curr, self.next, self.prev, self.displaced].contains(&Some(id)) {
            return;
        }

        if let Some(entry) = self.entries.get_mut(id) {
            *entry = None;
        }
    }

    /// Marks `id` as output and returns its handle, if it has been submitted and has not been
    /// output yet.
    fn take_output(&mut self, id: PictureId) -> Option<T> {
        let entry = self.entry_mut(id)?;
        if entry.output {
            return None;
        }

        let handle = entry.handle.clone()?;
        entry.output = true;
        debug!(
            "Outputting {:?} picture, pts {}",
            entry.pic.coding_type, entry.pic.pts
        );
        Some(handle)
    }

    /// Makes `pic` the current picture. If it is a reference, the previous `next` anchor is
    /// returned for output and the anchors are rotated.
    pub fn start_picture(&mut self, pic: PictureData) -> Option<T> {
        self.discard_current();

        let is_reference = pic.is_reference;
        let id = self.insert(DpbEntry {
            pic,
            handle: None,
            output: false,
        });
        self.curr = Some(id);

        if !is_reference {
            return None;
        }

        let output = self.next.and_then(|next| self.take_output(next));

        self.refs_in_gop += 1;
        self.displaced = self.prev.take();
        self.prev = self.next;
        self.next = Some(id);

        output
    }

    /// Attaches the backend handle to the current picture. Non-reference pictures are
    /// returned for output when their anchors are usable.
    pub fn finish_picture(&mut self, handle: T) -> Option<T> {
        let id = self.curr.take()?;
        let entry = self.entry_mut(id)?;
        entry.handle = Some(handle);

        if entry.pic.is_reference {
            if let Some(displaced) = self.displaced.take() {
                self.release(displaced);
            }
            return None;
        }

        // Leading B pictures of a broken link GOP reference a picture that is not available.
        let broken = self.broken_link && !self.closed_gop && self.refs_in_gop < 2;
        let anchored = self.next.is_some() && (self.prev.is_some() || self.closed_gop);

        let output = if anchored && !broken {
            self.take_output(id)
        } else {
            debug!("Dropping non-reference picture without valid anchors");
            None
        };

        self.release(id);
        output
    }

    /// Drops the current picture, e.g. because it could not be submitted. The anchors are put
    /// back the way they were before the picture was started.
    pub fn discard_current(&mut self) {
        if let Some(id) = self.curr.take() {
            if self.next == Some(id) {
                self.next = self.prev.take();
                self.prev = self.displaced.take();
                self.refs_in_gop = self.refs_in_gop.saturating_sub(1);
            }

            self.release(id);
        }
    }

    /// Handle of `prev`, to be output again in place of a not-coded VOP.
    pub fn reoutput_prev(&self) -> Option<T> {
        self.prev
            .and_then(|prev| self.entry(prev))
            .and_then(|entry| entry.handle.clone())
    }

    /// Returns the pictures that still need to be output, in presentation order, and clears
    /// all the slots.
    pub fn flush(&mut self) -> Vec<T> {
        let mut output = Vec::new();

        if let Some(id) = self.curr {
            if self.entry(id).is_some_and(|entry| !entry.pic.is_reference) {
                output.extend(self.take_output(id));
            }
        }

        if let Some(next) = self.next {
            output.extend(self.take_output(next));
        }

        self.clear();
        output
    }

    /// Drops all the pictures and GOP state.
    pub fn clear(&mut self) {
        *self = Default::default();
    }

    pub fn prev(&self) -> Option<&DpbEntry<T>> {
        self.prev.and_then(|id| self.entry(id))
    }

    pub fn next(&self) -> Option<&DpbEntry<T>> {
        self.next.and_then(|id| self.entry(id))
    }

    pub fn current(&self) -> Option<&DpbEntry<T>> {
        self.curr.and_then(|id| self.entry(id))
    }

    /// Number of pictures currently held.
    pub fn live_pictures(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}
