// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("invalid bit count")]
    InvalidBitCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

/// MSB-first bit writer on top of a [`std::io::Write`].
pub struct BitWriter<W: Write> {
    out: W,
    nth_bit: u8,
    curr_byte: u8,
    bits_written: usize,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            curr_byte: 0,
            nth_bit: 0,
            bits_written: 0,
        }
    }

    /// Writes fixed bit size integer (up to 32 bit)
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<usize> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount);
        }

        for bit in (0..bits).rev() {
            self.write_bit((value >> bit) & 1 == 1)?;
        }

        Ok(bits)
    }

    /// Takes a single bit that will be outputed to [`std::io::Write`]
    pub fn write_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;
        self.bits_written += 1;

        if self.nth_bit == 8 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        Ok(())
    }

    /// Writes whole bytes, e.g. an opaque payload following a header. Takes the fast path when
    /// the writer is byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> BitWriterResult<()> {
        if self.aligned() {
            self.out.write_all(bytes)?;
            self.bits_written += bytes.len() * 8;
            return Ok(());
        }

        for &byte in bytes {
            self.write_f(8, byte)?;
        }

        Ok(())
    }

    /// Immediately outputs any cached bits to [`std::io::Write`]
    pub fn flush(&mut self) -> BitWriterResult<()> {
        if self.nth_bit != 0 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self.out.flush()?;
        Ok(())
    }

    /// Returns `true` if the next bit starts a new byte.
    pub fn aligned(&self) -> bool {
        self.nth_bit == 0
    }

    /// Number of bits written since creation, pending ones included.
    pub fn bits_written(&self) -> usize {
        self.bits_written
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush bits {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitwriter_f1() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            for bit in [true, false, false, false, true, true, true, true] {
                writer.write_f(1, bit).unwrap();
            }
            assert!(writer.aligned());
        }
        assert_eq!(buf, vec![0b10001111u8]);
    }

    #[test]
    fn test_bitwriter_f3() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(3, 0b100u8).unwrap();
            writer.write_f(3, 0b101u8).unwrap();
            writer.write_f(3, 0b011u8).unwrap();
            assert_eq!(writer.bits_written(), 9);
            assert!(!writer.aligned());
        }
        assert_eq!(buf, vec![0b10010101u8, 0b10000000u8]);
    }

    #[test]
    fn test_bitwriter_start_code() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(32, 0x000001b6u32).unwrap();
            assert!(writer.write_f(33, 0u32).is_err());
        }
        assert_eq!(buf, vec![0x00, 0x00, 0x01, 0xb6]);
    }

    #[test]
    fn test_bitwriter_unaligned_bytes() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_bytes(&[0xab]).unwrap();
            writer.write_f(4, 0b1111u8).unwrap();
            writer.write_bytes(&[0x00, 0xff]).unwrap();
            assert_eq!(writer.bits_written(), 28);
        }
        assert_eq!(buf, vec![0xab, 0xf0, 0x0f, 0xf0]);
    }
}
