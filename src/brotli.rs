//! The default Brotli collaborator.
//!
//! WOFF2 states the decompressed payload size up front, so decompression
//! targets a fixed-size buffer: producing more or fewer bytes than the
//! buffer holds is an error, never a partial success.

use std::io::{self, Write};

use brotli_decompressor::DecompressorWriter;

use crate::{Error, Result};

/// Decompress `src` into `dst`, returning the number of bytes produced.
/// Anything other than filling `dst` exactly is reported by the caller.
pub fn inflate(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let mut sink = Bounded { data: dst, filled: 0 };
    let mut decompressor = DecompressorWriter::new(&mut sink, 4096);
    decompressor.write_all(src).map_err(|_| Error::DecompressFailed)?;
    decompressor.close().map_err(|_| Error::DecompressFailed)?;
    drop(decompressor);
    Ok(sink.filled)
}

/// Writes into a fixed buffer and refuses to grow past it.
struct Bounded<'a> {
    data: &'a mut [u8],
    filled: usize,
}

impl Write for Bounded<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.filled + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "output buffer full"));
        }
        self.data[self.filled..end].copy_from_slice(buf);
        self.filled = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "abc" as a stored (uncompressed) metablock plus an empty last block.
    const ABC: [u8; 7] = [0x20, 0x00, 0x10, 0x61, 0x62, 0x63, 0x03];

    #[test]
    fn fills_the_buffer_exactly() {
        let mut dst = [0u8; 3];
        assert_eq!(inflate(&ABC, &mut dst).unwrap(), 3);
        assert_eq!(&dst, b"abc");
    }

    #[test]
    fn too_small_buffer_fails() {
        let mut dst = [0u8; 2];
        assert_eq!(inflate(&ABC, &mut dst).unwrap_err(), Error::DecompressFailed);
    }

    #[test]
    fn garbage_input_fails() {
        let mut dst = [0u8; 16];
        assert!(inflate(&[0xFF, 0xFF, 0xFF, 0xFF], &mut dst).is_err());
    }
}
