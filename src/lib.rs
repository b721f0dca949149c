/*!
Decodes WOFF2 font containers back into their SFNT (TTF/OTF/TTC) form.

# Example
```no_run
# fn main() -> Result<(), Box<dyn std::error::Error>> {
// Read the raw WOFF2 data.
let data = std::fs::read("fonts/NotoSans-Regular.woff2")?;

// Rebuild the original font file.
let ttf = unwoff2::decode(&data)?;

std::fs::write("target/NotoSans-Regular.ttf", ttf)?;
# Ok(())
# }
```

The container stores its tables Brotli-compressed, with the `glyf`, `loca`
and `hmtx` tables optionally re-encoded into more compressible forms. This
crate inverts those transforms and reassembles a font whose per-table
checksums and `head.checkSumAdjustment` validate: every table is summed as it
is emitted, the zeroed directory entries written up front are patched once a
table's real offset and length are known, and the adjustment field is fixed
up last so the whole font sums to the magic constant again.

The decoder is written for hostile input: every read is bounds-checked,
every offset computation is overflow-checked, and the declared decompressed
size is capped at a plausible multiple of the input size before any large
allocation happens.
*/

#![deny(unsafe_code)]
#![deny(missing_docs)]

mod brotli;
mod font;
mod glyf;
mod header;
mod hmtx;
mod sfnt;
mod stream;

use std::fmt::{self, Debug, Display, Formatter};

pub use crate::stream::{FixedSink, Reader, Sink, Structure, Writer};

// Over 14k test fonts the max compression ratio seen to date was ~20.
// Anything past 100 suggests a fabricated decompressed size.
const MAX_PLAUSIBLE_COMPRESSION_RATIO: f32 = 100.0;

/// Convert a WOFF2 file into a TTF/OTF/TTC file.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Writer::new();
    decode_into(data, &mut out)?;
    Ok(out.finish())
}

/// Convert a WOFF2 file, writing the font into a caller-owned sink.
///
/// The sink sees appends, 4-byte padding and patches of already-written
/// spans, in emission order. On failure the sink's content is unspecified
/// and should be discarded.
pub fn decode_into<S: Sink>(data: &[u8], out: &mut S) -> Result<()> {
    decode_with(data, out, brotli::inflate)
}

/// Convert a WOFF2 file using a caller-supplied Brotli decompressor.
///
/// `decompress` receives the compressed stream and the exactly-sized output
/// buffer, and returns the number of bytes it produced; anything other than
/// filling the buffer exactly fails the conversion.
pub fn decode_with<S, D>(data: &[u8], out: &mut S, mut decompress: D) -> Result<()>
where
    S: Sink,
    D: FnMut(&[u8], &mut [u8]) -> Result<usize>,
{
    let mut hdr = header::parse(data)?;
    let mut rebuild = sfnt::write_headers(&mut hdr, out)?;

    let ratio = hdr.uncompressed_size as f32 / data.len() as f32;
    if ratio > MAX_PLAUSIBLE_COMPRESSION_RATIO {
        log::warn!("implausible compression ratio {ratio:.1}");
        return Err(Error::DecompressBomb);
    }
    if hdr.uncompressed_size == 0 {
        return Err(Error::BadSize);
    }

    let mut payload = vec![0; hdr.uncompressed_size as usize];
    let produced = decompress(hdr.compressed(data)?, &mut payload)?;
    if produced != payload.len() {
        return Err(Error::DecompressFailed);
    }

    for font_index in 0..hdr.fonts.len() {
        font::reconstruct(&mut payload, &mut rebuild, &hdr, font_index, out)?;
    }

    Ok(())
}

/// The size of the decoded font as declared by the WOFF2 header, for
/// pre-allocating a fixed-size sink. Zero if the input is too short; the
/// field is read without any further validation.
pub fn decoded_size(data: &[u8]) -> u32 {
    u32::read_at(data, 16).unwrap_or(0)
}

/// Calculate a checksum over the sliced data as a sum of u32s. If the data
/// length is not a multiple of four, it is treated as if padded with zero to
/// a length that is a multiple of four.
pub(crate) fn checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut bytes = [0; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(bytes));
    }
    sum
}

/// Round up to the next multiple of four; `None` on overflow.
pub(crate) fn round4(value: usize) -> Option<usize> {
    value.checked_add(3).map(|padded| padded & !3)
}

/// A 4-byte table tag.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub(crate) const HEAD: Self = Self(*b"head");
    pub(crate) const HHEA: Self = Self(*b"hhea");
    pub(crate) const HMTX: Self = Self(*b"hmtx");
    pub(crate) const GLYF: Self = Self(*b"glyf");
    pub(crate) const LOCA: Self = Self(*b"loca");
}

impl Structure for Tag {
    const SIZE: usize = 4;

    fn read(r: &mut Reader) -> Result<Self> {
        r.read::<[u8; 4]>().map(Self)
    }

    fn write(self, w: &mut Writer) {
        w.write::<[u8; 4]>(self.0)
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad(std::str::from_utf8(&self.0).unwrap_or("..."))
    }
}

/// The result type for everything.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoding failed because the data is not a valid WOFF2 file.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// A read ran past the end of its region.
    Truncated,
    /// The file does not start with the `wOF2` signature.
    BadSignature,
    /// A length field is inconsistent with the input.
    BadSize,
    /// A table directory entry is malformed.
    BadDirectory,
    /// The collection sub-header is malformed or indexes out of range.
    BadCollection,
    /// A transform was applied to a table that cannot carry it, or its
    /// parameters are illegal.
    BadTransform,
    /// A glyph record violates the transformed-glyf constraints.
    BadGlyph,
    /// An offset or length computation wrapped.
    ArithmeticOverflow,
    /// The Brotli stream did not decompress to the declared size.
    DecompressFailed,
    /// The declared decompressed size is implausibly large.
    DecompressBomb,
    /// The first font of a collection claims to reuse a table.
    ReuseInFirstFont,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Truncated => f.pad("unexpected end of data"),
            Self::BadSignature => f.pad("missing wOF2 signature"),
            Self::BadSize => f.pad("length fields are inconsistent with the input"),
            Self::BadDirectory => f.pad("malformed table directory"),
            Self::BadCollection => f.pad("malformed collection header"),
            Self::BadTransform => f.pad("illegal table transform"),
            Self::BadGlyph => f.pad("malformed glyph record"),
            Self::ArithmeticOverflow => f.pad("arithmetic overflow"),
            Self::DecompressFailed => f.pad("decompression failed"),
            Self::DecompressBomb => f.pad("implausible decompressed size"),
            Self::ReuseInFirstFont => f.pad("table reuse in first font"),
        }
    }
}

impl std::error::Error for Error {}
