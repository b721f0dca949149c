//! Parsing of the WOFF2 file header, the compact table directory and the
//! optional collection sub-header.
//!
//! The directory uses a compact encoding: each entry starts with one flag
//! byte whose low six bits index the known-tags list (63 meaning an explicit
//! tag follows) and whose top two bits carry the transform version. Lengths
//! are `UIntBase128`. Source offsets are not stored; they accumulate in
//! directory order, which also yields the total uncompressed payload size.

use crate::stream::Reader;
use crate::{round4, Error, Result, Tag};

pub(crate) const SIGNATURE: u32 = 0x774F_4632; // 'wOF2'
pub(crate) const TTC_FLAVOR: u32 = 0x7474_6366; // 'ttcf'

/// The fixed tag list of the compact directory encoding.
const KNOWN_TAGS: [Tag; 63] = [
    Tag(*b"cmap"), Tag(*b"head"), Tag(*b"hhea"), Tag(*b"hmtx"),
    Tag(*b"maxp"), Tag(*b"name"), Tag(*b"OS/2"), Tag(*b"post"),
    Tag(*b"cvt "), Tag(*b"fpgm"), Tag(*b"glyf"), Tag(*b"loca"),
    Tag(*b"prep"), Tag(*b"CFF "), Tag(*b"VORG"), Tag(*b"EBDT"),
    Tag(*b"EBLC"), Tag(*b"gasp"), Tag(*b"hdmx"), Tag(*b"kern"),
    Tag(*b"LTSH"), Tag(*b"PCLT"), Tag(*b"VDMX"), Tag(*b"vhea"),
    Tag(*b"vmtx"), Tag(*b"BASE"), Tag(*b"GDEF"), Tag(*b"GPOS"),
    Tag(*b"GSUB"), Tag(*b"EBSC"), Tag(*b"JSTF"), Tag(*b"MATH"),
    Tag(*b"CBDT"), Tag(*b"CBLC"), Tag(*b"COLR"), Tag(*b"CPAL"),
    Tag(*b"SVG "), Tag(*b"sbix"), Tag(*b"acnt"), Tag(*b"avar"),
    Tag(*b"bdat"), Tag(*b"bloc"), Tag(*b"bsln"), Tag(*b"cvar"),
    Tag(*b"fdsc"), Tag(*b"feat"), Tag(*b"fmtx"), Tag(*b"fvar"),
    Tag(*b"gvar"), Tag(*b"hsty"), Tag(*b"just"), Tag(*b"lcar"),
    Tag(*b"mort"), Tag(*b"morx"), Tag(*b"opbd"), Tag(*b"prop"),
    Tag(*b"trak"), Tag(*b"Zapf"), Tag(*b"Silf"), Tag(*b"Glat"),
    Tag(*b"Gloc"), Tag(*b"Feat"), Tag(*b"Sill"),
];

/// One entry of the WOFF2 table directory.
///
/// `src_offset..src_offset + src_length` pins the table's slice in the
/// decompressed payload; `dst_length` is the advertised original length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Table {
    pub tag: Tag,
    pub transformed: bool,
    pub src_offset: u32,
    pub src_length: u32,
    pub dst_length: u32,
}

/// One font of a collection: its flavor and the indices of its tables in the
/// shared table vector. `dst_offset` and `header_checksum` are filled while
/// framing the output.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionFont {
    pub flavor: u32,
    pub dst_offset: u32,
    pub header_checksum: u32,
    pub table_indices: Vec<u16>,
}

/// The parsed WOFF2 header and directory.
#[derive(Debug, Clone, Default)]
pub(crate) struct Woff2Header {
    pub flavor: u32,
    /// TTC header version; zero for single fonts.
    pub ttc_version: u32,
    pub num_tables: u16,
    pub compressed_offset: usize,
    pub compressed_length: u32,
    pub uncompressed_size: u32,
    pub tables: Vec<Table>,
    pub fonts: Vec<CollectionFont>,
}

impl Woff2Header {
    pub fn is_collection(&self) -> bool {
        self.ttc_version != 0
    }

    /// The Brotli stream within the input.
    pub fn compressed<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let end = self
            .compressed_offset
            .checked_add(self.compressed_length as usize)
            .ok_or(Error::ArithmeticOverflow)?;
        data.get(self.compressed_offset..end).ok_or(Error::BadSize)
    }
}

/// Parse and validate the entire pre-payload portion of a WOFF2 file.
pub(crate) fn parse(data: &[u8]) -> Result<Woff2Header> {
    let mut r = Reader::new(data);

    if r.read::<u32>()? != SIGNATURE {
        return Err(Error::BadSignature);
    }

    let mut hdr = Woff2Header {
        flavor: r.read::<u32>()?,
        ..Woff2Header::default()
    };

    if r.read::<u32>()? as usize != data.len() {
        return Err(Error::BadSize);
    }

    hdr.num_tables = r.read::<u16>()?;
    if hdr.num_tables == 0 {
        return Err(Error::BadDirectory);
    }

    // reserved and totalSfntSize; the latter is advisory and recomputed.
    r.skip(6)?;
    hdr.compressed_length = r.read::<u32>()?;
    // majorVersion, minorVersion
    r.skip(4)?;

    let meta_offset = r.read::<u32>()? as usize;
    let meta_length = r.read::<u32>()? as usize;
    // metaOrigLength; the metadata block is not decoded.
    r.skip(4)?;
    if meta_offset != 0
        && (meta_offset >= data.len() || data.len() - meta_offset < meta_length)
    {
        return Err(Error::BadSize);
    }

    let priv_offset = r.read::<u32>()? as usize;
    let priv_length = r.read::<u32>()? as usize;
    if priv_offset != 0
        && (priv_offset >= data.len() || data.len() - priv_offset < priv_length)
    {
        return Err(Error::BadSize);
    }

    hdr.tables = parse_directory(&mut r, hdr.num_tables)?;

    // The last table's end is the size of the decompressed payload.
    let last = hdr.tables.last().ok_or(Error::BadDirectory)?;
    hdr.uncompressed_size = last
        .src_offset
        .checked_add(last.src_length)
        .ok_or(Error::ArithmeticOverflow)?;

    if hdr.flavor == TTC_FLAVOR {
        parse_collection(&mut r, &mut hdr)?;
    }

    hdr.compressed_offset = r.offset();

    // The compressed payload, the metadata block and the private block must
    // be stored in that order, each 4-byte aligned, and the file must end
    // exactly at the end of the last one present.
    let compressed_end = hdr
        .compressed_offset
        .checked_add(hdr.compressed_length as usize)
        .ok_or(Error::ArithmeticOverflow)?;
    let mut block_end = round4(compressed_end).ok_or(Error::ArithmeticOverflow)?;
    if block_end > data.len() {
        return Err(Error::BadSize);
    }

    for (offset, length) in [(meta_offset, meta_length), (priv_offset, priv_length)] {
        if offset == 0 {
            continue;
        }
        if block_end != offset {
            return Err(Error::BadSize);
        }
        let end = offset.checked_add(length).ok_or(Error::ArithmeticOverflow)?;
        block_end = round4(end).ok_or(Error::ArithmeticOverflow)?;
        if block_end > u32::MAX as usize {
            return Err(Error::BadSize);
        }
    }

    if Some(block_end) != round4(data.len()) {
        return Err(Error::BadSize);
    }

    Ok(hdr)
}

fn parse_directory(r: &mut Reader, num_tables: u16) -> Result<Vec<Table>> {
    let mut tables = Vec::with_capacity(num_tables as usize);
    let mut src_offset: u32 = 0;

    for _ in 0..num_tables {
        let flag_byte = r.read::<u8>()?;
        let tag = if flag_byte & 0x3F == 0x3F {
            Tag(r.read::<[u8; 4]>()?)
        } else {
            KNOWN_TAGS[(flag_byte & 0x3F) as usize]
        };

        // Transform version 0 means "transformed" for glyf and loca and
        // "identity" for every other table; any non-zero version elsewhere
        // marks a transform.
        let transform_version = flag_byte >> 6;
        let transformed = if tag == Tag::GLYF || tag == Tag::LOCA {
            transform_version == 0
        } else {
            transform_version != 0
        };

        let dst_length = r.read_base128()?;
        let mut transform_length = dst_length;
        if transformed {
            transform_length = r.read_base128()?;
            // A transformed loca is fully derived from glyf and carries no
            // data of its own.
            if tag == Tag::LOCA && transform_length != 0 {
                return Err(Error::BadTransform);
            }
        }

        tables.push(Table {
            tag,
            transformed,
            src_offset,
            src_length: transform_length,
            dst_length,
        });

        src_offset = src_offset
            .checked_add(transform_length)
            .ok_or(Error::ArithmeticOverflow)?;
    }

    Ok(tables)
}

fn parse_collection(r: &mut Reader, hdr: &mut Woff2Header) -> Result<()> {
    hdr.ttc_version = r.read::<u32>()?;
    if hdr.ttc_version != 0x0001_0000 && hdr.ttc_version != 0x0002_0000 {
        return Err(Error::BadCollection);
    }

    let num_fonts = r.read_packed_u16()?;
    if num_fonts == 0 {
        return Err(Error::BadCollection);
    }

    for i in 0..num_fonts {
        let num_tables = r.read_packed_u16()?;
        if num_tables == 0 {
            return Err(Error::BadCollection);
        }

        let mut font = CollectionFont {
            flavor: r.read::<u32>()?,
            ..CollectionFont::default()
        };

        let mut glyf_index = None;
        let mut loca_index = None;
        for _ in 0..num_tables {
            let index = r.read_packed_u16()?;
            let table = hdr
                .tables
                .get(index as usize)
                .ok_or(Error::BadCollection)?;
            if table.tag == Tag::GLYF {
                glyf_index = Some(index);
            } else if table.tag == Tag::LOCA {
                loca_index = Some(index);
            }
            font.table_indices.push(index);
        }

        // When both outline tables are present loca must directly follow
        // glyf in the shared vector. A font with only one of them is
        // rejected later, during its rebuild.
        if let (Some(glyf), Some(loca)) = (glyf_index, loca_index) {
            if loca != glyf + 1 {
                log::warn!("collection font {i} has non-consecutive glyf/loca");
                return Err(Error::BadCollection);
            }
        }

        hdr.fonts.push(font);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Writer;

    /// A single-font WOFF2 with one untransformed `cmap` table of the given
    /// source length, with `mutate` applied to the raw bytes before parsing.
    fn one_table_input(src_length: u32, mutate: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut w = Writer::new();
        w.write::<u32>(SIGNATURE);
        w.write::<u32>(0x0001_0000); // flavor
        w.write::<u32>(0); // totalLength, patched below
        w.write::<u16>(1); // numTables
        w.write::<u16>(0); // reserved
        w.write::<u32>(0); // totalSfntSize
        w.write::<u32>(src_length); // totalCompressedSize
        w.write::<u32>(0); // majorVersion, minorVersion
        w.write::<[u8; 12]>([0; 12]); // meta offset/length/origLength
        w.write::<[u8; 8]>([0; 8]); // priv offset/length
        w.write::<u8>(0); // directory: known tag 0 (cmap), version 0
        w.write::<u8>(src_length as u8); // origLength as Base128
        w.give(&vec![0xAB; src_length as usize]); // "compressed" payload
        w.align(4);

        let mut data = w.finish();
        let total = data.len() as u32;
        data[8..12].copy_from_slice(&total.to_be_bytes());
        mutate(&mut data);
        data
    }

    #[test]
    fn accepts_minimal_single_font() {
        let data = one_table_input(8, |_| {});
        let hdr = parse(&data).unwrap();
        assert_eq!(hdr.num_tables, 1);
        assert_eq!(hdr.uncompressed_size, 8);
        assert!(!hdr.is_collection());
        assert_eq!(hdr.compressed(&data).unwrap().len(), 8);
        let table = hdr.tables[0];
        assert_eq!(table.tag, Tag(*b"cmap"));
        assert!(!table.transformed);
        assert_eq!((table.src_offset, table.src_length, table.dst_length), (0, 8, 8));
    }

    #[test]
    fn rejects_bad_signature() {
        let data = one_table_input(8, |data| data[0] = b'x');
        assert_eq!(parse(&data).unwrap_err(), Error::BadSignature);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut data = one_table_input(8, |_| {});
        data.push(0);
        assert_eq!(parse(&data).unwrap_err(), Error::BadSize);
    }

    #[test]
    fn rejects_zero_tables() {
        let data = one_table_input(8, |data| data[12..14].copy_from_slice(&[0, 0]));
        assert_eq!(parse(&data).unwrap_err(), Error::BadDirectory);
    }

    #[test]
    fn rejects_transformed_loca_with_data() {
        let mut w = Writer::new();
        w.write::<u8>(11); // known tag 11 = loca, version 0 = transformed
        w.write::<u8>(0); // origLength
        w.write::<u8>(1); // transformLength, must be zero
        let mut r = Reader::new(w.data());
        assert_eq!(parse_directory(&mut r, 1).unwrap_err(), Error::BadTransform);
    }

    #[test]
    fn reads_explicit_tags() {
        let mut w = Writer::new();
        w.write::<u8>(0x3F);
        w.write::<[u8; 4]>(*b"ABCD");
        w.write::<u8>(4);
        let mut r = Reader::new(w.data());
        let tables = parse_directory(&mut r, 1).unwrap();
        assert_eq!(tables[0].tag, Tag(*b"ABCD"));
    }

    #[test]
    fn glyf_transform_flag_is_inverted() {
        let mut w = Writer::new();
        w.write::<u8>(10); // glyf, version 0
        w.write::<u8>(6); // origLength
        w.write::<u8>(4); // transformLength
        w.write::<u8>(10 | 0xC0); // glyf, version 3: identity
        w.write::<u8>(6);
        w.write::<u8>(0); // name, version 0: identity
        w.write::<u8>(5);
        w.write::<u8>(0x40); // cmap, version 1: transform
        w.write::<u8>(5);
        w.write::<u8>(7);
        let mut r = Reader::new(w.data());
        let tables = parse_directory(&mut r, 4).unwrap();
        assert!(tables[0].transformed);
        assert_eq!(tables[0].src_length, 4);
        assert!(!tables[1].transformed);
        assert!(!tables[2].transformed);
        assert!(tables[3].transformed);
        // Source offsets accumulate over the preceding transform lengths.
        assert_eq!(tables[3].src_offset, 4 + 6 + 5);
    }

    #[test]
    fn collection_requires_consecutive_glyf_loca() {
        let tables = vec![
            Table { tag: Tag::GLYF, transformed: false, src_offset: 0, src_length: 0, dst_length: 0 },
            Table { tag: Tag(*b"cmap"), transformed: false, src_offset: 0, src_length: 0, dst_length: 0 },
            Table { tag: Tag::LOCA, transformed: false, src_offset: 0, src_length: 0, dst_length: 0 },
        ];

        let mut w = Writer::new();
        w.write::<u32>(0x0001_0000); // version
        w.write::<u8>(1); // numFonts
        w.write::<u8>(3); // numTables
        w.write::<u32>(0x0001_0000); // flavor
        w.write::<[u8; 3]>([0, 1, 2]); // glyf, cmap, loca

        let mut hdr = Woff2Header { tables: tables.clone(), ..Woff2Header::default() };
        let mut r = Reader::new(w.data());
        assert_eq!(parse_collection(&mut r, &mut hdr).unwrap_err(), Error::BadCollection);

        let mut w = Writer::new();
        w.write::<u32>(0x0001_0000);
        w.write::<u8>(1);
        w.write::<u8>(2);
        w.write::<u32>(0x0001_0000);
        w.write::<[u8; 2]>([0, 3]); // index out of range

        let mut hdr = Woff2Header { tables, ..Woff2Header::default() };
        let mut r = Reader::new(w.data());
        assert_eq!(parse_collection(&mut r, &mut hdr).unwrap_err(), Error::BadCollection);
    }
}
