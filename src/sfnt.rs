//! Framing of the output SFNT or TTC: offset tables and zeroed directory
//! entries are written up front, and every entry's byte offset is recorded so
//! the rebuild pass can patch in real checksums, offsets and lengths later.

use std::collections::BTreeMap;

use crate::header::{CollectionFont, Woff2Header};
use crate::stream::{Sink, Writer};
use crate::{checksum, Result, Tag};

/// Checksum, offset and length of an emitted table; the payload of a
/// directory entry and the unit of reuse between collection fonts.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TableMetadata {
    pub checksum: u32,
    pub dst_offset: u32,
    pub dst_length: u32,
}

/// Everything gathered about a single font while rebuilding it.
#[derive(Debug, Clone, Default)]
pub(crate) struct FontInfo {
    pub num_glyphs: u16,
    pub index_format: u16,
    pub num_hmetrics: u16,
    /// Per-glyph `xMin`, harvested from glyf reconstruction for hmtx.
    pub x_mins: Vec<i16>,
    /// Byte offset of each table's 16-byte directory entry in the output.
    pub table_entry_by_tag: BTreeMap<Tag, u32>,
}

/// Rebuild state shared by all fonts of the output.
#[derive(Debug, Default)]
pub(crate) struct Rebuild {
    /// Checksum of the framing as written, with all entries still zero.
    pub header_checksum: u32,
    pub font_infos: Vec<FontInfo>,
    /// Tables already emitted, for reuse across collection fonts. Keyed by
    /// `(tag, src_offset)` because zero-length loca tables of different
    /// fonts would collide on the offset alone.
    pub written: BTreeMap<(Tag, u32), TableMetadata>,
}

/// Write the SFNT/TTC framing with zeroed directory entries.
///
/// Fixes the emission order first: every font's table list is put into tag
/// order, and a single font gets a synthetic one-entry font list so the
/// rebuild pass can treat both shapes alike.
pub(crate) fn write_headers<S: Sink>(hdr: &mut Woff2Header, out: &mut S) -> Result<Rebuild> {
    let tables = &hdr.tables;
    if hdr.is_collection() {
        for font in &mut hdr.fonts {
            let by_tag: BTreeMap<Tag, u16> = font
                .table_indices
                .iter()
                .map(|&index| (tables[index as usize].tag, index))
                .collect();
            font.table_indices = by_tag.into_values().collect();
        }
    } else {
        let mut indices: Vec<u16> = (0..hdr.num_tables).collect();
        indices.sort_by_key(|&index| tables[index as usize].tag);
        hdr.fonts.push(CollectionFont {
            flavor: hdr.flavor,
            table_indices: indices,
            ..CollectionFont::default()
        });
    }

    let mut w = Writer::new();
    let mut offset_table_pos = 0;

    if hdr.is_collection() {
        w.write::<u32>(hdr.flavor);
        w.write::<u32>(hdr.ttc_version);
        w.write::<u32>(hdr.fonts.len() as u32);
        // OffsetTable[numFonts], patched once each font's position is known.
        offset_table_pos = w.len();
        for _ in &hdr.fonts {
            w.write::<u32>(0);
        }
        if hdr.ttc_version == 0x0002_0000 {
            w.write::<u32>(0); // ulDsigTag
            w.write::<u32>(0); // ulDsigLength
            w.write::<u32>(0); // ulDsigOffset
        }
    }

    let mut font_infos = Vec::with_capacity(hdr.fonts.len());
    for (i, font) in hdr.fonts.iter_mut().enumerate() {
        font.dst_offset = w.len() as u32;
        if hdr.ttc_version != 0 {
            w.rewrite(offset_table_pos + 4 * i, &font.dst_offset.to_be_bytes())?;
        }

        write_offset_table(&mut w, font.flavor, font.table_indices.len() as u16);

        let mut info = FontInfo::default();
        for &index in &font.table_indices {
            let tag = tables[index as usize].tag;
            info.table_entry_by_tag.insert(tag, w.len() as u32);
            w.write::<Tag>(tag);
            w.write::<u32>(0); // checksum
            w.write::<u32>(0); // offset
            w.write::<u32>(0); // length
        }

        font.header_checksum = checksum(&w.data()[font.dst_offset as usize..]);
        font_infos.push(info);
    }

    let header_checksum = checksum(w.data());
    out.append(w.data())?;

    Ok(Rebuild {
        header_checksum,
        font_infos,
        written: BTreeMap::new(),
    })
}

/// Write one offset table: flavor, table count and the binary-search fields
/// derived from it.
fn write_offset_table(w: &mut Writer, flavor: u32, num_tables: u16) {
    let mut entry_selector: u16 = 0;
    while 1u32 << (entry_selector + 1) <= u32::from(num_tables) {
        entry_selector += 1;
    }
    let search_range = (1u32 << entry_selector) << 4;
    let range_shift = (u32::from(num_tables) << 4) - search_range;

    w.write::<u32>(flavor);
    w.write::<u16>(num_tables);
    w.write::<u16>(search_range as u16);
    w.write::<u16>(entry_selector);
    w.write::<u16>(range_shift as u16);
}
