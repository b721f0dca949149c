//! Per-font table emission: identity copies, transform inversion, directory
//! patching and the final `head.checkSumAdjustment` fixup.

use crate::header::{Table, Woff2Header};
use crate::sfnt::{Rebuild, TableMetadata};
use crate::stream::{Sink, Structure};
use crate::{checksum, glyf, hmtx, Error, Result, Tag};

/// Emit all tables of one font behind the already-written framing.
///
/// Tables arrive in tag order, so `hhea` is parsed before `hmtx` needs its
/// metric count and `glyf` runs before `loca` and `hmtx` consume what it
/// gathered. `payload` is the decompressed stream; the `head` table is
/// zeroed in place at its checksum-adjustment field before being summed.
pub(crate) fn reconstruct<S: Sink>(
    payload: &mut [u8],
    rebuild: &mut Rebuild,
    hdr: &Woff2Header,
    font_index: usize,
    out: &mut S,
) -> Result<()> {
    let Rebuild { header_checksum, font_infos, written } = rebuild;
    let font = &hdr.fonts[font_index];
    let info = &mut font_infos[font_index];

    // 'glyf' without 'loca' doesn't make sense, and the pair is transformed
    // as a unit or not at all.
    let glyf_table = find(hdr, font_index, Tag::GLYF);
    let loca_table = find(hdr, font_index, Tag::LOCA);
    match (glyf_table, loca_table) {
        (Some(glyf), Some(loca)) => {
            if glyf.transformed != loca.transformed {
                log::warn!("cannot transform just one of glyf/loca");
                return Err(Error::BadTransform);
            }
        }
        (None, None) => {}
        _ => {
            log::warn!("cannot have just one of glyf/loca");
            return Err(Error::BadDirectory);
        }
    }
    let loca_dst_length = loca_table.map(|table| table.dst_length);

    let mut font_checksum = if hdr.is_collection() {
        font.header_checksum
    } else {
        *header_checksum
    };
    let mut loca_metadata = None;

    for &index in &font.table_indices {
        let table = &hdr.tables[index as usize];
        let src_offset = table.src_offset as usize;
        let src_end = src_offset
            .checked_add(table.src_length as usize)
            .ok_or(Error::ArithmeticOverflow)?;
        if src_end > payload.len() {
            return Err(Error::BadSize);
        }

        if table.tag == Tag::HHEA {
            // numberOfHMetrics, needed later to rebuild hmtx.
            info.num_hmetrics = u16::read_at(&payload[src_offset..src_end], 34)?;
        }

        let reuse_key = (table.tag, table.src_offset);
        let metadata = if let Some(&metadata) = written.get(&reuse_key) {
            // A collection may share one emission between fonts, but the
            // first font has nothing to share from yet.
            if font_index == 0 {
                return Err(Error::ReuseInFirstFont);
            }
            metadata
        } else {
            let metadata = if !table.transformed {
                if table.tag == Tag::HEAD {
                    if table.src_length < 12 {
                        return Err(Error::BadSize);
                    }
                    // checkSumAdjustment must not participate in any
                    // checksum; the real value is patched in afterwards.
                    payload[src_offset + 8..src_offset + 12].fill(0);
                }
                let content = &payload[src_offset..src_end];
                let metadata = TableMetadata {
                    checksum: checksum(content),
                    dst_offset: position(out)?,
                    dst_length: table.src_length,
                };
                out.append(content)?;
                metadata
            } else {
                let content = &payload[src_offset..src_end];
                match table.tag {
                    Tag::GLYF => {
                        let loca_dst_length = loca_dst_length.ok_or(Error::BadDirectory)?;
                        let tables = glyf::reconstruct(content, loca_dst_length, info, out)?;
                        loca_metadata = Some(tables.loca);
                        tables.glyf
                    }
                    // Emitted by the glyf pass; only the bookkeeping is left.
                    Tag::LOCA => loca_metadata.take().ok_or(Error::BadTransform)?,
                    Tag::HMTX => hmtx::reconstruct(content, info, out)?,
                    _ => return Err(Error::BadTransform),
                }
            };
            written.insert(reuse_key, metadata);
            metadata
        };

        font_checksum = font_checksum.wrapping_add(metadata.checksum);

        // Patch the real values into the zeroed directory entry, and account
        // for the words that replaced the zeroes.
        let entry_offset = *info
            .table_entry_by_tag
            .get(&table.tag)
            .ok_or(Error::BadDirectory)?;
        let mut entry = [0; 12];
        entry[0..4].copy_from_slice(&metadata.checksum.to_be_bytes());
        entry[4..8].copy_from_slice(&metadata.dst_offset.to_be_bytes());
        entry[8..12].copy_from_slice(&metadata.dst_length.to_be_bytes());
        out.rewrite(entry_offset as usize + 4, &entry)?;
        font_checksum = font_checksum.wrapping_add(checksum(&entry));

        out.pad4()?;

        let dst_end = u64::from(metadata.dst_offset) + u64::from(metadata.dst_length);
        if dst_end > out.len() as u64 {
            return Err(Error::BadSize);
        }
    }

    // The font was summed with checkSumAdjustment zeroed; set the field so
    // the whole font sums to the magic constant.
    if let Some(head) = find(hdr, font_index, Tag::HEAD) {
        let metadata = written
            .get(&(Tag::HEAD, head.src_offset))
            .copied()
            .ok_or(Error::BadDirectory)?;
        if metadata.dst_length < 12 {
            return Err(Error::BadSize);
        }
        let adjustment = 0xB1B0_AFBA_u32.wrapping_sub(font_checksum);
        out.rewrite(metadata.dst_offset as usize + 8, &adjustment.to_be_bytes())?;
    }

    Ok(())
}

fn find(hdr: &Woff2Header, font_index: usize, tag: Tag) -> Option<&Table> {
    hdr.fonts[font_index]
        .table_indices
        .iter()
        .map(|&index| &hdr.tables[index as usize])
        .find(|table| table.tag == tag)
}

fn position<S: Sink>(out: &S) -> Result<u32> {
    u32::try_from(out.len()).map_err(|_| Error::ArithmeticOverflow)
}
