//! Reconstruction of a transformed `hmtx` table.
//!
//! The transform drops left side bearings that are equal to the glyph's
//! `xMin`: one flag bit covers the proportional part of the table, another
//! the monospaced tail. Omitted bearings are restored from the `xMin` values
//! harvested while rebuilding `glyf`.

use crate::sfnt::{FontInfo, TableMetadata};
use crate::stream::{Reader, Sink};
use crate::{checksum, Error, Result};

const PROPORTIONAL_LSBS_OMITTED: u8 = 1 << 0;
const MONOSPACE_LSBS_OMITTED: u8 = 1 << 1;

pub(crate) fn reconstruct<S: Sink>(
    data: &[u8],
    info: &FontInfo,
    out: &mut S,
) -> Result<TableMetadata> {
    let mut r = Reader::new(data);
    let flags = r.read::<u8>()?;

    if flags & !(PROPORTIONAL_LSBS_OMITTED | MONOSPACE_LSBS_OMITTED) != 0 {
        log::warn!("illegal hmtx flags; bits 2-7 must be zero");
        return Err(Error::BadTransform);
    }
    // A transform that omits nothing has no reason to exist, and one that
    // claims to omit both arrays at once is malformed.
    if flags == 0 || flags == (PROPORTIONAL_LSBS_OMITTED | MONOSPACE_LSBS_OMITTED) {
        return Err(Error::BadTransform);
    }

    let num_glyphs = usize::from(info.num_glyphs);
    let num_hmetrics = usize::from(info.num_hmetrics);

    // An hmtx without glyphs cannot be transformed, and at least one metric
    // is always required.
    if num_hmetrics > num_glyphs || num_hmetrics < 1 {
        return Err(Error::BadTransform);
    }
    if info.x_mins.len() != num_glyphs {
        return Err(Error::BadTransform);
    }

    let mut advances = Vec::with_capacity(num_hmetrics);
    for _ in 0..num_hmetrics {
        advances.push(r.read::<u16>()?);
    }

    let mut lsbs = Vec::with_capacity(num_glyphs);
    for i in 0..num_hmetrics {
        lsbs.push(if flags & PROPORTIONAL_LSBS_OMITTED != 0 {
            info.x_mins[i]
        } else {
            r.read::<i16>()?
        });
    }
    for i in num_hmetrics..num_glyphs {
        lsbs.push(if flags & MONOSPACE_LSBS_OMITTED != 0 {
            info.x_mins[i]
        } else {
            r.read::<i16>()?
        });
    }

    let mut table = Vec::with_capacity(2 * num_glyphs + 2 * num_hmetrics);
    for (i, &lsb) in lsbs.iter().enumerate() {
        if i < num_hmetrics {
            table.extend_from_slice(&advances[i].to_be_bytes());
        }
        table.extend_from_slice(&lsb.to_be_bytes());
    }

    let metadata = TableMetadata {
        checksum: checksum(&table),
        dst_offset: u32::try_from(out.len()).map_err(|_| Error::ArithmeticOverflow)?,
        dst_length: table.len() as u32,
    };
    out.append(&table)?;
    Ok(metadata)
}
