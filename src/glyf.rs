//! Reconstruction of the `glyf` and `loca` tables from the transformed glyf
//! stream.
//!
//! The transform splits the table into seven sub-streams (contour counts,
//! point counts, triplet flags, coordinate/instruction-length data, composite
//! descriptors, bounding boxes, instructions). Inverting it means decoding
//! the per-point coordinate triplets, re-deriving bounding boxes where the
//! encoder dropped them, re-synthesizing the run-length-compressed flag and
//! coordinate arrays of each simple glyph, and rebuilding `loca` from the
//! resulting record offsets. The per-glyph `xMin` values are kept because the
//! `hmtx` transform reconstructs left side bearings from them.

use crate::sfnt::{FontInfo, TableMetadata};
use crate::stream::{Reader, Sink};
use crate::{checksum, Error, Result};

// simple glyph flags
const ON_CURVE: u8 = 1 << 0;
const X_SHORT: u8 = 1 << 1;
const Y_SHORT: u8 = 1 << 2;
const REPEAT: u8 = 1 << 3;
const THIS_X_IS_SAME: u8 = 1 << 4;
const THIS_Y_IS_SAME: u8 = 1 << 5;
const OVERLAP_SIMPLE: u8 = 1 << 6;

// composite glyph flags
const ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
const WE_HAVE_A_SCALE: u16 = 1 << 3;
const MORE_COMPONENTS: u16 = 1 << 5;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
const WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
const WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

// transformed-glyf option flags
const HAS_OVERLAP_BITMAP: u16 = 1 << 0;

// 98% of Google Fonts have no glyph above 5k bytes; the largest glyph ever
// observed was 72k bytes.
const DEFAULT_GLYPH_BUF: usize = 5120;

/// A decoded outline point with absolute coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Point {
    x: i32,
    y: i32,
    on_curve: bool,
}

/// Metadata of the emitted pair of tables.
pub(crate) struct GlyfTables {
    pub glyf: TableMetadata,
    pub loca: TableMetadata,
}

/// Rebuild `glyf` from its transformed form and emit it together with the
/// derived `loca` table.
///
/// `loca_dst_length` is the original loca length advertised by the WOFF2
/// directory; it must agree with the glyph count and index format declared
/// inside the transformed stream.
pub(crate) fn reconstruct<S: Sink>(
    data: &[u8],
    loca_dst_length: u32,
    info: &mut FontInfo,
    out: &mut S,
) -> Result<GlyfTables> {
    let glyf_start = out.len();

    let mut r = Reader::new(data);
    r.read::<u16>()?; // reserved
    let option_flags = r.read::<u16>()?;
    info.num_glyphs = r.read::<u16>()?;
    info.index_format = r.read::<u16>()?;
    let num_glyphs = usize::from(info.num_glyphs);

    let bytes_per_offset: u32 = if info.index_format != 0 { 4 } else { 2 };
    let expected_loca_length = bytes_per_offset * (u32::from(info.num_glyphs) + 1);
    if loca_dst_length != expected_loca_length {
        return Err(Error::BadTransform);
    }

    // The seven sub-streams follow the fixed header back to back; each
    // length must fit into what remains of the region.
    let mut offset = (2 + 7) * 4;
    if offset > data.len() {
        return Err(Error::Truncated);
    }
    let mut substreams: [&[u8]; 7] = [&[]; 7];
    for stream in &mut substreams {
        let size = r.read::<u32>()? as usize;
        if size > data.len() - offset {
            return Err(Error::BadSize);
        }
        *stream = &data[offset..offset + size];
        offset += size;
    }
    let mut n_contour_stream = Reader::new(substreams[0]);
    let mut n_points_stream = Reader::new(substreams[1]);
    let mut flag_stream = Reader::new(substreams[2]);
    let mut glyph_stream = Reader::new(substreams[3]);
    let mut composite_stream = Reader::new(substreams[4]);
    let mut bbox_stream = Reader::new(substreams[5]);
    let mut instruction_stream = Reader::new(substreams[6]);

    let mut overlap_bitmap = None;
    if option_flags & HAS_OVERLAP_BITMAP != 0 {
        let length = (num_glyphs + 7) >> 3;
        if length > data.len() - offset {
            return Err(Error::BadSize);
        }
        overlap_bitmap = Some(&data[offset..offset + length]);
    }

    // The bbox stream leads with a bitmap marking which glyphs carry an
    // explicit bounding box, padded to a 4-byte boundary.
    let bbox_bitmap = bbox_stream.tail();
    bbox_stream.skip(((num_glyphs + 31) >> 5) << 2)?;

    let mut loca_values = vec![0u32; num_glyphs + 1];
    let mut n_points_per_contour: Vec<u16> = Vec::new();
    let mut points: Vec<Point> = Vec::new();
    let mut glyph_buf: Vec<u8> = Vec::with_capacity(DEFAULT_GLYPH_BUF);
    let mut glyf_checksum: u32 = 0;

    info.x_mins = vec![0; num_glyphs];
    for i in 0..num_glyphs {
        glyph_buf.clear();
        let have_bbox = bbox_bitmap[i >> 3] & (0x80 >> (i & 7)) != 0;
        let n_contours = n_contour_stream.read::<u16>()?;

        if n_contours == 0xFFFF {
            // Composite glyphs must carry an explicit bounding box; nobody
            // decodes the component outlines to derive one.
            if !have_bbox {
                return Err(Error::BadGlyph);
            }

            let (composite_length, have_instructions) = composite_size(&composite_stream)?;
            let mut instruction_size = 0;
            if have_instructions {
                instruction_size = glyph_stream.read_packed_u16()?;
            }

            push_u16(&mut glyph_buf, n_contours);
            glyph_buf.extend_from_slice(bbox_stream.take(8)?);
            glyph_buf.extend_from_slice(composite_stream.take(composite_length)?);
            if have_instructions {
                push_u16(&mut glyph_buf, instruction_size);
                glyph_buf.extend_from_slice(instruction_stream.take(instruction_size as usize)?);
            }
        } else if n_contours > 0 {
            // simple glyph
            n_points_per_contour.clear();
            let mut total_points: u32 = 0;
            for _ in 0..n_contours {
                let n = n_points_stream.read_packed_u16()?;
                n_points_per_contour.push(n);
                total_points = total_points
                    .checked_add(u32::from(n))
                    .ok_or(Error::ArithmeticOverflow)?;
            }
            if total_points >= 1 << 27 {
                return Err(Error::BadGlyph);
            }
            let total_points = total_points as usize;

            let flags = flag_stream.tail().get(..total_points).ok_or(Error::Truncated)?;
            let triplet_bytes = triplet_decode(flags, glyph_stream.tail(), &mut points)?;
            flag_stream.skip(total_points)?;
            glyph_stream.skip(triplet_bytes)?;

            let instruction_size = glyph_stream.read_packed_u16()?;

            push_u16(&mut glyph_buf, n_contours);
            if have_bbox {
                glyph_buf.extend_from_slice(bbox_stream.take(8)?);
            } else {
                push_bbox(&mut glyph_buf, &points);
            }

            let mut end_point: i32 = -1;
            for &n in &n_points_per_contour {
                end_point += i32::from(n);
                if end_point >= 65536 {
                    return Err(Error::BadGlyph);
                }
                push_u16(&mut glyph_buf, end_point as u16);
            }

            push_u16(&mut glyph_buf, instruction_size);
            glyph_buf.extend_from_slice(instruction_stream.take(instruction_size as usize)?);

            let has_overlap_bit = overlap_bitmap
                .is_some_and(|bitmap| bitmap[i >> 3] & (0x80 >> (i & 7)) != 0);
            store_points(&points, has_overlap_bit, &mut glyph_buf);

            info.x_mins[i] = i16::from_be_bytes([glyph_buf[2], glyph_buf[3]]);
        } else {
            // An empty glyph emits nothing and must not claim a bbox.
            if have_bbox {
                log::warn!("empty glyph {i} has a bounding box");
                return Err(Error::BadGlyph);
            }
        }

        loca_values[i] = table_offset(out.len() - glyf_start)?;
        out.append(&glyph_buf)?;
        out.pad4()?;
        glyf_checksum = glyf_checksum.wrapping_add(checksum(&glyph_buf));
    }

    let glyf = TableMetadata {
        checksum: glyf_checksum,
        dst_offset: table_offset(glyf_start)?,
        dst_length: table_offset(out.len() - glyf_start)?,
    };

    // The final loca entry is the length of the glyph data table.
    loca_values[num_glyphs] = glyf.dst_length;
    let loca_start = out.len();
    let loca_checksum = store_loca(&loca_values, info.index_format, out)?;
    let loca = TableMetadata {
        checksum: loca_checksum,
        dst_offset: table_offset(loca_start)?,
        dst_length: table_offset(out.len() - loca_start)?,
    };

    Ok(GlyfTables { glyf, loca })
}

fn table_offset(offset: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::ArithmeticOverflow)
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_i16(buf: &mut Vec<u8>, value: i16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn with_sign(flag: u8, base: i32) -> i32 {
    if flag & 1 != 0 {
        base
    } else {
        -base
    }
}

/// Decode one coordinate triplet per flag byte from `data`, accumulating
/// absolute positions. Returns the number of data bytes consumed.
///
/// The high bit of a flag, inverted, is the on-curve bit; the low seven bits
/// select the delta encoding: 1 data byte below 84 (one axis, or both axes
/// packed in a nibble each), 2 below 120, 3 below 124 and 4 above.
fn triplet_decode(flags: &[u8], data: &[u8], points: &mut Vec<Point>) -> Result<usize> {
    points.clear();
    if flags.len() > data.len() {
        return Err(Error::Truncated);
    }

    let mut x: i32 = 0;
    let mut y: i32 = 0;
    let mut offset: usize = 0;

    for &flag in flags {
        let on_curve = flag >> 7 == 0;
        let flag = flag & 0x7F;
        let n_data_bytes = match flag {
            0..=83 => 1,
            84..=119 => 2,
            120..=123 => 3,
            _ => 4,
        };
        let end = offset.checked_add(n_data_bytes).ok_or(Error::ArithmeticOverflow)?;
        let b = data.get(offset..end).ok_or(Error::Truncated)?;
        offset = end;

        let (dx, dy) = if flag < 10 {
            (0, with_sign(flag, ((i32::from(flag) & 14) << 7) + i32::from(b[0])))
        } else if flag < 20 {
            (with_sign(flag, (((i32::from(flag) - 10) & 14) << 7) + i32::from(b[0])), 0)
        } else if flag < 84 {
            let base = i32::from(flag) - 20;
            let byte = i32::from(b[0]);
            (
                with_sign(flag, 1 + (base & 0x30) + (byte >> 4)),
                with_sign(flag >> 1, 1 + ((base & 0x0C) << 2) + (byte & 0x0F)),
            )
        } else if flag < 120 {
            let base = i32::from(flag) - 84;
            (
                with_sign(flag, 1 + ((base / 12) << 8) + i32::from(b[0])),
                with_sign(flag >> 1, 1 + (((base % 12) >> 2) << 8) + i32::from(b[1])),
            )
        } else if flag < 124 {
            let middle = i32::from(b[1]);
            (
                with_sign(flag, (i32::from(b[0]) << 4) + (middle >> 4)),
                with_sign(flag >> 1, ((middle & 0x0F) << 8) + i32::from(b[2])),
            )
        } else {
            (
                with_sign(flag, (i32::from(b[0]) << 8) + i32::from(b[1])),
                with_sign(flag >> 1, (i32::from(b[2]) << 8) + i32::from(b[3])),
            )
        };

        x = x.checked_add(dx).ok_or(Error::ArithmeticOverflow)?;
        y = y.checked_add(dy).ok_or(Error::ArithmeticOverflow)?;
        points.push(Point { x, y, on_curve });
    }

    Ok(offset)
}

/// Measure the composite record at the stream's cursor without consuming it,
/// and report whether any component carries instructions.
fn composite_size(composite_stream: &Reader) -> Result<(usize, bool)> {
    let mut r = composite_stream.clone();
    let start = r.offset();
    let mut have_instructions = false;

    let mut flags = MORE_COMPONENTS;
    while flags & MORE_COMPONENTS != 0 {
        flags = r.read::<u16>()?;
        have_instructions |= flags & WE_HAVE_INSTRUCTIONS != 0;

        let mut arg_size = 2; // glyph index
        if flags & ARG_1_AND_2_ARE_WORDS != 0 {
            arg_size += 4;
        } else {
            arg_size += 2;
        }
        if flags & WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        r.skip(arg_size)?;
    }

    Ok((r.offset() - start, have_instructions))
}

/// Derive the bounding box from the points and append it. All-zero for an
/// empty point list.
fn push_bbox(buf: &mut Vec<u8>, points: &[Point]) {
    let mut x_min = 0;
    let mut y_min = 0;
    let mut x_max = 0;
    let mut y_max = 0;

    if let Some(first) = points.first() {
        x_min = first.x;
        x_max = first.x;
        y_min = first.y;
        y_max = first.y;
    }
    for point in points.iter().skip(1) {
        x_min = x_min.min(point.x);
        x_max = x_max.max(point.x);
        y_min = y_min.min(point.y);
        y_max = y_max.max(point.y);
    }

    push_i16(buf, x_min as i16);
    push_i16(buf, y_min as i16);
    push_i16(buf, x_max as i16);
    push_i16(buf, y_max as i16);
}

/// Append the flag and coordinate arrays of a simple glyph.
///
/// Flags are run-length compressed: a repeated flag byte gets its repeat bit
/// set and a trailing counter byte. Deltas of zero emit no coordinate bytes,
/// short deltas one unsigned byte with the sign folded into the flag, and
/// anything else a signed word.
fn store_points(points: &[Point], has_overlap_bit: bool, buf: &mut Vec<u8>) {
    let mut last_flag = None;
    let mut last_flag_pos = 0;
    let mut repeat_count: u8 = 0;
    let mut last_x = 0;
    let mut last_y = 0;

    for (i, point) in points.iter().enumerate() {
        let mut flag = if point.on_curve { ON_CURVE } else { 0 };
        if has_overlap_bit && i == 0 {
            flag |= OVERLAP_SIMPLE;
        }

        let dx = point.x.wrapping_sub(last_x);
        let dy = point.y.wrapping_sub(last_y);
        if dx == 0 {
            flag |= THIS_X_IS_SAME;
        } else if dx > -256 && dx < 256 {
            flag |= X_SHORT | if dx > 0 { THIS_X_IS_SAME } else { 0 };
        }
        if dy == 0 {
            flag |= THIS_Y_IS_SAME;
        } else if dy > -256 && dy < 256 {
            flag |= Y_SHORT | if dy > 0 { THIS_Y_IS_SAME } else { 0 };
        }

        if last_flag == Some(flag) && repeat_count != 255 {
            buf[last_flag_pos] |= REPEAT;
            repeat_count += 1;
        } else {
            if repeat_count != 0 {
                buf.push(repeat_count);
            }
            last_flag_pos = buf.len();
            buf.push(flag);
            repeat_count = 0;
        }

        last_x = point.x;
        last_y = point.y;
        last_flag = Some(flag);
    }
    if repeat_count != 0 {
        buf.push(repeat_count);
    }

    let mut last_x = 0;
    for point in points {
        let dx = point.x.wrapping_sub(last_x);
        if dx == 0 {
            // no bytes
        } else if dx > -256 && dx < 256 {
            buf.push(dx.unsigned_abs() as u8);
        } else {
            push_i16(buf, dx as i16);
        }
        last_x = point.x;
    }

    let mut last_y = 0;
    for point in points {
        let dy = point.y.wrapping_sub(last_y);
        if dy == 0 {
            // no bytes
        } else if dy > -256 && dy < 256 {
            buf.push(dy.unsigned_abs() as u8);
        } else {
            push_i16(buf, dy as i16);
        }
        last_y = point.y;
    }
}

/// Emit the loca table in the declared index format. Short-format values are
/// halved; reconstruction keeps glyphs 4-byte aligned, so they are even.
fn store_loca<S: Sink>(loca_values: &[u32], index_format: u16, out: &mut S) -> Result<u32> {
    let entry_size = if index_format != 0 { 4 } else { 2 };
    let mut content = Vec::with_capacity(loca_values.len() * entry_size);
    for &value in loca_values {
        if index_format != 0 {
            content.extend_from_slice(&value.to_be_bytes());
        } else {
            content.extend_from_slice(&((value >> 1) as u16).to_be_bytes());
        }
    }

    let loca_checksum = checksum(&content);
    out.append(&content)?;
    Ok(loca_checksum)
}
