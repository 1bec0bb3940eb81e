//! DLOG file format (version 2)
//!
//! File structure:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Fixed header (16 bytes)                      │
//! │  MAGIC1 u32, MAGIC2 u32, VERSION u16,         │
//! │  number of Y axes u16, data offset u32        │
//! ├──────────────────────────────────────────────┤
//! │  Meta fields                                  │
//! │  [u16 len][u8 id][u8 index?][value] ...       │
//! │  u16 0 terminator, zero padding to 4 bytes    │
//! ├──────────────────────────────────────────────┤
//! │  Sample rows (bit-packed, byte aligned)       │
//! ├──────────────────────────────────────────────┤
//! │  Bookmark index: K records + terminator       │
//! │  (u32 sample position, u32 text offset)       │
//! ├──────────────────────────────────────────────┤
//! │  Bookmark text blob                           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte header values are little-endian. Sample values use the
//! per-axis [`DataType`]. Final duration, X step, data size and bookmark
//! count are written as placeholders and patched when the recording ends.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bookmark::Bookmark;

/// First magic word ("EEZ-")
pub const MAGIC1: u32 = 0x2D5A_4545;

/// Second magic word ("DLOG")
pub const MAGIC2: u32 = 0x474F_4C44;

/// Current file format version
pub const VERSION: u16 = 2;

/// Size of the fixed part of the header
pub const FIXED_HEADER_SIZE: usize = 16;

pub const MAX_COMMENT_LEN: usize = 128;
pub const MAX_LABEL_LEN: usize = 32;
pub const MAX_Y_AXES: usize = 18;
pub const MAX_CHANNELS: usize = 6;
pub const MAX_BOOKMARK_TEXT_LEN: usize = 25;

/// Bytes per bookmark index record (position u32 + text offset u32)
pub const BOOKMARK_INDEX_RECORD_SIZE: usize = 8;

mod field {
    pub const COMMENT: u8 = 1;
    pub const START_TIME: u8 = 2;
    pub const DURATION: u8 = 3;
    pub const VALIDITY_BIT: u8 = 4;
    pub const DATA_SIZE: u8 = 5;
    pub const BOOKMARKS_SIZE: u8 = 6;

    pub const X_UNIT: u8 = 10;
    pub const X_STEP: u8 = 11;
    pub const X_RANGE_MIN: u8 = 12;
    pub const X_RANGE_MAX: u8 = 13;
    pub const X_LABEL: u8 = 14;
    pub const X_SCALE_TYPE: u8 = 15;

    pub const Y_UNIT: u8 = 30;
    pub const Y_DATA_TYPE: u8 = 31;
    pub const Y_RANGE_MIN: u8 = 32;
    pub const Y_RANGE_MAX: u8 = 33;
    pub const Y_LABEL: u8 = 34;
    pub const Y_CHANNEL_INDEX: u8 = 35;
    pub const Y_SCALE_TYPE: u8 = 36;
    pub const Y_TRANSFORM_OFFSET: u8 = 37;
    pub const Y_TRANSFORM_SCALE: u8 = 38;

    pub const CHANNEL_MODULE_TYPE: u8 = 50;
    pub const CHANNEL_MODULE_REVISION: u8 = 51;

    /// Fields carrying an index byte after the id
    pub fn is_indexed(id: u8) -> bool {
        matches!(id, Y_UNIT..=Y_TRANSFORM_SCALE if id != Y_SCALE_TYPE)
            || matches!(id, CHANNEL_MODULE_TYPE | CHANNEL_MODULE_REVISION)
    }
}

// =============================================================================
// Axis metadata
// =============================================================================

/// Physical unit of an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Unit {
    None = 0,
    Volt = 1,
    Ampere = 2,
    Watt = 3,
    Second = 4,
    Joule = 5,
    Ohm = 6,
    Bit = 7,
    #[default]
    Unknown = 255,
}

impl Unit {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Unit::None,
            1 => Unit::Volt,
            2 => Unit::Ampere,
            3 => Unit::Watt,
            4 => Unit::Second,
            5 => Unit::Joule,
            6 => Unit::Ohm,
            7 => Unit::Bit,
            _ => Unit::Unknown,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Watt => "W",
            Unit::Second => "s",
            Unit::Joule => "J",
            Unit::Ohm => "Ω",
            Unit::None | Unit::Bit | Unit::Unknown => "",
        }
    }
}

/// On-disk encoding of one Y value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DataType {
    /// Single bit, packed with neighbouring bits
    Bit = 0,
    /// Signed 16-bit big-endian integer
    Int16Be = 4,
    /// Signed 24-bit big-endian integer
    Int24Be = 8,
    /// Little-endian IEEE 754 single
    #[default]
    Float = 19,
}

impl DataType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DataType::Bit),
            4 => Some(DataType::Int16Be),
            8 => Some(DataType::Int24Be),
            19 => Some(DataType::Float),
            _ => None,
        }
    }

    /// Byte width of a byte-aligned value (0 for bits)
    pub fn width(self) -> usize {
        match self {
            DataType::Bit => 0,
            DataType::Int16Be => 2,
            DataType::Int24Be => 3,
            DataType::Float => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Int16Be | DataType::Int24Be)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ScaleType {
    #[default]
    Linear = 0,
    Logarithmic = 1,
}

impl ScaleType {
    pub fn from_code(code: u8) -> Self {
        if code == 1 {
            ScaleType::Logarithmic
        } else {
            ScaleType::Linear
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// min < max (false for NaN bounds)
    pub fn is_valid(&self) -> bool {
        self.min < self.max
    }
}

impl Default for Range {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XAxis {
    pub unit: Unit,
    pub step: f32,
    pub scale_type: ScaleType,
    pub range: Range,
    pub label: String,
}

impl Default for XAxis {
    fn default() -> Self {
        Self {
            unit: Unit::Second,
            step: 1.0,
            scale_type: ScaleType::Linear,
            range: Range::default(),
            label: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YAxis {
    pub unit: Unit,
    pub data_type: DataType,
    pub range: Range,
    pub label: String,
    /// 0-based channel this axis was sampled from
    pub channel_index: Option<u8>,
    pub transform_offset: f64,
    pub transform_scale: f64,
}

impl Default for YAxis {
    fn default() -> Self {
        Self {
            unit: Unit::Unknown,
            data_type: DataType::Float,
            range: Range::default(),
            label: String::new(),
            channel_index: None,
            transform_offset: 0.0,
            transform_scale: 1.0,
        }
    }
}

impl YAxis {
    /// Convert a raw decoded value to its physical value
    pub fn physical(&self, raw: f64) -> f64 {
        if self.data_type.is_integer() {
            self.transform_offset + raw * self.transform_scale
        } else {
            raw
        }
    }
}

/// Hardware module fitted in a channel slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub module_type: u16,
    pub module_revision: u16,
}

// =============================================================================
// Header
// =============================================================================

/// Header fields rewritten when a recording is finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    FinalDuration,
    XAxisStep,
    DataSize,
    BookmarksSize,
}

/// Value for a [`PatchField`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaderPatch {
    FinalDuration(f64),
    XAxisStep(f32),
    DataSize(u32),
    BookmarksSize(u32),
}

impl HeaderPatch {
    pub fn field(&self) -> PatchField {
        match self {
            HeaderPatch::FinalDuration(_) => PatchField::FinalDuration,
            HeaderPatch::XAxisStep(_) => PatchField::XAxisStep,
            HeaderPatch::DataSize(_) => PatchField::DataSize,
            HeaderPatch::BookmarksSize(_) => PatchField::BookmarksSize,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            HeaderPatch::FinalDuration(v) => v.to_le_bytes().to_vec(),
            HeaderPatch::XAxisStep(v) => v.to_le_bytes().to_vec(),
            HeaderPatch::DataSize(v) | HeaderPatch::BookmarksSize(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Byte offsets of an encoded header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderLayout {
    /// Where the first sample row begins
    pub data_offset: u32,
    final_duration: u32,
    x_step: u32,
    data_size: u32,
    bookmarks_size: u32,
}

impl HeaderLayout {
    /// File offset of a patchable field's value
    pub fn offset(&self, field: PatchField) -> u32 {
        match field {
            PatchField::FinalDuration => self.final_duration,
            PatchField::XAxisStep => self.x_step,
            PatchField::DataSize => self.data_size,
            PatchField::BookmarksSize => self.bookmarks_size,
        }
    }
}

/// Everything stored before the sample body
#[derive(Debug, Clone, PartialEq)]
pub struct DlogHeader {
    pub version: u16,
    pub data_offset: u32,
    pub comment: String,
    /// Unix seconds
    pub start_time: u32,
    pub final_duration: f64,
    pub validity_bit: bool,
    /// Number of rows
    pub data_size: u32,
    /// Number of bookmarks
    pub bookmarks_size: u32,
    pub x_axis: XAxis,
    pub y_axes: Vec<YAxis>,
    pub y_scale: ScaleType,
    /// Keyed by 0-based channel index
    pub channels: BTreeMap<u8, ChannelInfo>,
}

impl Default for DlogHeader {
    fn default() -> Self {
        Self {
            version: VERSION,
            data_offset: 0,
            comment: String::new(),
            start_time: 0,
            final_duration: 0.0,
            validity_bit: false,
            data_size: 0,
            bookmarks_size: 0,
            x_axis: XAxis::default(),
            y_axes: Vec::new(),
            y_scale: ScaleType::Linear,
            channels: BTreeMap::new(),
        }
    }
}

impl DlogHeader {
    /// Layout of the sample rows described by this header
    pub fn row_layout(&self) -> RowLayout {
        RowLayout::new(self.validity_bit, self.y_axes.iter().map(|a| a.data_type))
    }

    /// Serialize header and meta fields.
    ///
    /// Text longer than its field limit is truncated. The returned bytes
    /// include the zero padding up to the data offset.
    pub fn encode(&self) -> (Vec<u8>, HeaderLayout) {
        let mut w = MetaWriter::default();
        w.buf.extend_from_slice(&MAGIC1.to_le_bytes());
        w.buf.extend_from_slice(&MAGIC2.to_le_bytes());
        w.buf.extend_from_slice(&VERSION.to_le_bytes());
        w.buf
            .extend_from_slice(&(self.y_axes.len().min(MAX_Y_AXES) as u16).to_le_bytes());
        w.buf.extend_from_slice(&0u32.to_le_bytes());

        let mut layout = HeaderLayout::default();

        w.string(field::COMMENT, None, &self.comment, MAX_COMMENT_LEN);
        w.field(field::START_TIME, None, &self.start_time.to_le_bytes());
        layout.final_duration =
            w.field(field::DURATION, None, &self.final_duration.to_le_bytes());
        w.field(field::VALIDITY_BIT, None, &[self.validity_bit as u8]);
        layout.data_size = w.field(field::DATA_SIZE, None, &self.data_size.to_le_bytes());
        layout.bookmarks_size =
            w.field(field::BOOKMARKS_SIZE, None, &self.bookmarks_size.to_le_bytes());

        let x = &self.x_axis;
        w.field(field::X_UNIT, None, &[x.unit.code()]);
        layout.x_step = w.field(field::X_STEP, None, &x.step.to_le_bytes());
        w.field(field::X_SCALE_TYPE, None, &[x.scale_type as u8]);
        w.field(field::X_RANGE_MIN, None, &x.range.min.to_le_bytes());
        w.field(field::X_RANGE_MAX, None, &x.range.max.to_le_bytes());
        w.string(field::X_LABEL, None, &x.label, MAX_LABEL_LEN);

        for (i, y) in self.y_axes.iter().take(MAX_Y_AXES).enumerate() {
            let index = Some(i as u8 + 1);
            w.field(field::Y_UNIT, index, &[y.unit.code()]);
            w.field(field::Y_DATA_TYPE, index, &[y.data_type.code()]);
            w.field(field::Y_RANGE_MIN, index, &y.range.min.to_le_bytes());
            w.field(field::Y_RANGE_MAX, index, &y.range.max.to_le_bytes());
            w.string(field::Y_LABEL, index, &y.label, MAX_LABEL_LEN);
            let channel = y.channel_index.map_or(0, |c| c + 1);
            w.field(field::Y_CHANNEL_INDEX, index, &[channel]);
            w.field(field::Y_TRANSFORM_OFFSET, index, &y.transform_offset.to_le_bytes());
            w.field(field::Y_TRANSFORM_SCALE, index, &y.transform_scale.to_le_bytes());
        }
        w.field(field::Y_SCALE_TYPE, None, &[self.y_scale as u8]);

        for (channel, info) in self.channels.iter() {
            if *channel as usize >= MAX_CHANNELS {
                continue;
            }
            let index = Some(channel + 1);
            w.field(field::CHANNEL_MODULE_TYPE, index, &info.module_type.to_le_bytes());
            w.field(field::CHANNEL_MODULE_REVISION, index, &info.module_revision.to_le_bytes());
        }

        w.buf.extend_from_slice(&0u16.to_le_bytes());

        let data_offset = w.buf.len().div_ceil(4) * 4;
        w.buf.resize(data_offset, 0);
        w.buf[12..16].copy_from_slice(&(data_offset as u32).to_le_bytes());
        layout.data_offset = data_offset as u32;

        (w.buf, layout)
    }

    /// Parse the fixed header; returns (number of Y axes, data offset)
    fn decode_fixed(bytes: &[u8]) -> Result<(u16, u32), FileFormatError> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(FileFormatError::TooShort);
        }
        if le_u32(&bytes[0..4]) != MAGIC1 || le_u32(&bytes[4..8]) != MAGIC2 {
            return Err(FileFormatError::InvalidMagic);
        }
        let version = le_u16(&bytes[8..10]);
        if version != VERSION {
            return Err(FileFormatError::UnsupportedVersion(version));
        }
        let num_y_axes = le_u16(&bytes[10..12]);
        let data_offset = le_u32(&bytes[12..16]);
        if (data_offset as usize) < FIXED_HEADER_SIZE + 2 {
            return Err(FileFormatError::InvalidHeader(format!(
                "data offset {} inside fixed header",
                data_offset
            )));
        }
        Ok((num_y_axes, data_offset))
    }

    /// Parse header and meta fields from the first `data_offset` bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, FileFormatError> {
        let (num_y_axes, data_offset) = Self::decode_fixed(bytes)?;
        let end = data_offset as usize;
        if bytes.len() < end {
            return Err(FileFormatError::TooShort);
        }
        if num_y_axes as usize > MAX_Y_AXES {
            return Err(FileFormatError::InvalidHeader(format!(
                "{} Y axes (max {})",
                num_y_axes, MAX_Y_AXES
            )));
        }

        let mut header = DlogHeader {
            data_offset,
            y_axes: vec![YAxis::default(); num_y_axes as usize],
            ..Default::default()
        };

        let mut pos = FIXED_HEADER_SIZE;
        while pos + 2 <= end {
            let len = le_u16(&bytes[pos..pos + 2]) as usize;
            if len == 0 {
                break;
            }
            if len < 3 || pos + len > end {
                return Err(FileFormatError::InvalidHeader(format!(
                    "field at {} overruns meta section",
                    pos
                )));
            }
            let id = bytes[pos + 2];
            let (index, value) = if field::is_indexed(id) {
                if len < 4 {
                    return Err(FileFormatError::InvalidHeader(format!(
                        "indexed field {} without index",
                        id
                    )));
                }
                (bytes[pos + 3], &bytes[pos + 4..pos + len])
            } else {
                (0, &bytes[pos + 3..pos + len])
            };
            header.apply_field(id, index, value)?;
            pos += len;
        }

        Ok(header)
    }

    fn apply_field(&mut self, id: u8, index: u8, value: &[u8]) -> Result<(), FileFormatError> {
        let need = |n: usize| -> Result<(), FileFormatError> {
            if value.len() < n {
                Err(FileFormatError::InvalidHeader(format!(
                    "field {} has {} bytes, expected {}",
                    id,
                    value.len(),
                    n
                )))
            } else {
                Ok(())
            }
        };

        match id {
            field::COMMENT => self.comment = String::from_utf8_lossy(value).into_owned(),
            field::START_TIME => {
                need(4)?;
                self.start_time = le_u32(value);
            }
            field::DURATION => {
                need(8)?;
                self.final_duration = le_f64(value);
            }
            field::VALIDITY_BIT => {
                need(1)?;
                self.validity_bit = value[0] != 0;
            }
            field::DATA_SIZE => {
                need(4)?;
                self.data_size = le_u32(value);
            }
            field::BOOKMARKS_SIZE => {
                need(4)?;
                self.bookmarks_size = le_u32(value);
            }
            field::X_UNIT => {
                need(1)?;
                self.x_axis.unit = Unit::from_code(value[0]);
            }
            field::X_STEP => {
                need(4)?;
                self.x_axis.step = le_f32(value);
            }
            field::X_RANGE_MIN => {
                need(4)?;
                self.x_axis.range.min = le_f32(value);
            }
            field::X_RANGE_MAX => {
                need(4)?;
                self.x_axis.range.max = le_f32(value);
            }
            field::X_LABEL => self.x_axis.label = String::from_utf8_lossy(value).into_owned(),
            field::X_SCALE_TYPE => {
                need(1)?;
                self.x_axis.scale_type = ScaleType::from_code(value[0]);
            }
            field::Y_SCALE_TYPE => {
                need(1)?;
                self.y_scale = ScaleType::from_code(value[0]);
            }
            field::Y_UNIT..=field::Y_TRANSFORM_SCALE => {
                // Index 0 addresses the shared default axis, which is not used
                if index == 0 {
                    return Ok(());
                }
                let Some(axis) = self.y_axes.get_mut(index as usize - 1) else {
                    return Err(FileFormatError::InvalidHeader(format!(
                        "Y axis index {} out of range",
                        index
                    )));
                };
                match id {
                    field::Y_UNIT => {
                        need(1)?;
                        axis.unit = Unit::from_code(value[0]);
                    }
                    field::Y_DATA_TYPE => {
                        need(1)?;
                        axis.data_type = DataType::from_code(value[0]).ok_or_else(|| {
                            FileFormatError::InvalidHeader(format!(
                                "unsupported data type {}",
                                value[0]
                            ))
                        })?;
                    }
                    field::Y_RANGE_MIN => {
                        need(4)?;
                        axis.range.min = le_f32(value);
                    }
                    field::Y_RANGE_MAX => {
                        need(4)?;
                        axis.range.max = le_f32(value);
                    }
                    field::Y_LABEL => axis.label = String::from_utf8_lossy(value).into_owned(),
                    field::Y_CHANNEL_INDEX => {
                        need(1)?;
                        axis.channel_index = value[0].checked_sub(1);
                    }
                    field::Y_TRANSFORM_OFFSET => {
                        need(8)?;
                        axis.transform_offset = le_f64(value);
                    }
                    field::Y_TRANSFORM_SCALE => {
                        need(8)?;
                        axis.transform_scale = le_f64(value);
                    }
                    _ => {}
                }
            }
            field::CHANNEL_MODULE_TYPE | field::CHANNEL_MODULE_REVISION => {
                need(2)?;
                let Some(channel) = index.checked_sub(1) else {
                    return Ok(());
                };
                let info = self.channels.entry(channel).or_default();
                if id == field::CHANNEL_MODULE_TYPE {
                    info.module_type = le_u16(value);
                } else {
                    info.module_revision = le_u16(value);
                }
            }
            // Unknown fields are skipped
            _ => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct MetaWriter {
    buf: Vec<u8>,
}

impl MetaWriter {
    /// Append one field; returns the file offset of its value
    fn field(&mut self, id: u8, index: Option<u8>, value: &[u8]) -> u32 {
        let len = 3 + index.map_or(0, |_| 1) + value.len();
        self.buf.extend_from_slice(&(len as u16).to_le_bytes());
        self.buf.push(id);
        if let Some(index) = index {
            self.buf.push(index);
        }
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(value);
        offset
    }

    fn string(&mut self, id: u8, index: Option<u8>, text: &str, max: usize) {
        self.field(id, index, truncate_utf8(text, max).as_bytes());
    }
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a char
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_f64(b: &[u8]) -> f64 {
    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

// =============================================================================
// Row layout
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Bit { byte: usize, mask: u8 },
    Bytes { offset: usize, data_type: DataType },
}

/// Position of every value inside one sample row.
///
/// Rows start byte aligned. Bits (the validity bit and bit-typed axes) pack
/// MSB first; a byte-aligned value closes any partial bit byte before it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    validity: Option<(usize, u8)>,
    slots: Vec<Slot>,
    row_size: usize,
}

/// One decoded row; values are raw (no transform applied)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub valid: bool,
    pub values: Vec<f64>,
}

impl RowLayout {
    pub fn new(validity_bit: bool, types: impl IntoIterator<Item = DataType>) -> Self {
        let mut byte = 0usize;
        let mut mask = 0x80u8;
        let mut pending = false;

        let validity = if validity_bit {
            Some(next_bit_slot(&mut byte, &mut mask, &mut pending))
        } else {
            None
        };

        let mut slots = Vec::new();
        for data_type in types {
            if data_type == DataType::Bit {
                let (b, m) = next_bit_slot(&mut byte, &mut mask, &mut pending);
                slots.push(Slot::Bit { byte: b, mask: m });
            } else {
                if pending {
                    byte += 1;
                    mask = 0x80;
                    pending = false;
                }
                slots.push(Slot::Bytes {
                    offset: byte,
                    data_type,
                });
                byte += data_type.width();
            }
        }
        if pending {
            byte += 1;
        }

        Self {
            validity,
            slots,
            row_size: byte,
        }
    }

    /// Bytes per row
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn num_values(&self) -> usize {
        self.slots.len()
    }

    /// Decode one row; `None` when `row` is shorter than a row
    pub fn decode(&self, row: &[u8]) -> Option<DecodedRow> {
        if row.len() < self.row_size {
            return None;
        }
        let valid = self
            .validity
            .map_or(true, |(byte, mask)| row[byte] & mask != 0);
        let values = self
            .slots
            .iter()
            .map(|slot| match *slot {
                Slot::Bit { byte, mask } => {
                    if row[byte] & mask != 0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                Slot::Bytes { offset, data_type } => decode_value(&row[offset..], data_type),
            })
            .collect();
        Some(DecodedRow { valid, values })
    }
}

/// Claim the next bit position, moving to a new byte after the LSB
fn next_bit_slot(byte: &mut usize, mask: &mut u8, pending: &mut bool) -> (usize, u8) {
    let slot = (*byte, *mask);
    if *mask == 1 {
        *byte += 1;
        *mask = 0x80;
        *pending = false;
    } else {
        *mask >>= 1;
        *pending = true;
    }
    slot
}

fn decode_value(b: &[u8], data_type: DataType) -> f64 {
    match data_type {
        DataType::Bit => (b[0] & 0x80 != 0) as u8 as f64,
        DataType::Int16Be => i16::from_be_bytes([b[0], b[1]]) as f64,
        DataType::Int24Be => {
            // Sign-extend through the top byte
            (i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8) as f64
        }
        DataType::Float => le_f32(b) as f64,
    }
}

// =============================================================================
// Reader
// =============================================================================

/// File format errors
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("Data too short to contain valid structure")]
    TooShort,

    #[error("Invalid file magic bytes")]
    InvalidMagic,

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads a DLOG file: header, sample rows and merged bookmarks
pub struct DlogFileReader<R> {
    reader: R,
    header: DlogHeader,
    layout: RowLayout,
    file_size: u64,
}

impl<R: Read + Seek> DlogFileReader<R> {
    /// Open a DLOG stream and parse its header
    pub fn new(mut reader: R) -> Result<Self, FileFormatError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut fixed = [0u8; FIXED_HEADER_SIZE];
        read_exact_or_short(&mut reader, &mut fixed)?;
        let (_, data_offset) = DlogHeader::decode_fixed(&fixed)?;

        let mut bytes = vec![0u8; data_offset as usize];
        reader.seek(SeekFrom::Start(0))?;
        read_exact_or_short(&mut reader, &mut bytes)?;
        let header = DlogHeader::decode(&bytes)?;
        let layout = header.row_layout();

        Ok(Self {
            reader,
            header,
            layout,
            file_size,
        })
    }

    pub fn header(&self) -> &DlogHeader {
        &self.header
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Rows in the file.
    ///
    /// A file that was never finalized has a zero data size; its row count
    /// is inferred from the file length.
    pub fn row_count(&self) -> u64 {
        if self.header.data_size > 0 || self.layout.row_size() == 0 {
            return self.header.data_size as u64;
        }
        self.file_size.saturating_sub(self.header.data_offset as u64)
            / self.layout.row_size() as u64
    }

    /// Read and decode every sample row
    pub fn read_rows(&mut self) -> Result<Vec<DecodedRow>, FileFormatError> {
        let count = self.row_count() as usize;
        let row_size = self.layout.row_size();
        let mut body = vec![0u8; count * row_size];
        self.reader
            .seek(SeekFrom::Start(self.header.data_offset as u64))?;
        read_exact_or_short(&mut self.reader, &mut body)?;

        Ok(body
            .chunks_exact(row_size.max(1))
            .take(count)
            .filter_map(|row| self.layout.decode(row))
            .collect())
    }

    /// Read the bookmarks merged after the sample body
    pub fn read_bookmarks(&mut self) -> Result<Vec<Bookmark>, FileFormatError> {
        let count = self.header.bookmarks_size as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let index_start = self.header.data_offset as u64
            + self.header.data_size as u64 * self.layout.row_size() as u64;
        let mut index = vec![0u8; (count + 1) * BOOKMARK_INDEX_RECORD_SIZE];
        self.reader.seek(SeekFrom::Start(index_start))?;
        read_exact_or_short(&mut self.reader, &mut index)?;

        let records: Vec<(u32, u32)> = index
            .chunks_exact(BOOKMARK_INDEX_RECORD_SIZE)
            .map(|r| (le_u32(&r[0..4]), le_u32(&r[4..8])))
            .collect();
        let text_len = records[count].1 as usize;

        let mut text = vec![0u8; text_len];
        read_exact_or_short(&mut self.reader, &mut text)?;

        let mut bookmarks = Vec::with_capacity(count);
        for pair in records.windows(2) {
            let (position, start) = pair[0];
            let end = pair[1].1;
            if start > end || end as usize > text_len {
                return Err(FileFormatError::InvalidHeader(format!(
                    "bookmark text range {}..{} outside blob of {}",
                    start, end, text_len
                )));
            }
            bookmarks.push(Bookmark {
                position,
                text_offset: start,
                text: String::from_utf8_lossy(&text[start as usize..end as usize]).into_owned(),
            });
        }
        Ok(bookmarks)
    }
}

fn read_exact_or_short<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FileFormatError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FileFormatError::TooShort
        } else {
            FileFormatError::Io(e)
        }
    })
}
