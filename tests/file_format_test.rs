//! E2E tests for the DLOG file format (write → read → verify)
//!
//! Rows are generated from seeded random numbers and packed by hand with the
//! on-disk rules: bits MSB first, byte-aligned values close a partial bit
//! byte, floats little-endian, integers big-endian.

use std::collections::BTreeMap;
use std::io::Cursor;

use dlog_recorder::recorder::{
    ChannelInfo, DataType, DlogFileReader, DlogHeader, FileFormatError, HeaderLayout,
    HeaderPatch, Range, Unit, XAxis, YAxis, BOOKMARK_INDEX_RECORD_SIZE,
};
use rand::prelude::*;
use rand::rngs::StdRng;

/// Bit cursor inside the row being packed
struct BitCursor {
    cur: u8,
    mask: u8,
    pending: bool,
}

impl BitCursor {
    fn push(&mut self, out: &mut Vec<u8>, bit: bool) {
        if bit {
            self.cur |= self.mask;
        }
        if self.mask == 1 {
            out.push(self.cur);
            self.cur = 0;
            self.mask = 0x80;
            self.pending = false;
        } else {
            self.mask >>= 1;
            self.pending = true;
        }
    }

    fn close(&mut self, out: &mut Vec<u8>) {
        if self.pending {
            out.push(self.cur);
            self.cur = 0;
            self.mask = 0x80;
            self.pending = false;
        }
    }
}

/// Pack one row the way the recorder writes it
fn encode_row(validity: Option<bool>, cells: &[(DataType, f64)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut bits = BitCursor {
        cur: 0,
        mask: 0x80,
        pending: false,
    };

    if let Some(valid) = validity {
        bits.push(&mut out, valid);
    }
    for &(data_type, value) in cells {
        if data_type == DataType::Bit {
            bits.push(&mut out, value != 0.0);
            continue;
        }
        bits.close(&mut out);
        match data_type {
            DataType::Float => out.extend_from_slice(&(value as f32).to_le_bytes()),
            DataType::Int16Be => out.extend_from_slice(&(value as i16).to_be_bytes()),
            DataType::Int24Be => out.extend_from_slice(&(value as i32).to_be_bytes()[1..]),
            DataType::Bit => unreachable!(),
        }
    }
    bits.close(&mut out);
    out
}

fn random_cell(rng: &mut StdRng, data_type: DataType) -> f64 {
    match data_type {
        DataType::Bit => rng.gen_range(0..2) as f64,
        // Exactly representable in f32
        DataType::Float => rng.gen_range(-100_000i32..100_000) as f64 / 8.0,
        DataType::Int16Be => rng.gen::<i16>() as f64,
        DataType::Int24Be => rng.gen_range(-(1 << 23)..(1 << 23)) as f64,
    }
}

fn axis(label: &str, data_type: DataType, unit: Unit) -> YAxis {
    YAxis {
        unit,
        data_type,
        range: Range::new(0.0, 10.0),
        label: label.to_string(),
        ..Default::default()
    }
}

fn mixed_header() -> DlogHeader {
    let mut channels = BTreeMap::new();
    channels.insert(
        0,
        ChannelInfo {
            module_type: 0x5053,
            module_revision: 3,
        },
    );
    DlogHeader {
        comment: "mixed layout".to_string(),
        start_time: 1_700_000_000,
        validity_bit: true,
        x_axis: XAxis {
            step: 0.25,
            range: Range::new(0.0, 60.0),
            ..Default::default()
        },
        y_axes: vec![
            axis("DIN1.0", DataType::Bit, Unit::None),
            YAxis {
                channel_index: Some(0),
                ..axis("U1", DataType::Float, Unit::Volt)
            },
            axis("DIN1.1", DataType::Bit, Unit::None),
            axis("DIN1.2", DataType::Bit, Unit::None),
            YAxis {
                transform_offset: 1.5,
                transform_scale: 0.001,
                ..axis("raw16", DataType::Int16Be, Unit::Ampere)
            },
            axis("raw24", DataType::Int24Be, Unit::Watt),
        ],
        channels,
        ..Default::default()
    }
}

fn apply_patch(bytes: &mut [u8], layout: &HeaderLayout, patch: HeaderPatch) {
    let offset = layout.offset(patch.field()) as usize;
    let value = patch.to_bytes();
    bytes[offset..offset + value.len()].copy_from_slice(&value);
}

struct Generated {
    file: Vec<u8>,
    rows: Vec<(bool, Vec<f64>)>,
    layout: HeaderLayout,
}

/// Header followed by `count` random rows; the data size stays a placeholder
fn generate(header: &DlogHeader, count: usize, seed: u64) -> Generated {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut file, layout) = header.encode();
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let valid = !header.validity_bit || rng.gen_bool(0.9);
        let cells: Vec<(DataType, f64)> = header
            .y_axes
            .iter()
            .map(|y| (y.data_type, random_cell(&mut rng, y.data_type)))
            .collect();
        let validity = header.validity_bit.then_some(valid);
        file.extend_from_slice(&encode_row(validity, &cells));
        rows.push((valid, cells.into_iter().map(|(_, v)| v).collect()));
    }
    Generated { file, rows, layout }
}

// =============================================================================
// Header
// =============================================================================

#[test]
fn test_header_survives_reader() {
    let header = mixed_header();
    let (bytes, layout) = header.encode();
    assert_eq!(bytes.len(), layout.data_offset as usize);

    let reader = DlogFileReader::new(Cursor::new(bytes)).unwrap();
    let read = reader.header();
    assert_eq!(read.comment, header.comment);
    assert_eq!(read.start_time, header.start_time);
    assert!(read.validity_bit);
    assert_eq!(read.x_axis, header.x_axis);
    assert_eq!(read.y_axes, header.y_axes);
    assert_eq!(read.channels, header.channels);
    assert_eq!(read.data_offset, layout.data_offset);
    assert_eq!(reader.row_count(), 0);
}

#[test]
fn test_header_patches_are_visible() {
    let header = mixed_header();
    let mut generated = generate(&header, 12, 7);
    let layout = generated.layout;
    apply_patch(&mut generated.file, &layout, HeaderPatch::FinalDuration(2.75));
    apply_patch(&mut generated.file, &layout, HeaderPatch::XAxisStep(0.25));
    apply_patch(&mut generated.file, &layout, HeaderPatch::DataSize(12));

    let reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    assert_eq!(reader.header().final_duration, 2.75);
    assert_eq!(reader.header().x_axis.step, 0.25);
    assert_eq!(reader.header().data_size, 12);
    assert_eq!(reader.row_count(), 12);
}

#[test]
fn test_reader_rejects_garbage() {
    let mut bytes = mixed_header().encode().0;
    bytes[0] ^= 0xFF;
    assert!(matches!(
        DlogFileReader::new(Cursor::new(bytes)),
        Err(FileFormatError::InvalidMagic)
    ));
    assert!(matches!(
        DlogFileReader::new(Cursor::new(vec![0u8; 4])),
        Err(FileFormatError::TooShort)
    ));
}

// =============================================================================
// Rows
// =============================================================================

#[test]
fn test_mixed_rows_random() {
    let header = mixed_header();
    let generated = generate(&header, 500, 42);

    let mut reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    assert_eq!(reader.layout().row_size(), 1 + 4 + 1 + 2 + 3);
    let rows = reader.read_rows().unwrap();
    assert_eq!(rows.len(), generated.rows.len());
    for (i, (row, (valid, values))) in rows.iter().zip(&generated.rows).enumerate() {
        assert_eq!(row.valid, *valid, "validity mismatch at row {}", i);
        assert_eq!(&row.values, values, "value mismatch at row {}", i);
    }
}

#[test]
fn test_unfinalized_file_infers_rows_and_ignores_partial_tail() {
    let header = DlogHeader {
        y_axes: vec![
            axis("U1", DataType::Float, Unit::Volt),
            axis("I1", DataType::Float, Unit::Ampere),
        ],
        ..Default::default()
    };
    let mut generated = generate(&header, 37, 3);
    // Power lost in the middle of a row
    generated.file.extend_from_slice(&[0xAB, 0xCD, 0xEF]);

    let mut reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    assert_eq!(reader.header().data_size, 0);
    assert_eq!(reader.row_count(), 37);
    let rows = reader.read_rows().unwrap();
    assert_eq!(rows.len(), 37);
    assert_eq!(rows[36].values, generated.rows[36].1);
}

#[test]
fn test_integer_axes_apply_transform() {
    let header = mixed_header();
    let generated = generate(&header, 20, 11);
    let mut reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    let rows = reader.read_rows().unwrap();

    let raw16 = &header.y_axes[4];
    for (row, (_, values)) in rows.iter().zip(&generated.rows) {
        let physical = raw16.physical(row.values[4]);
        assert!((physical - (1.5 + values[4] * 0.001)).abs() < 1e-9);
        // Floats are never transformed
        assert_eq!(header.y_axes[1].physical(row.values[1]), values[1]);
    }
}

// =============================================================================
// Bookmarks
// =============================================================================

#[test]
fn test_bookmarks_after_rows() {
    let header = DlogHeader {
        y_axes: vec![axis("U1", DataType::Float, Unit::Volt)],
        ..Default::default()
    };
    let mut generated = generate(&header, 10, 5);
    let layout = generated.layout;
    apply_patch(&mut generated.file, &layout, HeaderPatch::DataSize(10));
    apply_patch(&mut generated.file, &layout, HeaderPatch::BookmarksSize(3));

    let marks = [(0u32, "begin"), (4, "load step"), (10, "end")];
    let mut text = Vec::new();
    for (position, label) in marks {
        generated.file.extend_from_slice(&position.to_le_bytes());
        generated
            .file
            .extend_from_slice(&(text.len() as u32).to_le_bytes());
        text.extend_from_slice(label.as_bytes());
    }
    generated.file.extend_from_slice(&0u32.to_le_bytes());
    generated
        .file
        .extend_from_slice(&(text.len() as u32).to_le_bytes());
    generated.file.extend_from_slice(&text);

    let mut reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    assert_eq!(reader.read_rows().unwrap().len(), 10);
    let bookmarks = reader.read_bookmarks().unwrap();
    assert_eq!(bookmarks.len(), 3);
    for (b, (position, label)) in bookmarks.iter().zip(marks) {
        assert_eq!(b.position, position);
        assert_eq!(b.text, label);
    }
    assert_eq!(bookmarks[1].text_offset, 5);
}

#[test]
fn test_bookmark_index_out_of_range_is_rejected() {
    let header = DlogHeader {
        y_axes: vec![axis("U1", DataType::Float, Unit::Volt)],
        ..Default::default()
    };
    let mut generated = generate(&header, 1, 1);
    let layout = generated.layout;
    apply_patch(&mut generated.file, &layout, HeaderPatch::DataSize(1));
    apply_patch(&mut generated.file, &layout, HeaderPatch::BookmarksSize(1));

    let mut index = vec![0u8; 2 * BOOKMARK_INDEX_RECORD_SIZE];
    index[4..8].copy_from_slice(&9u32.to_le_bytes());
    index[12..16].copy_from_slice(&2u32.to_le_bytes());
    generated.file.extend_from_slice(&index);
    generated.file.extend_from_slice(b"ok");

    let mut reader = DlogFileReader::new(Cursor::new(generated.file)).unwrap();
    assert!(matches!(
        reader.read_bookmarks(),
        Err(FileFormatError::InvalidHeader(_))
    ));
}
