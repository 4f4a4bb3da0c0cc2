//! Serialization of datasets as NPY structured record streams
//!
//! The on-disk dispatch is a 6-byte magic prefix. Format 1 (`\x93NUMPY`) is
//! a version 1.0 NPY file holding a one-dimensional structured record array:
//! every column packed fixed-width, zipped with its dtype, records written
//! row-major. Format 2 (`\x94CSDAT`) is reserved and unimplemented.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::column::Column;
use crate::dataset::Dataset;
use crate::dtype::{DType, Field, Value};
use crate::error::{Error, Result};
use crate::store::ColumnData;

/// Magic prefix of the NPY array format
pub const ARRAY_MAGIC: [u8; 6] = [0x93, b'N', b'U', b'M', b'P', b'Y'];

/// Magic prefix of the reserved binary record format
pub const BINARY_MAGIC: [u8; 6] = [0x94, b'C', b'S', b'D', b'A', b'T'];

/// Serialization format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// NPY structured record array (load + save supported)
    Array,
    /// Reserved binary record stream (unimplemented)
    Binary,
}

impl Format {
    /// The 6-byte magic prefix identifying this format
    pub fn magic(self) -> [u8; 6] {
        match self {
            Format::Array => ARRAY_MAGIC,
            Format::Binary => BINARY_MAGIC,
        }
    }
}

/// Write a dataset to the stream in the given format
pub(crate) fn save<W: Write>(dataset: &Dataset, writer: W, format: Format) -> Result<()> {
    match format {
        Format::Array => save_array(dataset, writer),
        Format::Binary => Err(Error::UnsupportedFormat(
            "binary format (CSDAT) is reserved".to_string(),
        )),
    }
}

/// Read a dataset from the stream, dispatching on the magic prefix
///
/// The prefix is peeked: six bytes are read and the stream is rewound before
/// the matching codec consumes it from the start.
pub(crate) fn load<R: Read + Seek>(mut reader: R) -> Result<Dataset> {
    let start = reader.stream_position()?;
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(start))?;
    match magic {
        ARRAY_MAGIC => load_array(reader),
        BINARY_MAGIC => Err(Error::UnsupportedFormat(
            "binary format (CSDAT) is reserved".to_string(),
        )),
        other => Err(Error::UnsupportedFormat(format!(
            "unrecognized magic prefix {other:02x?}"
        ))),
    }
}

fn save_array<W: Write>(dataset: &Dataset, mut writer: W) -> Result<()> {
    let columns = dataset.columns();
    let packed: Vec<DType> = columns.iter().map(Column::packed_dtype).collect();
    let nrows = dataset.len();
    debug!(rows = nrows, cols = columns.len(), "saving array format");

    let descr: Vec<String> = columns
        .iter()
        .zip(&packed)
        .map(|(col, dtype)| format!("('{}', '{}')", col.name(), dtype.to_descr()))
        .collect();
    let mut header = format!(
        "{{'descr': [{}], 'fortran_order': False, 'shape': ({nrows},), }}",
        descr.join(", ")
    );
    // Version 1.0 layout: magic + 2 version bytes + u16 header length, then
    // the header padded with spaces to a 64-byte boundary, '\n'-terminated.
    let unpadded = ARRAY_MAGIC.len() + 2 + 2 + header.len() + 1;
    header.extend(std::iter::repeat(' ').take(unpadded.div_ceil(64) * 64 - unpadded));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| Error::InvalidArgument("NPY header too large".to_string()))?;

    writer.write_all(&ARRAY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;

    for idx in 0..nrows {
        for (col, &dtype) in columns.iter().zip(&packed) {
            encode_value(&col.get(idx)?, dtype, &mut writer)?;
        }
    }
    Ok(())
}

fn encode_value<W: Write>(value: &Value, dtype: DType, writer: &mut W) -> Result<()> {
    fn mismatch(value: &Value, dtype: DType) -> Error {
        Error::InvalidArgument(format!("cannot encode {value:?} as {dtype}"))
    }
    macro_rules! fixed {
        ($variant:ident) => {
            match value {
                Value::$variant(v) => writer.write_all(&v.to_le_bytes())?,
                _ => return Err(mismatch(value, dtype)),
            }
        };
    }
    match dtype {
        DType::U8 => fixed!(U8),
        DType::U16 => fixed!(U16),
        DType::U32 => fixed!(U32),
        DType::U64 => fixed!(U64),
        DType::I8 => fixed!(I8),
        DType::I16 => fixed!(I16),
        DType::I32 => fixed!(I32),
        DType::I64 => fixed!(I64),
        DType::F32 => fixed!(F32),
        DType::F64 => fixed!(F64),
        DType::Bool => match value {
            Value::Bool(v) => writer.write_all(&[u8::from(*v)])?,
            _ => return Err(mismatch(value, dtype)),
        },
        DType::FixedStr(width) => {
            let s = value.as_str().ok_or_else(|| mismatch(value, dtype))?;
            if s.len() > width {
                return Err(Error::InvalidArgument(format!(
                    "string '{s}' exceeds fixed width {width}"
                )));
            }
            writer.write_all(s.as_bytes())?;
            writer.write_all(&vec![0u8; width - s.len()])?;
        }
        DType::Str => {
            return Err(Error::UnsupportedFormat(
                "variable-length strings must be packed fixed-width".to_string(),
            ))
        }
    }
    Ok(())
}

fn load_array<R: Read>(mut reader: R) -> Result<Dataset> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if magic != ARRAY_MAGIC {
        return Err(Error::UnsupportedFormat(format!(
            "unrecognized magic prefix {magic:02x?}"
        )));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            usize::from(u16::from_le_bytes(len))
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => {
            return Err(Error::UnsupportedFormat(format!(
                "NPY version {v}.{} not supported",
                version[1]
            )))
        }
    };
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = std::str::from_utf8(&header)
        .map_err(|_| Error::InvalidArgument("NPY header is not valid UTF-8".to_string()))?;
    let parsed = HeaderParser::new(header).parse()?;
    if parsed.fortran_order {
        return Err(Error::UnsupportedFormat(
            "fortran-ordered arrays are not supported".to_string(),
        ));
    }
    let &[nrows] = parsed.shape.as_slice() else {
        return Err(Error::UnsupportedFormat(format!(
            "expected a 1-d record array, got shape {:?}",
            parsed.shape
        )));
    };

    let fields: Vec<Field> = parsed
        .descr
        .iter()
        .map(|(name, descr)| Ok(Field::new(name, DType::from_descr(descr)?)))
        .collect::<Result<_>>()?;
    let mut cols: Vec<ColumnData> = fields
        .iter()
        .map(|f| ColumnData::default_for(f.dtype, nrows))
        .collect();
    for idx in 0..nrows {
        for (field, col) in fields.iter().zip(&mut cols) {
            let value = decode_value(&mut reader, field.dtype)?;
            col.set(idx, &value)?;
        }
    }
    debug!(rows = nrows, cols = fields.len(), "loaded array format");
    Dataset::from_field_data(fields, cols, nrows)
}

fn decode_value<R: Read>(reader: &mut R, dtype: DType) -> Result<Value> {
    macro_rules! fixed {
        ($ty:ty, $variant:ident) => {{
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            reader.read_exact(&mut buf)?;
            Value::$variant(<$ty>::from_le_bytes(buf))
        }};
    }
    Ok(match dtype {
        DType::U8 => fixed!(u8, U8),
        DType::U16 => fixed!(u16, U16),
        DType::U32 => fixed!(u32, U32),
        DType::U64 => fixed!(u64, U64),
        DType::I8 => fixed!(i8, I8),
        DType::I16 => fixed!(i16, I16),
        DType::I32 => fixed!(i32, I32),
        DType::I64 => fixed!(i64, I64),
        DType::F32 => fixed!(f32, F32),
        DType::F64 => fixed!(f64, F64),
        DType::Bool => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            Value::Bool(buf[0] != 0)
        }
        DType::FixedStr(width) => {
            let mut buf = vec![0u8; width];
            reader.read_exact(&mut buf)?;
            let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            Value::Str(String::from_utf8_lossy(&buf[..end]).into_owned())
        }
        DType::Str => {
            return Err(Error::UnsupportedFormat(
                "object dtypes cannot be decoded".to_string(),
            ))
        }
    })
}

struct NpyHeader {
    descr: Vec<(String, String)>,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Minimal parser for the Python dict literal in an NPY header
struct HeaderParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderParser<'a> {
    fn new(header: &'a str) -> Self {
        Self {
            bytes: header.as_bytes(),
            pos: 0,
        }
    }

    fn malformed(&self, what: &str) -> Error {
        Error::InvalidArgument(format!("malformed NPY header at byte {}: {what}", self.pos))
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat_if(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, b: u8) -> Result<()> {
        if self.eat_if(b) {
            Ok(())
        } else {
            Err(self.malformed(&format!("expected '{}'", b as char)))
        }
    }

    fn parse_str(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q,
            _ => return Err(self.malformed("expected a quoted string")),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let s = std::str::from_utf8(&self.bytes[start..self.pos])
                    .map_err(|_| self.malformed("non-UTF-8 string"))?
                    .to_string();
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(self.malformed("unterminated string"))
    }

    fn parse_usize(&mut self) -> Result<usize> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.malformed("expected an integer"))
    }

    fn parse_bool(&mut self) -> Result<bool> {
        if self.bytes[self.pos..].starts_with(b"True") {
            self.pos += 4;
            Ok(true)
        } else if self.bytes[self.pos..].starts_with(b"False") {
            self.pos += 5;
            Ok(false)
        } else {
            Err(self.malformed("expected True or False"))
        }
    }

    fn parse_descr(&mut self) -> Result<Vec<(String, String)>> {
        self.skip_ws();
        if self.peek() != Some(b'[') {
            return Err(Error::UnsupportedFormat(
                "plain (non-record) arrays are not datasets".to_string(),
            ));
        }
        self.pos += 1;
        let mut descr = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_if(b']') {
                return Ok(descr);
            }
            self.eat(b'(')?;
            self.skip_ws();
            let name = self.parse_str()?;
            self.skip_ws();
            self.eat(b',')?;
            self.skip_ws();
            let dtype = self.parse_str()?;
            self.skip_ws();
            if self.eat_if(b',') {
                self.skip_ws();
                if self.peek() != Some(b')') {
                    return Err(Error::UnsupportedFormat(
                        "nested field shapes are not supported".to_string(),
                    ));
                }
            }
            self.eat(b')')?;
            self.skip_ws();
            self.eat_if(b',');
            descr.push((name, dtype));
        }
    }

    fn parse_shape(&mut self) -> Result<Vec<usize>> {
        self.skip_ws();
        self.eat(b'(')?;
        let mut shape = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_if(b')') {
                return Ok(shape);
            }
            shape.push(self.parse_usize()?);
            self.skip_ws();
            self.eat_if(b',');
        }
    }

    fn parse(mut self) -> Result<NpyHeader> {
        let mut descr = None;
        let mut fortran_order = false;
        let mut shape = None;
        self.skip_ws();
        self.eat(b'{')?;
        loop {
            self.skip_ws();
            if self.eat_if(b'}') {
                break;
            }
            let key = self.parse_str()?;
            self.skip_ws();
            self.eat(b':')?;
            self.skip_ws();
            match key.as_str() {
                "descr" => descr = Some(self.parse_descr()?),
                "fortran_order" => fortran_order = self.parse_bool()?,
                "shape" => shape = Some(self.parse_shape()?),
                other => return Err(self.malformed(&format!("unknown key '{other}'"))),
            }
            self.skip_ws();
            self.eat_if(b',');
        }
        Ok(NpyHeader {
            descr: descr.ok_or_else(|| self.malformed("missing 'descr'"))?,
            fortran_order,
            shape: shape.ok_or_else(|| self.malformed("missing 'shape'"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Dataset {
        Dataset::from_columns([
            ("uid", ColumnData::from(vec![1u64, 2, 3])),
            ("score", ColumnData::from(vec![0.25f64, 0.5, 0.75])),
            ("count", ColumnData::from(vec![-1i32, 0, 1])),
            ("ok", ColumnData::from(vec![true, false, true])),
            ("path", ColumnData::from(vec!["a.mrc", "", "dir/b.mrc"])),
        ])
        .unwrap()
    }

    #[test]
    fn array_round_trip() {
        let dset = sample();
        let mut buf = Vec::new();
        dset.save(&mut buf, Format::Array).unwrap();
        assert_eq!(&buf[..6], &ARRAY_MAGIC);

        let loaded = Dataset::load(Cursor::new(buf)).unwrap();
        assert_eq!(loaded, dset);
        // Variable strings come back packed fixed-width.
        assert_eq!(
            loaded.column("path").unwrap().dtype(),
            DType::FixedStr(9)
        );
    }

    #[test]
    fn file_round_trip() {
        let dset = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.npy");
        dset.save_file(&path, Format::Array).unwrap();
        let loaded = Dataset::load_file(&path).unwrap();
        assert_eq!(loaded, dset);
    }

    #[test]
    fn header_is_padded_and_newline_terminated() {
        let mut buf = Vec::new();
        sample().save(&mut buf, Format::Array).unwrap();
        let header_len = usize::from(u16::from_le_bytes([buf[8], buf[9]]));
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(buf[10 + header_len - 1], b'\n');
    }

    #[test]
    fn binary_format_is_reserved() {
        let dset = sample();
        let mut buf = Vec::new();
        assert!(matches!(
            dset.save(&mut buf, Format::Binary).unwrap_err(),
            Error::UnsupportedFormat(_)
        ));

        let mut framed = BINARY_MAGIC.to_vec();
        framed.extend_from_slice(b"rest of stream");
        assert!(matches!(
            Dataset::load(Cursor::new(framed)).unwrap_err(),
            Error::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let err = Dataset::load(Cursor::new(b"NOTNPY....".to_vec())).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn loads_hand_framed_header() {
        let header = "{'descr': [('uid', '<u8'), ('v', '|i1')], 'fortran_order': False, 'shape': (2,), }\n";
        let mut buf = ARRAY_MAGIC.to_vec();
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        for (uid, v) in [(7u64, -2i8), (8, 3)] {
            buf.extend_from_slice(&uid.to_le_bytes());
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let dset = Dataset::load(Cursor::new(buf)).unwrap();
        assert_eq!(dset.len(), 2);
        assert_eq!(dset.fields(false), vec!["uid", "v"]);
        assert_eq!(dset.column("v").unwrap().get(0).unwrap(), Value::I8(-2));
        assert_eq!(dset.row(1).uid().unwrap(), 8);
    }

    #[test]
    fn fortran_and_multidim_are_rejected() {
        for header in [
            "{'descr': [('a', '<u4')], 'fortran_order': True, 'shape': (2,), }",
            "{'descr': [('a', '<u4')], 'fortran_order': False, 'shape': (2, 2), }",
            "{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }",
        ] {
            let mut buf = ARRAY_MAGIC.to_vec();
            buf.extend_from_slice(&[1, 0]);
            buf.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
            buf.extend_from_slice(header.as_bytes());
            assert!(matches!(
                Dataset::load(Cursor::new(buf)).unwrap_err(),
                Error::UnsupportedFormat(_)
            ));
        }
    }

    #[test]
    fn uid_inserted_when_file_lacks_one() {
        let src = Dataset::from_columns([("x", ColumnData::from(vec![1u32, 2]))]).unwrap();
        src.drop_fields(&["uid"]).unwrap(); // uid itself is always kept
        assert!(src.contains("uid"));

        let header = "{'descr': [('x', '<u4')], 'fortran_order': False, 'shape': (1,), }\n";
        let mut buf = ARRAY_MAGIC.to_vec();
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        let dset = Dataset::load(Cursor::new(buf)).unwrap();
        assert_eq!(dset.fields(false), vec!["uid", "x"]);
    }
}
