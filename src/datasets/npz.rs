use std::{fs::File, io::Read, path::Path};

use anyhow::Result;
use zip::ZipArchive;

use super::{CsrMatrix, DatasetError};

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq)]
pub enum NpyData {
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Fixed-width byte strings (`|S<n>`), kept as the raw payload.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: NpyData,
}
impl NpyArray {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            NpyData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            NpyData::I64(v) => v.iter().map(|&x| x as f32).collect(),
            NpyData::U32(v) => v.iter().map(|&x| x as f32).collect(),
            NpyData::U8(v) => v.iter().map(|&x| x as f32).collect(),
            NpyData::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
            NpyData::F32(v) => v.clone(),
            NpyData::F64(v) => v.iter().map(|&x| x as f32).collect(),
            NpyData::Bytes(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
    /// Integer view of the array; fails on negative entries and on floats
    /// with a fractional part.
    pub fn to_usize_vec(&self, name: &str) -> Result<Vec<usize>> {
        let bad = |reason: &str| DatasetError::UnsupportedArray {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };
        let out = match &self.data {
            NpyData::I32(v) => v
                .iter()
                .map(|&x| usize::try_from(x).map_err(|_| bad("negative index")))
                .collect::<Result<Vec<_>, _>>()?,
            NpyData::I64(v) => v
                .iter()
                .map(|&x| usize::try_from(x).map_err(|_| bad("negative index")))
                .collect::<Result<Vec<_>, _>>()?,
            NpyData::U32(v) => v.iter().map(|&x| x as usize).collect(),
            NpyData::U8(v) => v.iter().map(|&x| x as usize).collect(),
            NpyData::Bool(v) => v.iter().map(|&x| x as usize).collect(),
            NpyData::F32(v) => v
                .iter()
                .map(|&x| float_to_index(x as f64).ok_or_else(|| bad("non-integral value")))
                .collect::<Result<Vec<_>, _>>()?,
            NpyData::F64(v) => v
                .iter()
                .map(|&x| float_to_index(x).ok_or_else(|| bad("non-integral value")))
                .collect::<Result<Vec<_>, _>>()?,
            NpyData::Bytes(_) => return Err(bad("byte strings are not integers").into()),
        };
        Ok(out)
    }
}

fn float_to_index(x: f64) -> Option<usize> {
    (x >= 0.0 && x.fract() == 0.0).then_some(x as usize)
}

struct Header {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(&format!("'{}'", key))? + key.len() + 2;
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(|c| c == ',' || c == '}')?
    };
    Some(rest[..end].trim())
}

fn parse_header(name: &str, header: &str) -> Result<Header> {
    let bad = |reason: &str| DatasetError::UnsupportedArray {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    let descr = dict_value(header, "descr")
        .ok_or_else(|| bad("missing descr"))?
        .trim_matches(|c| c == '\'' || c == '"')
        .to_owned();
    let fortran_order = dict_value(header, "fortran_order").ok_or_else(|| bad("missing fortran_order"))? == "True";
    let shape = dict_value(header, "shape")
        .ok_or_else(|| bad("missing shape"))?
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad("malformed shape"))?;
    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

fn decode<const N: usize, T>(bytes: &[u8], f: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|c| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(c);
            f(buf)
        })
        .collect()
}

/// Parses a single `.npy` payload.
///
/// `candle_core::Tensor::read_npz` only knows the dtypes candle can hold, so
/// the `<i4` CSR indices and the `|S3` format entry of scipy archives go
/// through this reader instead. Only little-endian, C-ordered numeric and
/// byte-string arrays are accepted.
pub fn parse_npy(name: &str, bytes: &[u8]) -> Result<NpyArray> {
    let bad = |reason: &str| DatasetError::UnsupportedArray {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(bad("not an npy file").into());
    }
    let (header_len, offset) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(bad("unsupported npy version").into()),
    };
    let body_start = offset + header_len;
    if bytes.len() < body_start {
        return Err(bad("truncated header").into());
    }
    let header = std::str::from_utf8(&bytes[offset..body_start]).map_err(|_| bad("non-utf8 header"))?;
    let header = parse_header(name, header)?;
    if header.fortran_order && header.shape.len() > 1 {
        return Err(bad("fortran order").into());
    }

    let count: usize = header.shape.iter().product();
    let body = &bytes[body_start..];
    let descr = header.descr.as_str();
    if descr.starts_with('>') {
        return Err(bad("big-endian data").into());
    }
    let kind = descr.trim_start_matches(|c| c == '<' || c == '|' || c == '=');
    let width = match kind {
        "b1" | "u1" => 1,
        "i4" | "u4" | "f4" => 4,
        "i8" | "f8" => 8,
        s if s.starts_with('S') => s[1..].parse::<usize>().map_err(|_| bad("malformed byte string"))?,
        _ => return Err(bad(&format!("dtype {}", descr)).into()),
    };
    let body = body
        .get(..count * width)
        .ok_or_else(|| bad("truncated data"))?;

    let data = match kind {
        "b1" => NpyData::Bool(body.iter().map(|&b| b != 0).collect()),
        "u1" => NpyData::U8(body.to_vec()),
        "i4" => NpyData::I32(decode(body, i32::from_le_bytes)),
        "u4" => NpyData::U32(decode(body, u32::from_le_bytes)),
        "f4" => NpyData::F32(decode(body, f32::from_le_bytes)),
        "i8" => NpyData::I64(decode(body, i64::from_le_bytes)),
        "f8" => NpyData::F64(decode(body, f64::from_le_bytes)),
        _ => NpyData::Bytes(body.to_vec()),
    };
    Ok(NpyArray {
        shape: header.shape,
        data,
    })
}

/// Lazily reads named arrays out of an `.npz` archive.
pub struct NpzReader {
    archive: ZipArchive<File>,
}
impl NpzReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let archive = ZipArchive::new(File::open(path.as_ref())?)?;
        Ok(Self { archive })
    }
    pub fn contains(&self, name: &str) -> bool {
        let entry = format!("{}.npy", name);
        self.archive.file_names().any(|n| n == entry)
    }
    pub fn read(&mut self, name: &str) -> Result<NpyArray> {
        let entry = format!("{}.npy", name);
        let mut file = match self.archive.by_name(&entry) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(DatasetError::MissingArray(name.to_owned()).into())
            }
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        parse_npy(name, &bytes)
    }
    /// Reads a CSR matrix stored as `{prefix}_data`, `{prefix}_indices`,
    /// `{prefix}_indptr` and `{prefix}_shape`.
    pub fn read_csr(&mut self, prefix: &str) -> Result<CsrMatrix> {
        self.read_csr_parts(
            &format!("{}_data", prefix),
            &format!("{}_indices", prefix),
            &format!("{}_indptr", prefix),
            &format!("{}_shape", prefix),
        )
    }
    /// Reads a matrix written by `scipy.sparse.save_npz`.
    pub fn read_scipy_csr(&mut self) -> Result<CsrMatrix> {
        if self.contains("format") {
            let format = self.read("format")?;
            let is_csr = match &format.data {
                NpyData::Bytes(b) => b.split(|&c| c == 0).next() == Some(b"csr".as_slice()),
                _ => false,
            };
            if !is_csr {
                return Err(DatasetError::MalformedSparse("expected csr format".to_owned()).into());
            }
        }
        self.read_csr_parts("data", "indices", "indptr", "shape")
    }
    fn read_csr_parts(&mut self, data: &str, indices: &str, indptr: &str, shape: &str) -> Result<CsrMatrix> {
        let data = self.read(data)?.to_f32_vec();
        let indices = self
            .read(indices)?
            .to_usize_vec(indices)?
            .into_iter()
            .map(|i| i as u32)
            .collect();
        let indptr = self.read(indptr)?.to_usize_vec(indptr)?;
        let shape = self.read(shape)?.to_usize_vec(shape)?;
        if shape.len() != 2 {
            return Err(DatasetError::MalformedSparse(format!("shape has {} dims", shape.len())).into());
        }
        CsrMatrix::new(shape[0], shape[1], indptr, indices, data)
    }
}
