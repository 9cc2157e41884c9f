//! MetaIO (mhd/mha) codec glue
//!
//! Minimal reader and writer for the MetaIO format used as the canonical
//! volumetric output. Only uncompressed, little-endian element data is
//! handled; anything else is reported as an error and left to the caller.
//!
//! See: <https://itk.org/Wiki/MetaIO/Documentation>

use crate::error::{Result, VoxconvError};
use crate::models::{PixelBuffer, PixelData, SourceImage};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const MAX_HEADER_LINES: usize = 64;
const MAX_HEADER_LINE_LEN: usize = 1024;

/// Parsed MetaIO header fields
#[derive(Debug, Clone)]
pub struct MetaHeader {
    pub ndims: usize,
    /// Axis sizes as written, fastest axis first
    pub dim_size: Vec<usize>,
    pub element_type: String,
    pub channels: usize,
    pub element_spacing: Option<Vec<f64>>,
    pub offset: Option<Vec<f64>>,
    /// Row-major direction cosines, `ndims * ndims` values
    pub transform_matrix: Option<Vec<f64>>,
    pub element_data_file: String,
    pub compressed: bool,
    pub byte_order_msb: bool,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    /// Byte offset where LOCAL element data starts
    pub data_offset: usize,
}

impl MetaHeader {
    /// Whether the element data is embedded in the header file
    pub fn is_local(&self) -> bool {
        self.element_data_file == "LOCAL"
    }
}

fn parse_usizes(value: &str) -> Result<Vec<usize>> {
    value
        .split_whitespace()
        .map(|t| {
            t.parse::<usize>()
                .map_err(|e| VoxconvError::MetaIo(format!("invalid integer `{}`: {}", t, e)))
        })
        .collect()
}

fn parse_f64s(value: &str) -> Result<Vec<f64>> {
    value
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| VoxconvError::MetaIo(format!("invalid number `{}`: {}", t, e)))
        })
        .collect()
}

/// Parses a MetaIO header, stopping at the `ElementDataFile` key
///
/// Files that do not start with `ObjectType = Image`, or whose leading bytes
/// do not look like `Key = Value` ASCII lines, are rejected quickly; the
/// MetaIO builder uses this as its format probe.
///
/// # Errors
///
/// Returns an error for unreadable files, non-MetaIO content and headers
/// missing `NDims`, `DimSize`, `ElementType` or `ElementDataFile`.
pub fn parse_header(path: &Path) -> Result<MetaHeader> {
    let mut reader = BufReader::new(fs::File::open(path)?);

    let mut ndims = None;
    let mut dim_size = None;
    let mut element_type = None;
    let mut channels = 1usize;
    let mut element_spacing = None;
    let mut offset = None;
    let mut transform_matrix = None;
    let mut element_data_file = None;
    let mut compressed = false;
    let mut byte_order_msb = false;
    let mut window_center = None;
    let mut window_width = None;

    let mut data_offset = 0usize;
    let mut line = Vec::new();
    for line_no in 0.. {
        if line_no >= MAX_HEADER_LINES {
            return Err(VoxconvError::MetaIo(
                "header does not terminate with ElementDataFile".to_string(),
            ));
        }
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 || n > MAX_HEADER_LINE_LEN {
            return Err(VoxconvError::MetaIo("not a MetaIO header".to_string()));
        }
        data_offset += n;

        let text = std::str::from_utf8(&line)
            .map_err(|_| VoxconvError::MetaIo("not a MetaIO header".to_string()))?;
        let (key, value) = text
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| VoxconvError::MetaIo("not a MetaIO header".to_string()))?;

        if line_no == 0 && (key != "ObjectType" || value != "Image") {
            return Err(VoxconvError::MetaIo("not a MetaIO image".to_string()));
        }

        match key {
            "NDims" => ndims = Some(parse_usizes(value)?.first().copied().unwrap_or(0)),
            "DimSize" => dim_size = Some(parse_usizes(value)?),
            "ElementType" => element_type = Some(value.to_string()),
            "ElementNumberOfChannels" => {
                channels = parse_usizes(value)?.first().copied().unwrap_or(1)
            }
            "ElementSpacing" => element_spacing = Some(parse_f64s(value)?),
            "Offset" | "Origin" | "Position" => offset = Some(parse_f64s(value)?),
            "TransformMatrix" | "Orientation" | "Rotation" => {
                transform_matrix = Some(parse_f64s(value)?)
            }
            "CompressedData" => compressed = value.eq_ignore_ascii_case("true"),
            "BinaryDataByteOrderMSB" | "ElementByteOrderMSB" => {
                byte_order_msb = value.eq_ignore_ascii_case("true")
            }
            "WindowCenter" => window_center = parse_f64s(value)?.first().copied(),
            "WindowWidth" => window_width = parse_f64s(value)?.first().copied(),
            "ElementDataFile" => {
                element_data_file = Some(value.to_string());
                break;
            }
            _ => {}
        }
    }

    let ndims = ndims.ok_or_else(|| VoxconvError::MetaIo("missing NDims".to_string()))?;
    let dim_size = dim_size.ok_or_else(|| VoxconvError::MetaIo("missing DimSize".to_string()))?;
    if dim_size.len() != ndims {
        return Err(VoxconvError::MetaIo(format!(
            "DimSize holds {} values but NDims is {}",
            dim_size.len(),
            ndims
        )));
    }

    Ok(MetaHeader {
        ndims,
        dim_size,
        element_type: element_type
            .ok_or_else(|| VoxconvError::MetaIo("missing ElementType".to_string()))?,
        channels,
        element_spacing,
        offset,
        transform_matrix,
        element_data_file: element_data_file
            .ok_or_else(|| VoxconvError::MetaIo("missing ElementDataFile".to_string()))?,
        compressed,
        byte_order_msb,
        window_center,
        window_width,
        data_offset,
    })
}

fn element_size(element_type: &str) -> Result<usize> {
    match element_type {
        "MET_UCHAR" => Ok(1),
        "MET_SHORT" | "MET_USHORT" => Ok(2),
        "MET_INT" | "MET_FLOAT" => Ok(4),
        other => Err(VoxconvError::MetaIo(format!(
            "unsupported element type {}",
            other
        ))),
    }
}

fn decode_buffer(header: &MetaHeader, bytes: &[u8]) -> Result<PixelBuffer> {
    fn chunks<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
        bytes.chunks_exact(N).map(|c| {
            let mut a = [0u8; N];
            a.copy_from_slice(c);
            a
        })
    }

    match (header.element_type.as_str(), header.channels) {
        ("MET_UCHAR", 1) => Ok(PixelBuffer::U8(bytes.to_vec())),
        ("MET_UCHAR", 3) => Ok(PixelBuffer::Rgb8(bytes.to_vec())),
        ("MET_SHORT", 1) => Ok(PixelBuffer::I16(
            chunks::<2>(bytes).map(i16::from_le_bytes).collect(),
        )),
        ("MET_USHORT", 1) => Ok(PixelBuffer::U16(
            chunks::<2>(bytes).map(u16::from_le_bytes).collect(),
        )),
        ("MET_INT", 1) => Ok(PixelBuffer::I32(
            chunks::<4>(bytes).map(i32::from_le_bytes).collect(),
        )),
        ("MET_FLOAT", 1) => Ok(PixelBuffer::F32(
            chunks::<4>(bytes).map(f32::from_le_bytes).collect(),
        )),
        (ty, ch) => Err(VoxconvError::MetaIo(format!(
            "unsupported element type {} with {} channels",
            ty, ch
        ))),
    }
}

/// Reads a MetaIO image (header plus element data)
///
/// For `.mhd` headers the referenced data file is resolved relative to the
/// header's directory.
///
/// # Errors
///
/// Returns an error for compressed or big-endian element data, data-file
/// lists, unsupported element types and size mismatches.
pub fn read_image(header_path: &Path) -> Result<(MetaHeader, PixelData)> {
    let header = parse_header(header_path)?;

    if header.compressed {
        return Err(VoxconvError::MetaIo(
            "compressed element data is not supported".to_string(),
        ));
    }
    if header.byte_order_msb {
        return Err(VoxconvError::MetaIo(
            "big-endian element data is not supported".to_string(),
        ));
    }
    if header.element_data_file == "LIST" || header.element_data_file.contains('%') {
        return Err(VoxconvError::MetaIo(
            "element data file lists are not supported".to_string(),
        ));
    }

    let bytes = if header.is_local() {
        let all = fs::read(header_path)?;
        all[header.data_offset.min(all.len())..].to_vec()
    } else {
        let data_path = data_file_path(header_path, &header.element_data_file)?;
        fs::read(data_path)?
    };

    let elements: usize = header.dim_size.iter().product();
    let expected = elements * element_size(&header.element_type)? * header.channels;
    if bytes.len() < expected {
        return Err(VoxconvError::MetaIo(format!(
            "element data truncated: expected {} bytes, found {}",
            expected,
            bytes.len()
        )));
    }

    let buffer = decode_buffer(&header, &bytes[..expected])?;
    // MetaIO writes the fastest axis first; internal shape is slowest first
    let shape: Vec<usize> = header.dim_size.iter().rev().copied().collect();
    let pixels = PixelData::new(shape, buffer)?;

    Ok((header, pixels))
}

/// Resolves an `ElementDataFile` reference against the header's directory
///
/// # Errors
///
/// Returns an error when the reference is absolute or escapes the header's
/// directory via parent components.
pub fn data_file_path(header_path: &Path, reference: &str) -> Result<PathBuf> {
    let reference = Path::new(reference);
    if reference.is_absolute()
        || reference
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(VoxconvError::MetaIo(
            "ElementDataFile references a file outside the input directory".to_string(),
        ));
    }
    let parent = header_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(reference))
}

fn met_type(buffer: &PixelBuffer) -> &'static str {
    match buffer {
        PixelBuffer::U8(_) | PixelBuffer::Rgb8(_) => "MET_UCHAR",
        PixelBuffer::I16(_) => "MET_SHORT",
        PixelBuffer::U16(_) => "MET_USHORT",
        PixelBuffer::I32(_) => "MET_INT",
        PixelBuffer::F32(_) => "MET_FLOAT",
    }
}

fn buffer_le_bytes(buffer: &PixelBuffer) -> Vec<u8> {
    match buffer {
        PixelBuffer::U8(v) => v.clone(),
        PixelBuffer::Rgb8(v) => v.clone(),
        PixelBuffer::I16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PixelBuffer::U16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PixelBuffer::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        PixelBuffer::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
    }
}

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity matrix extended with the image direction cosines in the top-left
fn transform_matrix(image: &SourceImage, ndims: usize) -> Vec<f64> {
    let mut matrix = vec![0.0; ndims * ndims];
    for i in 0..ndims {
        matrix[i * ndims + i] = 1.0;
    }
    if ndims >= 3 {
        if let Some(direction) = image.direction {
            for (row, cosines) in direction.iter().enumerate() {
                for (col, value) in cosines.iter().enumerate() {
                    matrix[row * ndims + col] = *value;
                }
            }
        }
    }
    matrix
}

/// Writes a produced image as an uncompressed local-data `.mha` file
///
/// # Errors
///
/// Returns an error when the target file cannot be written.
pub fn write_mha(image: &SourceImage, path: &Path) -> Result<()> {
    let shape = image.pixels.shape();
    let ndims = shape.len();

    // Pad spacing/offset out to the image dimensionality; the temporal axis
    // gets dummy values, matching how 4-D volumes are conventionally stored
    let spacing3 = image.spacing.unwrap_or([1.0, 1.0, 1.0]);
    let mut spacing: Vec<f64> = spacing3[..ndims.min(3)].to_vec();
    let origin3 = image.origin.unwrap_or([0.0, 0.0, 0.0]);
    let mut offset: Vec<f64> = origin3[..ndims.min(3)].to_vec();
    while spacing.len() < ndims {
        spacing.push(1.0);
        offset.push(0.0);
    }

    let dim_size: Vec<usize> = shape.iter().rev().copied().collect();
    let buffer = image.pixels.buffer();

    let mut writer = BufWriter::new(fs::File::create(path)?);
    writeln!(writer, "ObjectType = Image")?;
    writeln!(writer, "NDims = {}", ndims)?;
    writeln!(writer, "BinaryData = True")?;
    writeln!(writer, "BinaryDataByteOrderMSB = False")?;
    writeln!(writer, "CompressedData = False")?;
    writeln!(
        writer,
        "TransformMatrix = {}",
        join_numbers(&transform_matrix(image, ndims))
    )?;
    writeln!(writer, "Offset = {}", join_numbers(&offset))?;
    writeln!(writer, "ElementSpacing = {}", join_numbers(&spacing))?;
    writeln!(
        writer,
        "DimSize = {}",
        dim_size
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    )?;
    if buffer.components() > 1 {
        writeln!(writer, "ElementNumberOfChannels = {}", buffer.components())?;
    }
    if let Some(center) = image.window_center {
        writeln!(writer, "WindowCenter = {}", center)?;
    }
    if let Some(width) = image.window_width {
        writeln!(writer, "WindowWidth = {}", width)?;
    }
    writeln!(writer, "ElementType = {}", met_type(buffer))?;
    writeln!(writer, "ElementDataFile = LOCAL")?;
    writer.write_all(&buffer_le_bytes(buffer))?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn volume() -> SourceImage {
        SourceImage {
            name: "volume".to_string(),
            pixels: PixelData::new(
                vec![2, 2, 3],
                PixelBuffer::I16((0i16..12).map(|v| v * 10).collect()),
            )
            .unwrap(),
            spacing: Some([0.5, 0.5, 2.0]),
            origin: Some([1.0, 2.0, 3.0]),
            direction: None,
            window_center: Some(40.0),
            window_width: Some(400.0),
            timepoints: None,
            segments: None,
            consumed_files: BTreeSet::new(),
        }
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        write_mha(&volume(), &path).unwrap();

        let (header, pixels) = read_image(&path).unwrap();
        assert_eq!(header.ndims, 3);
        assert_eq!(header.dim_size, vec![3, 2, 2]);
        assert_eq!(header.element_type, "MET_SHORT");
        assert!(header.is_local());
        assert_eq!(header.element_spacing, Some(vec![0.5, 0.5, 2.0]));
        assert_eq!(header.window_center, Some(40.0));
        assert_eq!(pixels, volume().pixels);
    }

    #[test]
    fn test_parse_header_rejects_non_metaio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just some text\nwith lines\n").unwrap();
        assert!(parse_header(&path).is_err());
    }

    #[test]
    fn test_parse_header_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, [0u8, 159, 146, 150, 10, 255, 0]).unwrap();
        assert!(parse_header(&path).is_err());
    }

    #[test]
    fn test_read_rejects_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("z.mha");
        fs::write(
            &path,
            "ObjectType = Image\nNDims = 2\nDimSize = 1 1\nElementType = MET_UCHAR\nCompressedData = True\nElementDataFile = LOCAL\n\0",
        )
        .unwrap();
        let err = read_image(&path).unwrap_err();
        assert!(format!("{}", err).contains("compressed"));
    }

    #[test]
    fn test_data_file_path_containment() {
        let header = Path::new("/data/in/image.mhd");
        assert!(data_file_path(header, "image.raw").is_ok());
        assert!(data_file_path(header, "../escape.raw").is_err());
        assert!(data_file_path(header, "/etc/passwd").is_err());
    }

    #[test]
    fn test_read_truncated_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.mha");
        fs::write(
            &path,
            "ObjectType = Image\nNDims = 2\nDimSize = 4 4\nElementType = MET_USHORT\nElementDataFile = LOCAL\n\0\0",
        )
        .unwrap();
        let err = read_image(&path).unwrap_err();
        assert!(format!("{}", err).contains("truncated"));
    }
}
