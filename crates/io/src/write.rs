use crate::header::PlyFormat;
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use pointstream_core::{unpack_rgb, PointCloud};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub format: PlyFormat,
    /// Store positions as `double` instead of `float`.
    pub double_precision: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            format: PlyFormat::BinaryLittleEndian,
            double_precision: true,
        }
    }
}

impl WriteOptions {
    pub fn new(format: PlyFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_double_precision(mut self, double_precision: bool) -> Self {
        self.double_precision = double_precision;
        self
    }
}

/// Write `cloud` to a PLY file.
///
/// Positions are always written; `red`/`green`/`blue` (uchar) and
/// `intensity` (float) follow when the cloud carries those channels.
pub fn write_ply(path: impl AsRef<Path>, cloud: &PointCloud, options: WriteOptions) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    write_ply_to(&mut w, cloud, options)?;
    w.flush()
}

pub fn write_ply_to<W: Write>(mut w: W, cloud: &PointCloud, options: WriteOptions) -> io::Result<()> {
    let scalar = if options.double_precision { "double" } else { "float" };

    writeln!(w, "ply")?;
    writeln!(w, "format {} 1.0", options.format)?;
    writeln!(w, "element vertex {}", cloud.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(w, "property {} {}", scalar, axis)?;
    }
    if cloud.has_colors() {
        w.write_all(b"property uchar red\n")?;
        w.write_all(b"property uchar green\n")?;
        w.write_all(b"property uchar blue\n")?;
    }
    if cloud.has_intensities() {
        w.write_all(b"property float intensity\n")?;
    }
    w.write_all(b"end_header\n")?;

    match options.format {
        PlyFormat::Ascii => write_ascii_body(&mut w, cloud, options.double_precision),
        PlyFormat::BinaryLittleEndian => write_binary_body::<LittleEndian, _>(&mut w, cloud, options.double_precision),
        PlyFormat::BinaryBigEndian => write_binary_body::<BigEndian, _>(&mut w, cloud, options.double_precision),
    }
}

fn write_ascii_body<W: Write>(w: &mut W, cloud: &PointCloud, double: bool) -> io::Result<()> {
    for i in 0..cloud.len() {
        let Some([x, y, z]) = cloud.point(i) else {
            break;
        };
        if double {
            write!(w, "{} {} {}", x, y, z)?;
        } else {
            write!(w, "{} {} {}", x as f32, y as f32, z as f32)?;
        }

        if let Some(colors) = cloud.colors() {
            let [r, g, b] = colors.get(i).map_or([0; 3], |&c| unpack_rgb(c));
            write!(w, " {} {} {}", r, g, b)?;
        }
        if let Some(intensity) = cloud.intensity(i) {
            write!(w, " {}", intensity as f32)?;
        }
        w.write_all(b"\n")?;
    }
    Ok(())
}

fn write_binary_body<B: ByteOrder, W: Write>(w: &mut W, cloud: &PointCloud, double: bool) -> io::Result<()> {
    for i in 0..cloud.len() {
        let Some(point) = cloud.point(i) else {
            break;
        };
        for v in point {
            if double {
                w.write_f64::<B>(v)?;
            } else {
                w.write_f32::<B>(v as f32)?;
            }
        }

        if let Some(colors) = cloud.colors() {
            let [r, g, b] = colors.get(i).map_or([0; 3], |&c| unpack_rgb(c));
            w.write_all(&[r, g, b])?;
        }
        if cloud.has_intensities() {
            w.write_f32::<B>(cloud.intensity(i).unwrap_or(0.0) as f32)?;
        }
    }
    Ok(())
}
