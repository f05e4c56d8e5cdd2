//! Mapping of vertex properties onto position, color and intensity channels,
//! and per-record decoding for both binary and ASCII bodies.

use crate::error::{PlyError, Result};
use crate::header::{Element, PropertyKind, ScalarType};
use byteorder::ByteOrder;
use pointstream_core::pack_rgb;

const COLOR_NAME_SETS: [[&str; 3]; 3] = [
    ["red", "green", "blue"],
    ["r", "g", "b"],
    ["diffuse_red", "diffuse_green", "diffuse_blue"],
];

const INTENSITY_NAMES: [&str; 3] = ["intensity", "scalar_intensity", "reflectance"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    index: usize,
    offset: usize,
    ty: ScalarType,
}

/// One decoded vertex record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedVertex {
    pub position: [f64; 3],
    pub color: Option<u32>,
    pub intensity: Option<f64>,
}

/// Resolved vertex layout: which properties feed which channel, and where
/// they sit inside a binary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    record_size: usize,
    property_count: usize,
    position: [Field; 3],
    color: Option<[Field; 3]>,
    intensity: Option<Field>,
}

impl VertexLayout {
    pub fn from_element(element: &Element, header_line: usize) -> Result<Self> {
        let mut offset = 0usize;
        let mut fields = Vec::with_capacity(element.properties.len());
        for (index, property) in element.properties.iter().enumerate() {
            let PropertyKind::Scalar(ty) = property.kind else {
                return Err(PlyError::header(
                    header_line,
                    format!("list property `{}` is not supported on vertices", property.name),
                ));
            };
            fields.push((property.name.as_str(), Field { index, offset, ty }));
            offset += ty.byte_size();
        }

        let find = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, field)| *field)
        };

        let position = match (find("x"), find("y"), find("z")) {
            (Some(x), Some(y), Some(z)) => [x, y, z],
            _ => {
                return Err(PlyError::header(
                    header_line,
                    "vertex element must declare x, y and z",
                ))
            }
        };

        let mut color = None;
        for names in COLOR_NAME_SETS {
            let found = names.map(|n| find(n));
            match found {
                [Some(r), Some(g), Some(b)] => {
                    color = Some([r, g, b]);
                    break;
                }
                [None, None, None] => {}
                _ => {
                    return Err(PlyError::header(
                        header_line,
                        format!("incomplete color channels; expected all of {:?}", names),
                    ))
                }
            }
        }

        let intensity = fields
            .iter()
            .find(|(n, _)| INTENSITY_NAMES.iter().any(|i| n.eq_ignore_ascii_case(i)))
            .map(|(_, field)| *field);

        Ok(Self {
            record_size: offset,
            property_count: fields.len(),
            position,
            color,
            intensity,
        })
    }

    /// Bytes per binary record.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn property_count(&self) -> usize {
        self.property_count
    }

    pub fn has_colors(&self) -> bool {
        self.color.is_some()
    }

    pub fn has_intensity(&self) -> bool {
        self.intensity.is_some()
    }

    /// Decode one binary record. `record` must be exactly
    /// [`record_size`](Self::record_size) bytes.
    pub fn decode_binary<B: ByteOrder>(&self, record: &[u8]) -> DecodedVertex {
        let read = |field: &Field| read_scalar::<B>(field.ty, &record[field.offset..]);
        DecodedVertex {
            position: self.position.each_ref().map(read),
            color: self.color.as_ref().map(|rgb| {
                let [r, g, b] = rgb.each_ref().map(|f| color_channel(f.ty, read(f)));
                pack_rgb(r, g, b)
            }),
            intensity: self.intensity.as_ref().map(read),
        }
    }

    /// Decode one whitespace-separated ASCII record. Values beyond the
    /// declared property count are ignored.
    pub fn decode_ascii(&self, line: &str) -> std::result::Result<DecodedVertex, String> {
        let mut values = [0.0f64; 7];
        let wanted = self.wanted_slots();
        let mut seen = 0usize;
        for (index, token) in line.split_whitespace().take(self.property_count).enumerate() {
            seen += 1;
            if let Some(slot) = wanted.iter().position(|w| *w == Some(index)) {
                let value: f64 = token
                    .parse()
                    .map_err(|_| format!("cannot parse `{}` as a number", token))?;
                values[slot] = value;
            }
        }
        if seen < self.property_count {
            return Err(format!(
                "expected {} values, found {}",
                self.property_count, seen
            ));
        }

        let narrow = |field: &Field, value: f64| match field.ty {
            ScalarType::Float32 => value as f32 as f64,
            ScalarType::Float64 => value,
            _ => value.trunc(),
        };
        let position = [
            narrow(&self.position[0], values[0]),
            narrow(&self.position[1], values[1]),
            narrow(&self.position[2], values[2]),
        ];
        let color = self.color.as_ref().map(|[r, g, b]| {
            pack_rgb(
                color_channel(r.ty, values[3]),
                color_channel(g.ty, values[4]),
                color_channel(b.ty, values[5]),
            )
        });
        let intensity = self.intensity.as_ref().map(|f| narrow(f, values[6]));

        Ok(DecodedVertex {
            position,
            color,
            intensity,
        })
    }

    /// Property indices for the slots `[x, y, z, r, g, b, intensity]`.
    fn wanted_slots(&self) -> [Option<usize>; 7] {
        let color = self.color.map(|c| c.map(|f| f.index));
        [
            Some(self.position[0].index),
            Some(self.position[1].index),
            Some(self.position[2].index),
            color.map(|c| c[0]),
            color.map(|c| c[1]),
            color.map(|c| c[2]),
            self.intensity.map(|f| f.index),
        ]
    }
}

fn read_scalar<B: ByteOrder>(ty: ScalarType, bytes: &[u8]) -> f64 {
    match ty {
        ScalarType::Int8 => bytes[0] as i8 as f64,
        ScalarType::UInt8 => bytes[0] as f64,
        ScalarType::Int16 => B::read_i16(bytes) as f64,
        ScalarType::UInt16 => B::read_u16(bytes) as f64,
        ScalarType::Int32 => B::read_i32(bytes) as f64,
        ScalarType::UInt32 => B::read_u32(bytes) as f64,
        ScalarType::Float32 => B::read_f32(bytes) as f64,
        ScalarType::Float64 => B::read_f64(bytes),
    }
}

/// Convert a raw channel value to 8 bits. 16-bit integers are shifted down,
/// floats are treated as normalized `[0, 1]`, everything else is clamped.
fn color_channel(ty: ScalarType, value: f64) -> u8 {
    let scaled = match ty {
        ScalarType::Int16 | ScalarType::UInt16 => value / 256.0,
        ScalarType::Float32 | ScalarType::Float64 => (value * 255.0).round(),
        _ => value,
    };
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::{color_channel, VertexLayout};
    use crate::error::PlyError;
    use crate::header::{Element, Property, PropertyKind, ScalarType};
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    fn element(props: &[(&str, ScalarType)]) -> Element {
        Element {
            name: "vertex".to_string(),
            count: 1,
            properties: props
                .iter()
                .map(|(name, ty)| Property {
                    name: name.to_string(),
                    kind: PropertyKind::Scalar(*ty),
                })
                .collect(),
            defect: None,
        }
    }

    #[test]
    fn finds_channels_and_offsets() {
        use ScalarType::*;
        let layout = VertexLayout::from_element(
            &element(&[
                ("nx", Float32),
                ("x", Float64),
                ("y", Float64),
                ("z", Float64),
                ("diffuse_red", UInt8),
                ("diffuse_green", UInt8),
                ("diffuse_blue", UInt8),
                ("Reflectance", Float32),
            ]),
            5,
        )
        .unwrap();
        assert_eq!(layout.record_size(), 4 + 24 + 3 + 4);
        assert!(layout.has_colors());
        assert!(layout.has_intensity());
    }

    #[test]
    fn missing_position_is_malformed() {
        let err = VertexLayout::from_element(&element(&[("x", ScalarType::Float32)]), 3).unwrap_err();
        assert!(matches!(err, PlyError::MalformedHeader { line: 3, .. }));
    }

    #[test]
    fn partial_color_set_is_malformed() {
        use ScalarType::*;
        let err = VertexLayout::from_element(
            &element(&[("x", Float32), ("y", Float32), ("z", Float32), ("red", UInt8), ("green", UInt8)]),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, PlyError::MalformedHeader { .. }));
    }

    #[test]
    fn binary_decode_respects_byte_order() {
        use ScalarType::*;
        let layout = VertexLayout::from_element(
            &element(&[("x", Float32), ("y", Int16), ("z", Float64), ("intensity", UInt16)]),
            1,
        )
        .unwrap();

        let mut le = vec![0u8; layout.record_size()];
        LittleEndian::write_f32(&mut le[0..], 1.5);
        LittleEndian::write_i16(&mut le[4..], -7);
        LittleEndian::write_f64(&mut le[6..], 2.25);
        LittleEndian::write_u16(&mut le[14..], 900);

        let mut be = vec![0u8; layout.record_size()];
        BigEndian::write_f32(&mut be[0..], 1.5);
        BigEndian::write_i16(&mut be[4..], -7);
        BigEndian::write_f64(&mut be[6..], 2.25);
        BigEndian::write_u16(&mut be[14..], 900);

        let a = layout.decode_binary::<LittleEndian>(&le);
        let b = layout.decode_binary::<BigEndian>(&be);
        assert_eq!(a, b);
        assert_eq!(a.position, [1.5, -7.0, 2.25]);
        assert_eq!(a.intensity, Some(900.0));
        assert_eq!(a.color, None);
    }

    #[test]
    fn ascii_decode_picks_declared_columns() {
        use ScalarType::*;
        let layout = VertexLayout::from_element(
            &element(&[("z", Float64), ("x", Float64), ("y", Float64), ("r", UInt8), ("g", UInt8), ("b", UInt8)]),
            1,
        )
        .unwrap();
        let v = layout.decode_ascii("3 1 2 255 128 0 trailing").unwrap();
        assert_eq!(v.position, [1.0, 2.0, 3.0]);
        assert_eq!(v.color, Some(0xFF8000));

        assert!(layout.decode_ascii("3 1 2 255").is_err());
        assert!(layout.decode_ascii("3 one 2 255 128 0").is_err());
    }

    #[test]
    fn ascii_float32_matches_binary_precision() {
        use ScalarType::*;
        let layout =
            VertexLayout::from_element(&element(&[("x", Float32), ("y", Float32), ("z", Float32)]), 1).unwrap();
        let v = layout.decode_ascii("0.1 0.2 0.3").unwrap();
        assert_eq!(v.position[0], 0.1f32 as f64);
    }

    #[test]
    fn channel_conversion() {
        assert_eq!(color_channel(ScalarType::UInt8, 200.0), 200);
        assert_eq!(color_channel(ScalarType::UInt16, 65535.0), 255);
        assert_eq!(color_channel(ScalarType::UInt16, 256.0), 1);
        assert_eq!(color_channel(ScalarType::Float32, 1.0), 255);
        assert_eq!(color_channel(ScalarType::Float32, 0.5), 128);
        assert_eq!(color_channel(ScalarType::Int32, 999.0), 255);
        assert_eq!(color_channel(ScalarType::Int8, -5.0), 0);
    }
}
