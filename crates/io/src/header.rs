use crate::error::{PlyError, Result};
use std::fmt;
use std::io::{BufRead, Read};

/// Upper bound on header size; anything larger is treated as corrupt.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    pub fn keyword(self) -> &'static str {
        match self {
            PlyFormat::Ascii => "ascii",
            PlyFormat::BinaryLittleEndian => "binary_little_endian",
            PlyFormat::BinaryBigEndian => "binary_big_endian",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "ascii" => Some(PlyFormat::Ascii),
            "binary_little_endian" => Some(PlyFormat::BinaryLittleEndian),
            "binary_big_endian" => Some(PlyFormat::BinaryBigEndian),
            _ => None,
        }
    }

    pub fn is_binary(self) -> bool {
        self != PlyFormat::Ascii
    }
}

impl fmt::Display for PlyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Scalar property type. Both the classic names (`uchar`, `float`) and the
/// sized aliases (`uint8`, `float32`) are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "char" | "int8" => ScalarType::Int8,
            "uchar" | "uint8" => ScalarType::UInt8,
            "short" | "int16" => ScalarType::Int16,
            "ushort" | "uint16" => ScalarType::UInt16,
            "int" | "int32" => ScalarType::Int32,
            "uint" | "uint32" => ScalarType::UInt32,
            "float" | "float32" => ScalarType::Float32,
            "double" | "float64" => ScalarType::Float64,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Int8 => "char",
            ScalarType::UInt8 => "uchar",
            ScalarType::Int16 => "short",
            ScalarType::UInt16 => "ushort",
            ScalarType::Int32 => "int",
            ScalarType::UInt32 => "uint",
            ScalarType::Float32 => "float",
            ScalarType::Float64 => "double",
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

/// An `element` block and its properties.
///
/// Elements other than `vertex` are kept only so their body bytes can be
/// skipped. `defect` records why a non-vertex declaration could not be
/// understood; that only matters if the element precedes the vertex data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub count: u64,
    pub properties: Vec<Property>,
    pub defect: Option<String>,
}

impl Element {
    pub fn is_vertex(&self) -> bool {
        self.name == "vertex"
    }

    /// Byte size of one record, or `None` when a list property makes it
    /// variable.
    pub fn fixed_record_size(&self) -> Option<usize> {
        self.properties
            .iter()
            .map(|p| match p.kind {
                PropertyKind::Scalar(ty) => Some(ty.byte_size()),
                PropertyKind::List { .. } => None,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub version: String,
    pub elements: Vec<Element>,
    pub comments: Vec<String>,
    /// Bytes consumed up to and including the `end_header` line.
    pub byte_len: u64,
    /// Number of header lines, so body line numbers continue from here.
    pub line_count: usize,
}

impl PlyHeader {
    /// Index of the vertex element within [`elements`](Self::elements).
    pub fn vertex_index(&self) -> Option<usize> {
        self.elements.iter().position(Element::is_vertex)
    }

    pub fn vertex_element(&self) -> Option<&Element> {
        self.vertex_index().map(|i| &self.elements[i])
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertex_element().map_or(0, |e| e.count)
    }

    /// Elements whose body data precedes the vertex records.
    pub fn elements_before_vertex(&self) -> &[Element] {
        match self.vertex_index() {
            Some(i) => &self.elements[..i],
            None => &self.elements,
        }
    }

    /// Read and validate a header, leaving `reader` positioned at the
    /// first body byte.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut raw = Vec::with_capacity(256);
        let mut byte_len: u64 = 0;
        let mut line_no = 0usize;

        let mut format: Option<(PlyFormat, String)> = None;
        let mut elements: Vec<Element> = Vec::new();
        let mut comments = Vec::new();

        loop {
            raw.clear();
            let budget = MAX_HEADER_BYTES as u64 - byte_len + 1;
            let n = reader.by_ref().take(budget).read_until(b'\n', &mut raw)?;
            if n == 0 {
                return Err(PlyError::header(line_no, "missing end_header"));
            }
            line_no += 1;
            byte_len += n as u64;
            if byte_len > MAX_HEADER_BYTES as u64 {
                return Err(PlyError::header(
                    line_no,
                    format!("header exceeds {} bytes", MAX_HEADER_BYTES),
                ));
            }

            let line = std::str::from_utf8(&raw)
                .map_err(|_| PlyError::header(line_no, "header is not valid UTF-8"))?
                .trim();

            if line_no == 1 {
                if line != "ply" {
                    return Err(PlyError::header(line_no, "file does not start with 'ply'"));
                }
                continue;
            }

            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };

            match keyword {
                "format" => {
                    if format.is_some() {
                        return Err(PlyError::header(line_no, "duplicate format line"));
                    }
                    let (Some(kind), Some(version)) = (tokens.next(), tokens.next()) else {
                        return Err(PlyError::header(line_no, "expected `format <type> <version>`"));
                    };
                    let fmt = PlyFormat::from_keyword(kind).ok_or_else(|| {
                        PlyError::UnsupportedFormat {
                            line: line_no,
                            format: kind.to_string(),
                        }
                    })?;
                    format = Some((fmt, version.to_string()));
                }
                "comment" | "obj_info" => {
                    let text = line[keyword.len()..].trim_start();
                    comments.push(text.to_string());
                }
                "element" => {
                    let element = parse_element(line_no, tokens)?;
                    elements.push(element);
                }
                "property" => {
                    let Some(element) = elements.last_mut() else {
                        return Err(PlyError::header(line_no, "property before any element"));
                    };
                    parse_property(line_no, tokens, element)?;
                }
                "end_header" => break,
                other => {
                    return Err(PlyError::header(
                        line_no,
                        format!("unknown header keyword `{}`", other),
                    ));
                }
            }
        }

        let Some((format, version)) = format else {
            return Err(PlyError::header(line_no, "missing format line"));
        };

        let header = PlyHeader {
            format,
            version,
            elements,
            comments,
            byte_len,
            line_count: line_no,
        };

        if header.vertex_index().is_none() {
            return Err(PlyError::header(line_no, "no vertex element declared"));
        }
        if let Some(bad) = header
            .elements_before_vertex()
            .iter()
            .find(|e| e.defect.is_some())
        {
            return Err(PlyError::header(
                line_no,
                format!(
                    "cannot skip element `{}` preceding vertex data: {}",
                    bad.name,
                    bad.defect.as_deref().unwrap_or_default()
                ),
            ));
        }

        Ok(header)
    }
}

fn parse_element<'a>(line_no: usize, mut tokens: impl Iterator<Item = &'a str>) -> Result<Element> {
    let Some(name) = tokens.next() else {
        return Err(PlyError::header(line_no, "element without a name"));
    };
    let is_vertex = name == "vertex";

    let count = tokens.next().map(str::parse::<u64>);
    let (count, defect) = match count {
        Some(Ok(count)) => (count, None),
        Some(Err(_)) | None if is_vertex => {
            return Err(PlyError::header(line_no, "vertex element needs a non-negative count"));
        }
        _ => (0, Some(format!("unreadable count at line {}", line_no))),
    };

    Ok(Element {
        name: name.to_string(),
        count,
        properties: Vec::new(),
        defect,
    })
}

fn parse_property<'a>(
    line_no: usize,
    mut tokens: impl Iterator<Item = &'a str>,
    element: &mut Element,
) -> Result<()> {
    let parsed = match tokens.next() {
        Some("list") => {
            let count = tokens.next().and_then(ScalarType::from_name);
            let item = tokens.next().and_then(ScalarType::from_name);
            match (count, item, tokens.next()) {
                (Some(count), Some(item), Some(name)) if !count.is_float() => Ok(Property {
                    name: name.to_string(),
                    kind: PropertyKind::List { count, item },
                }),
                _ => Err("expected `property list <count type> <item type> <name>`".to_string()),
            }
        }
        Some(ty) => match (ScalarType::from_name(ty), tokens.next()) {
            (Some(ty), Some(name)) => Ok(Property {
                name: name.to_string(),
                kind: PropertyKind::Scalar(ty),
            }),
            (None, _) => Err(format!("unknown property type `{}`", ty)),
            (Some(_), None) => Err("property without a name".to_string()),
        },
        None => Err("empty property line".to_string()),
    };

    match parsed {
        Ok(property) => {
            if element.is_vertex() && matches!(property.kind, PropertyKind::List { .. }) {
                return Err(PlyError::header(
                    line_no,
                    format!("list property `{}` is not supported on vertices", property.name),
                ));
            }
            element.properties.push(property);
            Ok(())
        }
        Err(message) if element.is_vertex() => Err(PlyError::header(line_no, message)),
        Err(message) => {
            tracing::warn!(element = %element.name, line = line_no, %message, "unreadable property on skipped element");
            element
                .defect
                .get_or_insert_with(|| format!("{} at line {}", message, line_no));
            Ok(())
        }
    }
}
