use crate::decode::{DecodedVertex, VertexLayout};
use crate::error::{BodyLocation, PlyError, Result};
use crate::header::{Element, PlyFormat, PlyHeader, PropertyKind, ScalarType};
use crate::progress::{Clock, Progress, SystemClock, Throttle};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use pointstream_core::{Aabb, PointBatch, Settings, ValueRange};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Records between cooperative yields.
pub const THREAD_YIELD_INTERVAL: u64 = 16_384;
/// Records between cancellation polls. The flag is also checked after
/// every delivered chunk.
pub const CANCEL_POLL_INTERVAL: u64 = 4_096;

const HEADER_BUFFER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Header,
    BodyStreaming,
    Done,
    Cancelled,
    Failed,
}

/// A bounded run of decoded vertices plus its precomputed aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct PointChunk {
    pub positions: Vec<[f64; 3]>,
    pub colors: Option<Vec<u32>>,
    pub intensities: Option<Vec<f64>>,
    /// Vertices decoded so far, including this chunk.
    pub processed_total: u64,
    pub bounds: Aabb,
    pub intensity_range: Option<ValueRange>,
}

impl PointChunk {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Convert into a batch whose aggregates are already filled in, so the
    /// cloud does not rescan it.
    pub fn into_batch(self) -> PointBatch {
        let mut batch = PointBatch::new(self.positions).with_bounds(self.bounds);
        if let Some(colors) = self.colors {
            batch = batch.with_packed_colors(colors);
        }
        if let Some(intensities) = self.intensities {
            batch = batch.with_intensities(intensities);
        }
        if let Some(range) = self.intensity_range {
            batch = batch.with_intensity_range(range);
        }
        batch
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseSummary {
    pub format: PlyFormat,
    pub vertex_count: u64,
    pub chunks: usize,
    pub has_colors: bool,
    pub has_intensity: bool,
    pub bounds: Aabb,
    pub intensity_range: Option<ValueRange>,
    pub elapsed: Duration,
}

struct ChunkBuilder {
    capacity: usize,
    positions: Vec<[f64; 3]>,
    colors: Option<Vec<u32>>,
    intensities: Option<Vec<f64>>,
    bounds: Aabb,
    intensity_range: Option<ValueRange>,
}

impl ChunkBuilder {
    fn new(capacity: usize, remaining: u64, layout: &VertexLayout) -> Self {
        let reserve = (capacity as u64).min(remaining) as usize;
        Self {
            capacity,
            positions: Vec::with_capacity(reserve),
            colors: layout.has_colors().then(|| Vec::with_capacity(reserve)),
            intensities: layout.has_intensity().then(|| Vec::with_capacity(reserve)),
            bounds: Aabb::empty(),
            intensity_range: None,
        }
    }

    fn push(&mut self, vertex: DecodedVertex) {
        self.bounds.expand_with_point(vertex.position);
        self.positions.push(vertex.position);
        if let (Some(colors), Some(color)) = (self.colors.as_mut(), vertex.color) {
            colors.push(color);
        }
        if let (Some(values), Some(value)) = (self.intensities.as_mut(), vertex.intensity) {
            values.push(value);
            if value.is_finite() {
                let point = ValueRange::new(value, value);
                self.intensity_range = Some(match self.intensity_range {
                    Some(range) => range.merge(point),
                    None => point,
                });
            }
        }
    }

    fn is_full(&self) -> bool {
        self.positions.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn take(&mut self, processed_total: u64, remaining: u64) -> PointChunk {
        let reserve = (self.capacity as u64).min(remaining) as usize;
        PointChunk {
            positions: std::mem::replace(&mut self.positions, Vec::with_capacity(reserve)),
            colors: self
                .colors
                .as_mut()
                .map(|c| std::mem::replace(c, Vec::with_capacity(reserve))),
            intensities: self
                .intensities
                .as_mut()
                .map(|v| std::mem::replace(v, Vec::with_capacity(reserve))),
            processed_total,
            bounds: std::mem::take(&mut self.bounds),
            intensity_range: self.intensity_range.take(),
        }
    }
}

struct BodyProgress {
    decoded: u64,
    total: u64,
    chunks: usize,
    bounds: Aabb,
    intensity_range: Option<ValueRange>,
    throttle: Throttle,
}

/// Streaming PLY reader.
///
/// Vertices are delivered to a caller-supplied callback in chunks of at
/// most `batch_vertices_limit`. Only one chunk and one read buffer are
/// held at a time, so memory stays flat regardless of file size.
///
/// ```no_run
/// use pointstream_core::Settings;
/// use pointstream_io::PlyParser;
///
/// let mut total = 0;
/// let summary = PlyParser::new(&Settings::default())
///     .parse_file("scan.ply", |chunk| {
///         total += chunk.len();
///         Ok(())
///     })?;
/// assert_eq!(summary.vertex_count as usize, total);
/// # Ok::<(), pointstream_io::PlyError>(())
/// ```
pub struct PlyParser<'a> {
    chunk_size: usize,
    read_buffer_bytes: usize,
    progress_interval: Duration,
    state: ParserState,
    header: Option<PlyHeader>,
    on_progress: Option<Box<dyn FnMut(&Progress) + Send + 'a>>,
    cancel: Option<Box<dyn FnMut() -> bool + Send + 'a>>,
    yield_now: Box<dyn FnMut() + Send + 'a>,
    clock: Box<dyn Clock + 'a>,
}

impl<'a> PlyParser<'a> {
    pub fn new(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.batch_vertices_limit.max(1),
            read_buffer_bytes: settings.read_buffer_bytes.max(1),
            progress_interval: settings.progress_interval(),
            state: ParserState::Header,
            header: None,
            on_progress: None,
            cancel: None,
            yield_now: Box::new(std::thread::yield_now),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_read_buffer_bytes(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(1);
        self
    }

    /// Observer for throttled progress updates.
    pub fn with_progress(mut self, on_progress: impl FnMut(&Progress) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    /// Predicate polled during the body; returning `true` aborts the parse
    /// with [`PlyError::Cancelled`].
    pub fn with_cancellation(mut self, is_cancelled: impl FnMut() -> bool + Send + 'a) -> Self {
        self.cancel = Some(Box::new(is_cancelled));
        self
    }

    /// Hook invoked every [`THREAD_YIELD_INTERVAL`] records. Defaults to
    /// [`std::thread::yield_now`].
    pub fn with_yield_point(mut self, yield_now: impl FnMut() + Send + 'a) -> Self {
        self.yield_now = Box::new(yield_now);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Header of the most recent parse, once it has been read.
    pub fn header(&self) -> Option<&PlyHeader> {
        self.header.as_ref()
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn parse_file<F>(&mut self, path: impl AsRef<Path>, on_chunk: F) -> Result<ParseSummary>
    where
        F: FnMut(PointChunk) -> Result<()>,
    {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(err) => {
                self.state = ParserState::Failed;
                return Err(err.into());
            }
        };
        self.parse_reader(file, on_chunk)
    }

    pub fn parse_reader<R, F>(&mut self, reader: R, mut on_chunk: F) -> Result<ParseSummary>
    where
        R: Read,
        F: FnMut(PointChunk) -> Result<()>,
    {
        self.state = ParserState::Header;
        self.header = None;
        let started = self.clock.now();

        let result = self.run(reader, &mut on_chunk, started);
        self.state = match &result {
            Ok(_) => ParserState::Done,
            Err(err) if err.is_cancelled() => ParserState::Cancelled,
            Err(_) => ParserState::Failed,
        };
        match &result {
            Ok(summary) => info!(
                vertices = summary.vertex_count,
                chunks = summary.chunks,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "PLY parse complete"
            ),
            Err(err) => debug!(error = %err, "PLY parse stopped"),
        }
        result
    }

    fn run<R, F>(&mut self, reader: R, on_chunk: &mut F, started: Instant) -> Result<ParseSummary>
    where
        R: Read,
        F: FnMut(PointChunk) -> Result<()>,
    {
        let mut reader = BufReader::with_capacity(HEADER_BUFFER_BYTES, reader);
        let header = PlyHeader::read(&mut reader)?;
        self.header = Some(header.clone());

        let vertex = header
            .vertex_element()
            .ok_or_else(|| PlyError::header(header.line_count, "no vertex element declared"))?;
        let layout = VertexLayout::from_element(vertex, header.line_count)?;
        debug!(
            format = %header.format,
            vertices = vertex.count,
            colors = layout.has_colors(),
            intensity = layout.has_intensity(),
            skipped_elements = header.elements_before_vertex().len(),
            "PLY header parsed"
        );
        for element in header.elements_before_vertex() {
            warn!(element = %element.name, count = element.count, "skipping element before vertex data");
        }

        self.state = ParserState::BodyStreaming;
        let mut body = BodyProgress {
            decoded: 0,
            total: vertex.count,
            chunks: 0,
            bounds: Aabb::empty(),
            intensity_range: None,
            throttle: Throttle::new(self.progress_interval),
        };

        match header.format {
            PlyFormat::Ascii => self.stream_ascii(&mut reader, &header, &layout, &mut body, on_chunk)?,
            PlyFormat::BinaryLittleEndian => {
                self.stream_binary::<LittleEndian, _, _>(&mut reader, &header, &layout, &mut body, on_chunk)?
            }
            PlyFormat::BinaryBigEndian => {
                self.stream_binary::<BigEndian, _, _>(&mut reader, &header, &layout, &mut body, on_chunk)?
            }
        }
        self.report(&mut body, true);

        Ok(ParseSummary {
            format: header.format,
            vertex_count: body.decoded,
            chunks: body.chunks,
            has_colors: layout.has_colors(),
            has_intensity: layout.has_intensity(),
            bounds: body.bounds,
            intensity_range: body.intensity_range,
            elapsed: self.clock.now().saturating_duration_since(started),
        })
    }

    fn stream_binary<B, R, F>(
        &mut self,
        reader: &mut R,
        header: &PlyHeader,
        layout: &VertexLayout,
        body: &mut BodyProgress,
        on_chunk: &mut F,
    ) -> Result<()>
    where
        B: ByteOrder,
        R: Read,
        F: FnMut(PointChunk) -> Result<()>,
    {
        let mut offset = header.byte_len;
        for element in header.elements_before_vertex() {
            let skipped = skip_binary_element::<B, _>(reader, element, offset, body.total)?;
            offset = offset.saturating_add(skipped);
        }

        let stride = layout.record_size();
        let records_per_read = (self.read_buffer_bytes / stride).max(1) as u64;
        let mut buffer = vec![0u8; records_per_read.min(body.total) as usize * stride];
        let mut builder = ChunkBuilder::new(self.chunk_size, body.total, layout);

        while body.decoded < body.total {
            let want = records_per_read.min(body.total - body.decoded) as usize * stride;
            let got = read_full(reader, &mut buffer[..want])?;

            for record in buffer[..got - got % stride].chunks_exact(stride) {
                builder.push(layout.decode_binary::<B>(record));
                body.decoded += 1;
                if builder.is_full() {
                    self.emit(&mut builder, body, on_chunk)?;
                }
                self.checkpoint(body.decoded)?;
            }

            offset = offset.saturating_add(got as u64);
            if got < want {
                return Err(PlyError::TruncatedBody {
                    location: BodyLocation::ByteOffset(offset),
                    expected: body.total,
                    decoded: body.decoded,
                });
            }
        }

        if !builder.is_empty() {
            self.emit(&mut builder, body, on_chunk)?;
        }
        Ok(())
    }

    fn stream_ascii<R, F>(
        &mut self,
        reader: &mut R,
        header: &PlyHeader,
        layout: &VertexLayout,
        body: &mut BodyProgress,
        on_chunk: &mut F,
    ) -> Result<()>
    where
        R: BufRead,
        F: FnMut(PointChunk) -> Result<()>,
    {
        let mut line = String::new();
        let mut line_no = header.line_count as u64;

        for element in header.elements_before_vertex() {
            let mut skipped = 0u64;
            while skipped < element.count {
                if !next_line(reader, &mut line, &mut line_no)? {
                    return Err(PlyError::TruncatedBody {
                        location: BodyLocation::Line(line_no + 1),
                        expected: body.total,
                        decoded: 0,
                    });
                }
                if !line.trim().is_empty() {
                    skipped += 1;
                }
            }
        }

        let mut builder = ChunkBuilder::new(self.chunk_size, body.total, layout);
        while body.decoded < body.total {
            if !next_line(reader, &mut line, &mut line_no)? {
                return Err(PlyError::TruncatedBody {
                    location: BodyLocation::Line(line_no + 1),
                    expected: body.total,
                    decoded: body.decoded,
                });
            }
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let vertex = layout
                .decode_ascii(text)
                .map_err(|message| PlyError::MalformedBody {
                    line: line_no,
                    message,
                })?;

            builder.push(vertex);
            body.decoded += 1;
            if builder.is_full() {
                self.emit(&mut builder, body, on_chunk)?;
            }
            self.checkpoint(body.decoded)?;
        }

        if !builder.is_empty() {
            self.emit(&mut builder, body, on_chunk)?;
        }
        Ok(())
    }

    fn emit<F>(&mut self, builder: &mut ChunkBuilder, body: &mut BodyProgress, on_chunk: &mut F) -> Result<()>
    where
        F: FnMut(PointChunk) -> Result<()>,
    {
        let chunk = builder.take(body.decoded, body.total - body.decoded);
        body.chunks += 1;
        body.bounds.merge(&chunk.bounds);
        body.intensity_range = match (body.intensity_range, chunk.intensity_range) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        };

        on_chunk(chunk)?;
        self.report(body, false);
        self.poll_cancel(body.decoded)
    }

    fn checkpoint(&mut self, decoded: u64) -> Result<()> {
        if decoded % THREAD_YIELD_INTERVAL == 0 {
            (self.yield_now)();
        }
        if decoded % CANCEL_POLL_INTERVAL == 0 {
            self.poll_cancel(decoded)?;
        }
        Ok(())
    }

    fn poll_cancel(&mut self, processed: u64) -> Result<()> {
        if let Some(is_cancelled) = self.cancel.as_mut() {
            if is_cancelled() {
                return Err(PlyError::Cancelled { processed });
            }
        }
        Ok(())
    }

    fn report(&mut self, body: &mut BodyProgress, force: bool) {
        let Some(on_progress) = self.on_progress.as_mut() else {
            return;
        };
        let now = self.clock.now();
        if body.throttle.ready(now) || force {
            let message = if body.decoded >= body.total {
                "Loaded points"
            } else {
                "Loading points"
            };
            on_progress(&Progress::new(body.decoded, body.total, message));
        }
    }
}

fn next_line<R: BufRead>(reader: &mut R, line: &mut String, line_no: &mut u64) -> Result<bool> {
    line.clear();
    match reader.read_line(line) {
        Ok(0) => Ok(false),
        Ok(_) => {
            *line_no += 1;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::InvalidData => Err(PlyError::MalformedBody {
            line: *line_no + 1,
            message: "line is not valid UTF-8".to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Fill `buf` as far as the stream allows; a short count means EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Skip one non-vertex element's body, returning the bytes consumed.
fn skip_binary_element<B: ByteOrder, R: Read>(
    reader: &mut R,
    element: &Element,
    offset: u64,
    expected: u64,
) -> Result<u64> {
    let truncated = |at: u64| PlyError::TruncatedBody {
        location: BodyLocation::ByteOffset(at),
        expected,
        decoded: 0,
    };

    if let Some(size) = element.fixed_record_size() {
        let Some(len) = (size as u64).checked_mul(element.count) else {
            return Err(truncated(offset));
        };
        let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
        if skipped < len {
            return Err(truncated(offset.saturating_add(skipped)));
        }
        return Ok(len);
    }

    let mut consumed = 0u64;
    let mut scratch = [0u8; 4];
    for _ in 0..element.count {
        for property in &element.properties {
            let len = match property.kind {
                PropertyKind::Scalar(ty) => ty.byte_size() as u64,
                PropertyKind::List { count, item } => {
                    let width = count.byte_size();
                    let got = read_full(reader, &mut scratch[..width])?;
                    consumed += got as u64;
                    if got < width {
                        return Err(truncated(offset.saturating_add(consumed)));
                    }
                    read_list_len::<B>(count, &scratch[..width]) * item.byte_size() as u64
                }
            };
            let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
            consumed += skipped;
            if skipped < len {
                return Err(truncated(offset.saturating_add(consumed)));
            }
        }
    }
    Ok(consumed)
}

fn read_list_len<B: ByteOrder>(ty: ScalarType, bytes: &[u8]) -> u64 {
    let len = match ty {
        ScalarType::Int8 => bytes[0] as i8 as i64,
        ScalarType::UInt8 => bytes[0] as i64,
        ScalarType::Int16 => B::read_i16(bytes) as i64,
        ScalarType::UInt16 => B::read_u16(bytes) as i64,
        ScalarType::Int32 => B::read_i32(bytes) as i64,
        ScalarType::UInt32 => B::read_u32(bytes) as i64,
        ScalarType::Float32 | ScalarType::Float64 => 0,
    };
    len.max(0) as u64
}
