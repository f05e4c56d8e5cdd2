use crate::color::{pack_color, unpack_rgb, ColorGradient, ColorMode, ColorValue, Rgb, WHITE};
use crate::error::{CloudError, Result};
use crate::{Aabb, ChunkedArray, Settings, ValueRange};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_CLOUD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`PointCloud`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudId(u64);

impl CloudId {
    fn next() -> Self {
        CloudId(NEXT_CLOUD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// How many full scans the aggregation path had to perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub bounds_scans: u64,
    pub intensity_scans: u64,
}

/// Points to append, with optional parallel channels and precomputed
/// aggregates.
///
/// Supplying `bounds` / `intensity_range` lets [`PointCloud::append_points`]
/// merge them in O(1) instead of walking the batch again.
#[derive(Debug, Clone, Default)]
pub struct PointBatch {
    pub points: Vec<[f64; 3]>,
    pub colors: Option<Vec<u32>>,
    pub intensities: Option<Vec<f64>>,
    pub bounds: Option<Aabb>,
    pub intensity_range: Option<ValueRange>,
}

impl PointBatch {
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    /// Attach colors in any accepted shape, normalizing them to packed form.
    pub fn with_colors<C: Into<ColorValue>>(
        mut self,
        colors: impl IntoIterator<Item = C>,
    ) -> Result<Self> {
        let packed = colors
            .into_iter()
            .map(pack_color)
            .collect::<Result<Vec<u32>>>()?;
        self.colors = Some(packed);
        Ok(self)
    }

    /// Attach colors that are already packed as `0xRRGGBB`.
    pub fn with_packed_colors(mut self, colors: Vec<u32>) -> Self {
        self.colors = Some(colors);
        self
    }

    pub fn with_intensities(mut self, intensities: Vec<f64>) -> Self {
        self.intensities = Some(intensities);
        self
    }

    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_intensity_range(mut self, range: ValueRange) -> Self {
        self.intensity_range = Some(range);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// In-place modification of a single stored point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointUpdate {
    pub index: usize,
    pub color: Option<ColorValue>,
}

impl PointUpdate {
    pub fn color(index: usize, color: impl Into<ColorValue>) -> Self {
        Self {
            index,
            color: Some(color.into()),
        }
    }
}

/// A named point cloud backed by chunked storage.
///
/// Positions, packed colors and intensities live in parallel
/// [`ChunkedArray`]s. Bounds and intensity range are folded in as points
/// arrive; the public bounding box only changes when
/// [`finalize_bounds`](Self::finalize_bounds) is called.
#[derive(Debug, Clone)]
pub struct PointCloud {
    id: CloudId,
    name: String,
    points: ChunkedArray<[f64; 3]>,
    colors: Option<ChunkedArray<u32>>,
    intensities: Option<ChunkedArray<f64>>,
    running_bounds: Aabb,
    bounding_box: Aabb,
    bounds_pending: bool,
    intensity_range: Option<ValueRange>,
    visible: bool,
    density: f64,
    point_size: u8,
    color_mode: ColorMode,
    color_gradient: ColorGradient,
    single_color: Rgb,
    metadata: BTreeMap<String, String>,
    revision: u64,
    geometry_revision: u64,
    scans: ScanCounts,
}

impl PointCloud {
    pub fn new(name: impl Into<String>, settings: &Settings) -> Self {
        Self {
            id: CloudId::next(),
            name: name.into(),
            points: ChunkedArray::new(settings.chunk_capacity),
            colors: None,
            intensities: None,
            running_bounds: Aabb::empty(),
            bounding_box: Aabb::empty(),
            bounds_pending: false,
            intensity_range: None,
            visible: true,
            density: settings.default_density.clamp(0.01, 1.0),
            point_size: settings.default_point_size.clamp(1, 10),
            color_mode: settings.default_color_mode,
            color_gradient: settings.default_color_gradient,
            single_color: Rgb::new(255, 255, 255),
            metadata: BTreeMap::new(),
            revision: 0,
            geometry_revision: 0,
            scans: ScanCounts::default(),
        }
    }

    pub fn id(&self) -> CloudId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bumped by every mutation of point data.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Like [`revision`](Self::revision) but only bumped when positions
    /// change, so color edits leave spatial indexes valid.
    pub fn geometry_revision(&self) -> u64 {
        self.geometry_revision
    }

    pub fn scan_counts(&self) -> ScanCounts {
        self.scans
    }

    pub fn points(&self) -> &ChunkedArray<[f64; 3]> {
        &self.points
    }

    pub fn colors(&self) -> Option<&ChunkedArray<u32>> {
        self.colors.as_ref()
    }

    pub fn intensities(&self) -> Option<&ChunkedArray<f64>> {
        self.intensities.as_ref()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn has_intensities(&self) -> bool {
        self.intensities.is_some()
    }

    pub fn point(&self, index: usize) -> Option<[f64; 3]> {
        self.points.get(index).copied()
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        self.points.iter().copied()
    }

    pub fn intensity(&self, index: usize) -> Option<f64> {
        self.intensities.as_ref()?.get(index).copied()
    }

    /// Stored color of point `index` as `[r, g, b]`.
    pub fn fetch_color_components(&self, index: usize) -> Option<[u8; 3]> {
        let packed = self.colors.as_ref()?.get(index)?;
        Some(unpack_rgb(*packed))
    }

    /// Append a batch, folding its aggregates into the running totals.
    ///
    /// Supplied `bounds` / `intensity_range` are trusted and merged directly;
    /// missing ones are computed by scanning the batch. The cloud is left
    /// untouched if the batch is rejected.
    pub fn append_points(&mut self, batch: PointBatch) -> Result<()> {
        self.validate_batch(&batch, self.is_empty())?;
        if batch.is_empty() {
            return Ok(());
        }
        self.store_batch(batch);
        Ok(())
    }

    /// Replace all point data with `batch`.
    pub fn set_points_bulk(&mut self, batch: PointBatch) -> Result<()> {
        self.validate_batch(&batch, true)?;

        let capacity = self.points.chunk_capacity();
        self.points = ChunkedArray::new(capacity);
        self.colors = None;
        self.intensities = None;
        self.running_bounds = Aabb::empty();
        self.intensity_range = None;

        debug!(cloud = %self.name, points = batch.len(), "replacing point data");
        if batch.is_empty() {
            self.bounds_pending = true;
            self.revision += 1;
            self.geometry_revision += 1;
            return Ok(());
        }
        self.store_batch(batch);
        Ok(())
    }

    /// Apply color updates in place.
    ///
    /// Every update is validated before any is applied, so a bad index or
    /// color rejects the whole call. Returns the number of updates applied.
    pub fn apply_point_updates(&mut self, updates: &[PointUpdate]) -> Result<usize> {
        let len = self.len();
        let mut staged = Vec::with_capacity(updates.len());
        for update in updates {
            if update.index >= len {
                return Err(CloudError::IndexOutOfRange {
                    index: update.index,
                    len,
                });
            }
            let color = match update.color {
                Some(value) => {
                    if self.colors.is_none() {
                        return Err(CloudError::ChannelMismatch { channel: "colors" });
                    }
                    Some(pack_color(value)?)
                }
                None => None,
            };
            staged.push((update.index, color));
        }

        let mut applied = 0;
        for (index, color) in staged {
            if let (Some(packed), Some(colors)) = (color, self.colors.as_mut()) {
                if let Some(slot) = colors.get_mut(index) {
                    *slot = packed;
                }
            }
            applied += 1;
        }
        if applied > 0 {
            self.revision += 1;
        }
        Ok(applied)
    }

    /// Snap the running extrema into the public bounding box.
    ///
    /// Idempotent. With no points the box stays [`Aabb::empty`].
    pub fn finalize_bounds(&mut self) -> &Aabb {
        if self.bounds_pending {
            self.bounding_box = self.running_bounds;
            self.bounds_pending = false;
            debug!(cloud = %self.name, min = ?self.bounding_box.min, max = ?self.bounding_box.max, "bounds finalized");
        }
        &self.bounding_box
    }

    /// Bounding box as of the last [`finalize_bounds`](Self::finalize_bounds).
    pub fn bounding_box(&self) -> &Aabb {
        &self.bounding_box
    }

    /// True when points changed since bounds were last finalized.
    pub fn bounds_pending(&self) -> bool {
        self.bounds_pending
    }

    pub fn intensity_range(&self) -> Option<ValueRange> {
        self.intensity_range
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    /// Sampling fraction, clamped to `[0.01, 1.0]`.
    pub fn set_density(&mut self, density: f64) {
        if density.is_finite() {
            self.density = density.clamp(0.01, 1.0);
        }
    }

    pub fn point_size(&self) -> u8 {
        self.point_size
    }

    pub fn set_point_size(&mut self, size: u8) {
        self.point_size = size.clamp(1, 10);
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn set_color_mode(&mut self, mode: ColorMode) {
        self.color_mode = mode;
    }

    pub fn color_gradient(&self) -> ColorGradient {
        self.color_gradient
    }

    pub fn set_color_gradient(&mut self, gradient: ColorGradient) {
        self.color_gradient = gradient;
    }

    pub fn single_color(&self) -> Rgb {
        self.single_color
    }

    pub fn set_single_color(&mut self, color: Rgb) {
        self.single_color = color;
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata
    }

    /// The mode actually used for display.
    ///
    /// `Original` without stored colors falls back to `Intensity`, and
    /// `Intensity` without intensities falls back to `Height`.
    pub fn effective_color_mode(&self) -> ColorMode {
        let mut mode = self.color_mode;
        if mode == ColorMode::Original && self.colors.is_none() {
            mode = ColorMode::Intensity;
        }
        if mode == ColorMode::Intensity
            && (self.intensities.is_none() || self.intensity_range.is_none())
        {
            mode = ColorMode::Height;
        }
        mode
    }

    /// Packed display color of point `index` under the effective mode.
    pub fn resolve_color(&self, index: usize) -> Option<u32> {
        let point = self.point(index)?;
        let color = match self.effective_color_mode() {
            ColorMode::Original => self
                .colors
                .as_ref()
                .and_then(|c| c.get(index).copied())
                .unwrap_or(WHITE),
            ColorMode::Intensity => {
                let range = self.intensity_range?;
                let value = self.intensity(index)?;
                self.color_gradient.sample(range.normalize(value))
            }
            ColorMode::Height => {
                let bounds = &self.running_bounds;
                if bounds.is_empty() {
                    self.single_color.packed()
                } else {
                    let range = ValueRange::new(bounds.min[2], bounds.max[2]);
                    self.color_gradient.sample(range.normalize(point[2]))
                }
            }
            ColorMode::Single => self.single_color.packed(),
        };
        Some(color)
    }

    /// Number of points rendering should draw under the current density.
    pub fn sample_target(&self, max_points_sampled: usize) -> usize {
        let wanted = (self.len() as f64 * self.density).ceil() as usize;
        wanted.min(max_points_sampled).min(self.len())
    }

    /// Deterministic, evenly strided subset of point indices.
    pub fn sampled_indices(&self, max_points_sampled: usize) -> impl Iterator<Item = usize> {
        let len = self.len();
        let target = self.sample_target(max_points_sampled);
        let step = if target == 0 {
            1.0
        } else {
            len as f64 / target as f64
        };
        (0..target).map(move |i| ((i as f64 * step) as usize).min(len.saturating_sub(1)))
    }

    fn validate_batch(&self, batch: &PointBatch, defines_channels: bool) -> Result<()> {
        let n = batch.len();
        if let Some(colors) = &batch.colors {
            if colors.len() != n {
                return Err(CloudError::LengthMismatch {
                    channel: "colors",
                    expected: n,
                    actual: colors.len(),
                });
            }
            if let Some(bad) = colors.iter().find(|c| **c > WHITE) {
                return Err(CloudError::InvalidColorValue(format!(
                    "packed color {:#x} exceeds 24 bits",
                    bad
                )));
            }
        }
        if let Some(intensities) = &batch.intensities {
            if intensities.len() != n {
                return Err(CloudError::LengthMismatch {
                    channel: "intensities",
                    expected: n,
                    actual: intensities.len(),
                });
            }
        }

        if !defines_channels && n > 0 {
            if batch.colors.is_some() != self.colors.is_some() {
                return Err(CloudError::ChannelMismatch { channel: "colors" });
            }
            if batch.intensities.is_some() != self.intensities.is_some() {
                return Err(CloudError::ChannelMismatch {
                    channel: "intensities",
                });
            }
        }
        Ok(())
    }

    fn store_batch(&mut self, batch: PointBatch) {
        let PointBatch {
            points,
            colors,
            intensities,
            bounds,
            intensity_range,
        } = batch;

        let capacity = self.points.chunk_capacity();
        if self.points.is_empty() {
            self.colors = colors.as_ref().map(|_| ChunkedArray::new(capacity));
            self.intensities = intensities.as_ref().map(|_| ChunkedArray::new(capacity));
        }

        let batch_bounds = match bounds {
            Some(b) => b,
            None => {
                self.scans.bounds_scans += 1;
                Aabb::from_points(&points)
            }
        };
        self.running_bounds.merge(&batch_bounds);

        if let Some(values) = &intensities {
            let range = match intensity_range {
                Some(r) => Some(r),
                None => {
                    self.scans.intensity_scans += 1;
                    ValueRange::from_values(values)
                }
            };
            if let Some(range) = range {
                self.intensity_range = Some(match self.intensity_range {
                    Some(current) => current.merge(range),
                    None => range,
                });
            }
        }

        self.points.append_chunk(points);
        if let (Some(store), Some(values)) = (self.colors.as_mut(), colors) {
            store.append_chunk(values);
        }
        if let (Some(store), Some(values)) = (self.intensities.as_mut(), intensities) {
            store.append_chunk(values);
        }

        self.bounds_pending = true;
        self.revision += 1;
        self.geometry_revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings(chunk_capacity: usize) -> Settings {
        Settings {
            chunk_capacity,
            ..Settings::default()
        }
    }

    fn cloud() -> PointCloud {
        PointCloud::new("test", &settings(4))
    }

    #[test]
    fn new_is_empty() {
        let mut c = cloud();
        assert!(c.is_empty());
        assert!(!c.has_colors());
        assert!(c.intensity_range().is_none());
        assert!(c.finalize_bounds().is_empty());
        assert!(!c.bounds_pending());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(cloud().id(), cloud().id());
    }

    #[test]
    fn append_then_finalize_bounds() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[1.0, 2.0, 3.0], [-1.0, 5.0, 0.0]]))
            .unwrap();
        assert!(c.bounding_box().is_empty(), "bounds read before finalize");
        assert!(c.bounds_pending());

        let bounds = *c.finalize_bounds();
        assert_eq!(bounds.min, [-1.0, 2.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 5.0, 3.0]);
        assert_eq!(*c.finalize_bounds(), bounds);
        assert!(!c.bounds_pending());
    }

    #[test]
    fn appends_span_multiple_chunks() {
        let mut c = cloud();
        for i in 0..5 {
            let pts = (0..3).map(|j| [(i * 3 + j) as f64, 0.0, 0.0]).collect();
            c.append_points(PointBatch::new(pts)).unwrap();
        }
        assert_eq!(c.len(), 15);
        assert_eq!(c.points().chunk_count(), 4);
        let xs: Vec<f64> = c.iter_points().map(|p| p[0]).collect();
        assert_eq!(xs, (0..15).map(|v| v as f64).collect::<Vec<_>>());
    }

    #[test]
    fn colors_accept_every_shape() {
        let mut c = cloud();
        let batch = PointBatch::new(vec![[0.0; 3]; 3])
            .with_colors([
                ColorValue::from([10u8, 20, 30]),
                ColorValue::from(0x0A141Eu32),
                ColorValue::from(Rgb::new(10, 20, 30)),
            ])
            .unwrap();
        c.append_points(batch).unwrap();
        for i in 0..3 {
            assert_eq!(c.fetch_color_components(i), Some([10, 20, 30]));
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut c = cloud();
        let batch = PointBatch::new(vec![[0.0; 3]; 2]).with_packed_colors(vec![0]);
        assert_eq!(
            c.append_points(batch).unwrap_err(),
            CloudError::LengthMismatch {
                channel: "colors",
                expected: 2,
                actual: 1
            }
        );
        assert!(c.is_empty());
    }

    #[test]
    fn channel_presence_is_fixed_by_first_batch() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]]).with_packed_colors(vec![0xFF]))
            .unwrap();
        let err = c
            .append_points(PointBatch::new(vec![[1.0; 3]]))
            .unwrap_err();
        assert_eq!(err, CloudError::ChannelMismatch { channel: "colors" });
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn oversized_packed_color_is_rejected() {
        let mut c = cloud();
        let batch = PointBatch::new(vec![[0.0; 3]]).with_packed_colors(vec![0x1_000_000]);
        assert!(matches!(
            c.append_points(batch),
            Err(CloudError::InvalidColorValue(_))
        ));
    }

    #[test]
    fn supplied_aggregates_skip_scans() {
        let pts = vec![[0.0, 1.0, 2.0], [3.0, -4.0, 5.0], [6.0, 7.0, -8.0]];
        let intensities = vec![0.5, 2.0, -1.0];

        let mut scanned = cloud();
        scanned
            .append_points(PointBatch::new(pts.clone()).with_intensities(intensities.clone()))
            .unwrap();
        assert_eq!(
            scanned.scan_counts(),
            ScanCounts {
                bounds_scans: 1,
                intensity_scans: 1
            }
        );

        let mut supplied = cloud();
        let batch = PointBatch::new(pts.clone())
            .with_intensities(intensities.clone())
            .with_bounds(Aabb::from_points(&pts))
            .with_intensity_range(ValueRange::from_values(&intensities).unwrap());
        supplied.append_points(batch).unwrap();
        assert_eq!(supplied.scan_counts(), ScanCounts::default());

        assert_eq!(scanned.finalize_bounds(), supplied.finalize_bounds());
        assert_eq!(scanned.intensity_range(), supplied.intensity_range());
        assert_eq!(supplied.intensity_range(), Some(ValueRange::new(-1.0, 2.0)));
    }

    #[test]
    fn set_points_bulk_replaces_everything() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[100.0; 3]]).with_intensities(vec![9.0]))
            .unwrap();
        c.set_points_bulk(PointBatch::new(vec![[1.0; 3], [2.0; 3]]).with_packed_colors(vec![1, 2]))
            .unwrap();
        assert_eq!(c.len(), 2);
        assert!(c.has_colors());
        assert!(!c.has_intensities());
        assert!(c.intensity_range().is_none());
        assert_eq!(c.finalize_bounds().max, [2.0; 3]);
    }

    #[test]
    fn point_updates_apply_in_place() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]; 6]).with_packed_colors(vec![0; 6]))
            .unwrap();
        let rev = c.revision();
        let geometry = c.geometry_revision();
        let applied = c
            .apply_point_updates(&[
                PointUpdate::color(5, [1u8, 2, 3]),
                PointUpdate::color(0, Rgb::new(4, 5, 6)),
                PointUpdate {
                    index: 2,
                    color: None,
                },
            ])
            .unwrap();
        assert_eq!(applied, 3);
        assert_eq!(c.fetch_color_components(5), Some([1, 2, 3]));
        assert_eq!(c.fetch_color_components(0), Some([4, 5, 6]));
        assert_eq!(c.fetch_color_components(2), Some([0, 0, 0]));
        assert!(c.revision() > rev);
        assert_eq!(c.geometry_revision(), geometry);
    }

    #[test]
    fn bad_update_aborts_whole_call() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]; 2]).with_packed_colors(vec![7, 7]))
            .unwrap();
        let err = c
            .apply_point_updates(&[PointUpdate::color(0, 0xFFu32), PointUpdate::color(2, 0u32)])
            .unwrap_err();
        assert_eq!(err, CloudError::IndexOutOfRange { index: 2, len: 2 });
        assert_eq!(c.fetch_color_components(0), Some([0, 0, 7]));

        let err = c
            .apply_point_updates(&[PointUpdate::color(1, [0i32, 300, 0])])
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidColorValue(_)));
    }

    #[test]
    fn color_update_without_color_channel() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]])).unwrap();
        assert_eq!(
            c.apply_point_updates(&[PointUpdate::color(0, 0u32)]),
            Err(CloudError::ChannelMismatch { channel: "colors" })
        );
    }

    #[test]
    fn color_mode_falls_back() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0, 0.0, 0.0], [0.0, 0.0, 10.0]]))
            .unwrap();
        assert_eq!(c.effective_color_mode(), ColorMode::Height);
        c.set_color_gradient(ColorGradient::Grayscale);
        assert_eq!(c.resolve_color(0), Some(0x000000));
        assert_eq!(c.resolve_color(1), Some(0xFFFFFF));

        c.set_color_mode(ColorMode::Single);
        c.set_single_color(Rgb::new(1, 2, 3));
        assert_eq!(c.resolve_color(1), Some(0x010203));
        assert_eq!(c.resolve_color(2), None);
    }

    #[test]
    fn intensity_mode_uses_range() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]; 3]).with_intensities(vec![0.0, 50.0, 100.0]))
            .unwrap();
        c.set_color_gradient(ColorGradient::Grayscale);
        assert_eq!(c.effective_color_mode(), ColorMode::Intensity);
        assert_eq!(c.resolve_color(0), Some(0x000000));
        assert_eq!(c.resolve_color(1), Some(0x808080));
        assert_eq!(c.resolve_color(2), Some(0xFFFFFF));
    }

    #[test]
    fn density_and_point_size_are_clamped() {
        let mut c = cloud();
        c.set_density(5.0);
        assert_eq!(c.density(), 1.0);
        c.set_density(0.0);
        assert_eq!(c.density(), 0.01);
        c.set_density(f64::NAN);
        assert_eq!(c.density(), 0.01);
        c.set_point_size(0);
        assert_eq!(c.point_size(), 1);
        c.set_point_size(42);
        assert_eq!(c.point_size(), 10);
    }

    #[test]
    fn sampling_respects_density_and_cap() {
        let mut c = cloud();
        c.append_points(PointBatch::new(vec![[0.0; 3]; 100])).unwrap();
        assert_eq!(c.sampled_indices(1_000).count(), 100);
        c.set_density(0.25);
        let idx: Vec<usize> = c.sampled_indices(1_000).collect();
        assert_eq!(idx.len(), 25);
        assert_eq!(&idx[..3], &[0, 4, 8]);
        assert_eq!(c.sampled_indices(10).count(), 10);
    }

    proptest! {
        #[test]
        fn aggregate_paths_agree(
            batches in prop::collection::vec(
                prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3, -1e3f64..1e3, 0.0f64..1.0), 1..40),
                1..8,
            ),
        ) {
            let mut scanned = PointCloud::new("a", &settings(16));
            let mut supplied = PointCloud::new("b", &settings(16));
            for batch in &batches {
                let pts: Vec<[f64; 3]> = batch.iter().map(|p| [p.0, p.1, p.2]).collect();
                let vals: Vec<f64> = batch.iter().map(|p| p.3).collect();
                scanned
                    .append_points(PointBatch::new(pts.clone()).with_intensities(vals.clone()))
                    .unwrap();
                supplied
                    .append_points(
                        PointBatch::new(pts.clone())
                            .with_intensities(vals.clone())
                            .with_bounds(Aabb::from_points(&pts))
                            .with_intensity_range(ValueRange::from_values(&vals).unwrap()),
                    )
                    .unwrap();
            }
            prop_assert_eq!(supplied.scan_counts(), ScanCounts::default());
            prop_assert_eq!(scanned.scan_counts().bounds_scans, batches.len() as u64);
            prop_assert_eq!(scanned.finalize_bounds(), supplied.finalize_bounds());
            prop_assert_eq!(scanned.intensity_range(), supplied.intensity_range());
            prop_assert_eq!(scanned.len(), supplied.len());
        }
    }
}
