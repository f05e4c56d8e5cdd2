use crate::error::{Result, SpatialError};
use crate::geometry::{distance_sq, ray_box_intersection, Frustum, Ray};
use pointstream_core::{Aabb, PointCloud, Settings, MAX_OCTREE_DEPTH};
use std::cell::Cell;
use tracing::debug;

const ROOT: usize = 0;
const ROOT_PADDING: f64 = 1e-9;

/// Split limits for an [`Octree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OctreeConfig {
    pub max_points_per_node: usize,
    pub max_depth: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for OctreeConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_points_per_node: settings.octree_max_points_per_node.max(1),
            max_depth: settings.octree_max_depth.min(MAX_OCTREE_DEPTH),
        }
    }
}

/// Counters for the most recent query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub nodes_visited: usize,
    pub points_tested: usize,
    pub candidates_returned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the point in the source cloud.
    pub index: usize,
    pub position: [f64; 3],
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub index: usize,
    pub position: [f64; 3],
    /// Ray parameter of the closest approach.
    pub t: f64,
    /// Perpendicular distance from the ray.
    pub distance: f64,
}

#[derive(Debug, Clone)]
enum NodeKind {
    /// Entry ids into `Octree::positions` / `Octree::indices`.
    Leaf(Vec<usize>),
    /// Node ids, in octant order (bit 0 = x, bit 1 = y, bit 2 = z).
    Internal([usize; 8]),
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    depth: usize,
    kind: NodeKind,
}

impl Node {
    fn leaf(bounds: Aabb, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }
}

/// Point octree with bounded leaf capacity and depth.
///
/// Nodes live in a flat arena; node 0 is the root. A leaf holding more than
/// `max_points_per_node` entries splits into eight equal octants unless it
/// is already at `max_depth`, in which case it keeps growing.
///
/// A point lying exactly on a split plane goes to the lower octant on that
/// axis: the octant bit is set only when the coordinate is strictly greater
/// than the node center. This keeps placement, and therefore tie-breaking
/// in [`nearest`](Self::nearest), reproducible.
///
/// Queries record [`QueryStats`] readable through
/// [`last_query_stats`](Self::last_query_stats). The counters sit in a
/// `Cell`, so a tree is not `Sync`; share it across threads by building one
/// per thread.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<Node>,
    positions: Vec<[f64; 3]>,
    indices: Vec<usize>,
    config: OctreeConfig,
    last_stats: Cell<QueryStats>,
}

impl Octree {
    /// Empty tree covering `bounds` (padded slightly so points on the
    /// surface are inside). `max_depth` is capped at [`MAX_OCTREE_DEPTH`].
    pub fn new(bounds: Aabb, mut config: OctreeConfig) -> Self {
        config.max_depth = config.max_depth.min(MAX_OCTREE_DEPTH);
        let root = if bounds.is_empty() {
            bounds
        } else {
            let largest = bounds.extent().into_iter().fold(0.0, f64::max);
            bounds.padded((largest * ROOT_PADDING).max(ROOT_PADDING))
        };
        Self {
            nodes: vec![Node::leaf(root, 0)],
            positions: Vec::new(),
            indices: Vec::new(),
            config,
            last_stats: Cell::new(QueryStats::default()),
        }
    }

    /// Build over `(index, position)` pairs inside `bounds`. Entries that
    /// are non-finite or outside the bounds are skipped.
    pub fn build(
        entries: impl IntoIterator<Item = (usize, [f64; 3])>,
        bounds: Aabb,
        config: OctreeConfig,
    ) -> Self {
        let mut tree = Self::new(bounds, config);
        let mut skipped = 0usize;
        for (index, position) in entries {
            if tree.insert(index, position).is_err() {
                skipped += 1;
            }
        }
        debug!(
            points = tree.len(),
            skipped,
            nodes = tree.node_count(),
            depth = tree.depth(),
            "octree built"
        );
        tree
    }

    /// Build over a slice, indexing points by slice position.
    pub fn from_points(points: &[[f64; 3]], config: OctreeConfig) -> Self {
        let bounds = Aabb::from_points(points);
        Self::build(points.iter().copied().enumerate(), bounds, config)
    }

    /// Build over a cloud's points using its finalized bounding box.
    ///
    /// Fails with [`SpatialError::BoundsNotFinalized`] if points were
    /// appended since the last `finalize_bounds`.
    pub fn from_cloud(cloud: &PointCloud, config: OctreeConfig) -> Result<Self> {
        if cloud.bounds_pending() {
            return Err(SpatialError::BoundsNotFinalized);
        }
        Ok(Self::build(
            cloud.iter_points().enumerate(),
            *cloud.bounding_box(),
            config,
        ))
    }

    pub fn config(&self) -> OctreeConfig {
        self.config
    }

    pub fn bounds(&self) -> &Aabb {
        &self.nodes[ROOT].bounds
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Leaf(_)))
            .count()
    }

    /// Deepest node level; a lone root is depth 0.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn last_query_stats(&self) -> QueryStats {
        self.last_stats.get()
    }

    /// Add one point. The root volume never grows, so points outside it
    /// (or non-finite ones) are rejected with [`SpatialError::OutOfBounds`].
    pub fn insert(&mut self, index: usize, position: [f64; 3]) -> Result<()> {
        if !self.nodes[ROOT].bounds.contains(&position) {
            return Err(SpatialError::OutOfBounds { point: position });
        }

        let entry = self.positions.len();
        self.positions.push(position);
        self.indices.push(index);

        let OctreeConfig {
            max_points_per_node,
            max_depth,
        } = self.config;
        let mut node_id = ROOT;
        loop {
            let node = &mut self.nodes[node_id];
            let center = node.bounds.center();
            match &mut node.kind {
                NodeKind::Internal(children) => node_id = children[octant(position, center)],
                NodeKind::Leaf(entries) => {
                    entries.push(entry);
                    if entries.len() > max_points_per_node && node.depth < max_depth {
                        self.split(node_id);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Split `node_id` and any child still over capacity, level by level.
    fn split(&mut self, node_id: usize) {
        let mut pending = vec![node_id];
        while let Some(node_id) = pending.pop() {
            let bounds = self.nodes[node_id].bounds;
            let depth = self.nodes[node_id].depth + 1;
            let center = bounds.center();

            let entries = match &mut self.nodes[node_id].kind {
                NodeKind::Leaf(entries) => std::mem::take(entries),
                NodeKind::Internal(_) => continue,
            };

            let first_child = self.nodes.len();
            let children: [usize; 8] = std::array::from_fn(|o| first_child + o);
            for o in 0..8 {
                self.nodes.push(Node::leaf(octant_bounds(&bounds, center, o), depth));
            }
            for entry in entries {
                let child = children[octant(self.positions[entry], center)];
                if let NodeKind::Leaf(list) = &mut self.nodes[child].kind {
                    list.push(entry);
                }
            }
            self.nodes[node_id].kind = NodeKind::Internal(children);

            if depth < self.config.max_depth {
                pending.extend(children.into_iter().filter(|&child| {
                    matches!(
                        &self.nodes[child].kind,
                        NodeKind::Leaf(list) if list.len() > self.config.max_points_per_node
                    )
                }));
            }
        }
    }

    /// Closest indexed point to `query`.
    ///
    /// Descends into the octant containing the query first, then revisits
    /// sibling octants whose boxes are no farther than the best distance so
    /// far. Equidistant points resolve to the smaller cloud index.
    ///
    /// Edge cases:
    /// - Returns `None` on an empty tree or a non-finite query.
    pub fn nearest(&self, query: [f64; 3]) -> Option<Neighbor> {
        self.nearest_within(query, f64::INFINITY)
    }

    /// Like [`nearest`](Self::nearest) but ignores points farther than
    /// `max_distance` (inclusive bound).
    pub fn nearest_within(&self, query: [f64; 3], max_distance: f64) -> Option<Neighbor> {
        let mut stats = QueryStats::default();
        let valid = query.iter().all(|v| v.is_finite()) && max_distance >= 0.0;
        if self.is_empty() || !valid {
            self.last_stats.set(stats);
            return None;
        }

        let mut best = Best {
            dist_sq: max_distance * max_distance,
            entry: None,
        };
        self.nearest_in(ROOT, query, &mut best, &mut stats);

        let found = best.entry.map(|entry| Neighbor {
            index: self.indices[entry],
            position: self.positions[entry],
            distance: best.dist_sq.sqrt(),
        });
        stats.candidates_returned = usize::from(found.is_some());
        self.last_stats.set(stats);
        found
    }

    fn nearest_in(&self, node_id: usize, query: [f64; 3], best: &mut Best, stats: &mut QueryStats) {
        stats.nodes_visited += 1;
        let node = &self.nodes[node_id];
        match &node.kind {
            NodeKind::Leaf(entries) => {
                for &entry in entries {
                    stats.points_tested += 1;
                    let d = distance_sq(self.positions[entry], query);
                    if best.accepts(d, entry, &self.indices) {
                        best.dist_sq = d;
                        best.entry = Some(entry);
                    }
                }
            }
            NodeKind::Internal(children) => {
                let home = octant(query, node.bounds.center());
                let mut order: [(f64, bool, usize); 8] = std::array::from_fn(|o| {
                    let child = children[o];
                    (self.nodes[child].bounds.distance_sq_to(&query), o != home, child)
                });
                order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

                for (box_dist_sq, _, child) in order {
                    // Strict: an equidistant box may still hold a smaller index.
                    if box_dist_sq > best.dist_sq {
                        break;
                    }
                    self.nearest_in(child, query, best, stats);
                }
            }
        }
    }

    /// Cloud indices of every point in a leaf that is not rejected by the
    /// frustum. The test is per node box, so points near the frustum edge
    /// may be included.
    pub fn frustum_query(&self, frustum: &Frustum) -> Vec<usize> {
        let mut stats = QueryStats::default();
        let mut out = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(node_id) = stack.pop() {
            stats.nodes_visited += 1;
            let node = &self.nodes[node_id];
            if !frustum.intersects_aabb(&node.bounds) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(entries) => out.extend(entries.iter().map(|&e| self.indices[e])),
                NodeKind::Internal(children) => stack.extend(children.iter().rev()),
            }
        }
        stats.candidates_returned = out.len();
        self.last_stats.set(stats);
        out
    }

    /// Points within `tolerance` of the segment `ray.at(t)` for
    /// `t` in `[0, max_t]`, ordered by `t`, then distance, then index.
    ///
    /// Pass `f64::INFINITY` as `max_t` for an unbounded ray.
    pub fn ray_query(&self, ray: &Ray, max_t: f64, tolerance: f64) -> Vec<RayHit> {
        let mut stats = QueryStats::default();
        if self.is_empty() || !ray.is_valid() || !(tolerance >= 0.0) || !(max_t >= 0.0) {
            self.last_stats.set(stats);
            return Vec::new();
        }

        let tolerance_sq = tolerance * tolerance;
        let mut hits = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(node_id) = stack.pop() {
            stats.nodes_visited += 1;
            let node = &self.nodes[node_id];
            let reach = node.bounds.padded(tolerance);
            match ray_box_intersection(ray, &reach) {
                Some((enter, exit)) if exit >= 0.0 && enter <= max_t => {}
                _ => continue,
            }

            match &node.kind {
                NodeKind::Internal(children) => stack.extend(children.iter()),
                NodeKind::Leaf(entries) => {
                    for &entry in entries {
                        stats.points_tested += 1;
                        let position = self.positions[entry];
                        let t = ray.closest_parameter(position).clamp(0.0, max_t);
                        let d = distance_sq(position, ray.at(t));
                        if d <= tolerance_sq {
                            hits.push(RayHit {
                                index: self.indices[entry],
                                position,
                                t,
                                distance: d.sqrt(),
                            });
                        }
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            a.t.total_cmp(&b.t)
                .then(a.distance.total_cmp(&b.distance))
                .then(a.index.cmp(&b.index))
        });
        stats.candidates_returned = hits.len();
        self.last_stats.set(stats);
        hits
    }

    /// First point along the ray within `tolerance`, for picking.
    pub fn pick(&self, ray: &Ray, tolerance: f64) -> Option<RayHit> {
        self.ray_query(ray, f64::INFINITY, tolerance).into_iter().next()
    }
}

struct Best {
    dist_sq: f64,
    entry: Option<usize>,
}

impl Best {
    fn accepts(&self, dist_sq: f64, entry: usize, indices: &[usize]) -> bool {
        if dist_sq < self.dist_sq {
            return true;
        }
        dist_sq == self.dist_sq && self.entry.map_or(true, |best| indices[entry] < indices[best])
    }
}

/// Octant of `point` relative to `center`; ties go low.
fn octant(point: [f64; 3], center: [f64; 3]) -> usize {
    (0..3)
        .filter(|&axis| point[axis] > center[axis])
        .fold(0, |o, axis| o | (1 << axis))
}

fn octant_bounds(parent: &Aabb, center: [f64; 3], octant: usize) -> Aabb {
    let mut min = parent.min;
    let mut max = parent.max;
    for axis in 0..3 {
        if octant & (1 << axis) != 0 {
            min[axis] = center[axis];
        } else {
            max[axis] = center[axis];
        }
    }
    Aabb::new(min, max)
}
