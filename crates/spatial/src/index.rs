use crate::error::Result;
use crate::geometry::{Frustum, Ray};
use crate::octree::{Neighbor, Octree, OctreeConfig, RayHit};
use pointstream_core::{CloudId, PointCloud, Settings};
use tracing::debug;

#[derive(Debug)]
struct Cached {
    cloud: CloudId,
    revision: u64,
    tree: Octree,
}

/// Octree for one cloud, built on first use and rebuilt whenever the
/// cloud's positions change. Color edits keep the cached tree.
#[derive(Debug)]
pub struct CloudIndex {
    config: OctreeConfig,
    cached: Option<Cached>,
    builds: usize,
}

impl CloudIndex {
    pub fn new(settings: &Settings) -> Self {
        Self::with_config(OctreeConfig::from(settings))
    }

    pub fn with_config(config: OctreeConfig) -> Self {
        Self {
            config,
            cached: None,
            builds: 0,
        }
    }

    /// Current tree for `cloud`, building it if missing or stale.
    ///
    /// A failed build leaves any previously cached tree in place.
    pub fn octree(&mut self, cloud: &PointCloud) -> Result<&Octree> {
        let revision = cloud.geometry_revision();
        let cached = match self.cached.take() {
            Some(c) if c.cloud == cloud.id() && c.revision == revision => c,
            previous => match Octree::from_cloud(cloud, self.config) {
                Ok(tree) => {
                    self.builds += 1;
                    debug!(cloud = cloud.name(), revision, points = tree.len(), "octree rebuilt");
                    Cached {
                        cloud: cloud.id(),
                        revision,
                        tree,
                    }
                }
                Err(err) => {
                    self.cached = previous;
                    return Err(err);
                }
            },
        };
        Ok(&self.cached.insert(cached).tree)
    }

    pub fn nearest(&mut self, cloud: &PointCloud, query: [f64; 3]) -> Result<Option<Neighbor>> {
        Ok(self.octree(cloud)?.nearest(query))
    }

    /// Indices of points in octree leaves that intersect `frustum`.
    pub fn visible_points(&mut self, cloud: &PointCloud, frustum: &Frustum) -> Result<Vec<usize>> {
        Ok(self.octree(cloud)?.frustum_query(frustum))
    }

    pub fn pick(&mut self, cloud: &PointCloud, ray: &Ray, tolerance: f64) -> Result<Option<RayHit>> {
        Ok(self.octree(cloud)?.pick(ray, tolerance))
    }

    /// Drop the cached tree, e.g. when the cloud is discarded.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn is_built(&self) -> bool {
        self.cached.is_some()
    }

    /// Number of trees built so far.
    pub fn build_count(&self) -> usize {
        self.builds
    }
}
