use crate::cloud::{CloudId, PointCloud};
use hashbrown::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct CachedSample {
    revision: u64,
    target: usize,
    indices: Arc<Vec<usize>>,
}

/// Density-sampled preview indices, keyed by cloud identity.
///
/// An entry is recomputed when the cloud's revision or sample size changes
/// and is only dropped by an explicit [`invalidate`](Self::invalidate), which
/// the owner calls when the cloud goes away.
#[derive(Debug, Default)]
pub struct SampleCache {
    entries: HashMap<CloudId, CachedSample>,
    max_points_sampled: usize,
}

impl SampleCache {
    pub fn new(max_points_sampled: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_points_sampled,
        }
    }

    pub fn get_or_compute(&mut self, cloud: &PointCloud) -> Arc<Vec<usize>> {
        let target = cloud.sample_target(self.max_points_sampled);
        let revision = cloud.revision();
        if let Some(entry) = self.entries.get(&cloud.id()) {
            if entry.revision == revision && entry.target == target {
                return Arc::clone(&entry.indices);
            }
        }

        let indices = Arc::new(cloud.sampled_indices(self.max_points_sampled).collect::<Vec<_>>());
        self.entries.insert(
            cloud.id(),
            CachedSample {
                revision,
                target,
                indices: Arc::clone(&indices),
            },
        );
        indices
    }

    /// Forget the entry for `id`. Returns whether one existed.
    pub fn invalidate(&mut self, id: CloudId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
