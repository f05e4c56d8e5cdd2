//! Rays, clip planes and the box tests the octree traversals are built on.

use pointstream_core::Aabb;

/// Direction components smaller than this are treated as parallel to the
/// corresponding slab.
pub const PARALLEL_EPSILON: f64 = 1e-12;

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn distance_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let d = sub(a, b);
    dot(d, d)
}

/// Half-line `origin + t * direction`. The direction is not normalized, so
/// `t` is measured in multiples of its length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f64; 3],
    pub direction: [f64; 3],
}

impl Ray {
    pub fn new(origin: [f64; 3], direction: [f64; 3]) -> Self {
        Self { origin, direction }
    }

    /// Ray from `start` towards `end`; `t = 1` lands on `end`.
    pub fn through(start: [f64; 3], end: [f64; 3]) -> Self {
        Self::new(start, sub(end, start))
    }

    pub fn at(&self, t: f64) -> [f64; 3] {
        [
            self.origin[0] + t * self.direction[0],
            self.origin[1] + t * self.direction[1],
            self.origin[2] + t * self.direction[2],
        ]
    }

    /// Usable for queries: finite, with a non-zero direction.
    pub fn is_valid(&self) -> bool {
        self.origin.iter().chain(&self.direction).all(|v| v.is_finite())
            && dot(self.direction, self.direction) > 0.0
    }

    /// Parameter of the point on the ray closest to `point`, not clamped.
    pub fn closest_parameter(&self, point: [f64; 3]) -> f64 {
        dot(sub(point, self.origin), self.direction) / dot(self.direction, self.direction)
    }
}

/// Entry and exit parameters of `ray` through `aabb` using the slab method.
///
/// The interval is not clamped to `t >= 0`, so an origin inside the box
/// yields a negative entry. On an axis where the direction is within
/// [`PARALLEL_EPSILON`] of zero the ray never crosses that slab: the axis
/// adds no constraint if the origin lies inside the slab, otherwise the box
/// is missed entirely.
///
/// Edge cases:
/// - Returns `None` for an empty box or when the slabs do not overlap.
/// - A zero direction behaves as a point test on the origin, returning
///   the unbounded interval when the origin is inside.
pub fn ray_box_intersection(ray: &Ray, aabb: &Aabb) -> Option<(f64, f64)> {
    if aabb.is_empty() {
        return None;
    }

    let mut t_enter = f64::NEG_INFINITY;
    let mut t_exit = f64::INFINITY;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.direction[axis];
        if d.abs() < PARALLEL_EPSILON {
            if o < aabb.min[axis] || o > aabb.max[axis] {
                return None;
            }
            continue;
        }

        let mut t0 = (aabb.min[axis] - o) / d;
        let mut t1 = (aabb.max[axis] - o) / d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_enter = t_enter.max(t0);
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    Some((t_enter, t_exit))
}

/// Oriented plane `normal · p + d = 0`; the positive side is "inside".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: [f64; 3],
    pub d: f64,
}

impl Plane {
    pub fn new(normal: [f64; 3], d: f64) -> Self {
        Self { normal, d }
    }

    /// Plane from raw `[a, b, c, d]` coefficients, scaled so the normal has
    /// unit length. Degenerate coefficients are returned unscaled.
    pub fn from_coefficients([a, b, c, d]: [f64; 4]) -> Self {
        let len = (a * a + b * b + c * c).sqrt();
        if len > 0.0 && len.is_finite() {
            Self::new([a / len, b / len, c / len], d / len)
        } else {
            Self::new([a, b, c], d)
        }
    }

    pub fn signed_distance(&self, point: [f64; 3]) -> f64 {
        dot(self.normal, point) + self.d
    }
}

/// Visible volume bounded by clip planes. A point is visible when it lies
/// on the inside of every plane.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frustum {
    pub planes: Vec<Plane>,
}

impl Frustum {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Extract the six planes of a combined view-projection matrix
    /// (Gribb–Hartmann). `m` is row-major and maps column vectors to clip
    /// space with `-w <= x, y, z <= w`.
    pub fn from_view_projection(m: [[f64; 4]; 4]) -> Self {
        let row = |i: usize| m[i];
        let combine = |a: [f64; 4], b: [f64; 4], sign: f64| {
            [a[0] + sign * b[0], a[1] + sign * b[1], a[2] + sign * b[2], a[3] + sign * b[3]]
        };
        let w = row(3);
        let planes = [
            combine(w, row(0), 1.0),
            combine(w, row(0), -1.0),
            combine(w, row(1), 1.0),
            combine(w, row(1), -1.0),
            combine(w, row(2), 1.0),
            combine(w, row(2), -1.0),
        ]
        .into_iter()
        .map(Plane::from_coefficients)
        .collect();
        Self { planes }
    }

    pub fn contains_point(&self, point: [f64; 3]) -> bool {
        self.planes.iter().all(|p| p.signed_distance(point) >= 0.0)
    }

    /// Conservative box test: `false` only when all eight corners are on
    /// the outside of a single plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        let corners = aabb.corners();
        !self
            .planes
            .iter()
            .any(|plane| corners.iter().all(|&c| plane.signed_distance(c) < 0.0))
    }

    /// Every corner is inside every plane.
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        !aabb.is_empty()
            && aabb
                .corners()
                .iter()
                .all(|&c| self.contains_point(c))
    }
}
