/// Axis-aligned bounding box.
///
/// An empty box is an explicit state, not an inverted `min > max` pair:
/// [`Aabb::empty`] carries an `empty` flag and reports `false` for every
/// containment test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
    empty: bool,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
            empty: true,
        }
    }

    /// Box spanning `min..=max`; corners are reordered per axis if needed.
    pub fn new(a: [f64; 3], b: [f64; 3]) -> Self {
        let mut min = a;
        let mut max = b;
        for axis in 0..3 {
            if min[axis] > max[axis] {
                std::mem::swap(&mut min[axis], &mut max[axis]);
            }
        }
        Self {
            min,
            max,
            empty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn expand_with_point(&mut self, point: [f64; 3]) {
        if !point.iter().all(|v| v.is_finite()) {
            return;
        }

        if self.empty {
            self.min = point;
            self.max = point;
            self.empty = false;
            return;
        }

        for (axis, &val) in point.iter().enumerate() {
            self.min[axis] = self.min[axis].min(val);
            self.max[axis] = self.max[axis].max(val);
        }
    }

    /// Componentwise min of mins and max of maxes.
    pub fn merge(&mut self, other: &Aabb) {
        if other.empty {
            return;
        }
        if self.empty {
            *self = *other;
            return;
        }
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    pub fn contains(&self, point: &[f64; 3]) -> bool {
        if self.empty || !point.iter().all(|v| v.is_finite()) {
            return false;
        }

        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn extent(&self) -> [f64; 3] {
        if self.empty {
            return [0.0; 3];
        }
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Grow every side by `margin`.
    pub fn padded(&self, margin: f64) -> Self {
        if self.empty {
            return *self;
        }
        Self {
            min: [
                self.min[0] - margin,
                self.min[1] - margin,
                self.min[2] - margin,
            ],
            max: [
                self.max[0] + margin,
                self.max[1] + margin,
                self.max[2] + margin,
            ],
            empty: false,
        }
    }

    /// Squared distance from `point` to the closest point of the box.
    pub fn distance_sq_to(&self, point: &[f64; 3]) -> f64 {
        if self.empty {
            return f64::INFINITY;
        }
        let mut d2 = 0.0;
        for axis in 0..3 {
            let v = point[axis];
            let d = if v < self.min[axis] {
                self.min[axis] - v
            } else if v > self.max[axis] {
                v - self.max[axis]
            } else {
                0.0
            };
            d2 += d * d;
        }
        d2
    }

    pub fn corners(&self) -> [[f64; 3]; 8] {
        let (lo, hi) = (self.min, self.max);
        std::array::from_fn(|i| {
            [
                if i & 1 == 0 { lo[0] } else { hi[0] },
                if i & 2 == 0 { lo[1] } else { hi[1] },
                if i & 4 == 0 { lo[2] } else { hi[2] },
            ]
        })
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 3]>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_with_point(*p);
        }
        aabb
    }
}

/// Closed scalar range, used for intensity aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    /// Range of the finite values in `values`, or `None` if there are none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut range: Option<Self> = None;
        for &v in values {
            if !v.is_finite() {
                continue;
            }
            match range.as_mut() {
                Some(r) => {
                    r.min = r.min.min(v);
                    r.max = r.max.max(v);
                }
                None => range = Some(Self { min: v, max: v }),
            }
        }
        range
    }

    pub fn merge(self, other: ValueRange) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Position of `value` in the range mapped to `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.span();
        if span <= f64::EPSILON {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}
