use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpatialError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpatialError {
    #[error("cloud bounds are not finalized; call finalize_bounds before indexing")]
    BoundsNotFinalized,

    #[error("point {point:?} lies outside the octree bounds")]
    OutOfBounds { point: [f64; 3] },
}
