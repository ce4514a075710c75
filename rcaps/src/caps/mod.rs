mod conv;
mod dense;
mod routing;
mod squash;

pub use conv::{ConvCapsuleLayer, ConvCapsuleLayerParams};
pub use dense::{CapsuleLayer, CapsuleLayerParams};
pub use routing::{RoutingOutput, RoutingParams, route_conv, route_dense};
pub use squash::squash;

/// Added to capsule norms before dividing so that zero vectors squash to zero
/// instead of NaN.
pub const NORM_EPSILON: f64 = 1e-8;
