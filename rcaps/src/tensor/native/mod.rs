pub mod base;
mod debug;
pub mod owned;
pub mod view;
#[cfg(any(test, feature = "approx"))]
mod approx;
