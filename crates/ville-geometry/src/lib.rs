//! `ville-geometry` – frame conversion between the simulation grid and the
//! field.
//!
//! # Modules
//!
//! - [`transform`] – [`CoordinateTransform`][transform::CoordinateTransform]:
//!   an invertible translate → reflect → rotate → scale → translate mapping,
//!   constructed from explicit parameters or fitted to known point pairs.

pub mod transform;

pub use transform::{AffineTransformConfig, CoordinateTransform, Mat2};
