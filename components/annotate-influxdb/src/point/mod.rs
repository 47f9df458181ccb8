//! Point model and line protocol encoding.
pub mod point;
