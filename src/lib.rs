// #![warn(missing_docs)]

//! Panoramic to Multi-View Rig Synthesis
//!
//! Renders pinhole views from equirectangular frames and describes them as a
//! rigid camera rig for multi-camera structure from motion.

#[allow(missing_docs)]
pub mod error;

pub mod camera;
pub mod config;
pub mod emit;
pub mod frame;
pub mod intrinsics;
pub mod pipeline;
pub mod projection;
pub mod reconstruct;
pub mod rig;
pub mod view;

pub use crate::error::Error;
