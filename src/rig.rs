//! Rig extrinsics of the virtual cameras.
//!
//! All views share the panorama's optical center, so the rig is a pure
//! rotation rig. Each non-reference camera carries `cam_from_rig`, the
//! rotation taking vectors expressed in the reference camera's frame into the
//! camera's own frame:
//!
//! ```text
//! cam_from_rig = inverse(world_from_cam) * world_from_ref
//! ```
//!
//! This is the direction the reconstruction engine reads from
//! `cam_from_rig_rotation`.

use crate::{error::Error, view::ViewCatalog};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::debug;

/// The pose of a camera in the rig.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RigPose {
    /// The camera defining the rig frame.
    Reference,

    /// A camera at a fixed rotation from the reference and no baseline.
    Relative { cam_from_rig: UnitQuaternion<f64> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigCamera {
    image_prefix: String,
    pose: RigPose,
}

impl RigCamera {
    pub fn image_prefix(&self) -> &str {
        &self.image_prefix
    }

    pub fn pose(&self) -> &RigPose {
        &self.pose
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.pose, RigPose::Reference)
    }

    /// Returns `cam_from_rig`, or `None` for the reference camera.
    pub fn rotation(&self) -> Option<UnitQuaternion<f64>> {
        match self.pose {
            RigPose::Reference => None,
            RigPose::Relative { cam_from_rig } => Some(cam_from_rig),
        }
    }

    /// Returns `cam_from_rig` in `(w, x, y, z)` order.
    pub fn rotation_wxyz(&self) -> Option<[f64; 4]> {
        self.rotation().map(|q| [q.w, q.i, q.j, q.k])
    }

    /// Returns the translation from the reference, always zero, or `None`
    /// for the reference camera.
    pub fn translation(&self) -> Option<Vector3<f64>> {
        self.rotation().map(|_| Vector3::zeros())
    }
}

/// An ordered set of rig cameras with exactly one reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Rig {
    cameras: Vec<RigCamera>,
    reference: usize,
}

impl Rig {
    pub fn cameras(&self) -> &[RigCamera] {
        &self.cameras
    }

    pub fn reference(&self) -> &RigCamera {
        &self.cameras[self.reference]
    }

    pub fn get(&self, image_prefix: &str) -> Option<&RigCamera> {
        self.cameras
            .iter()
            .find(|camera| camera.image_prefix == image_prefix)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

/// Computes the rig extrinsics of `catalog`.
///
/// The reference is the view named `reference`, or the first view of the
/// catalog when `None`. Cameras keep catalog order.
pub fn compute_rig(catalog: &ViewCatalog, reference: Option<&str>) -> Result<Rig, Error> {
    let reference_view = match reference {
        Some(name) => catalog.get(name).ok_or_else(|| Error::UnknownReference {
            name: name.to_string(),
        })?,
        None => catalog.first().ok_or(Error::EmptyCatalog)?,
    };

    let world_from_ref = UnitQuaternion::from_rotation_matrix(&reference_view.orientation());

    let reference = catalog
        .position(reference_view.name())
        .ok_or(Error::EmptyCatalog)?;

    let cameras = catalog
        .views()
        .iter()
        .map(|view| {
            let pose = match view.name() == reference_view.name() {
                true => RigPose::Reference,
                false => {
                    let world_from_cam = UnitQuaternion::from_rotation_matrix(&view.orientation());
                    RigPose::Relative {
                        cam_from_rig: canonical(world_from_cam.inverse() * world_from_ref),
                    }
                }
            };

            RigCamera {
                image_prefix: view.name().to_string(),
                pose,
            }
        })
        .collect();

    debug!(
        "computed rig of {} cameras with reference {}",
        catalog.len(),
        reference_view.name()
    );

    Ok(Rig { cameras, reference })
}

/// Renormalizes `q` and picks the sign with a non-negative scalar part.
fn canonical(q: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let q = q.into_inner();
    let q = match q.w < 0.0 {
        true => Quaternion::new(-q.w, -q.i, -q.j, -q.k),
        false => q,
    };
    UnitQuaternion::new_normalize(q)
}
