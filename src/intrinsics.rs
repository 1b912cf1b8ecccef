use crate::error::Error;
use nalgebra::{Point2, Vector3};

/// Pinhole intrinsics of a synthesized view.
///
/// Focal lengths and principal point are in pixels, fields of view in degrees.
/// Image coordinates place the center of pixel `(col, row)` at
/// `(col + 0.5, row + 0.5)`, so the default principal point is the image
/// center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraIntrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
    fov_h: f64,
    fov_v: f64,
}

impl CameraIntrinsics {
    /// Derives intrinsics from an output resolution and fields of view.
    ///
    /// The focal length along each axis is
    /// ```text
    /// f = (size / 2) / tan(fov / 2)
    /// ```
    /// Returns an error if either field of view is not strictly between 0
    /// and 180 degrees or the resolution has a zero side.
    pub fn from_fov(
        width: u32,
        height: u32,
        fov_h_deg: f64,
        fov_v_deg: f64,
    ) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidResolution { width, height });
        }

        Ok(Self {
            fx: focal_length(width, fov_h_deg)?,
            fy: focal_length(height, fov_v_deg)?,
            cx: width as f64 / 2.,
            cy: height as f64 / 2.,
            width,
            height,
            fov_h: fov_h_deg,
            fov_v: fov_v_deg,
        })
    }

    /// Overrides the principal point.
    ///
    /// Returns an error unless both coordinates are finite and positive.
    pub fn with_principal_point(mut self, cx: f64, cy: f64) -> Result<Self, Error> {
        if !(cx.is_finite() && cy.is_finite() && cx > 0.0 && cy > 0.0) {
            return Err(Error::InvalidPrincipalPoint { cx, cy });
        }

        self.cx = cx;
        self.cy = cy;
        Ok(self)
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Horizontal field of view in degrees.
    pub fn fov_h(&self) -> f64 {
        self.fov_h
    }

    /// Vertical field of view in degrees.
    pub fn fov_v(&self) -> f64 {
        self.fov_v
    }

    /// Returns `[fx, fy, cx, cy]`, the parameter order of a PINHOLE camera.
    pub fn params(&self) -> [f64; 4] {
        [self.fx, self.fy, self.cx, self.cy]
    }

    /// Unprojects the image point `point` onto the `z = 1` plane of the camera
    /// frame.
    pub fn unproject(&self, point: &Point2<f64>) -> Vector3<f64> {
        Vector3::new(
            (point.x - self.cx) / self.fx,
            (point.y - self.cy) / self.fy,
            1.0,
        )
    }

    /// Projects a camera frame direction onto the image.
    ///
    /// Returns `None` if `ray` does not point in front of the camera.
    pub fn project(&self, ray: &Vector3<f64>) -> Option<Point2<f64>> {
        if ray.z <= 0.0 {
            return None;
        }

        Some(Point2::new(
            self.fx * ray.x / ray.z + self.cx,
            self.fy * ray.y / ray.z + self.cy,
        ))
    }
}

fn focal_length(size: u32, fov_deg: f64) -> Result<f64, Error> {
    if !(fov_deg > 0.0 && fov_deg < 180.0) {
        return Err(Error::InvalidFieldOfView { fov_deg });
    }

    Ok((size as f64 / 2.) / (fov_deg.to_radians() / 2.).tan())
}
