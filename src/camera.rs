use crate::{intrinsics::CameraIntrinsics, view::View};
use nalgebra::{Point2, Rotation3, Vector3};
use std::f64::consts::PI;

/// A direction on the panoramic sphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyPoint {
    /// Longitude in radians, positive to the right of the panorama center.
    lon: f64,

    /// Latitude in radians, positive above the horizon.
    lat: f64,
}

impl SkyPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Computes the longitude and latitude of `dir`, a direction in the
    /// panoramic frame (x right, y down, z forward). `dir` need not be
    /// normalized.
    pub fn from_direction(dir: &Vector3<f64>) -> Self {
        Self {
            lon: dir.x.atan2(dir.z),
            lat: (-dir.y).atan2(dir.x.hypot(dir.z)),
        }
    }

    /// Returns the unit vector pointing at `self`.
    pub fn to_direction(&self) -> Vector3<f64> {
        // Let ||dir|| = 1
        //
        // Then,
        // x = cos(lat) * sin(lon)
        // y = -sin(lat)
        // z = cos(lat) * cos(lon)
        let a = self.lat.cos();
        Vector3::new(a * self.lon.sin(), -self.lat.sin(), a * self.lon.cos())
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Maps `self` to fractional pixel coordinates of a `width` x `height`
    /// equirectangular image.
    ///
    /// Longitude spans the full width and latitude the full height. Pixel
    /// centers sit at half-integer coordinates, so the returned point is
    /// offset by half a pixel to index the buffer directly.
    pub fn to_equirect(&self, width: u32, height: u32) -> Point2<f64> {
        Point2::new(
            (self.lon / (2. * PI) + 0.5) * width as f64 - 0.5,
            (0.5 - self.lat / PI) * height as f64 - 0.5,
        )
    }
}

/// Represents a virtual pinhole camera at the panorama's optical center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinholeCamera {
    intrinsics: CameraIntrinsics,

    /// Rotates camera frame vectors into the panoramic frame.
    world_from_cam: Rotation3<f64>,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics, world_from_cam: Rotation3<f64>) -> Self {
        Self {
            intrinsics,
            world_from_cam,
        }
    }

    pub fn for_view(view: &View, intrinsics: CameraIntrinsics) -> Self {
        Self::new(intrinsics, view.orientation())
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Trace the center of the pixel at `(col, row)` through the lens and onto
    /// the panoramic sphere.
    pub fn trace_from_pixel(&self, col: u32, row: u32) -> SkyPoint {
        self.trace_from_image(&Point2::new(col as f64 + 0.5, row as f64 + 0.5))
    }

    /// Trace an image point through the lens and onto the panoramic sphere.
    pub fn trace_from_image(&self, point: &Point2<f64>) -> SkyPoint {
        // Unproject with the pinhole model, then rotate the ray from the
        // camera frame into the panoramic frame.
        let ray = self.world_from_cam * self.intrinsics.unproject(point);
        SkyPoint::from_direction(&ray)
    }

    /// Trace a point on the panoramic sphere back through the lens and onto
    /// the image plane.
    ///
    /// Returns `None` if the point lies behind the camera.
    pub fn trace_from_sky(&self, sky_point: &SkyPoint) -> Option<Point2<f64>> {
        let ray = self.world_from_cam.inverse() * sky_point.to_direction();
        self.intrinsics.project(&ray)
    }
}
