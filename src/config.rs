//! Run configuration.
//!
//! A [`RunConfig`] is what users write. It is validated into [`Settings`],
//! which is what a run consumes, so that every configuration error surfaces
//! before any frame is read.

use crate::{
    emit::OutputFormat,
    error::Error,
    frame::FrameInterval,
    intrinsics::CameraIntrinsics,
    rig::{Rig, compute_rig},
    view::{View, ViewCatalog},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;
use uom::si::{angle::degree, f64::Angle};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Keep every `frame_interval`-th frame.
    pub frame_interval: usize,

    /// Output resolution of every view in pixels.
    pub width: u32,
    pub height: u32,

    /// Fields of view in degrees.
    pub fov_h: f64,
    pub fov_v: f64,

    /// Principal point override in pixels. Defaults to the image center.
    pub cx: Option<f64>,
    pub cy: Option<f64>,

    pub views: ViewLayout,

    /// Name of the rig reference view. Defaults to the first view.
    pub reference_view: Option<String>,

    pub image_format: OutputFormat,

    /// Number of rendered images that may wait for the writer.
    pub queue_capacity: usize,

    /// Also write every sampled panorama.
    pub save_panoramas: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frame_interval: 24,
            width: 640,
            height: 480,
            fov_h: 120.0,
            fov_v: 120.0,
            cx: None,
            cy: None,
            views: ViewLayout::default(),
            reference_view: None,
            image_format: OutputFormat::Jpeg,
            queue_capacity: 16,
            save_panoramas: false,
        }
    }
}

/// How the view catalog is described.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum ViewLayout {
    /// Views listed one by one.
    Explicit { views: Vec<ViewSpec> },

    /// `yaw_steps` views evenly spaced in yaw, at `+base_pitch` and
    /// `-base_pitch`.
    Ring {
        base_pitch: f64,
        yaw_steps: usize,
        #[serde(default)]
        yaw_offset: f64,
    },
}

impl Default for ViewLayout {
    fn default() -> Self {
        let view = |name: &str, pitch, yaw| ViewSpec {
            name: name.to_string(),
            pitch,
            yaw,
        };

        ViewLayout::Explicit {
            views: vec![
                view("pitch_0_yaw_0", 0.0, 0.0),
                view("pitch_0_yaw_60", 0.0, 60.0),
                view("pitch_0_yaw_300", 0.0, 300.0),
            ],
        }
    }
}

impl ViewLayout {
    pub fn catalog(&self) -> Result<ViewCatalog, Error> {
        match self {
            ViewLayout::Explicit { views } => ViewCatalog::new(
                views
                    .iter()
                    .map(|spec| View::from_degrees(spec.name.as_str(), spec.pitch, spec.yaw))
                    .collect::<Result<_, _>>()?,
            ),
            ViewLayout::Ring {
                base_pitch,
                yaw_steps,
                yaw_offset,
            } => ViewCatalog::ring(
                Angle::new::<degree>(*base_pitch),
                *yaw_steps,
                Angle::new::<degree>(*yaw_offset),
            ),
        }
    }
}

/// A single view in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewSpec {
    pub name: String,
    pub pitch: f64,
    pub yaw: f64,
}

/// A validated run configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub interval: FrameInterval,
    pub intrinsics: CameraIntrinsics,
    pub catalog: ViewCatalog,
    pub rig: Rig,
    pub format: OutputFormat,
    pub queue_capacity: usize,
    pub save_panoramas: bool,
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(path)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    /// Checks every parameter and computes the rig.
    pub fn validate(&self) -> Result<Settings, Error> {
        let interval = FrameInterval::new(self.frame_interval)?;

        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        let intrinsics = CameraIntrinsics::from_fov(self.width, self.height, self.fov_h, self.fov_v)?;
        let intrinsics = intrinsics.with_principal_point(
            self.cx.unwrap_or(intrinsics.cx()),
            self.cy.unwrap_or(intrinsics.cy()),
        )?;

        let catalog = self.views.catalog()?;
        if catalog.is_empty() {
            return Err(Error::EmptyCatalog);
        }

        let rig = compute_rig(&catalog, self.reference_view.as_deref())?;

        info!(
            "configured {} views at {}x{}, keeping every {} frames",
            catalog.len(),
            self.width,
            self.height,
            interval.get()
        );

        Ok(Settings {
            interval,
            intrinsics,
            catalog,
            rig,
            format: self.image_format,
            queue_capacity: self.queue_capacity,
            save_panoramas: self.save_panoramas,
        })
    }
}
