//! Output layout and the documents handed to the reconstruction engine.
//!
//! ```text
//! <root>/pinhole_images/images/<view_name>/<frame_index:06>.<ext>
//! <root>/pinhole_images/camera_params.json
//! <root>/pinhole_images/rig_config.json
//! <root>/pano_images/images/pano_<frame_index:04>.<ext>
//! <root>/run.json
//! ```

use crate::{
    error::Error,
    intrinsics::CameraIntrinsics,
    rig::Rig,
    view::{View, ViewCatalog},
};
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use uom::si::angle::degree;

/// Encoding of the written images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
        }
    }
}

/// Paths of everything a run writes below its output root.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputLayout {
    root: PathBuf,
    format: OutputFormat,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn pinhole_dir(&self) -> PathBuf {
        self.root.join("pinhole_images")
    }

    /// The image root handed to the reconstruction engine.
    pub fn images_dir(&self) -> PathBuf {
        self.pinhole_dir().join("images")
    }

    pub fn view_dir(&self, view_name: &str) -> PathBuf {
        self.images_dir().join(view_name)
    }

    pub fn image_name(&self, frame_index: usize) -> String {
        format!("{frame_index:06}.{}", self.format.extension())
    }

    pub fn image_path(&self, view_name: &str, frame_index: usize) -> PathBuf {
        self.view_dir(view_name).join(self.image_name(frame_index))
    }

    pub fn pano_dir(&self) -> PathBuf {
        self.root.join("pano_images").join("images")
    }

    pub fn pano_path(&self, frame_index: usize) -> PathBuf {
        self.pano_dir()
            .join(format!("pano_{frame_index:04}.{}", self.format.extension()))
    }

    pub fn camera_params_path(&self) -> PathBuf {
        self.pinhole_dir().join("camera_params.json")
    }

    pub fn rig_config_path(&self) -> PathBuf {
        self.pinhole_dir().join("rig_config.json")
    }

    pub fn camera_updates_path(&self) -> PathBuf {
        self.pinhole_dir().join("camera_updates.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("run.json")
    }

    /// Creates the per-view image directories, and the panorama directory if
    /// `save_panoramas` is set.
    pub fn prepare(&self, catalog: &ViewCatalog, save_panoramas: bool) -> Result<(), Error> {
        let mut dirs: Vec<PathBuf> = catalog
            .views()
            .iter()
            .map(|view| self.view_dir(view.name()))
            .collect();
        if save_panoramas {
            dirs.push(self.pano_dir());
        }

        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|err| Error::SerializationFailure {
                path: dir.clone(),
                reason: err.to_string(),
            })?;
        }

        debug!("prepared output layout under {}", self.root.display());
        Ok(())
    }
}

/// One rendered pinhole image.
#[derive(Clone, Debug, PartialEq)]
pub struct PinholeImageRecord {
    /// Index of the source frame in the input sequence.
    pub frame_index: usize,

    /// Ordinal of the source frame among the sampled frames.
    pub pano_index: usize,

    pub view: View,
    pub intrinsics: CameraIntrinsics,
    pub save_path: PathBuf,
}

impl PinholeImageRecord {
    pub fn view_name(&self) -> &str {
        self.view.name()
    }

    pub fn image_name(&self) -> String {
        self.save_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An entry of `camera_params.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParamsEntry {
    pub image_name: String,
    pub image_prefix: String,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
    pub fov_h: f64,
    pub fov_v: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub pano_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_sensor: Option<bool>,
}

impl CameraParamsEntry {
    /// The image path relative to the image root, `<image_prefix>/<image_name>`.
    pub fn image_key(&self) -> String {
        format!("{}/{}", self.image_prefix, self.image_name)
    }

    pub fn params(&self) -> [f64; 4] {
        [self.fx, self.fy, self.cx, self.cy]
    }
}

/// Assembles the `camera_params.json` entries of `records`.
///
/// Entries are ordered by sampled frame, then by catalog order, whatever the
/// order of `records`.
pub fn camera_params(
    records: &[PinholeImageRecord],
    catalog: &ViewCatalog,
    rig: &Rig,
) -> Vec<CameraParamsEntry> {
    let reference = rig.reference().image_prefix();

    let mut keyed: Vec<_> = records
        .iter()
        .map(|record| {
            let position = catalog.position(record.view_name()).unwrap_or(usize::MAX);
            ((record.pano_index, position), entry(record, reference))
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);

    keyed.into_iter().map(|(_, entry)| entry).collect()
}

fn entry(record: &PinholeImageRecord, reference: &str) -> CameraParamsEntry {
    let intrinsics = &record.intrinsics;
    CameraParamsEntry {
        image_name: record.image_name(),
        image_prefix: record.view_name().to_string(),
        fx: intrinsics.fx(),
        fy: intrinsics.fy(),
        cx: intrinsics.cx(),
        cy: intrinsics.cy(),
        width: intrinsics.width(),
        height: intrinsics.height(),
        fov_h: intrinsics.fov_h(),
        fov_v: intrinsics.fov_v(),
        yaw: record.view.yaw().get::<degree>(),
        pitch: record.view.pitch().get::<degree>(),
        pano_index: record.pano_index,
        ref_sensor: (record.view_name() == reference).then_some(true),
    }
}

/// A rig of `rig_config.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigDescriptor {
    pub cameras: Vec<RigCameraEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigCameraEntry {
    /// The camera's image directory with a trailing `/`. The engine matches
    /// it as a plain string prefix of image names.
    pub image_prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_sensor: Option<bool>,

    /// `(w, x, y, z)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_from_rig_rotation: Option<[f64; 4]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_from_rig_translation: Option<[f64; 3]>,
}

/// Assembles the `rig_config.json` document, a list holding the one rig.
pub fn rig_config(rig: &Rig) -> Vec<RigDescriptor> {
    let cameras = rig
        .cameras()
        .iter()
        .map(|camera| RigCameraEntry {
            image_prefix: format!("{}/", camera.image_prefix()),
            ref_sensor: camera.is_reference().then_some(true),
            cam_from_rig_rotation: camera.rotation_wxyz(),
            cam_from_rig_translation: camera.translation().map(|t| [t.x, t.y, t.z]),
        })
        .collect();

    vec![RigDescriptor { cameras }]
}

/// Summary of a run, written to `run.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub views: usize,
    pub frames_sampled: usize,
    pub images_written: usize,
    pub aborted: bool,
    pub failures: Vec<String>,
}

/// Writes `value` as pretty-printed JSON to `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), Error> {
    let failure = |reason: String| Error::SerializationFailure {
        path: path.to_path_buf(),
        reason,
    };

    let json = serde_json::to_string_pretty(value).map_err(|err| failure(err.to_string()))?;
    fs::write(path, json).map_err(|err| failure(err.to_string()))?;

    debug!("wrote {}", path.display());
    Ok(())
}
