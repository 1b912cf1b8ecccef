//! Hand-off to the external reconstruction engine (COLMAP).
//!
//! A [`ReconstructionPlan`] is the ordered list of engine invocations that
//! turn the emitted images and rig document into a sparse model. Per-image
//! intrinsics travel as the explicit `camera_updates.json` document; when all
//! images share the same intrinsics they are also handed to the feature
//! extractor directly.

use crate::{
    emit::{CameraParamsEntry, OutputLayout},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    fmt,
    fs,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    str::FromStr,
    thread,
};
use tracing::info;

/// Camera models the feature extractor may assign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraModel {
    #[default]
    Pinhole,
    SimplePinhole,
    SimpleRadial,
}

impl CameraModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::SimplePinhole => "SIMPLE_PINHOLE",
            CameraModel::SimpleRadial => "SIMPLE_RADIAL",
        }
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PINHOLE" => Ok(CameraModel::Pinhole),
            "SIMPLE_PINHOLE" => Ok(CameraModel::SimplePinhole),
            "SIMPLE_RADIAL" => Ok(CameraModel::SimpleRadial),
            _ => Err(Error::InvalidConfig(format!("unknown camera model: {s}"))),
        }
    }
}

/// How the engine picks image pairs to match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Matcher {
    /// Neighbouring frames, with loop detection.
    #[default]
    Sequential,
    Exhaustive,
    VocabTree,
    /// Pairs near each other according to location priors.
    Spatial,
}

impl Matcher {
    pub fn as_str(&self) -> &'static str {
        match self {
            Matcher::Sequential => "sequential",
            Matcher::Exhaustive => "exhaustive",
            Matcher::VocabTree => "vocabtree",
            Matcher::Spatial => "spatial",
        }
    }

    /// The engine subcommand.
    pub fn step_name(&self) -> &'static str {
        match self {
            Matcher::Sequential => "sequential_matcher",
            Matcher::Exhaustive => "exhaustive_matcher",
            Matcher::VocabTree => "vocab_tree_matcher",
            Matcher::Spatial => "spatial_matcher",
        }
    }

    fn step(&self, database: &Path) -> EngineStep {
        let step = EngineStep::new(self.step_name()).arg("--database_path", database);
        match self {
            Matcher::Sequential => step.arg("--SequentialMatching.loop_detection", "1"),
            _ => step,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Matcher {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Matcher::Sequential),
            "exhaustive" => Ok(Matcher::Exhaustive),
            "vocabtree" => Ok(Matcher::VocabTree),
            "spatial" => Ok(Matcher::Spatial),
            _ => Err(Error::InvalidConfig(format!("unknown matcher: {s}"))),
        }
    }
}

/// Maps `<image_prefix>/<image_name>` to `[fx, fy, cx, cy]`.
pub type CameraUpdates = BTreeMap<String, [f64; 4]>;

/// Collects the intrinsics of every emitted image, keyed by its path
/// relative to the image root.
pub fn camera_updates(entries: &[CameraParamsEntry]) -> CameraUpdates {
    entries
        .iter()
        .map(|entry| (entry.image_key(), entry.params()))
        .collect()
}

/// Returns the intrinsics of `entries` if they are all equal.
pub fn shared_camera_params(entries: &[CameraParamsEntry]) -> Option<[f64; 4]> {
    let (first, rest) = entries.split_first()?;
    let params = first.params();
    rest.iter()
        .all(|entry| entry.params() == params)
        .then_some(params)
}

/// Inputs of a [`ReconstructionPlan`].
#[derive(Clone, Debug, PartialEq)]
pub struct PlanConfig {
    /// The engine executable.
    pub program: PathBuf,

    /// Directory holding one sub-directory of images per rig camera.
    pub image_path: PathBuf,

    pub rig_config: PathBuf,

    /// Receives `database.db` and the `sparse` models.
    pub workspace: PathBuf,

    pub camera_model: CameraModel,
    pub matcher: Matcher,
    pub random_seed: u64,

    /// Open the first sparse model in the engine's viewer once mapping is
    /// done.
    pub visualize: bool,

    /// Intrinsics shared by every image, if any.
    pub camera_params: Option<[f64; 4]>,
}

impl PlanConfig {
    /// Plans over the output of a conversion run.
    pub fn for_layout(layout: &OutputLayout, workspace: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from(default_program()),
            image_path: layout.images_dir(),
            rig_config: layout.rig_config_path(),
            workspace: workspace.into(),
            camera_model: CameraModel::default(),
            matcher: Matcher::default(),
            random_seed: 0,
            visualize: false,
            camera_params: None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.workspace.join("database.db")
    }

    pub fn sparse_path(&self) -> PathBuf {
        self.workspace.join("sparse")
    }
}

fn default_program() -> &'static str {
    match cfg!(windows) {
        true => "colmap.exe",
        false => "colmap",
    }
}

/// A single engine invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStep {
    name: String,
    args: Vec<OsString>,
}

impl EngineStep {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: vec![OsString::from(name)],
        }
    }

    fn arg(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.args.push(OsString::from(key));
        self.args.push(value.as_ref().to_os_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments passed to the engine, starting with the subcommand.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for EngineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<_> = self.args.iter().map(|arg| arg.to_string_lossy()).collect();
        write!(f, "{}", args.join(" "))
    }
}

/// The ordered engine invocations of a rig reconstruction.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructionPlan {
    program: PathBuf,
    sparse_path: PathBuf,
    steps: Vec<EngineStep>,
}

impl ReconstructionPlan {
    pub fn new(config: &PlanConfig) -> Self {
        let database = config.database_path();
        let sparse = config.sparse_path();

        let mut extract = EngineStep::new("feature_extractor")
            .arg("--database_path", &database)
            .arg("--image_path", &config.image_path)
            .arg("--ImageReader.camera_model", config.camera_model.as_str())
            .arg("--ImageReader.single_camera_per_folder", "1");
        if let Some([fx, fy, cx, cy]) = config.camera_params {
            extract = extract.arg("--ImageReader.camera_params", format!("{fx},{fy},{cx},{cy}"));
        }

        let mut steps = vec![
            extract,
            EngineStep::new("rig_configurator")
                .arg("--database_path", &database)
                .arg("--rig_config_path", &config.rig_config),
            config.matcher.step(&database),
            EngineStep::new("mapper")
                .arg("--database_path", &database)
                .arg("--image_path", &config.image_path)
                .arg("--output_path", &sparse)
                .arg("--Mapper.ba_refine_focal_length", "0")
                .arg("--Mapper.ba_refine_principal_point", "0")
                .arg("--Mapper.ba_refine_extra_params", "0")
                .arg("--Mapper.ba_refine_sensor_from_rig", "0")
                .arg("--random_seed", config.random_seed.to_string()),
        ];

        if config.visualize {
            steps.push(
                EngineStep::new("gui")
                    .arg("--import_path", sparse.join("0"))
                    .arg("--database_path", &database)
                    .arg("--image_path", &config.image_path),
            );
        }

        Self {
            program: config.program.clone(),
            sparse_path: sparse,
            steps,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn steps(&self) -> &[EngineStep] {
        &self.steps
    }

    /// Runs every step in order, stopping at the first one that fails.
    ///
    /// The engine's output is forwarded to the log line by line.
    pub fn run(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.sparse_path).map_err(|err| Error::SerializationFailure {
            path: self.sparse_path.clone(),
            reason: err.to_string(),
        })?;

        for (i, step) in self.steps.iter().enumerate() {
            info!("step {}/{}: {}", i + 1, self.steps.len(), step.name());
            info!("executing {} {step}", self.program.display());
            self.run_step(step)?;
        }

        info!("sparse model written to {}", self.sparse_path.display());
        Ok(())
    }

    fn run_step(&self, step: &EngineStep) -> Result<(), Error> {
        let unavailable = |err: std::io::Error| Error::EngineUnavailable {
            program: self.program.display().to_string(),
            reason: err.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(step.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(unavailable)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        thread::scope(|scope| {
            if let Some(stderr) = stderr {
                scope.spawn(move || forward(stderr));
            }
            if let Some(stdout) = stdout {
                forward(stdout);
            }
        });

        let status = child.wait().map_err(unavailable)?;
        match status.success() {
            true => Ok(()),
            false => Err(Error::EngineFailure {
                step: step.name().to_string(),
                status: status.code().unwrap_or(-1),
            }),
        }
    }
}

fn forward(output: impl Read) {
    for line in BufReader::new(output).lines().map_while(Result::ok) {
        let line = line.trim();
        if !line.is_empty() {
            info!("{line}");
        }
    }
}
