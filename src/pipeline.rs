//! The conversion run.
//!
//! Frames are sampled sequentially. For every sampled frame all views render
//! in parallel on the rayon pool, and the rendered images go through a
//! bounded queue to a single writer thread. A full queue blocks rendering
//! until the writer catches up.
//!
//! Failed items are collected rather than aborting the run. The documents are
//! written for whatever completed, then the run reports the failures.

use crate::{
    config::Settings,
    emit::{
        CameraParamsEntry, OutputFormat, OutputLayout, PinholeImageRecord, RunManifest,
        camera_params, rig_config, write_json,
    },
    error::{Error, ItemFailure, RenderError},
    frame::FrameSource,
    projection::render,
};
use chrono::Utc;
use crossbeam::channel::{Receiver, bounded};
use image::RgbImage;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use tracing::{debug, info, warn};

/// Requests a running [`Pipeline`] to stop scheduling new frames.
///
/// Images already rendered are still written, and the documents are emitted
/// for them.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a successful run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames_sampled: usize,

    /// Written images in (frame, catalog) order.
    pub records: Vec<PinholeImageRecord>,

    pub camera_params: Vec<CameraParamsEntry>,
}

pub struct Pipeline {
    settings: Settings,
    layout: OutputLayout,
    abort: AbortHandle,
}

enum WriteJob {
    View {
        record: PinholeImageRecord,
        image: RgbImage,
    },
    Panorama {
        frame_index: usize,
        path: PathBuf,
        image: RgbImage,
    },
}

impl Pipeline {
    pub fn new(settings: Settings, root: impl Into<PathBuf>) -> Self {
        let layout = OutputLayout::new(root, settings.format);
        Self {
            settings,
            layout,
            abort: AbortHandle::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Renders every view of every sampled frame of `source` and writes the
    /// images and documents below the output root.
    ///
    /// Returns [`Error::Aborted`] if the run was aborted and
    /// [`Error::Incomplete`] if any item failed, in both cases after the
    /// documents for the completed items have been written.
    pub fn run<S: FrameSource>(&self, source: &S) -> Result<RunSummary, Error> {
        let settings = &self.settings;
        info!(
            "converting {} into {} views under {}",
            source.describe(),
            settings.catalog.len(),
            self.layout.root().display()
        );

        self.layout
            .prepare(&settings.catalog, settings.save_panoramas)?;
        let frames = source.sample(settings.interval)?;

        let (tx, rx) = bounded(settings.queue_capacity);
        let mut failures = Vec::new();
        let mut frames_sampled = 0;
        let mut aborted = false;

        let (mut records, write_failures) = thread::scope(|scope| {
            let format = settings.format;
            let writer = scope.spawn(move || write_all(rx, format));

            'frames: for (pano_index, frame) in frames.enumerate() {
                if self.abort.is_aborted() {
                    aborted = true;
                    break;
                }

                let frame_index = frame.index();
                debug!("rendering frame {frame_index}");

                let renders: Vec<_> = settings
                    .catalog
                    .views()
                    .par_iter()
                    .map(|view| (view, render(&frame, view, &settings.intrinsics)))
                    .collect();
                frames_sampled += 1;

                for (view, rendered) in renders {
                    match rendered {
                        Ok(image) => {
                            let record = PinholeImageRecord {
                                frame_index,
                                pano_index,
                                view: view.clone(),
                                intrinsics: settings.intrinsics,
                                save_path: self.layout.image_path(view.name(), frame_index),
                            };
                            if tx.send(WriteJob::View { record, image }).is_err() {
                                break 'frames;
                            }
                        }
                        Err(error) => {
                            let failure = ItemFailure {
                                frame_index,
                                view_name: view.name().to_string(),
                                error,
                            };
                            warn!("{failure}");
                            failures.push(failure);
                        }
                    }
                }

                if settings.save_panoramas {
                    let job = WriteJob::Panorama {
                        frame_index,
                        path: self.layout.pano_path(frame_index),
                        image: frame.into_pixels(),
                    };
                    if tx.send(job).is_err() {
                        break;
                    }
                }
            }

            drop(tx);
            writer
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        });
        failures.extend(write_failures);

        let catalog = &settings.catalog;
        records.sort_by_key(|record| {
            (
                record.pano_index,
                catalog.position(record.view_name()).unwrap_or(usize::MAX),
            )
        });

        let entries = camera_params(&records, catalog, &settings.rig);
        write_json(&self.layout.camera_params_path(), &entries)?;
        write_json(&self.layout.rig_config_path(), &rig_config(&settings.rig))?;
        write_json(
            &self.layout.manifest_path(),
            &RunManifest {
                generated_at: Utc::now(),
                source: source.describe(),
                views: catalog.len(),
                frames_sampled,
                images_written: records.len(),
                aborted,
                failures: failures.iter().map(ToString::to_string).collect(),
            },
        )?;

        info!(
            "wrote {} images from {} frames",
            records.len(),
            frames_sampled
        );

        if aborted {
            warn!("run aborted after {frames_sampled} frames");
            return Err(Error::Aborted {
                completed: records.len(),
                failures,
            });
        }

        if !failures.is_empty() {
            return Err(Error::Incomplete {
                completed: records.len(),
                failures,
            });
        }

        Ok(RunSummary {
            frames_sampled,
            records,
            camera_params: entries,
        })
    }
}

/// Drains `rx`, saving every image. Returns the records of the written views
/// and the items that could not be written.
fn write_all(
    rx: Receiver<WriteJob>,
    format: OutputFormat,
) -> (Vec<PinholeImageRecord>, Vec<ItemFailure>) {
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for job in rx {
        match job {
            WriteJob::View { record, image } => match save(&image, &record.save_path, format) {
                Ok(()) => {
                    debug!("wrote {}", record.save_path.display());
                    records.push(record);
                }
                Err(error) => {
                    let failure = ItemFailure {
                        frame_index: record.frame_index,
                        view_name: record.view_name().to_string(),
                        error,
                    };
                    warn!("{failure}");
                    failures.push(failure);
                }
            },
            WriteJob::Panorama {
                frame_index,
                path,
                image,
            } => {
                if let Err(error) = save(&image, &path, format) {
                    let failure = ItemFailure {
                        frame_index,
                        view_name: "panorama".to_string(),
                        error,
                    };
                    warn!("{failure}");
                    failures.push(failure);
                }
            }
        }
    }

    (records, failures)
}

fn save(image: &RgbImage, path: &Path, format: OutputFormat) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RenderError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    image
        .save_with_format(path, format.image_format())
        .map_err(|source| RenderError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunConfig, frame::BatchSource};
    use image::Rgb;

    fn settings() -> Settings {
        RunConfig::from_json(
            r#"{
                "frame_interval": 2,
                "width": 16,
                "height": 12,
                "fov_h": 90.0,
                "fov_v": 75.0,
                "image_format": "png",
                "queue_capacity": 1
            }"#,
        )
        .unwrap()
        .validate()
        .unwrap()
    }

    fn batch(len: usize) -> BatchSource {
        BatchSource::new(
            (0..len)
                .map(|i| RgbImage::from_pixel(32, 16, Rgb([i as u8, 0, 0])))
                .collect(),
        )
    }

    #[test]
    fn abort_handle_is_shared() {
        let handle = AbortHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_aborted());
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn run_writes_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(settings(), dir.path());

        let summary = pipeline.run(&batch(5)).unwrap();
        assert_eq!(summary.frames_sampled, 3);
        assert_eq!(summary.records.len(), 9);
        assert!(summary.records.iter().all(|record| record.save_path.is_file()));

        let written = image::open(&summary.records[4].save_path).unwrap().into_rgb8();
        assert_eq!(written.dimensions(), (16, 12));
        assert_eq!(*written.get_pixel(0, 0), Rgb([2, 0, 0]));

        assert!(pipeline.layout().camera_params_path().is_file());
        assert!(pipeline.layout().rig_config_path().is_file());
        assert!(pipeline.layout().manifest_path().is_file());
    }

    #[test]
    fn abort_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(settings(), dir.path());
        pipeline.abort_handle().abort();

        assert!(matches!(
            pipeline.run(&batch(5)),
            Err(Error::Aborted { completed: 0, failures }) if failures.is_empty()
        ));
        let entries: Vec<CameraParamsEntry> = serde_json::from_str(
            &fs::read_to_string(pipeline.layout().camera_params_path()).unwrap(),
        )
        .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn empty_frame_is_an_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(settings(), dir.path());
        let source = BatchSource::new(vec![
            RgbImage::from_pixel(32, 16, Rgb([9, 9, 9])),
            RgbImage::new(32, 16),
            RgbImage::new(0, 0),
        ]);

        let Err(Error::Incomplete {
            completed,
            failures,
        }) = pipeline.run(&source)
        else {
            panic!("expected an incomplete run");
        };
        assert_eq!(completed, 3);
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|failure| failure.frame_index == 2));
        assert!(matches!(failures[0].error, RenderError::EmptyFrame));
    }

    #[test]
    fn panoramas_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.save_panoramas = true;
        let pipeline = Pipeline::new(settings, dir.path());

        pipeline.run(&batch(3)).unwrap();
        assert!(pipeline.layout().pano_path(0).is_file());
        assert!(pipeline.layout().pano_path(2).is_file());
        assert!(!pipeline.layout().pano_path(1).exists());
    }
}
