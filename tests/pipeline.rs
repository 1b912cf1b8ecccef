use image::{Rgb, RgbImage};
use panorig::{
    config::{RunConfig, Settings},
    emit::{CameraParamsEntry, RigDescriptor, RunManifest},
    error::{Error, RenderError},
    frame::{BatchSource, Frame, FrameInterval, FrameSource, ImageSequence, StreamSource},
    pipeline::{AbortHandle, Pipeline},
};
use std::{fs, path::Path};

fn settings(json: &str) -> Settings {
    RunConfig::from_json(json).unwrap().validate().unwrap()
}

fn small_settings() -> Settings {
    settings(
        r#"{
            "width": 24,
            "height": 16,
            "fov_h": 90.0,
            "fov_v": 70.0,
            "image_format": "png",
            "queue_capacity": 2
        }"#,
    )
}

fn batch(len: usize) -> BatchSource {
    BatchSource::new(
        (0..len)
            .map(|i| RgbImage::from_pixel(48, 24, Rgb([i as u8, 100, 200])))
            .collect(),
    )
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn ring_rig_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(
        r#"{
            "frame_interval": 24,
            "width": 32,
            "height": 24,
            "fov_h": 90.0,
            "fov_v": 75.0,
            "views": { "layout": "ring", "base_pitch": 35.0, "yaw_steps": 4 },
            "image_format": "png"
        }"#,
    );
    let pipeline = Pipeline::new(settings, dir.path());

    let summary = pipeline.run(&batch(100)).unwrap();
    assert_eq!(summary.frames_sampled, 5);
    assert_eq!(summary.records.len(), 40);

    let layout = pipeline.layout();
    let entries: Vec<CameraParamsEntry> = read_json(&layout.camera_params_path());
    assert_eq!(entries.len(), 40);
    assert_eq!(entries.len(), summary.camera_params.len());

    // Frame order first, then catalog order.
    let catalog = &pipeline.settings().catalog;
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.pano_index, i / 8);
        assert_eq!(entry.image_prefix, catalog.views()[i % 8].name());
        assert_eq!(entry.image_name, format!("{:06}.png", (i / 8) * 24));
        assert!(layout.images_dir().join(entry.image_key()).is_file());
    }
    assert_eq!(
        entries.iter().filter(|entry| entry.ref_sensor == Some(true)).count(),
        5
    );

    let rigs: Vec<RigDescriptor> = read_json(&layout.rig_config_path());
    assert_eq!(rigs.len(), 1);
    let cameras = &rigs[0].cameras;
    assert_eq!(cameras.len(), 8);
    assert_eq!(
        cameras.iter().filter(|camera| camera.ref_sensor == Some(true)).count(),
        1
    );
    assert_eq!(
        cameras
            .iter()
            .filter(|camera| camera.cam_from_rig_rotation.is_some())
            .count(),
        7
    );
    assert!(
        cameras
            .iter()
            .filter_map(|camera| camera.cam_from_rig_translation)
            .all(|t| t == [0.0, 0.0, 0.0])
    );

    let manifest: RunManifest = read_json(&layout.manifest_path());
    assert_eq!(manifest.views, 8);
    assert_eq!(manifest.frames_sampled, 5);
    assert_eq!(manifest.images_written, 40);
    assert!(!manifest.aborted);
    assert!(manifest.failures.is_empty());
}

#[test]
fn rerun_is_deterministic() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let source = batch(3);

    let a = Pipeline::new(small_settings(), first.path()).run(&source).unwrap();
    let b = Pipeline::new(small_settings(), second.path()).run(&source).unwrap();

    assert_eq!(a.camera_params, b.camera_params);
    for (a, b) in a.records.iter().zip(&b.records) {
        assert_eq!(fs::read(&a.save_path).unwrap(), fs::read(&b.save_path).unwrap());
    }
}

#[test]
fn failed_items_are_reported_after_writing_documents() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        settings(r#"{ "frame_interval": 1, "width": 8, "height": 8, "image_format": "png" }"#),
        dir.path(),
    );
    let source = BatchSource::new(vec![
        RgbImage::from_pixel(16, 8, Rgb([1, 2, 3])),
        RgbImage::new(0, 0),
        RgbImage::from_pixel(16, 8, Rgb([4, 5, 6])),
    ]);

    let Err(Error::Incomplete {
        completed,
        failures,
    }) = pipeline.run(&source)
    else {
        panic!("expected an incomplete run");
    };

    assert_eq!(completed, 6);
    assert_eq!(failures.len(), 3);
    for failure in &failures {
        assert_eq!(failure.frame_index, 1);
        assert!(matches!(failure.error, RenderError::EmptyFrame));
    }

    let entries: Vec<CameraParamsEntry> = read_json(&pipeline.layout().camera_params_path());
    assert_eq!(entries.len(), 6);
    assert!(entries.iter().all(|entry| entry.pano_index != 1));

    let manifest: RunManifest = read_json(&pipeline.layout().manifest_path());
    assert_eq!(manifest.failures.len(), 3);
}

/// Requests an abort while yielding the frame at sampled position `at`.
struct AbortingSource {
    inner: BatchSource,
    handle: AbortHandle,
    at: usize,
}

impl FrameSource for AbortingSource {
    fn sample(&self, interval: FrameInterval) -> Result<impl Iterator<Item = Frame<'_>>, Error> {
        let handle = self.handle.clone();
        let at = self.at;
        Ok(self
            .inner
            .sample(interval)?
            .enumerate()
            .map(move |(i, frame)| {
                if i == at {
                    handle.abort();
                }
                frame
            }))
    }

    fn describe(&self) -> String {
        format!("aborting {}", self.inner.describe())
    }
}

#[test]
fn abort_keeps_completed_work() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(small_settings(), dir.path());
    let source = AbortingSource {
        inner: batch(100),
        handle: pipeline.abort_handle(),
        at: 2,
    };

    assert!(matches!(
        pipeline.run(&source),
        Err(Error::Aborted { completed: 6, failures }) if failures.is_empty()
    ));

    let entries: Vec<CameraParamsEntry> = read_json(&pipeline.layout().camera_params_path());
    assert_eq!(entries.len(), 6);
    assert!(pipeline.layout().rig_config_path().is_file());

    let manifest: RunManifest = read_json(&pipeline.layout().manifest_path());
    assert!(manifest.aborted);
    assert_eq!(manifest.frames_sampled, 2);
}

#[test]
fn abort_reports_earlier_failures() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        settings(r#"{ "frame_interval": 1, "width": 8, "height": 8, "image_format": "png" }"#),
        dir.path(),
    );
    let source = AbortingSource {
        inner: BatchSource::new(vec![
            RgbImage::from_pixel(16, 8, Rgb([1, 2, 3])),
            RgbImage::new(0, 0),
            RgbImage::from_pixel(16, 8, Rgb([4, 5, 6])),
            RgbImage::from_pixel(16, 8, Rgb([7, 8, 9])),
        ]),
        handle: pipeline.abort_handle(),
        at: 2,
    };

    let Err(Error::Aborted {
        completed,
        failures,
    }) = pipeline.run(&source)
    else {
        panic!("expected an aborted run");
    };

    assert_eq!(completed, 3);
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|failure| failure.frame_index == 1));

    let manifest: RunManifest = read_json(&pipeline.layout().manifest_path());
    assert!(manifest.aborted);
    assert_eq!(manifest.failures.len(), 3);
}

#[test]
fn image_sequence_source() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..5u8 {
        RgbImage::from_pixel(48, 24, Rgb([i * 10, 0, 0]))
            .save(input.path().join(format!("frame_{i:03}.png")))
            .unwrap();
    }

    let output = tempfile::tempdir().unwrap();
    let mut settings = small_settings();
    settings.interval = FrameInterval::new(2).unwrap();
    let pipeline = Pipeline::new(settings, output.path());

    let summary = pipeline
        .run(&StreamSource::new(ImageSequence::new(input.path())))
        .unwrap();
    assert_eq!(summary.frames_sampled, 3);

    let frame_indices: Vec<_> = summary
        .records
        .iter()
        .step_by(3)
        .map(|record| record.frame_index)
        .collect();
    assert_eq!(frame_indices, [0, 2, 4]);

    let rendered = image::open(&summary.records[6].save_path).unwrap().into_rgb8();
    assert_eq!(*rendered.get_pixel(5, 5), Rgb([40, 0, 0]));
}

#[test]
fn missing_input_directory() {
    let output = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(small_settings(), output.path());
    let source = StreamSource::new(ImageSequence::new(output.path().join("missing")));

    assert!(matches!(
        pipeline.run(&source),
        Err(Error::SourceUnreadable { .. })
    ));
}
