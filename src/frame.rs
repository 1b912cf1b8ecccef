//! Decimation of panoramic frame sequences.
//!
//! A [`FrameSource`] yields the frames at indices `0, k, 2k, ...` below its
//! frame count. Two sources are provided:
//!
//! - [`StreamSource`] reads a sequential stream through a [`FrameDecoder`].
//!   Frames are consumed in increasing index order and every call to
//!   [`FrameSource::sample`] reopens the stream.
//! - [`BatchSource`] holds an ordered batch of frames in memory and lends them
//!   out without copying.

use crate::error::Error;
use image::RgbImage;
use std::{
    borrow::Cow,
    error::Error as StdError,
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// A panoramic frame and its index in the source sequence.
#[derive(Clone, Debug)]
pub struct Frame<'a> {
    index: usize,
    pixels: Cow<'a, RgbImage>,
}

impl<'a> Frame<'a> {
    pub fn new(index: usize, pixels: Cow<'a, RgbImage>) -> Self {
        Self { index, pixels }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbImage {
        self.pixels.into_owned()
    }
}

/// The step between two sampled frames. Always at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInterval(usize);

impl FrameInterval {
    pub fn new(interval: usize) -> Result<Self, Error> {
        match interval {
            0 => Err(Error::InvalidFrameInterval { interval }),
            _ => Ok(Self(interval)),
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }

    /// Returns the indices sampled from a sequence of `frame_count` frames.
    pub fn indices(&self, frame_count: usize) -> impl Iterator<Item = usize> + use<> {
        (0..frame_count).step_by(self.0)
    }
}

/// A restartable source of decimated panoramic frames.
pub trait FrameSource {
    /// Returns an iterator over the frames at indices `0, k, 2k, ...`.
    ///
    /// Fails with [`Error::SourceUnreadable`] if the source cannot be opened.
    fn sample(&self, interval: FrameInterval) -> Result<impl Iterator<Item = Frame<'_>>, Error>;

    /// A short description of the source for logs and manifests.
    fn describe(&self) -> String;
}

/// An opened stream of decoded frames.
pub trait FrameStream {
    /// The number of frames the stream announces.
    fn frame_count(&self) -> usize;

    /// Decodes the next frame. `Ok(None)` marks the end of the stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, Box<dyn StdError + Send + Sync>>;

    /// Advances past the next frame without handing it out.
    ///
    /// Returns `Ok(false)` at the end of the stream. Decoders that can skip
    /// cheaply should override this.
    fn skip_frame(&mut self) -> Result<bool, Box<dyn StdError + Send + Sync>> {
        Ok(self.read_frame()?.is_some())
    }
}

/// Opens a [`FrameStream`] from the start.
pub trait FrameDecoder {
    type Stream: FrameStream;

    fn open(&self) -> Result<Self::Stream, Error>;

    fn describe(&self) -> String;
}

/// A sequential stream source.
#[derive(Clone, Debug)]
pub struct StreamSource<D> {
    decoder: D,
}

impl<D: FrameDecoder> StreamSource<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }
}

impl<D: FrameDecoder> FrameSource for StreamSource<D> {
    fn sample(&self, interval: FrameInterval) -> Result<impl Iterator<Item = Frame<'_>>, Error> {
        let stream = self.decoder.open()?;
        debug!(
            "opened {} with {} frames",
            self.decoder.describe(),
            stream.frame_count()
        );

        Ok(StreamFrames {
            frame_count: stream.frame_count(),
            stream,
            interval: interval.get(),
            next_index: 0,
            done: false,
            _phan: PhantomData,
        })
    }

    fn describe(&self) -> String {
        self.decoder.describe()
    }
}

/// Sampled frames of a [`FrameStream`].
///
/// A frame that fails to decode ends the iteration early.
struct StreamFrames<'a, S> {
    stream: S,
    frame_count: usize,
    interval: usize,
    next_index: usize,
    done: bool,
    _phan: PhantomData<Frame<'a>>,
}

impl<'a, S: FrameStream> Iterator for StreamFrames<'a, S> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.next_index < self.frame_count {
            let index = self.next_index;
            self.next_index += 1;

            if index % self.interval != 0 {
                match self.stream.skip_frame() {
                    Ok(true) => continue,
                    Ok(false) => self.done = true,
                    Err(err) => self.end_early(index, err),
                }
                continue;
            }

            match self.stream.read_frame() {
                Ok(Some(pixels)) => return Some(Frame::new(index, Cow::Owned(pixels))),
                Ok(None) => self.done = true,
                Err(err) => self.end_early(index, err),
            }
        }

        None
    }
}

impl<S> StreamFrames<'_, S> {
    fn end_early(&mut self, index: usize, err: Box<dyn StdError + Send + Sync>) {
        warn!(
            "failed to read frame {} of {}, ending sampling early: {}",
            index, self.frame_count, err
        );
        self.done = true;
    }
}

/// An in-memory, ordered batch of frames.
#[derive(Clone, Debug, Default)]
pub struct BatchSource {
    frames: Vec<RgbImage>,
}

impl BatchSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Random access to the frame at `index`.
    pub fn frame(&self, index: usize) -> Option<Frame<'_>> {
        self.frames
            .get(index)
            .map(|pixels| Frame::new(index, Cow::Borrowed(pixels)))
    }
}

impl FrameSource for BatchSource {
    fn sample(&self, interval: FrameInterval) -> Result<impl Iterator<Item = Frame<'_>>, Error> {
        Ok(interval
            .indices(self.frames.len())
            .filter_map(|index| self.frame(index)))
    }

    fn describe(&self) -> String {
        format!("in-memory batch of {} frames", self.frames.len())
    }
}

/// A directory of still frames, ordered by file name.
///
/// Only files with an extension the `image` crate recognises are frames.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    dir: PathBuf,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unreadable(&self, reason: impl ToString) -> Error {
        Error::SourceUnreadable {
            path: self.dir.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FrameDecoder for ImageSequence {
    type Stream = ImageSequenceStream;

    fn open(&self) -> Result<Self::Stream, Error> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(|err| self.unreadable(err))? {
            let path = entry.map_err(|err| self.unreadable(err))?.path();
            if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(self.unreadable("directory contains no image frames"));
        }

        paths.sort();
        Ok(ImageSequenceStream { paths, cursor: 0 })
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}

/// The opened stream of an [`ImageSequence`].
pub struct ImageSequenceStream {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl FrameStream for ImageSequenceStream {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, Box<dyn StdError + Send + Sync>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        Ok(Some(image::open(path)?.into_rgb8()))
    }

    fn skip_frame(&mut self) -> Result<bool, Box<dyn StdError + Send + Sync>> {
        if self.cursor >= self.paths.len() {
            return Ok(false);
        }

        self.cursor += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rstest::rstest;

    /// A stream of `count` frames whose pixel value is their index. Reading
    /// the frame at `fail_at` fails.
    struct Counter {
        count: usize,
        fail_at: Option<usize>,
    }

    struct CounterStream {
        count: usize,
        fail_at: Option<usize>,
        cursor: usize,
    }

    impl FrameDecoder for Counter {
        type Stream = CounterStream;

        fn open(&self) -> Result<Self::Stream, Error> {
            Ok(CounterStream {
                count: self.count,
                fail_at: self.fail_at,
                cursor: 0,
            })
        }

        fn describe(&self) -> String {
            "counter".into()
        }
    }

    impl FrameStream for CounterStream {
        fn frame_count(&self) -> usize {
            self.count
        }

        fn read_frame(&mut self) -> Result<Option<RgbImage>, Box<dyn StdError + Send + Sync>> {
            let index = self.cursor;
            self.cursor += 1;
            if Some(index) == self.fail_at {
                return Err("corrupt packet".into());
            }
            if index >= self.count {
                return Ok(None);
            }
            Ok(Some(RgbImage::from_pixel(2, 1, Rgb([index as u8; 3]))))
        }
    }

    fn batch(count: usize) -> BatchSource {
        BatchSource::new(
            (0..count)
                .map(|i| RgbImage::from_pixel(2, 1, Rgb([i as u8; 3])))
                .collect(),
        )
    }

    fn indices<'a>(frames: impl Iterator<Item = Frame<'a>>) -> Vec<usize> {
        frames.map(|frame| frame.index()).collect()
    }

    #[rstest]
    #[case(100, 24, vec![0, 24, 48, 72, 96])]
    #[case(10, 1, (0..10).collect())]
    #[case(5, 10, vec![0])]
    #[case(0, 3, vec![])]
    fn sampled_indices(#[case] count: usize, #[case] interval: usize, #[case] expected: Vec<usize>) {
        let interval = FrameInterval::new(interval).unwrap();

        let stream = StreamSource::new(Counter {
            count,
            fail_at: None,
        });
        assert_eq!(indices(stream.sample(interval).unwrap()), expected);
        assert_eq!(indices(batch(count).sample(interval).unwrap()), expected);
    }

    #[test]
    fn stream_frames_carry_their_pixels() {
        let stream = StreamSource::new(Counter {
            count: 30,
            fail_at: None,
        });
        for frame in stream.sample(FrameInterval::new(7).unwrap()).unwrap() {
            assert_eq!(frame.pixels().get_pixel(0, 0), &Rgb([frame.index() as u8; 3]));
        }
    }

    #[test]
    fn sampling_restarts() {
        let interval = FrameInterval::new(24).unwrap();
        let stream = StreamSource::new(Counter {
            count: 100,
            fail_at: None,
        });
        let source = batch(100);

        assert_eq!(
            indices(stream.sample(interval).unwrap()),
            indices(stream.sample(interval).unwrap())
        );
        assert_eq!(
            indices(source.sample(interval).unwrap()),
            indices(source.sample(interval).unwrap())
        );
    }

    #[test]
    fn failed_read_ends_sampling() {
        let stream = StreamSource::new(Counter {
            count: 100,
            fail_at: Some(50),
        });
        let sampled = indices(stream.sample(FrameInterval::new(24).unwrap()).unwrap());
        assert_eq!(sampled, vec![0, 24, 48]);
    }

    #[test]
    fn short_stream_ends_sampling() {
        // The stream announces more frames than it holds.
        struct Liar;
        impl FrameDecoder for Liar {
            type Stream = CounterStream;
            fn open(&self) -> Result<Self::Stream, Error> {
                Ok(CounterStream {
                    count: 100,
                    fail_at: None,
                    cursor: 60,
                })
            }
            fn describe(&self) -> String {
                "liar".into()
            }
        }

        let sampled = indices(
            StreamSource::new(Liar)
                .sample(FrameInterval::new(10).unwrap())
                .unwrap(),
        );
        assert_eq!(sampled.len(), 4);
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(matches!(
            FrameInterval::new(0),
            Err(Error::InvalidFrameInterval { interval: 0 })
        ));
    }

    #[test]
    fn batch_random_access() {
        let source = batch(3);
        assert_eq!(source.frame(2).unwrap().index(), 2);
        assert!(source.frame(3).is_none());
    }

    #[test]
    fn missing_directory_is_unreadable() {
        let source = StreamSource::new(ImageSequence::new("/definitely/not/a/dir"));
        assert!(matches!(
            source.sample(FrameInterval::new(1).unwrap()),
            Err(Error::SourceUnreadable { .. })
        ));
    }

    #[test]
    fn image_sequence_reads_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in [2u8, 0, 1, 3] {
            RgbImage::from_pixel(4, 2, Rgb([i; 3]))
                .save(dir.path().join(format!("frame_{i:03}.png")))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let source = StreamSource::new(ImageSequence::new(dir.path()));
        let frames: Vec<_> = source
            .sample(FrameInterval::new(2).unwrap())
            .unwrap()
            .map(|frame| (frame.index(), frame.pixels().get_pixel(0, 0)[0]))
            .collect();
        assert_eq!(frames, vec![(0, 0), (2, 2)]);
    }
}
