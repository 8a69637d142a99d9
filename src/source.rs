//! The main entry point for frame-accurate access.
//!
//! [`MediaSource`] opens a media file, builds or loads its index, and serves
//! video frames and audio samples by number.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    audio::{AudioReader, AudioSamples},
    builder::{build_index, load_index},
    configuration::IndexOptions,
    conversion::{Rational, ticks_to_duration},
    error::FramedexError,
    index::{MediaIndex, StreamIndex, VideoTrack},
    keyframe::{GroupOfPicturesInfo, analyze_group_of_pictures},
    metadata::MediaMetadata,
    repeat::{RepeatMap, weave},
    seek::VideoSeeker,
    validation::{ValidationReport, validate_index},
    variable_framerate::{ConstantRateMapper, VariableFrameRateAnalysis, analyze_variable_framerate},
    video::VideoFrame,
};

/// How output frame numbers map onto presentation frames.
enum OutputMapping {
    /// One output frame per presentation frame.
    Direct,
    /// Fields paired by repeat flags.
    Repeat(RepeatMap),
    /// A constant output rate.
    ConstantRate(ConstantRateMapper),
}

/// An indexed media file.
///
/// `MediaSource` owns the index and one demuxer/decoder pair per active
/// stream. Video and audio are read independently; neither disturbs the
/// other's decoder state.
///
/// # Example
///
/// ```no_run
/// use framedex::{FramedexError, IndexOptions, MediaSource};
///
/// let mut source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
/// println!("{} frames", source.frame_count());
/// let frame = source.get_video_frame(1000)?;
/// println!("{}x{} via {:?}", frame.width(), frame.height(), frame.report.mode);
/// # Ok::<(), FramedexError>(())
/// ```
pub struct MediaSource {
    path: PathBuf,
    index: MediaIndex,
    options: IndexOptions,
    video: Option<VideoSeeker>,
    audio: Option<AudioReader>,
    mapping: OutputMapping,
}

impl Debug for MediaSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MediaSource")
            .field("path", &self.path)
            .field("format", &self.index.format_name)
            .field("active_video_stream", &self.index.active_video_stream)
            .field("active_audio_stream", &self.index.active_audio_stream)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MediaSource {
    /// Open `path`, loading its persisted index or building a new one.
    ///
    /// A persisted index that is missing, unreadable, from another schema
    /// version or out of date with the source is rebuilt. Unless
    /// [`IndexOptions::with_write_index`] turns it off, the new index is
    /// written next to the source.
    ///
    /// # Errors
    ///
    /// - [`FramedexError::FileOpen`] if the file cannot be opened.
    /// - [`FramedexError::Cancelled`] if indexing was cancelled.
    /// - [`FramedexError::VideoTrackOutOfRange`] or
    ///   [`FramedexError::AudioTrackOutOfRange`] if a forced stream does not
    ///   exist.
    pub fn build_or_load_index<P: AsRef<Path>>(path: P, options: IndexOptions) -> Result<Self, FramedexError> {
        let path = path.as_ref();
        let mut demuxer = None;
        let index = match load_index(path, &options) {
            Ok(index) => index,
            Err(error) if error.is_index_invalid() => {
                match &error {
                    FramedexError::IndexNotFound(_) => log::debug!("No index for {}, building", path.display()),
                    _ => log::warn!("Rebuilding index for {}: {error}", path.display()),
                }
                let mut opened = options.backend.open(path)?;
                let index = build_index(path, opened.as_mut(), &options)?;
                demuxer = Some(opened);
                index
            }
            Err(error) => return Err(error),
        };

        let video = match index.video_stream() {
            Some(stream) => {
                let demuxer = match demuxer.take() {
                    Some(demuxer) => demuxer,
                    None => options.backend.open(path)?,
                };
                Some(VideoSeeker::new(stream, demuxer, &options)?)
            }
            None => None,
        };
        let audio = match index.audio_stream() {
            Some(stream) => {
                let demuxer = match demuxer.take() {
                    Some(demuxer) => demuxer,
                    None => options.backend.open(path)?,
                };
                Some(AudioReader::new(stream, demuxer, &options)?)
            }
            None => None,
        };
        let mapping = output_mapping(&index, &options);

        Ok(Self {
            path: path.to_path_buf(),
            index,
            options,
            video,
            audio,
            mapping,
        })
    }

    /// Decode output frame `frame_number`.
    ///
    /// Output frames are presentation frames unless constant-rate output or
    /// repeat-flag handling is enabled in the [`IndexOptions`].
    ///
    /// # Errors
    ///
    /// - [`FramedexError::NoVideoStream`] if there is no active video stream.
    /// - [`FramedexError::FrameOutOfRange`] past the last frame.
    /// - [`FramedexError::SeekMismatch`] when the seek mode gives up.
    pub fn get_video_frame(&mut self, frame_number: u32) -> Result<VideoFrame, FramedexError> {
        let total_frames = self.frame_count();
        let stream = self.index.video_stream().ok_or(FramedexError::NoVideoStream)?;
        let track = stream.video().ok_or(FramedexError::NoVideoStream)?;
        let seeker = self.video.as_mut().ok_or(FramedexError::NoVideoStream)?;
        if frame_number >= total_frames {
            return Err(FramedexError::FrameOutOfRange {
                frame_number,
                total_frames,
            });
        }

        let (picture, report, source_frame, pts) = match &mut self.mapping {
            OutputMapping::Direct => {
                let (picture, report) = seeker.get_frame(stream, frame_number)?;
                (picture, report, frame_number, track.timeline.pts_of_frame(frame_number))
            }
            OutputMapping::ConstantRate(mapper) => {
                let source = mapper.source_frame(frame_number);
                let (picture, report) = seeker.get_frame(stream, source)?;
                (picture, report, source, Some(mapper.pts_of(frame_number)))
            }
            OutputMapping::Repeat(map) => {
                let (first, second) = map.fields_of(frame_number).ok_or(FramedexError::FrameOutOfRange {
                    frame_number,
                    total_frames,
                })?;
                let (top, bottom) = if second.top && !first.top {
                    (second, first)
                } else {
                    (first, second)
                };
                let (top_picture, report) = seeker.get_frame(stream, top.frame)?;
                let picture = if bottom.frame == top.frame {
                    top_picture
                } else {
                    let (bottom_picture, _) = seeker.get_frame(stream, bottom.frame)?;
                    log::debug!(
                        "Output frame {frame_number} woven from frames {} and {}",
                        top.frame,
                        bottom.frame
                    );
                    weave(&top_picture, &bottom_picture)
                };
                (picture, report, first.frame, track.timeline.pts_of_frame(first.frame))
            }
        };

        Ok(VideoFrame {
            frame_number,
            sample_number: (!report.placeholder)
                .then(|| picture.identity.unwrap_or_else(|| track.timeline.sample_of(source_frame))),
            pts,
            timestamp: pts.map(|pts| ticks_to_duration(pts, stream.time_base)),
            picture,
            report,
        })
    }

    /// Decode `count` samples per channel starting at sample `start`.
    ///
    /// Reads that continue where the previous one ended keep decoding
    /// without seeking. Samples whose packets fail to decode are returned as
    /// silence.
    ///
    /// # Errors
    ///
    /// - [`FramedexError::NoAudioStream`] if there is no active audio stream.
    /// - [`FramedexError::SampleRangeOutOfRange`] if the range is empty or
    ///   extends past the end of the stream.
    pub fn get_audio_samples(&mut self, start: u64, count: u32) -> Result<AudioSamples, FramedexError> {
        let stream = self.index.audio_stream().ok_or(FramedexError::NoAudioStream)?;
        let reader = self.audio.as_mut().ok_or(FramedexError::NoAudioStream)?;
        reader.get_samples(stream, start, count)
    }

    /// Whether output frame `frame_number` shows a random-access picture.
    pub fn is_keyframe(&self, frame_number: u32) -> Result<bool, FramedexError> {
        let track = self.video_track()?;
        if frame_number >= self.frame_count() {
            return Err(FramedexError::FrameOutOfRange {
                frame_number,
                total_frames: self.frame_count(),
            });
        }
        let presentation = match &self.mapping {
            OutputMapping::Direct => frame_number,
            OutputMapping::ConstantRate(mapper) => mapper.locate(frame_number),
            OutputMapping::Repeat(map) => map
                .fields_of(frame_number)
                .map(|(first, _)| first.frame)
                .unwrap_or(frame_number),
        };
        let timeline = &track.timeline;
        Ok(timeline.keyframes.is_key(timeline.sample_of(presentation)))
    }

    /// Number of output frames, 0 without a video stream.
    pub fn frame_count(&self) -> u32 {
        match &self.mapping {
            OutputMapping::ConstantRate(mapper) => mapper.frame_count(),
            OutputMapping::Repeat(map) => map.frame_count(),
            OutputMapping::Direct => self
                .video_track()
                .map(|track| track.timeline.frame_count)
                .unwrap_or(0),
        }
    }

    /// Duration of the active video stream, or of the audio stream when
    /// there is no video.
    pub fn duration(&self) -> Duration {
        self.index
            .video_stream()
            .or_else(|| self.index.audio_stream())
            .map(|stream| ticks_to_duration(stream.duration, stream.time_base))
            .unwrap_or_default()
    }

    /// Output frame rate: the constant rate when one is applied, otherwise
    /// the average rate of the video stream.
    pub fn average_framerate(&self) -> Option<Rational> {
        match &self.mapping {
            OutputMapping::ConstantRate(mapper) => Some(mapper.rate()),
            _ => self.video_track().ok()?.timeline.average_frame_rate,
        }
    }

    /// Metadata of the active streams.
    pub fn metadata(&self) -> MediaMetadata {
        MediaMetadata::from_index(&self.index)
    }

    /// The index.
    pub fn index(&self) -> &MediaIndex {
        &self.index
    }

    /// Where the index is stored.
    pub fn index_path(&self) -> PathBuf {
        self.options.index_path_for(&self.path)
    }

    /// Presentation frame numbers of every usable keyframe.
    pub fn keyframes(&self) -> Result<Vec<u32>, FramedexError> {
        let timeline = &self.video_track()?.timeline;
        Ok(timeline
            .keyframes
            .samples()
            .filter_map(|sample| timeline.frame_of(sample))
            .collect())
    }

    /// Group of Pictures structure of the active video stream.
    pub fn analyze_group_of_pictures(&self) -> Result<GroupOfPicturesInfo, FramedexError> {
        let stream = self.video_stream()?;
        let track = stream.video().ok_or(FramedexError::NoVideoStream)?;
        Ok(analyze_group_of_pictures(track, stream.time_base))
    }

    /// Frame timing of the active video stream.
    pub fn analyze_variable_framerate(&self) -> Result<VariableFrameRateAnalysis, FramedexError> {
        let stream = self.video_stream()?;
        let track = stream.video().ok_or(FramedexError::NoVideoStream)?;
        Ok(analyze_variable_framerate(&track.timeline, stream.time_base))
    }

    /// Check the index for structural problems.
    pub fn validate(&self) -> ValidationReport {
        validate_index(&self.index)
    }

    fn video_stream(&self) -> Result<&StreamIndex, FramedexError> {
        self.index.video_stream().ok_or(FramedexError::NoVideoStream)
    }

    fn video_track(&self) -> Result<&VideoTrack, FramedexError> {
        self.video_stream()?.video().ok_or(FramedexError::NoVideoStream)
    }
}

fn output_mapping(index: &MediaIndex, options: &IndexOptions) -> OutputMapping {
    let Some(stream) = index.video_stream() else {
        return OutputMapping::Direct;
    };
    let Some(track) = stream.video() else {
        return OutputMapping::Direct;
    };
    if let Some(requested) = options.constant_frame_rate {
        if options.apply_repeat_flag {
            log::debug!("Constant frame rate output takes precedence over repeat flags");
        }
        let rate = requested.or(track.timeline.average_frame_rate);
        match rate.and_then(|rate| ConstantRateMapper::new(&track.timeline, stream.time_base, rate)) {
            Some(mapper) => {
                log::info!("Presenting video at a constant {} fps", mapper.rate());
                return OutputMapping::ConstantRate(mapper);
            }
            None => log::warn!("No usable frame rate for constant-rate output, presenting frames directly"),
        }
    } else if options.apply_repeat_flag {
        return OutputMapping::Repeat(RepeatMap::new(track));
    }
    OutputMapping::Direct
}
