//! Decoded video frames.
//!
//! This module provides [`VideoFrame`], returned by
//! [`MediaSource::get_video_frame`](crate::MediaSource::get_video_frame). A
//! frame carries the decoded planes untouched, together with where it sits
//! in the stream and how the seek engine obtained it. [`VideoFrame::luma_image`]
//! turns it into an [`image::GrayImage`] for inspection or saving.

use std::{path::Path, time::Duration};

use image::{DynamicImage, GrayImage, RgbImage};

use crate::{backend::DecodedPicture, error::FramedexError, seek::SeekReport};

/// One output frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Output frame number that was requested.
    pub frame_number: u32,
    /// Decoding-order sample the picture was decoded from, `None` for a
    /// placeholder. Woven frames report the sample of their top field.
    pub sample_number: Option<u32>,
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    /// Presentation time.
    pub timestamp: Option<Duration>,
    /// The decoded picture.
    pub picture: DecodedPicture,
    /// How the picture was obtained.
    pub report: SeekReport,
}

impl VideoFrame {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.picture.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.picture.height
    }

    /// Whether this is a black placeholder for a frame before the first
    /// decodable one.
    pub fn is_placeholder(&self) -> bool {
        self.report.placeholder
    }

    /// The luma (brightness) plane as a grayscale image.
    ///
    /// YUV, NV and gray formats use their first plane directly; packed RGB
    /// formats are converted.
    ///
    /// # Errors
    ///
    /// Returns [`FramedexError::VideoDecodeError`] for pixel formats that
    /// have no luma representation here, or when the planes are smaller than
    /// the picture geometry.
    pub fn luma_image(&self) -> Result<GrayImage, FramedexError> {
        let picture = &self.picture;
        let (width, height) = (picture.width as usize, picture.height as usize);
        let format = picture.pixel_format.as_str();
        let plane = picture
            .planes
            .first()
            .ok_or_else(|| FramedexError::VideoDecodeError("picture has no planes".to_string()))?;

        let channels = match format {
            _ if format.starts_with("yuv") || format.starts_with("nv") || format.starts_with("gray") => 1,
            "rgb24" | "bgr24" => 3,
            "rgba" | "bgra" | "rgb0" | "bgr0" => 4,
            other => {
                return Err(FramedexError::VideoDecodeError(format!(
                    "no luma conversion for pixel format {other}"
                )));
            }
        };
        let row_bytes = width * channels;
        if plane.stride < row_bytes || plane.lines < height {
            return Err(FramedexError::VideoDecodeError(format!(
                "plane of {}x{} bytes is too small for a {width}x{height} {format} picture",
                plane.stride, plane.lines
            )));
        }
        let mut packed = Vec::with_capacity(row_bytes * height);
        for row in 0..height {
            packed.extend_from_slice(&plane.line(row)[..row_bytes]);
        }

        let too_small = || FramedexError::VideoDecodeError("pixel buffer does not match geometry".to_string());
        if channels == 1 {
            return GrayImage::from_raw(picture.width, picture.height, packed).ok_or_else(too_small);
        }
        let rgb: Vec<u8> = packed
            .chunks_exact(channels)
            .flat_map(|pixel| match format {
                "bgr24" | "bgra" | "bgr0" => [pixel[2], pixel[1], pixel[0]],
                _ => [pixel[0], pixel[1], pixel[2]],
            })
            .collect();
        let image = RgbImage::from_raw(picture.width, picture.height, rgb).ok_or_else(too_small)?;
        Ok(DynamicImage::ImageRgb8(image).to_luma8())
    }

    /// Save the luma plane to `path`. The image format follows the file
    /// extension.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use framedex::{FramedexError, IndexOptions, MediaSource};
    ///
    /// let mut source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
    /// let frame = source.get_video_frame(100)?;
    /// frame.save("frame_100.png")?;
    /// # Ok::<(), FramedexError>(())
    /// ```
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FramedexError> {
        self.luma_image()?.save(path)?;
        Ok(())
    }
}
