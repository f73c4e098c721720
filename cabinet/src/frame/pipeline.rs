//! The frame pipeline turns raw frames into bytes that can be sent over the wire: a single frame
//! becomes a PNG and a sequence becomes a GIF. It also decodes the image assets (borders and boot
//! animations) that the console emulators decorate frames with.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use image::ImageFormat;
use image::ImageResult;
use tracing::trace;

use super::Frame;
use crate::SessionError;

/// Transport-ready frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Media {
    Png(Vec<u8>),
    Gif(Vec<u8>),
}

impl Media {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Media::Png(data) | Media::Gif(data) => data,
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Media::Png(_) => "png",
            Media::Gif(_) => "gif",
        }
    }
}

/// Encodes one frame as a still image and several frames as an animation played back at `fps`.
pub fn encode(frames: &[Frame], fps: u32) -> Result<Media, SessionError> {
    match frames {
        [] => Err(SessionError::InvalidFrameData),
        [frame] => encode_png(frame).map(Media::Png),
        frames => encode_gif(frames, fps).map(Media::Gif),
    }
}

/// Encodes a frame as an 8-bit RGBA PNG.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, SessionError> {
    let mut digest = Vec::new();
    let mut encoder = png::Encoder::new(&mut digest, frame.width(), frame.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(frame.pixels())?;
    writer.finish()?;
    trace!("Encoded {}x{} frame into {} PNG bytes", frame.width(), frame.height(), digest.len());
    Ok(digest)
}

/// Encodes frames as a GIF that plays once. The canvas takes the size of the first frame; frames
/// of any other size are rescaled to it.
pub fn encode_gif(frames: &[Frame], fps: u32) -> Result<Vec<u8>, SessionError> {
    let Some(first) = frames.first() else {
        return Err(SessionError::InvalidFrameData);
    };
    let (width, height) = first.size();
    let (Ok(gif_width), Ok(gif_height)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(SessionError::FrameEncoding {
            message: format!("{width}x{height} is too large for a GIF"),
        });
    };
    // GIF delays are in hundredths of a second
    let delay = (100 / fps.max(1)) as u16;
    let mut digest = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut digest, gif_width, gif_height, &[])?;
        for frame in frames {
            let mut pixels = if frame.size() == (width, height) {
                frame.pixels().to_vec()
            } else {
                frame.resized(width, height).into_pixels()
            };
            let mut gif_frame = gif::Frame::from_rgba_speed(gif_width, gif_height, &mut pixels, 10);
            gif_frame.delay = delay;
            encoder.write_frame(&gif_frame)?;
        }
        // The trailer is written when the encoder is dropped
    }
    trace!("Encoded {} frames into {} GIF bytes", frames.len(), digest.len());
    Ok(digest)
}

/// Decodes a PNG of any colour type into an RGBA frame.
pub fn decode_png(data: &[u8]) -> ImageResult<Frame> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Png)?;
    Ok(image.into_rgba8().into())
}

/// Decodes every frame of a GIF into complete pictures, with each frame's disposal applied
/// before the next one is drawn.
pub fn decode_gif(data: &[u8]) -> ImageResult<Vec<Frame>> {
    let frames = GifDecoder::new(Cursor::new(data))?.into_frames().collect_frames()?;
    Ok(frames.into_iter().map(|frame| frame.into_buffer().into()).collect())
}

/// Stretches an animation into a boot sequence of exactly `length` frames at `size`. Every source
/// frame is shown for `hold` frames and the animation loops if it is too short.
pub fn boot_sequence(source: &[Frame], size: (u32, u32), length: usize, hold: usize) -> Vec<Frame> {
    let scaled: Vec<Frame> = source.iter().map(|f| f.resized(size.0, size.1)).collect();
    scaled
        .iter()
        .cycle()
        .flat_map(|frame| std::iter::repeat_n(frame, hold.max(1)))
        .take(if scaled.is_empty() { 0 } else { length })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, seed: u8) -> Frame {
        let pixels = (0..width * height)
            .flat_map(|i| [seed.wrapping_add(i as u8), (i / width) as u8, 0x40, 255])
            .collect();
        Frame::from_rgba(width, height, pixels).unwrap()
    }

    #[test]
    fn no_frames_is_invalid() {
        assert_eq!(encode(&[], 30), Err(SessionError::InvalidFrameData));
    }

    #[test]
    fn png_round_trip() {
        let frame = gradient(16, 9, 3);
        let media = encode(std::slice::from_ref(&frame), 30).unwrap();
        assert_eq!(media.file_extension(), "png");
        let Media::Png(data) = media else {
            panic!("a single frame should be a PNG")
        };
        assert_eq!(&data[1..4], b"PNG");
        assert_eq!(decode_png(&data).unwrap(), frame);
    }

    #[test]
    fn several_frames_become_a_gif() {
        let frames = vec![gradient(8, 8, 0), gradient(8, 8, 50), gradient(4, 4, 100)];
        let media = encode(&frames, 30).unwrap();
        let Media::Gif(data) = &media else {
            panic!("a sequence should be a GIF")
        };
        assert_eq!(&data[..3], b"GIF");
        let decoded = decode_gif(data).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().all(|f| f.size() == (8, 8)));
    }

    #[test]
    fn gif_disposal_is_honoured() {
        let mut data = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut data, 4, 4, &[]).unwrap();
            let mut red = Frame::filled(4, 4, [255, 0, 0, 255]).into_pixels();
            let mut first = gif::Frame::from_rgba_speed(4, 4, &mut red, 10);
            first.dispose = gif::DisposalMethod::Background;
            encoder.write_frame(&first).unwrap();
            let mut blue = Frame::filled(2, 2, [0, 0, 255, 255]).into_pixels();
            let mut second = gif::Frame::from_rgba_speed(2, 2, &mut blue, 10);
            second.left = 1;
            second.top = 1;
            encoder.write_frame(&second).unwrap();
        }
        let frames = decode_gif(&data).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(frames[1].pixel(1, 1), Some([0, 0, 255, 255]));
        // The red frame was cleared before the blue patch was drawn
        assert_eq!(frames[1].pixel(0, 0).map(|px| px[3]), Some(0));
        assert_eq!(frames[1].pixel(3, 3).map(|px| px[3]), Some(0));
    }

    #[test]
    fn palette_pngs_are_expanded() {
        let mut data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut data, 2, 1);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_palette(vec![10, 20, 30, 200, 100, 0]);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[1, 0]).unwrap();
        }
        let frame = decode_png(&data).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([200, 100, 0, 255]));
        assert_eq!(frame.pixel(1, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn garbage_is_not_an_image() {
        assert!(decode_png(b"definitely not a png").is_err());
        assert!(decode_gif(b"definitely not a gif").is_err());
    }

    #[test]
    fn boot_sequence_tiles_and_truncates() {
        let source = [Frame::filled(2, 2, [1, 1, 1, 255]), Frame::filled(2, 2, [2, 2, 2, 255])];
        let seq = boot_sequence(&source, (4, 4), 127, 12);
        assert_eq!(seq.len(), 127);
        assert!(seq.iter().all(|f| f.size() == (4, 4)));
        assert_eq!(seq[11].pixel(0, 0), Some([1, 1, 1, 255]));
        assert_eq!(seq[12].pixel(0, 0), Some([2, 2, 2, 255]));
        assert_eq!(seq[24].pixel(0, 0), Some([1, 1, 1, 255]));
        assert!(boot_sequence(&[], (4, 4), 127, 12).is_empty());
    }
}
