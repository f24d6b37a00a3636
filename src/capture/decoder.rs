use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, Shape};
use crate::error::{Error, Result};

/// Decode a device payload into interleaved 8-bit samples
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<(Shape, Vec<u8>)> {
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| Error::Read(format!("MJPEG decode: {e}")))?;
            let info = decoder
                .info()
                .ok_or_else(|| Error::Read("MJPEG frame without header".into()))?;
            let shape = match info.pixel_format {
                jpeg_decoder::PixelFormat::L8 => Shape::gray(info.width as u32, info.height as u32),
                jpeg_decoder::PixelFormat::RGB24 => {
                    Shape::rgb(info.width as u32, info.height as u32)
                }
                other => return Err(Error::PixelFormat(format!("{other:?}"))),
            };
            Ok((shape, pixels))
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            let shape = Shape::rgb(width, height);
            Ok((shape, checked(data, shape)?.to_vec()))
        }
        PixelFormat::Bgr24 => {
            let shape = Shape::rgb(width, height);
            let mut rgb = checked(data, shape)?.to_vec();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok((shape, rgb))
        }
        PixelFormat::Gray8 => {
            let shape = Shape::gray(width, height);
            Ok((shape, checked(data, shape)?.to_vec()))
        }
        PixelFormat::Yuyv4 => {
            let shape = Shape::rgb(width, height);
            let expected = width as usize * height as usize * 2;
            if data.len() < expected {
                return Err(Error::ShapeMismatch {
                    shape,
                    expected,
                    actual: data.len(),
                });
            }
            Ok((shape, yuyv_to_rgb(&data[..expected])))
        }
    }
}

fn checked(data: &[u8], shape: Shape) -> Result<&[u8]> {
    data.get(..shape.len()).ok_or(Error::ShapeMismatch {
        shape,
        expected: shape.len(),
        actual: data.len(),
    })
}

/// BT.601 YUYV 4:2:2 to packed RGB
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32 - 16.0;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            rgb.push((1.164 * c + 1.596 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c - 0.392 * d - 0.813 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c + 2.017 * d).clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}
