use anyhow::{Context, Result};
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array, IxDyn};
use rayon::prelude::*;

/// Grey YOLO pads with.
pub const PAD_VALUE: u8 = 114;

/// How an image was fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub orig_width: u32,
    pub orig_height: u32,
}

impl Letterbox {
    pub fn new(orig_width: u32, orig_height: u32, size: u32) -> Self {
        let scale = (size as f32 / orig_width as f32).min(size as f32 / orig_height as f32);
        let (new_width, new_height) = Self::scaled(orig_width, orig_height, scale, size);
        Self {
            scale,
            x_offset: (size - new_width) / 2,
            y_offset: (size - new_height) / 2,
            orig_width,
            orig_height,
        }
    }

    fn scaled(w: u32, h: u32, scale: f32, size: u32) -> (u32, u32) {
        let nw = ((w as f32 * scale).round() as u32).clamp(1, size);
        let nh = ((h as f32 * scale).round() as u32).clamp(1, size);
        (nw, nh)
    }

    pub fn resized_dims(&self, size: u32) -> (u32, u32) {
        Self::scaled(self.orig_width, self.orig_height, self.scale, size)
    }

    /// Maps a point in model input pixels back to the original image.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.x_offset as f32) / self.scale,
            (y - self.y_offset as f32) / self.scale,
        )
    }
}

#[derive(Debug)]
pub struct Processor {
    size: u32,
}

impl Processor {
    /// Create a processor producing `size x size` inputs
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn resize(&self, src: &DynamicImage, width: u32, height: u32) -> Result<RgbImage> {
        let mut dst = Image::new(width, height, PixelType::U8x3);
        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        Resizer::new()
            .resize(src, &mut dst, &options)
            .context("failed to resize image")?;
        RgbImage::from_raw(width, height, dst.into_vec())
            .context("resized buffer does not match its dimensions")
    }

    /// Letterboxes `img` into a padded square canvas.
    pub fn letterbox(&self, img: &DynamicImage) -> Result<(RgbImage, Letterbox)> {
        let (orig_width, orig_height) = img.dimensions();
        let letterbox = Letterbox::new(orig_width, orig_height, self.size);
        let (new_width, new_height) = letterbox.resized_dims(self.size);

        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let resized = self.resize(&rgb, new_width, new_height)?;
        let mut padded = RgbImage::from_pixel(
            self.size,
            self.size,
            image::Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]),
        );
        image::imageops::overlay(
            &mut padded,
            &resized,
            letterbox.x_offset as i64,
            letterbox.y_offset as i64,
        );
        Ok((padded, letterbox))
    }

    /// Builds the `1x3xSxS` float tensor in [0, 1] plus the letterbox used.
    pub fn preprocess(&self, img: &DynamicImage) -> Result<(Array<f32, IxDyn>, Letterbox)> {
        let (padded, letterbox) = self.letterbox(img)?;
        let size = self.size as usize;
        let plane = size * size;
        let raw = padded.as_raw();

        let mut data = vec![0f32; 3 * plane];
        data.par_chunks_mut(plane).enumerate().for_each(|(channel, out)| {
            for (i, v) in out.iter_mut().enumerate() {
                *v = raw[i * 3 + channel] as f32 / 255.0;
            }
        });

        let tensor = Array::from_shape_vec(IxDyn(&[1, 3, size, size]), data)
            .context("tensor shape mismatch")?;
        Ok((tensor, letterbox))
    }
}
