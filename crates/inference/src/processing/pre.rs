use crate::backend::MAX_IMAGE_SIZE;
use crate::processing::post::TransformParams;
use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::RgbImage;
use ndarray::{Array, IxDyn};

const LETTERBOX_COLOR: u8 = 114;

/// Letterboxes RGB rasters into the square NCHW tensor YOLO models expect.
pub struct PreProcessor {
    pub input_size: u32,
}

impl PreProcessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    /// Returns the `[1, 3, size, size]` input tensor along with the parameters
    /// needed to map model coordinates back onto `image`.
    pub fn preprocess(
        &self,
        image: &RgbImage,
    ) -> anyhow::Result<(Array<f32, IxDyn>, TransformParams)> {
        let _s = span!("preprocess_image");

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("Cannot preprocess an empty image ({}x{})", width, height);
        }
        if self.input_size == 0 || self.input_size > MAX_IMAGE_SIZE {
            anyhow::bail!(
                "Input size {} outside 1..={}",
                self.input_size,
                MAX_IMAGE_SIZE
            );
        }

        tracing::trace!(width, height, input_size = self.input_size, "Preprocessing image");

        let (letterboxed, transform) = self.resize_and_letterbox(image)?;

        let input = Self::normalize(&letterboxed, self.input_size)?;

        Ok((input, transform))
    }

    fn resize_and_letterbox(&self, image: &RgbImage) -> anyhow::Result<(Vec<u8>, TransformParams)> {
        let _s = span!("resize_and_letterbox");

        let (width, height) = image.dimensions();
        let size = self.input_size;

        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;

        let side = size as usize;
        let canvas_len = side
            .checked_mul(side)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| anyhow::anyhow!("Letterbox canvas {size}x{size} is too large"))?;

        let src = Image::from_vec_u8(width, height, image.as_raw().clone(), PixelType::U8x3)?;

        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        let mut letterboxed = vec![LETTERBOX_COLOR; canvas_len];

        let resized_data = resized.buffer();
        let stride = side * 3;
        let row_bytes = new_width as usize * 3;
        let (offset_x, offset_y) = (offset_x as usize, offset_y as usize);

        for y in 0..new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + offset_y) * stride + offset_x * 3;

            letterboxed[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        let transform = TransformParams {
            orig_width: width,
            orig_height: height,
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        };

        Ok((letterboxed, transform))
    }

    fn normalize(pixels: &[u8], size: u32) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let side = size as usize;
        let spatial = side * side;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in pixels.chunks_exact(3).enumerate() {
            output[i] = px[0] as f32 / 255.0;
            output[i + spatial] = px[1] as f32 / 255.0;
            output[i + 2 * spatial] = px[2] as f32 / 255.0;
        }

        Ok(Array::from_shape_vec(IxDyn(&[1, 3, side, side]), output)?)
    }
}
