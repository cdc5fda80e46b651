use super::{PixelImage, CHANNELS};

/// Bring both sides to the element-wise minimum of their dimensions.
/// Images never get upscaled; a side that already matches passes through untouched.
pub fn normalize_pair(first: PixelImage, second: PixelImage) -> (PixelImage, PixelImage) {
    let width = first.width().min(second.width());
    let height = first.height().min(second.height());
    (
        resize_nearest(first, width, height),
        resize_nearest(second, width, height),
    )
}

/// Nearest-neighbour point sampling: `src = floor(dst * src_len / target_len)`,
/// all four channels copied verbatim.
pub fn resize_nearest(image: PixelImage, width: u32, height: u32) -> PixelImage {
    if image.dimensions() == (width, height) || width == 0 || height == 0 {
        return image;
    }

    let (src_w, src_h) = image.dimensions();
    let src = image.as_raw();
    let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);

    for y in 0..height {
        let src_y = (y as u64 * src_h as u64 / height as u64) as usize;
        for x in 0..width {
            let src_x = (x as u64 * src_w as u64 / width as u64) as usize;
            let i = (src_y * src_w as usize + src_x) * CHANNELS;
            data.extend_from_slice(&src[i..i + CHANNELS]);
        }
    }

    tracing::debug!(src_w, src_h, width, height, "resampled image");
    PixelImage {
        width,
        height,
        data,
    }
}
