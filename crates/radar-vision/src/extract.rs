use std::collections::BTreeSet;

use image::{Rgba, RgbaImage};

use crate::error::ClassificationError;
use crate::rasterize::PixelMask;

/// Marker for pixels outside the district (or transparent in the source).
/// Alpha 0 keeps it distinct from an opaque black radar pixel.
pub const ABSENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Isolate the pixels of `base` selected by `mask`.
///
/// Selected pixels that were not fully transparent in the source are copied
/// and made fully opaque; everything else becomes [`ABSENT`].
pub fn extract(base: &RgbaImage, mask: &PixelMask) -> Result<RgbaImage, ClassificationError> {
    if base.dimensions() != mask.dimensions() {
        return Err(ClassificationError::DimensionMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            image_width: base.width(),
            image_height: base.height(),
        });
    }

    let mut out = RgbaImage::from_pixel(base.width(), base.height(), ABSENT);
    for ((dst, src), &inside) in out.pixels_mut().zip(base.pixels()).zip(mask.cells()) {
        if inside && src[3] > 0 {
            *dst = Rgba([src[0], src[1], src[2], 255]);
        }
    }
    Ok(out)
}

/// Distinct RGB values of the present (non-absent) pixels, in sorted order.
pub fn present_colors(image: &RgbaImage) -> BTreeSet<[u8; 3]> {
    image
        .pixels()
        .filter(|p| p[3] > 0)
        .map(|p| [p[0], p[1], p[2]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left_half_mask(w: u32, h: u32) -> PixelMask {
        let mut mask = PixelMask::new(w, h);
        for y in 0..h {
            for x in 0..w / 2 {
                mask.set(x, y);
            }
        }
        mask
    }

    #[test]
    fn test_outside_pixels_are_absent() {
        let base = RgbaImage::from_pixel(4, 2, Rgba([241, 86, 59, 255]));
        let out = extract(&base, &left_half_mask(4, 2)).unwrap();
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(*out.get_pixel(0, 0), Rgba([241, 86, 59, 255]));
        assert_eq!(*out.get_pixel(3, 1), ABSENT);
    }

    #[test]
    fn test_black_inside_mask_is_present() {
        let base = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        let out = extract(&base, &left_half_mask(4, 2)).unwrap();
        assert_eq!(*out.get_pixel(1, 1), Rgba([0, 0, 0, 255]));

        let colors = present_colors(&out);
        assert_eq!(colors.len(), 1);
        assert!(colors.contains(&[0, 0, 0]));
    }

    #[test]
    fn test_transparent_source_stays_absent() {
        let mut base = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 128]));
        base.put_pixel(0, 0, Rgba([10, 20, 30, 0]));
        let out = extract(&base, &left_half_mask(4, 2)).unwrap();
        assert_eq!(*out.get_pixel(0, 0), ABSENT);
        // Partially transparent source pixels become fully opaque
        assert_eq!(*out.get_pixel(1, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_dimension_mismatch() {
        let base = RgbaImage::new(4, 4);
        assert!(matches!(
            extract(&base, &PixelMask::new(4, 2)),
            Err(ClassificationError::DimensionMismatch { .. })
        ));
    }
}
