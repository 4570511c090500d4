//! Patch compositing: resample the clean source and paste it over the
//! repair rectangle of the watermarked target.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel, RgbImage};

use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::region::RepairRectangle;

/// Interpolation used to bring the source up to the target's size.
const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Resample `source` to `target`'s size and overwrite `rect` in `target`.
///
/// The target is consumed and returned with the patch applied. When the
/// target has an alpha channel and the source does not, only the colour
/// channels are replaced and the target's alpha is kept.
///
/// # Errors
///
/// Returns [`Error::EmptyPatch`] if the part of `rect` that lies inside the
/// image has zero width or height.
pub fn composite(target: Raster, source: Raster, rect: &RepairRectangle) -> Result<Raster> {
    let (width, height) = target.dimensions();
    match (target, source) {
        (Raster::Rgb(mut target), source) => {
            let resampled = resample(&to_rgb(source), width, height);
            paste(&mut target, &resampled, rect)?;
            Ok(Raster::Rgb(target))
        }
        (Raster::Rgba(mut target), Raster::Rgba(source)) => {
            let resampled = resample(&source, width, height);
            paste(&mut target, &resampled, rect)?;
            Ok(Raster::Rgba(target))
        }
        (Raster::Rgba(mut target), Raster::Rgb(source)) => {
            let resampled = resample(&source, width, height);
            let patch = cut_patch(&resampled, rect)?;
            for (dx, dy, px) in patch.enumerate_pixels() {
                let dst = target.get_pixel_mut(rect.x_start + dx, rect.y_start + dy);
                dst.0[..3].copy_from_slice(&px.0);
            }
            Ok(Raster::Rgba(target))
        }
    }
}

fn to_rgb(raster: Raster) -> RgbImage {
    match raster {
        Raster::Rgb(img) => img,
        Raster::Rgba(img) => image::DynamicImage::ImageRgba8(img).into_rgb8(),
    }
}

fn resample<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    if source.dimensions() == (width, height) {
        return source.clone();
    }
    imageops::resize(source, width, height, RESAMPLE_FILTER)
}

fn cut_patch<P>(
    resampled: &ImageBuffer<P, Vec<u8>>,
    rect: &RepairRectangle,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let patch = imageops::crop_imm(
        resampled,
        rect.x_start,
        rect.y_start,
        rect.width(),
        rect.height(),
    )
    .to_image();
    if patch.width() == 0 || patch.height() == 0 {
        return Err(Error::EmptyPatch {
            width: patch.width(),
            height: patch.height(),
        });
    }
    Ok(patch)
}

fn paste<P>(
    target: &mut ImageBuffer<P, Vec<u8>>,
    resampled: &ImageBuffer<P, Vec<u8>>,
    rect: &RepairRectangle,
) -> Result<()>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let patch = cut_patch(resampled, rect)?;
    imageops::replace(
        target,
        &patch,
        i64::from(rect.x_start),
        i64::from(rect.y_start),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    fn solid_rgb(w: u32, h: u32, px: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(px))
    }

    fn rect(x_start: u32, y_start: u32, x_end: u32, y_end: u32) -> RepairRectangle {
        RepairRectangle {
            x_start,
            y_start,
            x_end,
            y_end,
        }
    }

    #[test]
    fn patch_replaces_only_the_rectangle() {
        let target = Raster::Rgb(solid_rgb(100, 100, [255, 0, 0]));
        let source = Raster::Rgb(solid_rgb(50, 50, [0, 0, 255]));
        let r = rect(20, 60, 80, 90);

        let Raster::Rgb(out) = composite(target, source, &r).unwrap() else {
            panic!("channel layout changed");
        };
        assert_eq!(out.dimensions(), (100, 100));
        for (x, y, px) in out.enumerate_pixels() {
            if r.contains(x, y) {
                assert_eq!(px, &Rgb([0, 0, 255]), "inside ({x},{y})");
            } else {
                assert_eq!(px, &Rgb([255, 0, 0]), "outside ({x},{y})");
            }
        }
    }

    #[test]
    fn composite_twice_equals_once() {
        let mut target = solid_rgb(64, 48, [10, 20, 30]);
        for (x, y, px) in target.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *px = Rgb([(x * 3) as u8, (y * 5) as u8, 7]);
            }
        }
        let mut source = RgbImage::new(32, 24);
        for (x, y, px) in source.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *px = Rgb([(x * 7) as u8, 100, (y * 9) as u8]);
            }
        }
        let r = rect(5, 30, 60, 46);

        let once = composite(Raster::Rgb(target), Raster::Rgb(source.clone()), &r).unwrap();
        let twice = composite(once.clone(), Raster::Rgb(source), &r).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rgb_source_keeps_target_alpha() {
        let target = Raster::Rgba(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 77])));
        let source = Raster::Rgb(solid_rgb(10, 10, [200, 201, 202]));
        let Raster::Rgba(out) = composite(target, source, &rect(0, 5, 10, 10)).unwrap() else {
            panic!("alpha channel lost");
        };
        assert_eq!(out.get_pixel(3, 7), &Rgba([200, 201, 202, 77]));
        assert_eq!(out.get_pixel(3, 2), &Rgba([1, 2, 3, 77]));
    }

    #[test]
    fn rgba_source_replaces_alpha_too() {
        let target = Raster::Rgba(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let source = Raster::Rgba(RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 40])));
        let Raster::Rgba(out) = composite(target, source, &rect(0, 0, 4, 4)).unwrap() else {
            panic!("alpha channel lost");
        };
        assert_eq!(out.get_pixel(1, 1), &Rgba([9, 9, 9, 40]));
        assert_eq!(out.get_pixel(6, 6), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn rgba_source_into_rgb_target_drops_alpha() {
        let target = Raster::Rgb(solid_rgb(6, 6, [0, 0, 0]));
        let source = Raster::Rgba(RgbaImage::from_pixel(6, 6, Rgba([50, 60, 70, 255])));
        let out = composite(target, source, &rect(0, 0, 6, 6)).unwrap();
        assert_eq!(out.channels(), 3);
        assert_eq!(out, Raster::Rgb(solid_rgb(6, 6, [50, 60, 70])));
    }

    #[test]
    fn rectangle_outside_image_is_empty_patch() {
        let target = Raster::Rgb(solid_rgb(10, 10, [0, 0, 0]));
        let source = Raster::Rgb(solid_rgb(5, 5, [1, 1, 1]));
        let err = composite(target, source, &rect(10, 0, 14, 4)).unwrap_err();
        assert!(matches!(err, Error::EmptyPatch { width: 0, .. }));
    }
}
