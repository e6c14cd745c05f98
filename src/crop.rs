use image::RgbImage;

/// Largest centered region of `image` with the given aspect ratio.
///
/// Returns `(x, y, width, height)` in image coordinates.
pub fn centered_aspect_rect(width: u32, height: u32, aspect: (u32, u32)) -> (u32, u32, u32, u32) {
    let (aw, ah) = (aspect.0.max(1) as u64, aspect.1.max(1) as u64);
    let (w, h) = (width as u64, height as u64);

    // Too wide: keep full height. Too tall: keep full width.
    let (crop_w, crop_h) = if w * ah > h * aw {
        ((h * aw / ah).max(1), h)
    } else {
        (w, (w * ah / aw).max(1))
    };

    let crop_w = crop_w.min(w) as u32;
    let crop_h = crop_h.min(h) as u32;
    ((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
}

pub fn crop_to_aspect(image: &RgbImage, aspect: (u32, u32)) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let (x, y, crop_width, crop_height) = centered_aspect_rect(width, height, aspect);
    if (crop_width, crop_height) == (width, height) {
        return image.clone();
    }

    log::debug!(
        "Cropping {}x{} to {}x{} at ({}, {})",
        width, height, crop_width, crop_height, x, y
    );
    image::imageops::crop_imm(image, x, y, crop_width, crop_height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_image_keeps_height() {
        assert_eq!(centered_aspect_rect(1920, 1080, (4, 3)), (240, 0, 1440, 1080));
    }

    #[test]
    fn test_tall_image_keeps_width() {
        assert_eq!(centered_aspect_rect(600, 1000, (4, 3)), (0, 275, 600, 450));
    }

    #[test]
    fn test_exact_aspect_is_untouched() {
        let img = RgbImage::from_pixel(400, 300, image::Rgb([1, 2, 3]));
        let cropped = crop_to_aspect(&img, (4, 3));
        assert_eq!(cropped.dimensions(), (400, 300));
    }

    #[test]
    fn test_crop_takes_center_pixels() {
        let mut img = RgbImage::from_pixel(8, 3, image::Rgb([0, 0, 0]));
        // Columns 2..6 survive a 4:3 crop of an 8x3 image.
        img.put_pixel(2, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(0, 0, image::Rgb([0, 255, 0]));

        let cropped = crop_to_aspect(&img, (4, 3));
        assert_eq!(cropped.dimensions(), (4, 3));
        assert_eq!(*cropped.get_pixel(0, 0), image::Rgb([255, 0, 0]));
    }
}
