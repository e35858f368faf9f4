//! Face box rendering for recognition previews.

use crate::types::FaceBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const RECOGNIZED: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN: Rgb<u8> = Rgb([255, 0, 0]);

/// Height of the solid tag drawn above each box.
pub const TAG_HEIGHT: u32 = 6;

/// Draw a 2-pixel outline around each face, green when it was matched to an
/// identity and red otherwise, with a filled tag of the same colour just
/// above it. Parts falling outside the image are clipped.
pub fn draw_face_boxes<'a>(image: &mut RgbImage, faces: impl IntoIterator<Item = (&'a FaceBox, bool)>) {
    for (face, recognized) in faces {
        if face.width == 0 || face.height == 0 {
            continue;
        }
        let color = if recognized { RECOGNIZED } else { UNKNOWN };
        let (x, y) = (face.x as i32, face.y as i32);

        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(face.width, face.height), color);
        if face.width > 2 && face.height > 2 {
            draw_hollow_rect_mut(
                image,
                Rect::at(x + 1, y + 1).of_size(face.width - 2, face.height - 2),
                color,
            );
        }
        draw_filled_rect_mut(
            image,
            Rect::at(x, y - TAG_HEIGHT as i32).of_size(face.width, TAG_HEIGHT),
            color,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: Rgb<u8> = Rgb([90, 90, 90]);

    #[test]
    fn test_colours_follow_recognition() {
        let mut img = RgbImage::from_pixel(120, 80, GREY);
        let known = FaceBox::new(10, 20, 30, 30, 0.7);
        let stranger = FaceBox::new(70, 20, 30, 30, 0.7);
        draw_face_boxes(&mut img, [(&known, true), (&stranger, false)]);

        // Outer and inner outline.
        assert_eq!(*img.get_pixel(10, 35), RECOGNIZED);
        assert_eq!(*img.get_pixel(11, 35), RECOGNIZED);
        assert_eq!(*img.get_pixel(39, 49), RECOGNIZED);
        assert_eq!(*img.get_pixel(70, 35), UNKNOWN);
        // Tag above the box, interior untouched.
        assert_eq!(*img.get_pixel(25, 20 - TAG_HEIGHT), RECOGNIZED);
        assert_eq!(*img.get_pixel(25, 35), GREY);
        assert_eq!(*img.get_pixel(85, 35), GREY);
        assert_eq!(*img.get_pixel(50, 35), GREY);
    }

    #[test]
    fn test_boxes_at_the_border_are_clipped() {
        let mut img = RgbImage::from_pixel(40, 40, GREY);
        let edge = FaceBox::new(0, 0, 40, 40, 0.7);
        let empty = FaceBox::new(5, 5, 0, 10, 0.7);
        draw_face_boxes(&mut img, [(&edge, false), (&empty, true)]);
        assert_eq!(*img.get_pixel(0, 0), UNKNOWN);
        assert_eq!(*img.get_pixel(39, 39), UNKNOWN);
        assert_eq!(*img.get_pixel(20, 20), GREY);
    }
}
