//! Frame data structures for camera content handed to recognition engines

use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;

/// Integer rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Smallest rectangle containing both `self` and `other`
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Union of every box in `boxes`, `None` when there are none.
    ///
    /// A field split across several detected boxes (e.g. the four digit
    /// groups of a card number) is reported as this single rectangle.
    pub fn union_all<'a, I>(boxes: I) -> Option<Rect>
    where
        I: IntoIterator<Item = &'a Rect>,
    {
        boxes.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(u) => Some(u.union(b)),
        })
    }

    /// Clamp this rectangle so it lies within a `width` x `height` image
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect::new(x, y, self.width.min(width - x), self.height.min(height - y))
    }
}

/// A camera frame plus the region of interest the card is expected in
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame identifier assigned by the frame source
    pub id: u64,
    /// Raw RGBA pixel data, shared between the scheduler and engines
    pub data: Arc<[u8]>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Region of interest within the frame
    pub roi: Rect,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame whose region of interest covers the whole image
    pub fn new(id: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            id,
            data: data.into(),
            width,
            height,
            roi: Rect::new(0, 0, width, height),
            timestamp: Instant::now(),
        }
    }

    /// Frame over a decoded image, region of interest covering all of it
    pub fn from_image(id: u64, image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(id, image.into_raw(), width, height)
    }

    /// Frame without pixel content, for engines that work from other input
    pub fn empty(id: u64) -> Self {
        Self::new(id, Vec::new(), 0, 0)
    }

    /// Set the region of interest
    pub fn with_roi(mut self, roi: Rect) -> Self {
        self.roi = roi;
        self
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Crop the region of interest out of the frame.
    ///
    /// Returns `None` when the pixel buffer does not match the declared
    /// dimensions or the clamped region is empty.
    pub fn roi_image(&self) -> Option<RgbaImage> {
        let full = RgbaImage::from_raw(self.width, self.height, self.data.to_vec())?;
        let roi = self.roi.clamp_to(self.width, self.height);
        if roi.width == 0 || roi.height == 0 {
            return None;
        }
        Some(image::imageops::crop_imm(&full, roi.x, roi.y, roi.width, roi.height).to_image())
    }

    /// Metadata describing this frame, as reported to observers
    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            frame_id: self.id,
            roi: self.roi,
            dimensions: self.dimensions(),
            captured_at: self.timestamp,
        }
    }
}

/// Frame description delivered alongside each prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Identifier of the processed frame
    pub frame_id: u64,
    /// Region of interest the engine was given
    pub roi: Rect,
    /// Frame (width, height)
    pub dimensions: (u32, u32),
    /// Capture timestamp
    pub captured_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_of_boxes() {
        let boxes = [
            Rect::new(10, 20, 30, 10),
            Rect::new(50, 18, 30, 12),
            Rect::new(90, 22, 30, 10),
        ];
        let union = Rect::union_all(&boxes).unwrap();
        assert_eq!(union, Rect::new(10, 18, 110, 14));
    }

    #[test]
    fn test_union_of_nothing() {
        let boxes: Vec<Rect> = Vec::new();
        assert!(Rect::union_all(&boxes).is_none());
    }

    #[test]
    fn test_clamp_to_image() {
        let rect = Rect::new(8, 8, 10, 10);
        assert_eq!(rect.clamp_to(12, 20), Rect::new(8, 8, 4, 10));
        assert_eq!(Rect::new(30, 30, 5, 5).clamp_to(12, 12), Rect::new(12, 12, 0, 0));
    }

    #[test]
    fn test_roi_image_crops_region() {
        // 4x2 image, second column of pixels is red
        let mut data = vec![0u8; 4 * 2 * 4];
        for row in 0..2 {
            let offset = (row * 4 + 1) * 4;
            data[offset..offset + 4].copy_from_slice(&[255, 0, 0, 255]);
        }
        let frame = Frame::new(1, data, 4, 2).with_roi(Rect::new(1, 0, 2, 2));

        let roi = frame.roi_image().unwrap();
        assert_eq!(roi.dimensions(), (2, 2));
        assert_eq!(roi.get_pixel(0, 1).0, [255, 0, 0, 255]);
        assert_eq!(roi.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_roi_image_without_pixels() {
        assert!(Frame::empty(7).roi_image().is_none());
    }

    #[test]
    fn test_from_image() {
        let image = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        let frame = Frame::from_image(5, image);
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.roi, Rect::new(0, 0, 3, 2));
        assert_eq!(frame.data.len(), 3 * 2 * 4);
    }

    #[test]
    fn test_metadata() {
        let frame = Frame::new(3, vec![0; 16], 2, 2).with_roi(Rect::new(0, 0, 1, 1));
        let meta = frame.metadata();
        assert_eq!(meta.frame_id, 3);
        assert_eq!(meta.roi, Rect::new(0, 0, 1, 1));
        assert_eq!(meta.dimensions, (2, 2));
    }
}
