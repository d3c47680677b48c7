/// Layout of one plane relative to the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Divisor applied to the image width.
    pub width_div: u32,
    /// Divisor applied to the image height.
    pub height_div: u32,
    pub bytes_per_pixel: u32,
}

const fn plane(width_div: u32, height_div: u32, bytes_per_pixel: u32) -> PlaneLayout {
    PlaneLayout {
        width_div,
        height_div,
        bytes_per_pixel,
    }
}

const PACKED_4: [PlaneLayout; 1] = [plane(1, 1, 4)];
const GRAY: [PlaneLayout; 1] = [plane(1, 1, 1)];
const YUV420: [PlaneLayout; 3] = [plane(1, 1, 1), plane(2, 2, 1), plane(2, 2, 1)];
const YUV422: [PlaneLayout; 3] = [plane(1, 1, 1), plane(2, 1, 1), plane(2, 1, 1)];
const YUV444: [PlaneLayout; 3] = [plane(1, 1, 1), plane(1, 1, 1), plane(1, 1, 1)];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Gray,
    Yuv420,
    Yuv422,
    Yuv444,
}

impl PixelFormat {
    pub fn planes(&self) -> &'static [PlaneLayout] {
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => &PACKED_4,
            PixelFormat::Gray => &GRAY,
            PixelFormat::Yuv420 => &YUV420,
            PixelFormat::Yuv422 => &YUV422,
            PixelFormat::Yuv444 => &YUV444,
        }
    }

    pub fn plane_count(&self) -> usize {
        self.planes().len()
    }

    pub fn plane_height(&self, n: usize, height: u32) -> u32 {
        height.div_ceil(self.planes()[n].height_div)
    }

    /// Bytes per row of plane `n`, excluding any linesize padding.
    pub fn plane_width_bytes(&self, n: usize, width: u32) -> usize {
        let layout = self.planes()[n];
        (width.div_ceil(layout.width_div) * layout.bytes_per_pixel) as usize
    }
}

/// The active video format of a channel: dimensions, frame rate and pixel
/// format. Consumers are (re)initialized with this whenever it changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, fps: f64, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            pixel_format,
        }
    }

    /// Visible image byte size: the sum over all planes of row bytes times
    /// plane height, excluding linesize padding. Frames carrying a
    /// different size than the configured format are dropped by the
    /// output dispatcher.
    pub fn size(&self) -> usize {
        (0..self.pixel_format.plane_count())
            .map(|n| {
                self.pixel_format.plane_width_bytes(n, self.width)
                    * self.pixel_format.plane_height(n, self.height) as usize
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420_plane_layout() {
        let format = PixelFormat::Yuv420;
        assert_eq!(format.plane_count(), 3);
        assert_eq!(format.plane_width_bytes(0, 1920), 1920);
        assert_eq!(format.plane_width_bytes(1, 1920), 960);
        assert_eq!(format.plane_height(1, 1080), 540);
        // Odd dimensions round up.
        assert_eq!(format.plane_width_bytes(1, 7), 4);
        assert_eq!(format.plane_height(2, 5), 3);
    }

    #[test]
    fn format_size_counts_all_planes() {
        assert_eq!(
            VideoFormat::new(1920, 1080, 25.0, PixelFormat::Bgra).size(),
            1920 * 1080 * 4
        );
        assert_eq!(
            VideoFormat::new(16, 8, 50.0, PixelFormat::Yuv420).size(),
            16 * 8 + 2 * (8 * 4)
        );
    }
}
