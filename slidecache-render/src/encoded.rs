use anyhow::{bail, Context, Result};
use png::{BitDepth, ColorType, Decoder, Encoder};
use slidecache_core::{PageIndex, RenderImage, MAX_RESOLUTION_DEVIATION};

/// A rendered page kept in the cache as PNG bytes.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    page: PageIndex,
    resolution: f64,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl EncodedPage {
    pub fn encode(page: PageIndex, resolution: f64, image: &RenderImage) -> Result<Self> {
        if image.is_null() {
            bail!("cannot encode empty image of page {page}");
        }
        let mut bytes = Vec::new();
        {
            let mut encoder = Encoder::new(&mut bytes, image.width, image.height);
            encoder.set_color(ColorType::Rgba);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer
                .write_image_data(&image.pixels)
                .with_context(|| format!("failed to encode page {page}"))?;
            writer.finish()?;
        }
        Ok(Self {
            page,
            resolution,
            width: image.width,
            height: image.height,
            bytes,
        })
    }

    pub fn decode(&self) -> Result<RenderImage> {
        let decoder = Decoder::new(self.bytes.as_slice());
        let mut reader = decoder.read_info()?;
        let mut pixels = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut pixels)
            .with_context(|| format!("failed to decode cached page {}", self.page))?;
        if info.color_type != ColorType::Rgba || info.bit_depth != BitDepth::Eight {
            bail!(
                "cached page {} has unexpected format {:?}/{:?}",
                self.page,
                info.color_type,
                info.bit_depth
            );
        }
        pixels.truncate(info.buffer_size());
        Ok(RenderImage {
            width: info.width,
            height: info.height,
            pixels,
        })
    }

    pub fn page(&self) -> PageIndex {
        self.page
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes held by this entry.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn matches_resolution(&self, resolution: f64) -> bool {
        (self.resolution - resolution).abs() < MAX_RESOLUTION_DEVIATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> RenderImage {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[v, v / 2, 0, 255]);
            }
        }
        RenderImage {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn decoded_pixels_match_source() {
        let image = checkerboard(7, 5);
        let encoded = EncodedPage::encode(3, 1.25, &image).unwrap();
        assert_eq!(encoded.page(), 3);
        assert_eq!(encoded.dimensions(), (7, 5));
        assert!(encoded.size() > 0);
        assert_eq!(encoded.decode().unwrap(), image);
    }

    #[test]
    fn empty_image_is_rejected() {
        let image = RenderImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
        assert!(EncodedPage::encode(0, 1.0, &image).is_err());
    }

    #[test]
    fn resolution_match_uses_tolerance() {
        let encoded = EncodedPage::encode(0, 2.0, &checkerboard(2, 2)).unwrap();
        assert!(encoded.matches_resolution(2.0 + 1e-12));
        assert!(!encoded.matches_resolution(2.001));
    }
}
