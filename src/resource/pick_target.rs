//! The offscreen target picking renders into, and the id decode.
//!
//! Object ids are encoded as colors: the pick-id instance attribute feeds
//! the four little-endian bytes of the object id through the pick program's
//! fragment stage into an `Rgba8Unorm` attachment. Reading a pixel back and
//! reinterpreting its RGBA bytes as a little-endian `u32` recovers the id.
//! The top byte is reserved, so usable ids stop at `0xFF_FFFF`.

use crate::context::Context;

/// Color format of the pick attachment. Byte order matters: R is the least
/// significant byte of the decoded id.
pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Mask applied to decoded pick pixels; the top byte is reserved.
pub const PICK_ID_MASK: u32 = 0x00ff_ffff;

/// Half-extent of the neighborhood read back around the query coordinate.
/// Only the center pixel is consumed today; the neighborhood is a reserved
/// extension point for majority-vote disambiguation.
pub const PICK_REGION_RADIUS: u32 = 2;

/// Decodes one RGBA pixel into an object id.
#[inline]
pub fn decode_pick_pixel(rgba: [u8; 4]) -> u32 {
    u32::from_le_bytes(rgba) & PICK_ID_MASK
}

/// An offscreen color+depth pair sized to the viewport.
///
/// Lazily (re)allocated by the pick entry point and reused for every query
/// until the viewport size changes.
pub struct PickTarget {
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl PickTarget {
    /// Allocates a pick target. Returns `None` for an empty viewport, which
    /// degrades picking to "no hit" instead of tripping wgpu validation.
    pub fn new(ctxt: &Context, width: u32, height: u32) -> Option<PickTarget> {
        if width == 0 || height == 0 {
            return None;
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let color_texture = ctxt.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick_color_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_texture = ctxt.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick_depth_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Context::depth_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        Some(PickTarget {
            color_texture,
            color_view,
            depth_view,
            width,
            height,
        })
    }

    /// The color attachment view.
    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    /// The depth attachment view.
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Width this target was allocated for.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height this target was allocated for.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Does this target match the given viewport size?
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Reads back the neighborhood around `(x, y)` and decodes the pixel at
    /// the query coordinate. Returns 0 when the coordinate is outside the
    /// target.
    ///
    /// This is a synchronous, GPU-stalling round trip: the copy is submitted
    /// and the staging buffer mapped before returning.
    pub fn read_id_at(&self, ctxt: &Context, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }

        // Clamp the 5x5 neighborhood to the target bounds.
        let x0 = x.saturating_sub(PICK_REGION_RADIUS);
        let y0 = y.saturating_sub(PICK_REGION_RADIUS);
        let x1 = (x + PICK_REGION_RADIUS + 1).min(self.width);
        let y1 = (y + PICK_REGION_RADIUS + 1).min(self.height);
        let region_w = x1 - x0;
        let region_h = y1 - y0;

        // wgpu requires copy rows aligned to 256 bytes.
        let bytes_per_pixel = 4u32;
        let unpadded_bytes_per_row = region_w * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let buffer_size = u64::from(padded_bytes_per_row) * u64::from(region_h);

        let staging_buffer = ctxt.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pick_staging_buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctxt.create_command_encoder(Some("pick_readback_encoder"));
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: x0, y: y0, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(region_h),
                },
            },
            wgpu::Extent3d {
                width: region_w,
                height: region_h,
                depth_or_array_layers: 1,
            },
        );
        ctxt.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = ctxt.device.poll(wgpu::PollType::wait_indefinitely());
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                log::warn!("pick read-back mapping failed");
                return 0;
            }
        }

        let data = buffer_slice.get_mapped_range();
        let row = (y - y0) * padded_bytes_per_row;
        let col = (x - x0) * bytes_per_pixel;
        let at = (row + col) as usize;
        let rgba = [data[at], data[at + 1], data[at + 2], data[at + 3]];
        decode_pick_pixel(rgba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_masks_reserved_top_byte() {
        assert_eq!(decode_pick_pixel([0, 0, 0, 0]), 0);
        assert_eq!(decode_pick_pixel([1, 0, 0, 0]), 1);
        assert_eq!(decode_pick_pixel([0x04, 0x03, 0x02, 0xff]), 0x020304);
        assert_eq!(decode_pick_pixel([0xff, 0xff, 0xff, 0xff]), PICK_ID_MASK);
    }

    #[test]
    fn decode_is_little_endian() {
        let id: u32 = 0x00ab_cdef;
        let bytes = id.to_le_bytes();
        assert_eq!(decode_pick_pixel(bytes), id);
    }
}
