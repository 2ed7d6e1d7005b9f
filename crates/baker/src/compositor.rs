//! CPU compositor producing the RGBA frames fed to the video encoder.
//!
//! The output surface is cleared to black, the viewport (the template
//! aspect fitted and centered inside the surface) is filled with the
//! viewport color, and every layer is drawn on top in ascending z-order.
//! A layer is fitted inside the viewport keeping its aspect, then scaled,
//! rotated clockwise around its center, and moved by fractions of the
//! viewport size. Drawing is clipped to the viewport.

use glcv_codec::FrameSlot;
use glcv_timeline::{Orientation, Resolution, Transform, UnitId, Viewport, Visibility};
use image::{Rgba, RgbaImage};

const SURFACE_CLEAR: Rgba<u8> = Rgba([0, 0, 0, 255]);

enum LayerSource {
    Image(RgbaImage),
    Video {
        slot: FrameSlot,
        orientation: Orientation,
    },
}

struct Layer {
    id: UnitId,
    tag: String,
    z: i32,
    transform: Transform,
    source: LayerSource,
    skip_draw: bool,
}

pub struct Compositor {
    canvas: RgbaImage,
    viewport: Viewport,
    viewport_color: Rgba<u8>,
    layers: Vec<Layer>,
}

impl Compositor {
    /// `viewport_color` is packed as `0xRRGGBBAA`.
    pub fn new(surface: Resolution, aspect_ratio: f32, viewport_color: u32) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(surface.width, surface.height, SURFACE_CLEAR),
            viewport: Viewport::fit(aspect_ratio, surface),
            viewport_color: Rgba(viewport_color.to_be_bytes()),
            layers: Vec::new(),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn add_image_layer(
        &mut self,
        id: UnitId,
        tag: &str,
        z: i32,
        transform: Transform,
        image: RgbaImage,
    ) {
        self.insert(Layer {
            id,
            tag: tag.to_string(),
            z,
            transform,
            source: LayerSource::Image(image),
            skip_draw: false,
        });
    }

    pub fn add_video_layer(
        &mut self,
        id: UnitId,
        tag: &str,
        z: i32,
        transform: Transform,
        slot: FrameSlot,
        orientation: Orientation,
    ) {
        self.insert(Layer {
            id,
            tag: tag.to_string(),
            z,
            transform,
            source: LayerSource::Video { slot, orientation },
            skip_draw: false,
        });
    }

    /// Layers with equal z keep insertion order.
    fn insert(&mut self, layer: Layer) {
        let position = self.layers.partition_point(|l| l.z <= layer.z);
        tracing::trace!(tag = %layer.tag, z = layer.z, position, "Layer added");
        self.layers.insert(position, layer);
    }

    pub fn set_skip_draw(&mut self, id: UnitId, skip: bool) -> bool {
        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                layer.skip_draw = skip;
                true
            }
            None => false,
        }
    }

    /// Skip every layer whose unit is not visible.
    pub fn apply_visibility(&mut self, visibility: &Visibility) {
        for layer in &mut self.layers {
            layer.skip_draw = !visibility.is_visible(layer.id);
        }
    }

    pub fn is_skipped(&self, id: UnitId) -> Option<bool> {
        self.layers.iter().find(|l| l.id == id).map(|l| l.skip_draw)
    }

    /// Draw the scene and return the packed RGBA surface.
    pub fn render(&mut self) -> &[u8] {
        let Self {
            canvas,
            viewport,
            viewport_color,
            layers,
        } = &mut *self;

        for pixel in canvas.pixels_mut() {
            *pixel = SURFACE_CLEAR;
        }
        for y in viewport.y..viewport.bottom() {
            for x in viewport.x..viewport.right() {
                canvas.put_pixel(x, y, *viewport_color);
            }
        }

        for layer in layers.iter() {
            if layer.skip_draw || !layer.transform.is_drawable() {
                continue;
            }
            match &layer.source {
                LayerSource::Image(image) => draw_layer(
                    canvas,
                    viewport,
                    &layer.transform,
                    Orientation::Deg0,
                    (image.width(), image.height()),
                    image.as_raw(),
                ),
                LayerSource::Video { slot, orientation } => {
                    slot.with_frame(|frame| {
                        draw_layer(
                            canvas,
                            viewport,
                            &layer.transform,
                            *orientation,
                            (frame.width, frame.height),
                            &frame.data,
                        )
                    });
                }
            }
        }
        self.canvas.as_raw()
    }

    /// The last rendered surface.
    pub fn frame(&self) -> &RgbaImage {
        &self.canvas
    }
}

fn draw_layer(
    canvas: &mut RgbaImage,
    viewport: &Viewport,
    transform: &Transform,
    orientation: Orientation,
    (src_w, src_h): (u32, u32),
    pixels: &[u8],
) {
    if src_w == 0 || src_h == 0 || pixels.len() < src_w as usize * src_h as usize * 4 {
        return;
    }
    let (display_w, display_h) = if orientation.is_transposed() {
        (src_h, src_w)
    } else {
        (src_w, src_h)
    };

    let vw = viewport.width as f32;
    let vh = viewport.height as f32;
    let fit = (vw / display_w as f32).min(vh / display_h as f32);
    let w = display_w as f32 * fit * transform.scale;
    let h = display_h as f32 * fit * transform.scale;
    if w <= 0.0 || h <= 0.0 {
        return;
    }

    let (center_x, center_y) = viewport.center();
    let cx = center_x + transform.translate_x * vw;
    let cy = center_y + transform.translate_y * vh;
    let (sin, cos) = transform.rotation_deg.to_radians().sin_cos();
    let extent_x = (w / 2.0 * cos).abs() + (h / 2.0 * sin).abs();
    let extent_y = (w / 2.0 * sin).abs() + (h / 2.0 * cos).abs();

    let x0 = (cx - extent_x).floor().max(viewport.x as f32) as u32;
    let x1 = ((cx + extent_x).ceil().max(0.0) as u32).min(viewport.right());
    let y0 = (cy - extent_y).floor().max(viewport.y as f32) as u32;
    let y1 = ((cy + extent_y).ceil().max(0.0) as u32).min(viewport.bottom());
    let opacity = transform.opacity.clamp(0.0, 1.0);

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f32 + 0.5 - cx;
            let dy = py as f32 + 0.5 - cy;
            let u = (dx * cos + dy * sin) / w + 0.5;
            let v = (-dx * sin + dy * cos) / h + 0.5;
            if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                continue;
            }
            let (su, sv) = match orientation {
                Orientation::Deg0 => (u, v),
                Orientation::Deg90 => (v, 1.0 - u),
                Orientation::Deg180 => (1.0 - u, 1.0 - v),
                Orientation::Deg270 => (1.0 - v, u),
            };
            let sx = ((su * src_w as f32) as u32).min(src_w - 1);
            let sy = ((sv * src_h as f32) as u32).min(src_h - 1);
            let i = (sy as usize * src_w as usize + sx as usize) * 4;
            let alpha = pixels[i + 3] as f32 / 255.0 * opacity;
            if alpha <= 0.0 {
                continue;
            }
            let dst = canvas.get_pixel_mut(px, py);
            for c in 0..3 {
                let blended = pixels[i + c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha);
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            dst.0[3] = 255;
        }
    }
}
