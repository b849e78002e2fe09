use crate::{
    core::Projection,
    stack::{PsfIndex, PsfStack},
};

/// Bracketing samples for a query over a sorted ascending axis.
///
/// Queries outside the sampled range clamp to the boundary index with a zero
/// fraction; an exact hit on a sample likewise has zero fraction, so sampled
/// values reproduce exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisBracket {
    pub lo: usize,
    pub hi: usize,
    pub frac: f32,
}

impl AxisBracket {
    pub fn lerp(self, values_lo: f32, values_hi: f32) -> f32 {
        values_lo + (values_hi - values_lo) * self.frac
    }

    /// The bracketing index carrying the larger interpolation weight.
    pub fn dominant(self) -> usize {
        if self.frac > 0.5 { self.hi } else { self.lo }
    }
}

/// Locate the bracketing samples by linear scan. The axis lists are short
/// (tens of entries), so a scan beats binary search bookkeeping.
pub fn bracket(samples: &[f32], query: f32) -> AxisBracket {
    assert!(!samples.is_empty(), "bracket over empty axis");
    let last = samples.len() - 1;
    if query <= samples[0] {
        return AxisBracket {
            lo: 0,
            hi: 0,
            frac: 0.0,
        };
    }
    if query >= samples[last] {
        return AxisBracket {
            lo: last,
            hi: last,
            frac: 0.0,
        };
    }

    for i in 0..last {
        if query == samples[i + 1] {
            return AxisBracket {
                lo: i + 1,
                hi: i + 1,
                frac: 0.0,
            };
        }
        if query < samples[i + 1] {
            let span = samples[i + 1] - samples[i];
            let frac = if span > 0.0 {
                (query - samples[i]) / span
            } else {
                0.0
            };
            return AxisBracket {
                lo: i,
                hi: i + 1,
                frac,
            };
        }
    }
    unreachable!("query inside sampled range but never bracketed");
}

/// Index of the sample nearest to `query`.
pub fn nearest_index(samples: &[f32], query: f32) -> usize {
    let b = bracket(samples, query);
    if b.lo == b.hi {
        return b.lo;
    }
    if (query - samples[b.lo]).abs() <= (samples[b.hi] - query).abs() {
        b.lo
    } else {
        b.hi
    }
}

/// Per-frame, per-(depth, wavelength) interpolation product.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpolatedPsfParam {
    pub start_layer: u32,
    pub num_layers: u32,
    pub blur_radius_px: f32,
}

/// The (aperture, focus) sub-grid cell a frame interpolates within, plus the
/// canonical on-axis angle indices the layout is built at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameBasis {
    pub aperture: AxisBracket,
    pub focus: AxisBracket,
    pub horizontal: usize,
    pub vertical: usize,
}

impl FrameBasis {
    /// The bilinear corner with the largest weight; supplies atlas kernels.
    pub fn dominant_corner(&self) -> (usize, usize) {
        (self.aperture.dominant(), self.focus.dominant())
    }
}

/// Bilinearly interpolate blur radius across the (aperture, focus) sub-grid
/// for every (depth, wavelength) sample and project to pixels.
///
/// The result is indexed `depth * wavelength_count + wavelength`; layer
/// fields are zero until [`build_layer_layout`] fills them.
pub fn interpolate(
    stack: &PsfStack,
    aperture_mm: f32,
    focus_dioptre: f32,
    projection: Projection,
) -> (Vec<InterpolatedPsfParam>, FrameBasis) {
    let axes = stack.axes();
    let shape = stack.shape();
    let basis = FrameBasis {
        aperture: bracket(&axes.aperture_diameters, aperture_mm),
        focus: bracket(&axes.focus_dioptres, focus_dioptre),
        horizontal: nearest_index(&axes.horizontal_angles, 0.0),
        vertical: nearest_index(&axes.vertical_angles, 0.0),
    };

    let mut params = Vec::with_capacity(shape.depths * shape.wavelengths);
    for depth in 0..shape.depths {
        for wavelength in 0..shape.wavelengths {
            let deg_at = |aperture: usize, focus: usize| {
                stack
                    .psf(PsfIndex {
                        depth,
                        horizontal: basis.horizontal,
                        vertical: basis.vertical,
                        wavelength,
                        aperture,
                        focus,
                    })
                    .blur_radius_deg
            };

            let lo = basis.focus.lerp(
                deg_at(basis.aperture.lo, basis.focus.lo),
                deg_at(basis.aperture.lo, basis.focus.hi),
            );
            let hi = basis.focus.lerp(
                deg_at(basis.aperture.hi, basis.focus.lo),
                deg_at(basis.aperture.hi, basis.focus.hi),
            );
            let deg = basis.aperture.lerp(lo, hi);

            params.push(InterpolatedPsfParam {
                start_layer: 0,
                num_layers: 0,
                blur_radius_px: projection.degrees_to_pixels(deg),
            });
        }
    }
    (params, basis)
}

/// Texture-layer layout mapping continuous depth onto discrete kernel-atlas
/// slices, with the inverse lookup and sampling bounds the compositor needs.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerLayout {
    wavelength_count: usize,
    /// Per depth sample: first layer of its span.
    start_layers: Vec<u32>,
    /// Per depth sample: layers allocated between it and its successor
    /// (the final depth sample always holds exactly one layer).
    num_layers: Vec<u32>,
    /// Per layer: source depth sample index.
    layer_source_depth: Vec<u32>,
    /// Per layer, per wavelength channel: interpolated pixel radius at the
    /// layer's depth position.
    layer_radius_px: Vec<Vec<f32>>,
    /// Per layer: ceil of the max channel radius; bounds kernel sampling.
    layer_extent: Vec<u32>,
}

/// Walk consecutive depth samples and allocate `max(1, ceil(|Δradius|))`
/// layers between each pair (maximized over wavelength channels), so atlas
/// sampling by depth never jumps more than one pixel of radius per layer.
///
/// Fills `start_layer`/`num_layers` in `params` as a side effect.
pub fn build_layer_layout(
    params: &mut [InterpolatedPsfParam],
    depth_count: usize,
    wavelength_count: usize,
) -> LayerLayout {
    assert_eq!(params.len(), depth_count * wavelength_count);
    assert!(depth_count > 0 && wavelength_count > 0);

    let radius = |params: &[InterpolatedPsfParam], depth: usize, channel: usize| {
        params[depth * wavelength_count + channel].blur_radius_px
    };

    let mut start_layers = Vec::with_capacity(depth_count);
    let mut num_layers = Vec::with_capacity(depth_count);
    let mut next_layer = 0u32;
    for depth in 0..depth_count {
        let span = if depth + 1 < depth_count {
            let max_delta = (0..wavelength_count)
                .map(|c| (radius(params, depth + 1, c) - radius(params, depth, c)).abs())
                .fold(0.0f32, f32::max);
            (max_delta.ceil() as u32).max(1)
        } else {
            1
        };
        start_layers.push(next_layer);
        num_layers.push(span);
        next_layer += span;
    }

    for depth in 0..depth_count {
        for channel in 0..wavelength_count {
            let p = &mut params[depth * wavelength_count + channel];
            p.start_layer = start_layers[depth];
            p.num_layers = num_layers[depth];
        }
    }

    let total_layers = next_layer as usize;
    let mut layer_source_depth = Vec::with_capacity(total_layers);
    let mut layer_radius_px = Vec::with_capacity(total_layers);
    let mut layer_extent = Vec::with_capacity(total_layers);
    for depth in 0..depth_count {
        for slot in 0..num_layers[depth] {
            let t = if depth + 1 < depth_count {
                slot as f32 / num_layers[depth] as f32
            } else {
                0.0
            };
            let radii: Vec<f32> = (0..wavelength_count)
                .map(|c| {
                    let r0 = radius(params, depth, c);
                    if depth + 1 < depth_count {
                        r0 + (radius(params, depth + 1, c) - r0) * t
                    } else {
                        r0
                    }
                })
                .collect();
            let max_radius = radii.iter().copied().fold(0.0f32, f32::max);
            layer_source_depth.push(depth as u32);
            layer_extent.push(max_radius.ceil().max(0.0) as u32);
            layer_radius_px.push(radii);
        }
    }

    LayerLayout {
        wavelength_count,
        start_layers,
        num_layers,
        layer_source_depth,
        layer_radius_px,
        layer_extent,
    }
}

impl LayerLayout {
    pub fn layer_count(&self) -> usize {
        self.layer_source_depth.len()
    }

    pub fn start_layer(&self, depth: usize) -> u32 {
        self.start_layers[depth]
    }

    pub fn num_layers(&self, depth: usize) -> u32 {
        self.num_layers[depth]
    }

    /// Inverse lookup: the depth sample a layer was sourced from.
    pub fn source_depth(&self, layer: u32) -> u32 {
        self.layer_source_depth[layer as usize]
    }

    pub fn extent(&self, layer: u32) -> u32 {
        self.layer_extent[layer as usize]
    }

    pub fn max_extent(&self) -> u32 {
        self.layer_extent.iter().copied().max().unwrap_or(0)
    }

    pub fn radius_px(&self, layer: u32, channel: usize) -> f32 {
        self.layer_radius_px[layer as usize][channel.min(self.wavelength_count - 1)]
    }

    /// Max-channel radius for a layer; sizes splat footprints.
    pub fn max_radius_px(&self, layer: u32) -> f32 {
        self.layer_radius_px[layer as usize]
            .iter()
            .copied()
            .fold(0.0f32, f32::max)
    }

    /// Resolve a fragment's dioptre depth to its owning layer and blur
    /// radius by bracketing the object-dioptre axis.
    pub fn resolve(&self, object_dioptres: &[f32], dioptre: f32) -> (u32, f32) {
        let b = bracket(object_dioptres, dioptre);
        let start = self.start_layers[b.lo];
        let span = self.num_layers[b.lo];
        let layer_f = start as f32 + b.frac * span as f32;
        let last = (self.layer_count() - 1) as u32;
        let layer = (layer_f.floor().max(0.0) as u32).min(last);
        (layer, self.max_radius_px(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_exact_sample_has_zero_fraction() {
        let axis = [1.0, 2.0, 4.0];
        assert_eq!(
            bracket(&axis, 2.0),
            AxisBracket {
                lo: 1,
                hi: 1,
                frac: 0.0
            }
        );
        assert_eq!(
            bracket(&axis, 1.0),
            AxisBracket {
                lo: 0,
                hi: 0,
                frac: 0.0
            }
        );
        assert_eq!(
            bracket(&axis, 4.0),
            AxisBracket {
                lo: 2,
                hi: 2,
                frac: 0.0
            }
        );
    }

    #[test]
    fn bracket_clamps_outside_range() {
        let axis = [1.0, 2.0];
        assert_eq!(
            bracket(&axis, 0.0),
            AxisBracket {
                lo: 0,
                hi: 0,
                frac: 0.0
            }
        );
        assert_eq!(
            bracket(&axis, 9.0),
            AxisBracket {
                lo: 1,
                hi: 1,
                frac: 0.0
            }
        );
    }

    #[test]
    fn bracket_midpoint_fraction_is_half() {
        let b = bracket(&[1.0, 3.0], 2.0);
        assert_eq!(b.lo, 0);
        assert_eq!(b.hi, 1);
        assert!((b.frac - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nearest_index_picks_closer_sample() {
        let axis = [-2.0, -0.5, 1.0];
        assert_eq!(nearest_index(&axis, 0.0), 1);
        assert_eq!(nearest_index(&axis, 0.9), 2);
        assert_eq!(nearest_index(&axis, -5.0), 0);
    }

    fn params_from_radii(radii: &[f32]) -> Vec<InterpolatedPsfParam> {
        radii
            .iter()
            .map(|&blur_radius_px| InterpolatedPsfParam {
                start_layer: 0,
                num_layers: 0,
                blur_radius_px,
            })
            .collect()
    }

    #[test]
    fn layout_allocates_ceil_delta_layers() {
        // Radii 1 -> 4: three layers bridge the first pair, one trailing.
        let mut params = params_from_radii(&[1.0, 4.0]);
        let layout = build_layer_layout(&mut params, 2, 1);
        assert_eq!(layout.layer_count(), 4);
        assert_eq!(layout.start_layer(0), 0);
        assert_eq!(layout.num_layers(0), 3);
        assert_eq!(layout.start_layer(1), 3);
        assert_eq!(layout.num_layers(1), 1);
        assert_eq!(params[0].start_layer, 0);
        assert_eq!(params[0].num_layers, 3);
        assert_eq!(params[1].start_layer, 3);
    }

    #[test]
    fn layout_allocates_at_least_one_layer_per_step() {
        let mut params = params_from_radii(&[2.0, 2.2, 2.4]);
        let layout = build_layer_layout(&mut params, 3, 1);
        assert_eq!(layout.layer_count(), 3);
        assert_eq!(layout.num_layers(0), 1);
        assert_eq!(layout.num_layers(1), 1);
    }

    #[test]
    fn layer_extent_bounds_interpolated_radius() {
        let mut params = params_from_radii(&[1.0, 4.0]);
        let layout = build_layer_layout(&mut params, 2, 1);
        assert_eq!(layout.extent(0), 1);
        assert_eq!(layout.extent(1), 2);
        assert_eq!(layout.extent(2), 3);
        assert_eq!(layout.extent(3), 4);
        assert_eq!(layout.max_extent(), 4);
        assert_eq!(layout.source_depth(2), 0);
        assert_eq!(layout.source_depth(3), 1);
    }

    #[test]
    fn resolve_walks_layers_with_depth() {
        let mut params = params_from_radii(&[1.0, 4.0]);
        let layout = build_layer_layout(&mut params, 2, 1);
        let axis = [1.0, 3.0];
        let (layer, _) = layout.resolve(&axis, 1.0);
        assert_eq!(layer, 0);
        let (layer, radius) = layout.resolve(&axis, 3.0);
        assert_eq!(layer, 3);
        assert!((radius - 4.0).abs() < 1e-6);
        // Midpoint of a 3-layer span lands on the middle layer.
        let (layer, _) = layout.resolve(&axis, 2.0);
        assert_eq!(layer, 1);
    }
}
