use crate::{
    interpolate::{FrameBasis, LayerLayout},
    stack::{PsfIndex, PsfStack},
};

/// Layered 2-D kernel atlas: one square slice per layout layer, wavelength
/// channels packed into the RGB components of each texel.
///
/// All slices share the side implied by the frame's maximum layer extent;
/// kernels smaller than the slice sit centered with zero padding, so the
/// compositor can sample any offset within a layer's extent safely.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelAtlas {
    side: usize,
    extent: u32,
    texels: Vec<[f32; 3]>,
}

impl KernelAtlas {
    pub fn empty() -> Self {
        Self {
            side: 0,
            extent: 0,
            texels: Vec::new(),
        }
    }

    /// Materialize the interpolated kernels for every layer of the layout.
    ///
    /// Kernel weights come from the dominant bilinear (aperture, focus)
    /// corner of the frame basis, at each channel's layer radius rounded to
    /// the nearest resampled integer radius. Radius values themselves stay
    /// bilinear; only the kernel shape snaps to the precomputed family.
    pub fn build(stack: &PsfStack, layout: &LayerLayout, basis: &FrameBasis) -> Self {
        let extent = layout.max_extent();
        let side = 2 * extent as usize + 1;
        let layer_count = layout.layer_count();
        let mut texels = vec![[0.0f32; 3]; side * side * layer_count];

        let shape = stack.shape();
        let (aperture, focus) = basis.dominant_corner();
        for layer in 0..layer_count as u32 {
            let depth = layout.source_depth(layer) as usize;
            for channel in 0..3 {
                let wavelength = channel.min(shape.wavelengths - 1);
                let psf = stack.psf(PsfIndex {
                    depth,
                    horizontal: basis.horizontal,
                    vertical: basis.vertical,
                    wavelength,
                    aperture,
                    focus,
                });
                let radius = layout.radius_px(layer, channel).round().max(0.0) as u32;
                let kernel = psf.kernel_clamped(radius);

                // Layer extents bound every interpolated radius, so resampled
                // kernels always fit the slice.
                debug_assert!(kernel.radius() <= extent);
                let offset = (extent as usize).saturating_sub(kernel.radius() as usize);
                let base = layer as usize * side * side;
                for row in 0..kernel.side().min(side) {
                    for col in 0..kernel.side().min(side) {
                        let texel = base + (row + offset) * side + (col + offset);
                        texels[texel][channel] = kernel.get(row, col);
                    }
                }
            }
        }

        Self {
            side,
            extent,
            texels,
        }
    }

    pub fn layer_count(&self) -> usize {
        if self.side == 0 {
            0
        } else {
            self.texels.len() / (self.side * self.side)
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Per-channel kernel weight at offset (`dx`, `dy`) from the kernel
    /// center; zero outside the slice.
    pub fn weight(&self, layer: u32, dx: i32, dy: i32) -> [f32; 3] {
        let e = self.extent as i32;
        if dx.abs() > e || dy.abs() > e {
            return [0.0; 3];
        }
        let row = (dy + e) as usize;
        let col = (dx + e) as usize;
        self.texels[layer as usize * self.side * self.side + row * self.side + col]
    }

    /// Raw texel stream for upload as a layered 2-D texture.
    pub fn texels(&self) -> &[[f32; 3]] {
        &self.texels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Projection,
        interpolate::{build_layer_layout, interpolate},
    };

    fn tiny_stack() -> PsfStack {
        // Two depth samples; 0.125 and 0.25 degrees project to radii 2 and
        // 4 at an 8 degree / 128 px projection.
        let sidecar = "focus_dioptres: 1.0\n\
                       focus_distances: 1.0\n\
                       object_dioptres: 1.0 3.0\n\
                       object_distances: 0.33 1.0\n\
                       lambdas: 550.0\n\
                       apertures: 5.0\n\
                       angles_h: 0.0\n\
                       angles_v: 0.0\n";
        let mut data = Vec::new();
        for deg in [0.125f32, 0.25] {
            for _ in 0..6 {
                data.extend_from_slice(&0.0f32.to_le_bytes());
            }
            data.extend_from_slice(&deg.to_le_bytes());
            data.extend_from_slice(&3u32.to_le_bytes());
            for _ in 0..9 {
                data.extend_from_slice(&1.0f32.to_le_bytes());
            }
        }
        PsfStack::parse(sidecar, &data).unwrap()
    }

    #[test]
    fn atlas_layers_hold_centered_normalized_kernels() {
        let mut stack = tiny_stack();
        let projection = Projection {
            vertical_fov_deg: 8.0,
            vertical_resolution_px: 128,
        };
        stack.resample(projection);

        let (mut params, basis) = interpolate(&stack, 5.0, 1.0, projection);
        let layout = build_layer_layout(&mut params, 2, 1);
        let atlas = KernelAtlas::build(&stack, &layout, &basis);

        assert_eq!(atlas.layer_count(), layout.layer_count());
        assert_eq!(atlas.side(), 2 * layout.max_extent() as usize + 1);

        for layer in 0..atlas.layer_count() as u32 {
            let e = atlas.extent() as i32;
            let mut sum = 0.0f64;
            for dy in -e..=e {
                for dx in -e..=e {
                    sum += f64::from(atlas.weight(layer, dx, dy)[0]);
                }
            }
            assert!((sum - 1.0).abs() < 1e-4, "layer {layer}: sum {sum}");
        }
    }

    #[test]
    fn weight_is_zero_outside_extent() {
        let mut stack = tiny_stack();
        let projection = Projection {
            vertical_fov_deg: 8.0,
            vertical_resolution_px: 128,
        };
        stack.resample(projection);
        let (mut params, basis) = interpolate(&stack, 5.0, 1.0, projection);
        let layout = build_layer_layout(&mut params, 2, 1);
        let atlas = KernelAtlas::build(&stack, &layout, &basis);

        let beyond = atlas.extent() as i32 + 1;
        assert_eq!(atlas.weight(0, beyond, 0), [0.0; 3]);
        assert_eq!(atlas.weight(0, 0, -beyond), [0.0; 3]);
    }
}
