use crate::{
    core::{ColorPlane, RenderConfig, Resolution},
    tile::{Fragment, TileGrid},
};

/// What a configuration change invalidates.
///
/// All buffer-lifetime decisions live here; the frame path never compares
/// resolutions on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildScope {
    /// Nothing changed.
    None,
    /// Aperture or focus moved: re-interpolate and rebuild the atlas, keep
    /// resolution-sized buffers.
    FrameParams,
    /// Resolution, field of view, tile constants, or eye mode changed:
    /// resample kernels and reallocate everything.
    Full,
}

impl RebuildScope {
    pub fn diff(old: &RenderConfig, new: &RenderConfig) -> RebuildScope {
        if old.target_resolution() != new.target_resolution()
            || old.vertical_fov_deg != new.vertical_fov_deg
            || old.tile_size != new.tile_size
            || old.tile_max_fragments != new.tile_max_fragments
            || old.eye_mode != new.eye_mode
        {
            return RebuildScope::Full;
        }
        if old.aperture_mm != new.aperture_mm || old.focus_dioptre != new.focus_dioptre {
            return RebuildScope::FrameParams;
        }
        RebuildScope::None
    }
}

/// Resolution-sized per-eye buffers, exclusively owned here and reallocated
/// wholesale, never resized in place. Per-frame stages clear and rewrite
/// them without touching capacity.
#[derive(Debug)]
pub struct FrameResources {
    pub fragments: Vec<Fragment>,
    pub grid: TileGrid,
    pub output: ColorPlane,
}

impl FrameResources {
    pub fn new(resolution: Resolution, tile_size: u32, tile_max_fragments: u32) -> Self {
        Self {
            fragments: Vec::with_capacity(resolution.pixel_count()),
            grid: TileGrid::new(resolution, tile_size, tile_max_fragments),
            output: ColorPlane::new(resolution),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EyeMode;

    #[test]
    fn diff_classifies_frame_param_changes() {
        let old = RenderConfig::default();
        let mut new = old;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::None);
        new.aperture_mm = 6.5;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::FrameParams);
        new = old;
        new.focus_dioptre = 2.0;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::FrameParams);
    }

    #[test]
    fn diff_classifies_full_rebuilds() {
        let old = RenderConfig::default();
        let mut new = old;
        new.resolution = Resolution::new(640, 360);
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::Full);
        new = old;
        new.vertical_fov_deg = 90.0;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::Full);
        new = old;
        new.eye_mode = EyeMode::Stereo;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::Full);
    }

    #[test]
    fn scale_only_change_altering_target_is_full() {
        let old = RenderConfig::default();
        let mut new = old;
        new.resolution_scale = 0.5;
        assert_eq!(RebuildScope::diff(&old, &new), RebuildScope::Full);
    }
}
