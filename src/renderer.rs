use crate::{
    atlas::KernelAtlas,
    core::{ColorPlane, DepthPlane, Eye, EyeMode, RenderConfig},
    error::{AberrateError, AberrateResult},
    interpolate::{FrameBasis, InterpolatedPsfParam, LayerLayout, build_layer_layout, interpolate},
    resources::{FrameResources, RebuildScope},
    stack::{PsfParam, PsfStack},
    tile::{build_fragments, convolve, splat_fragments},
};

/// Per-frame accounting, mostly the tile-overflow accuracy signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub fragments_built: u64,
    pub fragments_dropped: u64,
    pub skipped: bool,
}

/// Orchestrates the PSF library, interpolator, kernel atlas, and tile
/// pipeline around host-owned inputs.
///
/// The host feeds a config plus per-frame color/depth planes and reads the
/// composited output; GPU hosts can instead pull the exported parameter
/// buffers and atlas and run the dispatch themselves.
pub struct Renderer {
    stack: PsfStack,
    config: RenderConfig,
    params: Vec<InterpolatedPsfParam>,
    layout: LayerLayout,
    basis: FrameBasis,
    atlas: KernelAtlas,
    psf_params: Vec<PsfParam>,
    weight_pool: Vec<f32>,
    eyes: Vec<FrameResources>,
    empty_output: ColorPlane,
    stats: FrameStats,
}

impl Renderer {
    pub fn new(stack: PsfStack, config: RenderConfig) -> AberrateResult<Self> {
        config.validate()?;
        if stack.shape().is_empty() {
            return Err(AberrateError::validation("PSF stack has an empty axis"));
        }

        let mut renderer = Self {
            stack,
            config,
            params: Vec::new(),
            layout: build_layer_layout(&mut [placeholder_param()], 1, 1),
            basis: placeholder_basis(),
            atlas: KernelAtlas::empty(),
            psf_params: Vec::new(),
            weight_pool: Vec::new(),
            eyes: Vec::new(),
            empty_output: ColorPlane::new(crate::core::Resolution::new(0, 0)),
            stats: FrameStats::default(),
        };
        renderer.rebuild_full();
        Ok(renderer)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn stack(&self) -> &PsfStack {
        &self.stack
    }

    /// Apply a configuration change, rebuilding exactly what it invalidates.
    pub fn set_config(&mut self, config: RenderConfig) -> AberrateResult<()> {
        config.validate()?;
        let scope = RebuildScope::diff(&self.config, &config);
        self.config = config;
        match scope {
            RebuildScope::None => {}
            RebuildScope::FrameParams => self.rebuild_frame_params(),
            RebuildScope::Full => self.rebuild_full(),
        }
        Ok(())
    }

    /// Resampled kernels are resolution- and FOV-dependent; everything is
    /// rebuilt here, including resolution-sized buffers. A zero-area target
    /// keeps prior buffers intact so the last composited output survives.
    #[tracing::instrument(skip(self))]
    fn rebuild_full(&mut self) {
        let target = self.config.target_resolution();
        if target.is_zero() {
            tracing::debug!("skipping rebuild for zero-area target resolution");
            return;
        }

        self.stack.resample(self.config.projection());
        let (psf_params, weight_pool) = self.stack.flatten_params();
        self.psf_params = psf_params;
        self.weight_pool = weight_pool;

        self.rebuild_frame_params();

        self.eyes = (0..self.config.eye_mode.eye_count())
            .map(|_| {
                FrameResources::new(target, self.config.tile_size, self.config.tile_max_fragments)
            })
            .collect();
    }

    fn rebuild_frame_params(&mut self) {
        // A zero-area target skipped the full rebuild, so the kernel
        // families are not resampled yet; defer until a real resolution
        // arrives.
        if self.config.target_resolution().is_zero() {
            tracing::debug!("skipping frame-param rebuild for zero-area target resolution");
            return;
        }

        let shape = self.stack.shape();
        let (mut params, basis) = interpolate(
            &self.stack,
            self.config.aperture_mm,
            self.config.focus_dioptre,
            self.config.projection(),
        );
        let layout = build_layer_layout(&mut params, shape.depths, shape.wavelengths);
        self.atlas = KernelAtlas::build(&self.stack, &layout, &basis);
        self.params = params;
        self.layout = layout;
        self.basis = basis;
    }

    /// Composite one mono frame. Returns the output plane, which persists
    /// across frames; a degenerate frame (zero-area target, mismatched
    /// input planes) is skipped and the previous output returned untouched.
    pub fn render(&mut self, color: &ColorPlane, depth: &DepthPlane) -> AberrateResult<&ColorPlane> {
        self.render_eye(Eye::Left, color, depth)
    }

    /// Composite one eye's frame; `Eye::Right` requires stereo mode.
    pub fn render_eye(
        &mut self,
        eye: Eye,
        color: &ColorPlane,
        depth: &DepthPlane,
    ) -> AberrateResult<&ColorPlane> {
        if eye == Eye::Right && self.config.eye_mode != EyeMode::Stereo {
            return Err(AberrateError::pipeline(
                "right-eye render requested in mono mode",
            ));
        }

        let target = self.config.target_resolution();
        let degenerate = target.is_zero()
            || self.eyes.is_empty()
            || color.resolution() != target
            || depth.resolution() != target;
        if degenerate {
            tracing::debug!(?target, "degenerate frame skipped");
            self.stats = FrameStats {
                skipped: true,
                ..FrameStats::default()
            };
            // Prior output persists; an all-degenerate history yields an
            // empty plane.
            let index = eye.index();
            return Ok(self
                .eyes
                .get(index)
                .map(|r| &r.output)
                .unwrap_or(&self.empty_output));
        }

        let object_dioptres = self.stack.axes().object_dioptres.clone();
        let resources = &mut self.eyes[eye.index()];

        // Stage ordering is strict: each parallel stage fully joins before
        // the next starts, standing in for GPU barriers.
        resources.grid.clear();
        build_fragments(
            color,
            depth,
            &self.layout,
            &object_dioptres,
            &resources.grid,
            &mut resources.fragments,
        );
        splat_fragments(&resources.grid, &resources.fragments);
        resources.grid.sort();
        convolve(
            &resources.grid,
            &resources.fragments,
            &self.atlas,
            color,
            &mut resources.output,
        );

        let fragments_built = resources.fragments.len() as u64;
        let fragments_dropped = u64::from(resources.grid.dropped());
        self.stats = FrameStats {
            fragments_built,
            fragments_dropped,
            skipped: false,
        };
        Ok(&self.eyes[eye.index()].output)
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Last composited output for an eye, regardless of frame activity.
    pub fn output(&self, eye: Eye) -> Option<&ColorPlane> {
        self.eyes.get(eye.index()).map(|r| &r.output)
    }

    // GPU-facing exports.

    pub fn psf_params(&self) -> &[PsfParam] {
        &self.psf_params
    }

    pub fn weight_pool(&self) -> &[f32] {
        &self.weight_pool
    }

    pub fn interpolated_params(&self) -> &[InterpolatedPsfParam] {
        &self.params
    }

    pub fn layer_layout(&self) -> &LayerLayout {
        &self.layout
    }

    pub fn atlas(&self) -> &KernelAtlas {
        &self.atlas
    }
}

fn placeholder_param() -> InterpolatedPsfParam {
    InterpolatedPsfParam {
        start_layer: 0,
        num_layers: 0,
        blur_radius_px: 0.0,
    }
}

fn placeholder_basis() -> FrameBasis {
    FrameBasis {
        aperture: crate::interpolate::bracket(&[0.0], 0.0),
        focus: crate::interpolate::bracket(&[0.0], 0.0),
        horizontal: 0,
        vertical: 0,
    }
}
