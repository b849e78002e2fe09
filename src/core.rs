use crate::error::{AberrateError, AberrateResult};

/// Target render size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Scaled resolution, rounded to the nearest pixel per dimension.
    pub fn scaled(self, scale: f32) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        Self {
            width: (self.width as f32 * scale).round() as u32,
            height: (self.height as f32 * scale).round() as u32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EyeMode {
    Mono,
    Stereo,
}

impl EyeMode {
    pub fn eye_count(self) -> usize {
        match self {
            EyeMode::Mono => 1,
            EyeMode::Stereo => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// Host-supplied render parameters. Changes are applied through
/// [`Renderer::set_config`](crate::Renderer::set_config), which classifies
/// the change and rebuilds only what depends on it.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderConfig {
    pub resolution: Resolution,
    /// Multiplier applied to `resolution` (XR supersampling-style scaling).
    pub resolution_scale: f32,
    pub vertical_fov_deg: f32,
    /// Pupil aperture diameter in millimetres.
    pub aperture_mm: f32,
    pub focus_dioptre: f32,
    pub tile_size: u32,
    pub tile_max_fragments: u32,
    pub eye_mode: EyeMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            resolution_scale: 1.0,
            vertical_fov_deg: 60.0,
            aperture_mm: 5.0,
            focus_dioptre: 1.0,
            tile_size: 16,
            tile_max_fragments: 1024,
            eye_mode: EyeMode::Mono,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> AberrateResult<()> {
        if !self.vertical_fov_deg.is_finite() || self.vertical_fov_deg <= 0.0 {
            return Err(AberrateError::validation("vertical_fov_deg must be > 0"));
        }
        if !self.resolution_scale.is_finite() || self.resolution_scale <= 0.0 {
            return Err(AberrateError::validation("resolution_scale must be > 0"));
        }
        if !self.aperture_mm.is_finite() || self.aperture_mm <= 0.0 {
            return Err(AberrateError::validation("aperture_mm must be > 0"));
        }
        if !self.focus_dioptre.is_finite() {
            return Err(AberrateError::validation("focus_dioptre must be finite"));
        }
        if self.tile_size == 0 {
            return Err(AberrateError::validation("tile_size must be > 0"));
        }
        if self.tile_max_fragments == 0 {
            return Err(AberrateError::validation("tile_max_fragments must be > 0"));
        }
        Ok(())
    }

    /// The resolution all per-frame buffers are sized for.
    pub fn target_resolution(&self) -> Resolution {
        self.resolution.scaled(self.resolution_scale)
    }

    pub fn projection(&self) -> Projection {
        Projection {
            vertical_fov_deg: self.vertical_fov_deg,
            vertical_resolution_px: self.target_resolution().height,
        }
    }
}

/// Projection of angular blur sizes onto the image plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub vertical_fov_deg: f32,
    pub vertical_resolution_px: u32,
}

impl Projection {
    pub fn degrees_to_pixels(self, deg: f32) -> f32 {
        (deg / self.vertical_fov_deg) * self.vertical_resolution_px as f32
    }
}

/// Object/focus distances are sampled in dioptre space. Depth buffers hand us
/// metres, so linearized depth goes through this before axis bracketing.
pub fn dioptres_from_meters(meters: f32) -> f32 {
    1.0 / meters.max(1e-6)
}

/// Linear RGBA f32 color plane.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorPlane {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl ColorPlane {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            texels: vec![[0.0; 4]; resolution.pixel_count()],
        }
    }

    pub fn from_texels(width: u32, height: u32, texels: Vec<[f32; 4]>) -> AberrateResult<Self> {
        if texels.len() != width as usize * height as usize {
            return Err(AberrateError::validation(
                "ColorPlane texel count must equal width * height",
            ));
        }
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[y as usize * self.width as usize + x as usize]
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.texels
    }
}

/// Linearized scene depth in metres, one sample per pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthPlane {
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl DepthPlane {
    pub fn from_samples(width: u32, height: u32, samples: Vec<f32>) -> AberrateResult<Self> {
        if samples.len() != width as usize * height as usize {
            return Err(AberrateError::validation(
                "DepthPlane sample count must equal width * height",
            ));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn uniform(resolution: Resolution, depth_m: f32) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            samples: vec![depth_m; resolution.pixel_count()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.samples[y as usize * self.width as usize + x as usize]
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}
