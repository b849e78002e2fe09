use crate::error::{AberrateError, AberrateResult};

/// Square convolution kernel, row-major weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    side: usize,
    weights: Vec<f32>,
}

impl Kernel {
    pub fn new(side: usize, weights: Vec<f32>) -> AberrateResult<Self> {
        if side == 0 {
            return Err(AberrateError::validation("kernel side must be > 0"));
        }
        if weights.len() != side * side {
            return Err(AberrateError::validation(
                "kernel weights must contain side * side entries",
            ));
        }
        Ok(Self { side, weights })
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Pixel radius of a `2r + 1` sided kernel.
    pub fn radius(&self) -> u32 {
        (self.side as u32 - 1) / 2
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.weights[row * self.side + col]
    }

    pub fn sum(&self) -> f32 {
        self.weights.iter().map(|&w| f64::from(w)).sum::<f64>() as f32
    }

    /// Rescaled copy summing to 1. A degenerate all-zero kernel becomes
    /// uniform so a PSF can never erase energy.
    pub fn normalized(&self) -> Kernel {
        let sum = f64::from(self.sum());
        let weights = if sum > 0.0 {
            self.weights
                .iter()
                .map(|&w| (f64::from(w) / sum) as f32)
                .collect()
        } else {
            vec![1.0 / (self.side * self.side) as f32; self.weights.len()]
        };
        Kernel {
            side: self.side,
            weights,
        }
    }

    /// Resample to pixel radius `radius` (side `2 * radius + 1`):
    /// area-weighted averaging when shrinking, nearest-sample replication
    /// when growing, renormalized to sum 1 either way.
    pub fn resampled(&self, radius: u32) -> Kernel {
        let dst_side = 2 * radius as usize + 1;
        let out = if dst_side == self.side {
            self.clone()
        } else if dst_side < self.side {
            shrink_area_weighted(self, dst_side)
        } else {
            grow_nearest(self, dst_side)
        };
        out.normalized()
    }
}

fn shrink_area_weighted(src: &Kernel, dst_side: usize) -> Kernel {
    let scale = src.side as f64 / dst_side as f64;
    let mut weights = vec![0.0f32; dst_side * dst_side];

    for oy in 0..dst_side {
        let y0 = oy as f64 * scale;
        let y1 = (oy + 1) as f64 * scale;
        for ox in 0..dst_side {
            let x0 = ox as f64 * scale;
            let x1 = (ox + 1) as f64 * scale;

            let mut acc = 0.0f64;
            let mut area = 0.0f64;
            for sy in y0.floor() as usize..(y1.ceil() as usize).min(src.side) {
                let oy_cov = (y1.min((sy + 1) as f64) - y0.max(sy as f64)).max(0.0);
                if oy_cov == 0.0 {
                    continue;
                }
                for sx in x0.floor() as usize..(x1.ceil() as usize).min(src.side) {
                    let ox_cov = (x1.min((sx + 1) as f64) - x0.max(sx as f64)).max(0.0);
                    if ox_cov == 0.0 {
                        continue;
                    }
                    let cov = oy_cov * ox_cov;
                    acc += cov * f64::from(src.get(sy, sx));
                    area += cov;
                }
            }
            if area > 0.0 {
                weights[oy * dst_side + ox] = (acc / area) as f32;
            }
        }
    }

    Kernel {
        side: dst_side,
        weights,
    }
}

fn grow_nearest(src: &Kernel, dst_side: usize) -> Kernel {
    let scale = src.side as f64 / dst_side as f64;
    let mut weights = vec![0.0f32; dst_side * dst_side];

    for oy in 0..dst_side {
        let sy = (((oy as f64 + 0.5) * scale) as usize).min(src.side - 1);
        for ox in 0..dst_side {
            let sx = (((ox as f64 + 0.5) * scale) as usize).min(src.side - 1);
            weights[oy * dst_side + ox] = src.get(sy, sx);
        }
    }

    Kernel {
        side: dst_side,
        weights,
    }
}

/// One point-spread function: the raw kernel read from disk plus, after
/// [`resample`](Psf::resample), one renormalized kernel per integer pixel
/// radius covering this PSF's parameter-space neighborhood.
#[derive(Clone, Debug, PartialEq)]
pub struct Psf {
    pub raw: Kernel,
    /// Angular blur size on the image plane, degrees.
    pub blur_radius_deg: f32,
    pub min_blur_radius: u32,
    pub max_blur_radius: u32,
    /// Index 0 corresponds to `min_blur_radius`.
    pub weights: Vec<Kernel>,
}

impl Psf {
    pub fn new(raw: Kernel, blur_radius_deg: f32) -> Self {
        Self {
            raw,
            blur_radius_deg,
            min_blur_radius: 0,
            max_blur_radius: 0,
            weights: Vec::new(),
        }
    }

    /// Materialize the resampled kernel family for the closed radius range.
    pub fn resample(&mut self, min_blur_radius: u32, max_blur_radius: u32) {
        let max_blur_radius = max_blur_radius.max(min_blur_radius);
        self.min_blur_radius = min_blur_radius;
        self.max_blur_radius = max_blur_radius;
        self.weights = (min_blur_radius..=max_blur_radius)
            .map(|r| self.raw.resampled(r))
            .collect();
    }

    pub fn kernel_for_radius(&self, radius: u32) -> Option<&Kernel> {
        if self.weights.is_empty() || radius < self.min_blur_radius || radius > self.max_blur_radius
        {
            return None;
        }
        self.weights.get((radius - self.min_blur_radius) as usize)
    }

    /// Like [`kernel_for_radius`](Self::kernel_for_radius) but clamping into
    /// the resampled range. Panics if `resample` has not run.
    pub fn kernel_clamped(&self, radius: u32) -> &Kernel {
        assert!(
            !self.weights.is_empty(),
            "PSF kernels requested before resampling"
        );
        let r = radius.clamp(self.min_blur_radius, self.max_blur_radius);
        &self.weights[(r - self.min_blur_radius) as usize]
    }
}
