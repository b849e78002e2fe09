use std::path::Path;

use anyhow::Context as _;
use rayon::prelude::*;

use crate::{
    core::Projection,
    error::{AberrateError, AberrateResult},
    psf::{Kernel, Psf},
};

/// Ordered 6-tuple addressing one PSF in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PsfIndex {
    pub depth: usize,
    pub horizontal: usize,
    pub vertical: usize,
    pub wavelength: usize,
    pub aperture: usize,
    pub focus: usize,
}

/// Per-axis sample counts. Linearization follows the canonical iteration
/// order: depth slowest-varying, focus fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridShape {
    pub depths: usize,
    pub horizontals: usize,
    pub verticals: usize,
    pub wavelengths: usize,
    pub apertures: usize,
    pub focuses: usize,
}

impl GridShape {
    pub fn len(&self) -> usize {
        self.depths
            * self.horizontals
            * self.verticals
            * self.wavelengths
            * self.apertures
            * self.focuses
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, idx: PsfIndex) -> bool {
        idx.depth < self.depths
            && idx.horizontal < self.horizontals
            && idx.vertical < self.verticals
            && idx.wavelength < self.wavelengths
            && idx.aperture < self.apertures
            && idx.focus < self.focuses
    }

    /// Out-of-range indices are programming errors, not data errors: panic
    /// rather than clamp.
    pub fn linearize(&self, idx: PsfIndex) -> usize {
        assert!(self.contains(idx), "PSF index out of range: {idx:?}");
        ((((idx.depth * self.horizontals + idx.horizontal) * self.verticals + idx.vertical)
            * self.wavelengths
            + idx.wavelength)
            * self.apertures
            + idx.aperture)
            * self.focuses
            + idx.focus
    }

    pub fn split(&self, linear: usize) -> PsfIndex {
        assert!(
            linear < self.len(),
            "linear PSF index {linear} out of range for {self:?}"
        );
        let focus = linear % self.focuses;
        let rest = linear / self.focuses;
        let aperture = rest % self.apertures;
        let rest = rest / self.apertures;
        let wavelength = rest % self.wavelengths;
        let rest = rest / self.wavelengths;
        let vertical = rest % self.verticals;
        let rest = rest / self.verticals;
        let horizontal = rest % self.horizontals;
        let depth = rest / self.horizontals;
        PsfIndex {
            depth,
            horizontal,
            vertical,
            wavelength,
            aperture,
            focus,
        }
    }
}

/// The eight sidecar axis lists. Dioptre lists are canonical for
/// interpolation; the paired distance lists are host-facing.
#[derive(Clone, Debug, PartialEq)]
pub struct PsfAxes {
    pub focus_dioptres: Vec<f32>,
    pub focus_distances: Vec<f32>,
    pub object_dioptres: Vec<f32>,
    pub object_distances: Vec<f32>,
    pub wavelengths: Vec<f32>,
    pub aperture_diameters: Vec<f32>,
    pub horizontal_angles: Vec<f32>,
    pub vertical_angles: Vec<f32>,
}

impl PsfAxes {
    pub fn shape(&self) -> GridShape {
        GridShape {
            depths: self.object_dioptres.len(),
            horizontals: self.horizontal_angles.len(),
            verticals: self.vertical_angles.len(),
            wavelengths: self.wavelengths.len(),
            apertures: self.aperture_diameters.len(),
            focuses: self.focus_dioptres.len(),
        }
    }

    /// Sidecar format: one `label: v0 v1 ...` line per axis, fixed order.
    pub fn parse(sidecar: &str) -> AberrateResult<Self> {
        let mut lines = sidecar.lines();
        let mut next_axis = |label: &str| -> AberrateResult<Vec<f32>> {
            let line = lines.next().ok_or_else(|| {
                AberrateError::malformed_data_file(format!("missing axis line '{label}'"))
            })?;
            parse_axis_line(label, line)
        };

        let axes = Self {
            focus_dioptres: next_axis("focus dioptres")?,
            focus_distances: next_axis("focus distances")?,
            object_dioptres: next_axis("object dioptres")?,
            object_distances: next_axis("object distances")?,
            wavelengths: next_axis("wavelengths")?,
            aperture_diameters: next_axis("aperture diameters")?,
            horizontal_angles: next_axis("horizontal angles")?,
            vertical_angles: next_axis("vertical angles")?,
        };
        Ok(axes)
    }
}

fn parse_axis_line(label: &str, line: &str) -> AberrateResult<Vec<f32>> {
    let data = line.split_once(':').map(|(_, rest)| rest).ok_or_else(|| {
        AberrateError::malformed_data_file(format!("axis '{label}' line is missing ':'"))
    })?;

    let mut values = Vec::new();
    for token in data.split_whitespace() {
        let v: f32 = token.parse().map_err(|_| {
            AberrateError::malformed_data_file(format!("axis '{label}' has non-float '{token}'"))
        })?;
        values.push(v);
    }

    if values.is_empty() {
        return Err(AberrateError::malformed_data_file(format!(
            "axis '{label}' is empty"
        )));
    }
    if values.windows(2).any(|w| w[1] < w[0]) {
        return Err(AberrateError::malformed_data_file(format!(
            "axis '{label}' is not sorted ascending"
        )));
    }
    Ok(values)
}

/// GPU-facing per-PSF record, paired with the flattened weight pool.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PsfParam {
    pub min_blur_radius: u32,
    pub max_blur_radius: u32,
    pub weight_start_index: u32,
    pub blur_radius_deg: f32,
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_f32(&mut self) -> AberrateResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> AberrateResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> AberrateResult<[u8; N]> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(AberrateError::malformed_data_file(
                "unexpected end of PSF data file",
            ));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// The 6-D PSF grid: axis sample lists plus one contiguous arena of PSFs
/// addressed through [`GridShape::linearize`].
#[derive(Clone, Debug)]
pub struct PsfStack {
    axes: PsfAxes,
    shape: GridShape,
    psfs: Vec<Psf>,
}

impl PsfStack {
    /// Load a PSF set directory containing the `psfstack` sidecar and the
    /// binary `psfdata` file.
    #[tracing::instrument]
    pub fn load(dir: &Path) -> AberrateResult<Self> {
        let sidecar_path = dir.join("psfstack");
        let sidecar = std::fs::read_to_string(&sidecar_path)
            .with_context(|| format!("read PSF sidecar '{}'", sidecar_path.display()))?;
        let data_path = dir.join("psfdata");
        let data = std::fs::read(&data_path)
            .with_context(|| format!("read PSF data '{}'", data_path.display()))?;
        Self::parse(&sidecar, &data)
    }

    /// Parse from in-memory sidecar text and binary record data.
    ///
    /// Each binary record, in canonical iteration order: six f32 parameter
    /// fields (object distance as inverse dioptre, horizontal angle, vertical
    /// angle, wavelength, aperture, focus distance as inverse dioptre), one
    /// f32 angular blur size in degrees, one u32 kernel side `k`, then `k*k`
    /// f32 weights column-major, transposed to row-major on load.
    pub fn parse(sidecar: &str, data: &[u8]) -> AberrateResult<Self> {
        let axes = PsfAxes::parse(sidecar)?;
        let shape = axes.shape();

        let mut reader = ByteReader::new(data);
        let mut psfs = Vec::with_capacity(shape.len());
        for _ in 0..shape.len() {
            psfs.push(read_psf_record(&mut reader)?);
        }
        if reader.remaining() != 0 {
            return Err(AberrateError::malformed_data_file(format!(
                "{} trailing bytes after final PSF record",
                reader.remaining()
            )));
        }

        tracing::debug!(psf_count = psfs.len(), "parsed PSF stack");
        Ok(Self { axes, shape, psfs })
    }

    pub fn axes(&self) -> &PsfAxes {
        &self.axes
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn psf(&self, idx: PsfIndex) -> &Psf {
        &self.psfs[self.shape.linearize(idx)]
    }

    pub fn psfs(&self) -> &[Psf] {
        &self.psfs
    }

    /// Recompute every PSF's kernel family for the given projection.
    ///
    /// The radius neighborhood of a PSF spans one grid step along the
    /// object-depth, aperture, and focus axes; angles and wavelength are
    /// never interpolated so never perturbed. Resampling itself is
    /// data-parallel across PSFs.
    #[tracing::instrument(skip(self))]
    pub fn resample(&mut self, projection: Projection) {
        let bounds: Vec<(u32, u32)> = (0..self.shape.len())
            .map(|linear| self.radius_bounds(self.shape.split(linear), projection))
            .collect();

        self.psfs
            .par_iter_mut()
            .zip(bounds.par_iter())
            .for_each(|(psf, &(min, max))| psf.resample(min, max));
    }

    fn radius_bounds(&self, idx: PsfIndex, projection: Projection) -> (u32, u32) {
        let mut min_px = f32::INFINITY;
        let mut max_px = 0.0f32;

        for depth in step_neighborhood(idx.depth, self.shape.depths) {
            for aperture in step_neighborhood(idx.aperture, self.shape.apertures) {
                for focus in step_neighborhood(idx.focus, self.shape.focuses) {
                    let neighbor = self.psf(PsfIndex {
                        depth,
                        aperture,
                        focus,
                        ..idx
                    });
                    let px = projection.degrees_to_pixels(neighbor.blur_radius_deg);
                    min_px = min_px.min(px);
                    max_px = max_px.max(px);
                }
            }
        }

        (min_px.floor().max(0.0) as u32, max_px.ceil().max(0.0) as u32)
    }

    /// Total resampled weight count: Σ over PSFs of Σ_{r=min}^{max} (2r+1)².
    pub fn total_weights(&self) -> usize {
        self.psfs
            .iter()
            .map(|psf| {
                psf.weights
                    .iter()
                    .map(|k| k.side() * k.side())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Flatten the resampled kernel families into the GPU-facing param list
    /// and concatenated weight pool.
    pub fn flatten_params(&self) -> (Vec<PsfParam>, Vec<f32>) {
        let mut params = Vec::with_capacity(self.psfs.len());
        let mut pool = Vec::with_capacity(self.total_weights());
        for psf in &self.psfs {
            params.push(PsfParam {
                min_blur_radius: psf.min_blur_radius,
                max_blur_radius: psf.max_blur_radius,
                weight_start_index: pool.len() as u32,
                blur_radius_deg: psf.blur_radius_deg,
            });
            for kernel in &psf.weights {
                pool.extend_from_slice(kernel.weights());
            }
        }
        (params, pool)
    }
}

/// Indices within one grid step of `i` on an axis of `len` samples.
fn step_neighborhood(i: usize, len: usize) -> impl Iterator<Item = usize> {
    let lo = i.saturating_sub(1);
    let hi = (i + 1).min(len.saturating_sub(1));
    lo..=hi
}

fn read_psf_record(reader: &mut ByteReader<'_>) -> AberrateResult<Psf> {
    // Parameter fields restate the record's grid coordinates; the canonical
    // iteration order already fixes them, so they are read and dropped.
    for _ in 0..6 {
        reader.read_f32()?;
    }
    let blur_radius_deg = reader.read_f32()?;
    let side = reader.read_u32()? as usize;
    if side == 0 {
        return Err(AberrateError::malformed_data_file(
            "PSF record declares a zero-sided kernel",
        ));
    }
    // Bound the allocation by the bytes actually present.
    if (side as u128).pow(2) * 4 > reader.remaining() as u128 {
        return Err(AberrateError::malformed_data_file(format!(
            "PSF record declares a {side}x{side} kernel but only {} bytes remain",
            reader.remaining()
        )));
    }

    let mut weights = vec![0.0f32; side * side];
    // Stored column-major; transpose to row-major.
    for col in 0..side {
        for row in 0..side {
            weights[row * side + col] = reader.read_f32()?;
        }
    }
    let kernel = Kernel::new(side, weights)?;
    Ok(Psf::new(kernel, blur_radius_deg))
}
