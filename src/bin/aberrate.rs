use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use image::GenericImageView as _;

use aberrate::{ColorPlane, DepthPlane, PsfStack, RenderConfig, Renderer, Resolution};

#[derive(Parser, Debug)]
#[command(name = "aberrate", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite one aberrated frame from color + depth images.
    Frame(FrameArgs),
    /// Print a summary of a PSF set.
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// PSF set directory (contains `psfstack` and `psfdata`).
    #[arg(long = "psf-set")]
    psf_set: PathBuf,

    /// Input color image.
    #[arg(long)]
    color: PathBuf,

    /// Input depth image (grayscale, mapped linearly to metres).
    #[arg(long)]
    depth: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Render settings JSON; individual flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vertical field of view in degrees.
    #[arg(long)]
    fov: Option<f32>,

    /// Aperture diameter in millimetres.
    #[arg(long)]
    aperture: Option<f32>,

    /// Focus in dioptres.
    #[arg(long = "focus-dioptre")]
    focus_dioptre: Option<f32>,

    /// Depth value a black depth pixel maps to, metres.
    #[arg(long = "depth-near", default_value_t = 0.2)]
    depth_near: f32,

    /// Depth value a white depth pixel maps to, metres.
    #[arg(long = "depth-far", default_value_t = 10.0)]
    depth_far: f32,

    /// Tile edge length in pixels.
    #[arg(long = "tile-size")]
    tile_size: Option<u32>,

    /// Per-tile fragment capacity.
    #[arg(long = "tile-max-fragments")]
    tile_max_fragments: Option<u32>,

    /// Resolution scale applied to the input size.
    #[arg(long)]
    scale: Option<f32>,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// PSF set directory (contains `psfstack` and `psfdata`).
    #[arg(long = "psf-set")]
    psf_set: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Info(args) => cmd_info(args),
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let stack = PsfStack::load(&args.psf_set)?;

    let color_img = image::open(&args.color)
        .with_context(|| format!("open color image '{}'", args.color.display()))?;
    let depth_img = image::open(&args.depth)
        .with_context(|| format!("open depth image '{}'", args.depth.display()))?;
    anyhow::ensure!(
        depth_img.dimensions() == color_img.dimensions(),
        "depth image is {}x{}, color image is {}x{}",
        depth_img.width(),
        depth_img.height(),
        color_img.width(),
        color_img.height()
    );
    let resolution = Resolution::new(color_img.width(), color_img.height());

    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => RenderConfig::default(),
    };
    config.resolution = resolution;
    if let Some(fov) = args.fov {
        config.vertical_fov_deg = fov;
    }
    if let Some(aperture) = args.aperture {
        config.aperture_mm = aperture;
    }
    if let Some(focus) = args.focus_dioptre {
        config.focus_dioptre = focus;
    }
    if let Some(tile_size) = args.tile_size {
        config.tile_size = tile_size;
    }
    if let Some(cap) = args.tile_max_fragments {
        config.tile_max_fragments = cap;
    }
    if let Some(scale) = args.scale {
        config.resolution_scale = scale;
    }

    // The pipeline consumes planes at the scaled target resolution.
    let target = config.target_resolution();
    let (color_img, depth_img) = if target == resolution {
        (color_img, depth_img)
    } else {
        (
            color_img.resize_exact(
                target.width,
                target.height,
                image::imageops::FilterType::Triangle,
            ),
            // Nearest keeps depth samples unblended across silhouettes.
            depth_img.resize_exact(
                target.width,
                target.height,
                image::imageops::FilterType::Nearest,
            ),
        )
    };
    let color = color_plane(&color_img.to_rgba8())?;
    let depth = depth_plane(&depth_img.to_luma16(), args.depth_near, args.depth_far)?;

    let mut renderer = Renderer::new(stack, config)?;
    let output = renderer.render(&color, &depth)?;
    write_color(&args.out, output)?;

    let stats = renderer.last_frame_stats();
    println!(
        "wrote {} ({} fragments, {} dropped)",
        args.out.display(),
        stats.fragments_built,
        stats.fragments_dropped
    );
    Ok(())
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let stack = PsfStack::load(&args.psf_set)?;
    let shape = stack.shape();
    let axes = stack.axes();
    println!("psf count: {}", shape.len());
    println!(
        "grid: {} depths x {} horizontal x {} vertical x {} wavelengths x {} apertures x {} focuses",
        shape.depths,
        shape.horizontals,
        shape.verticals,
        shape.wavelengths,
        shape.apertures,
        shape.focuses
    );
    println!("object dioptres: {:?}", axes.object_dioptres);
    println!("aperture diameters: {:?}", axes.aperture_diameters);
    println!("focus dioptres: {:?}", axes.focus_dioptres);
    println!("wavelengths: {:?}", axes.wavelengths);
    Ok(())
}

fn read_config(path: &Path) -> anyhow::Result<RenderConfig> {
    let r = BufReader::new(
        File::open(path).with_context(|| format!("open config '{}'", path.display()))?,
    );
    serde_json::from_reader(r).with_context(|| "parse render config JSON")
}

fn color_plane(img: &image::RgbaImage) -> anyhow::Result<ColorPlane> {
    let (width, height) = img.dimensions();
    let texels = img
        .pixels()
        .map(|p| {
            [
                f32::from(p[0]) / 255.0,
                f32::from(p[1]) / 255.0,
                f32::from(p[2]) / 255.0,
                f32::from(p[3]) / 255.0,
            ]
        })
        .collect();
    Ok(ColorPlane::from_texels(width, height, texels)?)
}

fn depth_plane(
    img: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
    near_m: f32,
    far_m: f32,
) -> anyhow::Result<DepthPlane> {
    let (width, height) = img.dimensions();
    let samples = img
        .pixels()
        .map(|p| {
            let t = f32::from(p[0]) / f32::from(u16::MAX);
            near_m + t * (far_m - near_m)
        })
        .collect();
    Ok(DepthPlane::from_samples(width, height, samples)?)
}

fn write_color(path: &Path, plane: &ColorPlane) -> anyhow::Result<()> {
    let resolution = plane.resolution();
    let mut bytes = Vec::with_capacity(resolution.pixel_count() * 4);
    for texel in plane.texels() {
        for c in texel {
            bytes.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    image::save_buffer_with_format(
        path,
        &bytes,
        resolution.width,
        resolution.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write output image '{}'", path.display()))?;
    Ok(())
}
