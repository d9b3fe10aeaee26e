//! phantomqa CLI for depth-resolution and field-uniformity analysis of
//! imaging phantoms.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use phantomqa::{
    DepthAnalysis, DotSet, ImageMeta, PhantomImage, Pipeline, PipelineConfig, SavedArtifacts,
    SurfaceModel,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "phantomqa")]
#[command(about = "Measure depth resolution and field uniformity from phantom images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop a depth phantom and measure FWHM at each depth.
    Depth(CliDepthArgs),

    /// Detect well grids in a batch of images and fit a uniformity surface.
    Uniformity(CliUniformityArgs),

    /// Print the default pipeline configuration as JSON.
    ConfigTemplate,
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Pipeline configuration (JSON). Missing sections take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pixel scale (mm/px) attached to every input image.
    #[arg(long)]
    mm_per_px: Option<f64>,

    /// Path to write the result (JSON). Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliDepthArgs {
    /// Path to the depth-phantom image.
    image: PathBuf,

    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated depths (mm) overriding the configured list.
    #[arg(long, value_delimiter = ',')]
    depths: Option<Vec<f64>>,

    /// Measure peaks and dropout on unsmoothed profiles.
    #[arg(long)]
    no_smoothing: bool,

    /// Write the cropped channel as a 16-bit PNG.
    #[arg(long)]
    roi_png: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliUniformityArgs {
    /// Well-plate images, all of the same size.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,

    /// Grid shape as ROWSxCOLS, e.g. 3x3.
    #[arg(long)]
    grid: Option<String>,

    /// Polynomial order of the fitted surface.
    #[arg(long)]
    fit_order: Option<usize>,

    /// Save the model and map under the output directory.
    #[arg(long)]
    save: bool,

    /// Base directory for saved runs (default: directory of the first image).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Depth(args) => run_depth(&args),
        Commands::Uniformity(args) => run_uniformity(&args),
        Commands::ConfigTemplate => run_config_template(),
    }
}

// ── shared ─────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    match path {
        Some(p) => {
            tracing::info!("Loading config: {}", p.display());
            Ok(PipelineConfig::from_json_file(p)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn load_image(path: &Path, mm_per_px: Option<f64>) -> CliResult<PhantomImage> {
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut meta = ImageMeta::new(id).with_source(path);
    if let Some(scale) = mm_per_px {
        meta = meta.with_scale(scale);
    }
    let image = PhantomImage::from_dynamic(&img, meta);
    tracing::info!(
        "Loaded {}: {}x{}",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

fn write_json<T: serde::Serialize>(value: &T, out: Option<&Path>) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("Results written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn parse_grid(s: &str) -> CliResult<(usize, usize)> {
    let (rows, cols) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| -> CliError { format!("invalid grid '{s}', expected ROWSxCOLS").into() })?;
    Ok((rows.trim().parse()?, cols.trim().parse()?))
}

// ── config-template ────────────────────────────────────────────────────

fn run_config_template() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
    Ok(())
}

// ── depth ──────────────────────────────────────────────────────────────

fn run_depth(args: &CliDepthArgs) -> CliResult<()> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(depths) = &args.depths {
        config.depth.depths_mm = depths.clone();
    }
    if args.no_smoothing {
        config.depth.smoothing = false;
    }
    let pipeline = Pipeline::new(config)?;
    let image = load_image(&args.image, args.common.mm_per_px)?;

    let roi = pipeline.cropper().crop(&image)?;
    if let Some(path) = &args.roi_png {
        save_roi_png(roi.pixels(), path)?;
        tracing::info!("ROI written to {}", path.display());
    }
    let analysis = pipeline.depth_analyzer().analyze(&roi)?;
    report_depth(&analysis);

    write_json(&analysis, args.common.out.as_deref())
}

fn report_depth(analysis: &DepthAnalysis) {
    for p in &analysis.profiles {
        match p.fwhm_mm {
            Some(fwhm) => tracing::info!(
                "depth {:.2} mm: FWHM {:.3} mm{}",
                p.depth_mm,
                fwhm,
                if p.dropout { " (dropout)" } else { "" }
            ),
            None => tracing::info!(
                "depth {:.2} mm: no FWHM{}",
                p.depth_mm,
                if p.dropout { " (dropout)" } else { "" }
            ),
        }
    }
    for f in &analysis.failures {
        tracing::warn!("{}", f);
    }
    if let Some(d) = analysis.dropout_depth_mm {
        tracing::warn!("Signal drops out beyond {:.2} mm; deeper FWHM values are unreliable", d);
    }
}

/// Rescale a cropped channel to the full 16-bit range.
fn save_roi_png(pixels: &phantomqa::IntensityMap, path: &Path) -> CliResult<()> {
    let max = pixels.pixels().map(|p| p[0]).fold(0.0f32, f32::max);
    let scale = if max > 0.0 { u16::MAX as f32 / max } else { 0.0 };
    let out = image::ImageBuffer::from_fn(pixels.width(), pixels.height(), |x, y| {
        let v = pixels.get_pixel(x, y)[0].max(0.0) * scale;
        image::Luma([v.round().min(u16::MAX as f32) as u16])
    });
    out.save(path)?;
    Ok(())
}

// ── uniformity ─────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct UniformityReport<'a> {
    dot_set: &'a DotSet,
    model: &'a SurfaceModel,
    saved: Option<&'a SavedArtifacts>,
}

fn run_uniformity(args: &CliUniformityArgs) -> CliResult<()> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(grid) = &args.grid {
        let (rows, cols) = parse_grid(grid)?;
        config.dots.grid = phantomqa::GridShape::new(rows, cols);
    }
    if let Some(order) = args.fit_order {
        config.uniformity.fit_order = order;
    }
    if args.save {
        config.uniformity.save_output = true;
    }
    if let Some(dir) = &args.output_dir {
        config.uniformity.output_dir = Some(dir.clone());
    }
    let pipeline = Pipeline::new(config)?;

    let images = args
        .images
        .iter()
        .map(|p| load_image(p, args.common.mm_per_px))
        .collect::<CliResult<Vec<_>>>()?;

    let run = pipeline.uniformity(&images)?;
    let stats = &run.output.model.stats;
    tracing::info!(
        "Fitted {} wells over {} image(s): min {:.3}, cv {:.3}, R^2 {:.4}",
        run.output.model.wells.len(),
        run.dot_set.n_images(),
        stats.min,
        stats.cv,
        run.output.model.fit.r_squared
    );
    if let Some(err) = run.output.save_error() {
        tracing::error!("Saving failed: {}", err);
    }

    let report = UniformityReport {
        dot_set: &run.dot_set,
        model: &run.output.model,
        saved: run.output.saved_to(),
    };
    write_json(&report, args.common.out.as_deref())
}
