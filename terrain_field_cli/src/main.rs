use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use plotters::prelude::*;
use rayon::prelude::*;
use serde::Deserialize;
use terrain_field::forecast::{
    fit_logistic, forecast_curve, forecast_entries, layout_filtered, parse_forecast_entries,
    ForecastEntry, ForecastNode, LogisticFit, Observation, DEFAULT_SATURATION,
    DEFAULT_THRESHOLDS,
};
use terrain_field::sinkhole::{parse_evaluations, summarize_evaluations};
use terrain_field::temporal::recorded_years;
use terrain_field::{
    build_relations, compute_terrain, related_to, Band, BucketPolicy, CategoryConfig, ColorField,
    Dataset, Params, RelationEdge, TerrainSnapshot,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capability terrain field generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interpolate the terrain for one year and write grid CSV/JSON/preview
    Field(FieldArgs),
    /// Compute terrain statistics for several years in parallel
    Timeline(TimelineArgs),
    /// List capabilities related through shared top models
    Relations(RelationsArgs),
    /// Lay out forecast markers from a forecast nodes file
    Forecast(ForecastArgs),
    /// Fit logistic growth curves to benchmark history and export forecast nodes
    Fit(FitArgs),
    /// Score failure evaluations into placed sinkholes
    Sinkholes(SinkholesArgs),
}

#[derive(Args, Debug)]
struct TerrainOpts {
    /// Capability dataset JSON
    #[arg(value_hint = ValueHint::FilePath)]
    dataset: PathBuf,

    /// Parameter JSON; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Category configuration JSON (colors, display names)
    #[arg(long, value_hint = ValueHint::FilePath)]
    categories: Option<PathBuf>,

    /// Restrict to one capability category
    #[arg(long)]
    category: Option<String>,

    /// Grid segments per axis
    #[arg(long)]
    resolution: Option<usize>,

    /// Interpolation search radius in cells
    #[arg(long)]
    search_radius: Option<usize>,

    /// Normalized level under which a capability is a sinkhole
    #[arg(long)]
    sinkhole_threshold: Option<f64>,

    /// Average samples sharing a grid cell instead of keeping the last one
    #[arg(long, action = ArgAction::SetTrue)]
    average_collisions: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct FieldArgs {
    #[command(flatten)]
    terrain: TerrainOpts,

    /// Year to resolve levels for
    #[arg(long)]
    year: Option<i32>,

    /// Output grid CSV path (`-` for stdout)
    #[arg(short, long, default_value = "terrain_grid.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Full snapshot JSON (field, rings, edges, trends, markers)
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Output PNG preview path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG preview path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable preview generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    #[command(flatten)]
    terrain: TerrainOpts,

    /// Years to compute (comma separated, `a..b` ranges); defaults to the configured years
    #[arg(long, conflicts_with = "recorded")]
    years: Option<String>,

    /// Compute every year recorded in the dataset
    #[arg(long, action = ArgAction::SetTrue)]
    recorded: bool,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "terrain_timeline.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct RelationsArgs {
    /// Capability dataset JSON
    #[arg(value_hint = ValueHint::FilePath)]
    dataset: PathBuf,

    /// Only edges starting at this capability
    #[arg(long)]
    key: Option<String>,

    /// Restrict to one capability category
    #[arg(long)]
    category: Option<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ForecastArgs {
    /// Forecast nodes JSON (`{"nodes": [...]}` or a list)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Keep capabilities whose name contains this text
    #[arg(long)]
    filter: Option<String>,

    /// Parameter JSON providing the radial layout settings
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "forecast_layout.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct FitArgs {
    /// Benchmark history JSON
    #[arg(value_hint = ValueHint::FilePath)]
    history: PathBuf,

    /// Reference date for `days_until` (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    today: Option<String>,

    /// Saturation level of the logistic curve (percent)
    #[arg(long, default_value_t = DEFAULT_SATURATION)]
    saturation: f64,

    /// Thresholds to forecast (comma separated percents)
    #[arg(long)]
    thresholds: Option<String>,

    /// Output forecast nodes JSON (`-` for stdout)
    #[arg(short, long, default_value = "forecast_nodes.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Fitted curve CSV (observed days, then weekly steps ahead)
    #[arg(long, value_hint = ValueHint::FilePath)]
    curve: Option<PathBuf>,

    /// Days past the last observation covered by `--curve`
    #[arg(long, default_value_t = 1095)]
    curve_days: u32,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SinkholesArgs {
    /// Failure evaluations JSON
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "sinkholes.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Field(args) => args.terrain.verbose,
        Command::Timeline(args) => args.terrain.verbose,
        Command::Relations(args) => args.verbose,
        Command::Forecast(args) => args.verbose,
        Command::Fit(args) => args.verbose,
        Command::Sinkholes(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Field(args) => handle_field(args),
        Command::Timeline(args) => handle_timeline(args),
        Command::Relations(args) => handle_relations(args),
        Command::Forecast(args) => handle_forecast(args),
        Command::Fit(args) => handle_fit(args),
        Command::Sinkholes(args) => handle_sinkholes(args),
    }
}

fn handle_field(args: FieldArgs) -> Result<()> {
    let opts = &args.terrain;
    let timed = opts.profile || opts.verbose;

    let t_load = Instant::now();
    let mut params = load_params(opts)?;
    if let Some(year) = args.year {
        params.year = year;
    }
    let dataset = load_dataset(&opts.dataset)?;
    let categories = load_categories(opts.categories.as_deref())?;
    if timed {
        info!(
            "Load stage: {:.1} ms ({} samples)",
            t_load.elapsed().as_secs_f64() * 1000.0,
            dataset.len()
        );
    }

    let t_compute = Instant::now();
    let snapshot = compute_terrain(&dataset, &categories, &params)
        .context("terrain computation failed")?;
    if timed {
        let (n, _) = snapshot.field.dims();
        info!(
            "Compute stage: {:.1} ms ({}x{} nodes)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            n,
            n
        );
    }
    log_snapshot_summary(&snapshot, &categories);

    if args.output.as_os_str() == "-" {
        write_grid_stdout(&snapshot)?;
    } else {
        let t_csv = Instant::now();
        write_grid_csv(&snapshot, &args.output)?;
        if timed {
            info!(
                "CSV stage: {:.1} ms ({} rows)",
                t_csv.elapsed().as_secs_f64() * 1000.0,
                snapshot.stats.total_nodes
            );
        }
        info!("Wrote grid CSV: {}", args.output.display());
    }

    if let Some(json_path) = args.json.as_ref() {
        write_json(&snapshot, json_path)?;
        info!("Wrote snapshot JSON: {}", json_path.display());
    }

    if !args.no_plot {
        let png = match args.png.as_ref() {
            Some(path) => Some(path.clone()),
            None if args.output.as_os_str() != "-" => Some(args.output.with_extension("png")),
            None => None,
        };
        if let Some(path) = png {
            match render_preview_guard(&snapshot.colors, &path, ChartKind::Png) {
                Ok(()) => info!("Wrote preview: {}", path.display()),
                Err(err) => warn!("Skipping PNG render ({}): {}", path.display(), err),
            }
        }
        if let Some(path) = args.svg.as_ref() {
            match render_preview_guard(&snapshot.colors, path, ChartKind::Svg) {
                Ok(()) => info!("Wrote preview: {}", path.display()),
                Err(err) => warn!("Skipping SVG render ({}): {}", path.display(), err),
            }
        }
    }

    Ok(())
}

fn handle_timeline(args: TimelineArgs) -> Result<()> {
    let opts = &args.terrain;
    let params = load_params(opts)?;
    let dataset = load_dataset(&opts.dataset)?;
    let years = match args.years.as_deref() {
        Some(list) => parse_year_list(list)?,
        None if args.recorded => recorded_years(&dataset.samples),
        None => params.years.clone(),
    };
    if years.is_empty() {
        return Err(anyhow!("no years to compute"));
    }
    let categories = load_categories(opts.categories.as_deref())?;

    let t_compute = Instant::now();
    let snapshots: Vec<TerrainSnapshot> = years
        .par_iter()
        .map(|&year| -> Result<TerrainSnapshot> {
            let year_params = Params {
                year,
                ..params.clone()
            };
            compute_terrain(&dataset, &categories, &year_params)
                .with_context(|| format!("terrain computation failed for {}", year))
        })
        .collect::<Result<Vec<_>>>()?;
    if opts.profile || opts.verbose {
        info!(
            "Compute stage: {:.1} ms ({} years)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            snapshots.len()
        );
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_timeline_rows(&snapshots, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_timeline_rows(&snapshots, &mut writer)?;
        info!("Wrote timeline CSV: {}", args.output.display());
    }
    Ok(())
}

fn handle_relations(args: RelationsArgs) -> Result<()> {
    let dataset = load_dataset(&args.dataset)?;
    let active = dataset.filtered(args.category.as_deref());
    let edges = match args.key.as_deref() {
        Some(key) => {
            if !active.iter().any(|s| s.key == key) {
                warn!("capability '{}' is not in the selected samples", key);
            }
            related_to(key, &active)
        }
        None => build_relations(&active),
    };
    info!("{} relation edges over {} capabilities", edges.len(), active.len());

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_edge_rows(&edges, &mut writer)
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_edge_rows(&edges, &mut writer)?;
        info!("Wrote relations CSV: {}", args.output.display());
        Ok(())
    }
}

fn handle_forecast(args: ForecastArgs) -> Result<()> {
    let radial = match args.params.as_deref() {
        Some(path) => read_params_file(path)?.radial,
        None => Params::default().radial,
    };
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let entries = parse_forecast_entries(&bytes)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    let nodes = layout_filtered(&entries, args.filter.as_deref(), &radial);
    let imminent = nodes.iter().filter(|n| n.imminent).count();
    info!(
        "Laid out {} of {} forecast nodes ({} imminent)",
        nodes.len(),
        entries.len(),
        imminent
    );

    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    write_node_rows(&nodes, &mut writer)?;
    if args.output.as_os_str() != "-" {
        info!("Wrote forecast layout CSV: {}", args.output.display());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CapabilityHistory {
    capability: String,
    #[serde(default)]
    category: String,
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryInput {
    Wrapped { capabilities: Vec<CapabilityHistory> },
    Bare(Vec<CapabilityHistory>),
}

impl HistoryInput {
    fn into_vec(self) -> Vec<CapabilityHistory> {
        match self {
            HistoryInput::Wrapped { capabilities } => capabilities,
            HistoryInput::Bare(list) => list,
        }
    }
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let today = match args.today.as_deref() {
        Some(raw) => parse_date_arg(raw)?,
        None => Utc::now().date_naive(),
    };
    let thresholds = match args.thresholds.as_deref() {
        Some(list) => parse_threshold_list(list)?,
        None => DEFAULT_THRESHOLDS.to_vec(),
    };
    let text = fs::read_to_string(&args.history)
        .with_context(|| format!("failed to read {}", args.history.display()))?;
    let histories = serde_json::from_str::<HistoryInput>(&text)
        .with_context(|| format!("{} is not a valid history file", args.history.display()))?
        .into_vec();

    let t_fit = Instant::now();
    let fits: Vec<(&CapabilityHistory, LogisticFit)> = histories
        .par_iter()
        .filter_map(|h| match fit_logistic(&h.observations, args.saturation) {
            Ok(fit) => {
                info!(
                    "{}: k {:.5}, t0 {:.1} d, R² {:.3}",
                    h.capability, fit.model.k, fit.model.t0, fit.r_squared
                );
                Some((h, fit))
            }
            Err(err) => {
                warn!("Skipping {}: {}", h.capability, err);
                None
            }
        })
        .collect();
    let entries: Vec<ForecastEntry> = fits
        .iter()
        .flat_map(|(h, fit)| {
            forecast_entries(
                &h.capability,
                &h.category,
                fit,
                &h.observations,
                today,
                &thresholds,
            )
        })
        .collect();
    if args.verbose {
        info!(
            "Fit stage: {:.1} ms ({} capabilities)",
            t_fit.elapsed().as_secs_f64() * 1000.0,
            histories.len()
        );
    }

    if let Some(curve_path) = args.curve.as_ref() {
        let file = File::create(curve_path)
            .with_context(|| format!("failed to create {}", curve_path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["capability", "date", "score"])?;
        for (h, fit) in &fits {
            for (date, score) in forecast_curve(fit, &h.observations, args.curve_days) {
                writer.write_record([
                    h.capability.clone(),
                    date.to_string(),
                    format!("{:.3}", score),
                ])?;
            }
        }
        writer.flush()?;
        info!("Wrote fitted curves: {}", curve_path.display());
    }

    let doc = serde_json::json!({
        "generated": today.to_string(),
        "nodes": entries,
    });
    let mut out = open_output(&args.output)?;
    serde_json::to_writer_pretty(&mut out, &doc)?;
    writeln!(out)?;
    if args.output.as_os_str() != "-" {
        info!(
            "Wrote {} forecast nodes: {}",
            entries.len(),
            args.output.display()
        );
    }
    Ok(())
}

fn handle_sinkholes(args: SinkholesArgs) -> Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let evals = parse_evaluations(&bytes)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    let summary = summarize_evaluations(&evals);

    let breakdown: Vec<String> = summary
        .by_severity
        .iter()
        .rev()
        .map(|(severity, count)| format!("{} {}", severity.name(), count))
        .collect();
    info!(
        "{} sinkholes ({})",
        summary.sinkholes.len(),
        breakdown.join(", ")
    );

    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    writer.write_record([
        "task",
        "category",
        "severity",
        "x",
        "y",
        "depth",
        "color",
        "failed_models",
        "passed_models",
    ])?;
    for s in &summary.sinkholes {
        writer.write_record([
            s.task.clone(),
            s.category.clone(),
            s.severity.name().to_string(),
            format!("{:.4}", s.position.x),
            format!("{:.4}", s.position.y),
            format!("{:.1}", s.depth),
            s.color.to_hex_string(),
            s.failed_models.join(";"),
            s.passed_models.join(";"),
        ])?;
    }
    writer.flush()?;
    if args.output.as_os_str() != "-" {
        info!("Wrote sinkholes CSV: {}", args.output.display());
    }
    Ok(())
}

fn read_params_file(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid params JSON", path.display()))
}

fn load_params(opts: &TerrainOpts) -> Result<Params> {
    let mut params = match opts.params.as_deref() {
        Some(path) => read_params_file(path)?,
        None => Params::default(),
    };
    if let Some(category) = opts.category.as_ref() {
        params.filter_category = Some(category.clone());
    }
    if let Some(resolution) = opts.resolution {
        params.terrain.grid_resolution = resolution;
    }
    if let Some(radius) = opts.search_radius {
        params.terrain.search_radius = radius;
    }
    if let Some(threshold) = opts.sinkhole_threshold {
        params.sinkhole_threshold = threshold;
    }
    if opts.average_collisions {
        params.terrain.bucket_policy = BucketPolicy::Average;
    }
    params.validate().context("invalid parameters")?;
    Ok(params)
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let dataset = Dataset::parse_json(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!(
        "Loaded {} capabilities across {} categories",
        dataset.len(),
        dataset.categories().len()
    );
    if !dataset.skipped.is_empty() {
        warn!(
            "{} capabilities skipped while loading: {}",
            dataset.skipped.len(),
            dataset.skipped.join(", ")
        );
    }
    Ok(dataset)
}

fn load_categories(path: Option<&Path>) -> Result<CategoryConfig> {
    let Some(path) = path else {
        return Ok(CategoryConfig::default());
    };
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    CategoryConfig::parse_json(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(file))
    }
}

fn write_json(snapshot: &TerrainSnapshot, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer(io::BufWriter::new(file), snapshot)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn log_snapshot_summary(snapshot: &TerrainSnapshot, categories: &CategoryConfig) {
    let stats = &snapshot.stats;
    info!(
        "Terrain {}: height {:.2}..{:.2} (mean {:.2}), coverage {:.1}%",
        snapshot.year,
        stats.min_height,
        stats.max_height,
        stats.mean_height,
        stats.coverage() * 100.0
    );
    info!(
        "{} sinkholes, {} relation edges, {} markers, {} connections",
        snapshot.rings.len(),
        snapshot.edges.len(),
        snapshot.markers.len(),
        snapshot.connections.len()
    );
    for summary in snapshot.samples.iter().filter(|s| s.sinkhole) {
        info!(
            "Sinkhole: {} ({}) level {:.3}, {:+.2} %/yr",
            summary.key,
            categories.display_name(&summary.category),
            summary.level,
            summary.velocity.velocity
        );
    }
}

fn write_grid_stdout(snapshot: &TerrainSnapshot) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_grid_rows(snapshot, &mut writer)
}

fn write_grid_csv(snapshot: &TerrainSnapshot, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_grid_rows(snapshot, &mut writer)
}

fn write_grid_rows<W: Write>(snapshot: &TerrainSnapshot, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "i",
        "j",
        "world_x",
        "world_z",
        "height",
        "influence",
        "band",
        "color",
    ])?;
    let field = &snapshot.field;
    let (nx, nz) = field.dims();
    for j in 0..nz {
        for i in 0..nx {
            let [x, h, z] = field.world_position(i, j);
            writer.write_record([
                i.to_string(),
                j.to_string(),
                format!("{:.3}", x),
                format!("{:.3}", z),
                format!("{:.4}", h),
                format!("{:.4}", field.influence(i, j)),
                snapshot
                    .colors
                    .band(i, j)
                    .map_or("unclassified", Band::name)
                    .to_string(),
                snapshot.colors.color(i, j).to_hex_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_timeline_rows<W: Write>(
    snapshots: &[TerrainSnapshot],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header: Vec<String> = [
        "year",
        "min_height",
        "max_height",
        "mean_height",
        "p01",
        "p99",
        "fallback_nodes",
        "sinkholes",
        "edges",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(Band::ALL.iter().map(|b| b.name().to_string()));
    header.push("fingerprint".to_string());
    writer.write_record(&header)?;

    for snapshot in snapshots {
        let stats = &snapshot.stats;
        let mut row = vec![
            snapshot.year.to_string(),
            format!("{:.3}", stats.min_height),
            format!("{:.3}", stats.max_height),
            format!("{:.3}", stats.mean_height),
            format!("{:.3}", stats.p01),
            format!("{:.3}", stats.p99),
            stats.fallback_nodes.to_string(),
            snapshot.rings.len().to_string(),
            snapshot.edges.len().to_string(),
        ];
        row.extend(
            Band::ALL
                .iter()
                .map(|b| stats.band_counts.get(b).copied().unwrap_or(0).to_string()),
        );
        row.push(snapshot.field.fingerprint());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_edge_rows<W: Write>(edges: &[RelationEdge], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["from", "to", "overlap"])?;
    for edge in edges {
        let overlap = edge.overlap.to_string();
        writer.write_record([edge.from.as_str(), edge.to.as_str(), overlap.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_node_rows<W: Write>(nodes: &[ForecastNode], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "capability",
        "threshold",
        "predicted_date",
        "days_until",
        "x",
        "y",
        "z",
        "color",
        "imminent",
        "past",
        "style",
        "ci_lower",
        "ci_upper",
    ])?;
    for node in nodes {
        writer.write_record([
            node.capability.clone(),
            node.threshold.to_string(),
            node.predicted_date.to_string(),
            node.days_until.to_string(),
            format!("{:.3}", node.position[0]),
            format!("{:.3}", node.position[1]),
            format!("{:.3}", node.position[2]),
            node.color.to_hex_string(),
            node.imminent.to_string(),
            node.past.to_string(),
            node.style.clone(),
            node.confidence_interval
                .map(|ci| ci.lower.to_string())
                .unwrap_or_default(),
            node.confidence_interval
                .map(|ci| ci.upper.to_string())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy)]
enum ChartKind {
    Png,
    Svg,
}

fn render_preview_guard(colors: &ColorField, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || render_preview(colors, path, kind);
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

/// Top-down color map of the field, one square per lattice node; row 0 at the top.
fn render_preview(colors: &ColorField, path: &Path, kind: ChartKind) -> Result<(), String> {
    let (rows, cols) = colors.colors.dim();
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let cell = (800 / rows.max(cols)).max(1) as u32;
    let size = (cols as u32 * cell, rows as u32 * cell);

    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_cells(&root, colors, cell)?;
            root.present().map_err(|e| format!("plotting error: {}", e))
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_cells(&root, colors, cell)?;
            root.present().map_err(|e| format!("plotting error: {}", e))
        }
    }
}

fn draw_cells<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    colors: &ColorField,
    cell: u32,
) -> Result<(), String> {
    root.fill(&BLACK)
        .map_err(|e| format!("plotting error: {}", e))?;
    let (rows, cols) = colors.colors.dim();
    let cell = cell as i32;
    for j in 0..rows {
        for i in 0..cols {
            let [r, g, b] = colors.color(i, j).to_u8();
            let x0 = i as i32 * cell;
            let y0 = j as i32 * cell;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + cell, y0 + cell)],
                RGBColor(r, g, b).filled(),
            ))
            .map_err(|e| format!("plotting error: {}", e))?;
        }
    }
    Ok(())
}

fn parse_year_list(input: &str) -> Result<Vec<i32>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((start, end)) = trimmed.split_once("..") {
            let start: i32 = start
                .trim()
                .parse()
                .with_context(|| format!("invalid year range '{}'", trimmed))?;
            let end: i32 = end
                .trim()
                .parse()
                .with_context(|| format!("invalid year range '{}'", trimmed))?;
            if end < start {
                return Err(anyhow!("year range '{}' is reversed", trimmed));
            }
            out.extend(start..=end);
            continue;
        }
        let year: i32 = trimmed
            .parse()
            .with_context(|| format!("invalid year '{}'", trimmed))?;
        out.push(year);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn parse_threshold_list(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: u8 = trimmed
            .parse()
            .with_context(|| format!("invalid threshold '{}': expected integer percent", trimmed))?;
        if value == 0 || value > 100 {
            return Err(anyhow!("threshold {} outside 1..=100", value));
        }
        out.push(value);
    }
    Ok(out)
}

fn parse_date_arg(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_lists_accept_ranges() {
        assert_eq!(parse_year_list("2019, 2021").unwrap(), vec![2019, 2021]);
        assert_eq!(
            parse_year_list("2023..2025,2020,2024").unwrap(),
            vec![2020, 2023, 2024, 2025]
        );
        assert!(parse_year_list("2025..2020").is_err());
        assert!(parse_year_list("twenty").is_err());
        assert!(parse_year_list("").unwrap().is_empty());
    }

    #[test]
    fn threshold_lists_are_percentages() {
        assert_eq!(parse_threshold_list("80,90").unwrap(), vec![80, 90]);
        assert!(parse_threshold_list("0").is_err());
        assert!(parse_threshold_list("101").is_err());
        assert!(parse_threshold_list("85.5").is_err());
    }

    #[test]
    fn dates_parse_iso() {
        assert_eq!(
            parse_date_arg("2024-06-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        assert!(parse_date_arg("06/01/2024").is_err());
    }

    #[test]
    fn history_accepts_both_shapes() {
        let wrapped = r#"{"capabilities": [{"capability": "math", "observations": [
            {"date": "2023-01-01", "score": 40.0}]}]}"#;
        let bare = r#"[{"capability": "math", "category": "reasoning", "observations": []}]"#;
        let a = serde_json::from_str::<HistoryInput>(wrapped).unwrap().into_vec();
        let b = serde_json::from_str::<HistoryInput>(bare).unwrap().into_vec();
        assert_eq!(a[0].observations.len(), 1);
        assert_eq!(b[0].category, "reasoning");
    }

    #[test]
    fn node_rows_include_interval_bounds() {
        let json = br#"[{"capability": "math", "threshold": 90, "predicted_date": "2026-03-01",
            "days_until": 100, "color": "purple",
            "confidence_interval": {"lower": "2025-11-02", "upper": "2026-07-20"}}]"#;
        let entries = parse_forecast_entries(json).unwrap();
        let nodes = layout_filtered(&entries, None, &Params::default().radial);
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_node_rows(&nodes, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("math,90,2026-03-01,100,"));
        assert!(row.ends_with(",2025-11-02,2026-07-20"));
    }

    #[test]
    fn grid_rows_cover_every_node() {
        let mut params = Params::default();
        params.terrain.grid_resolution = 4;
        let snapshot =
            compute_terrain(&Dataset::default(), &CategoryConfig::default(), &params).unwrap();
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_grid_rows(&snapshot, &mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1 + 25);
        assert!(text.starts_with("i,j,world_x,world_z,height,influence,band,color"));
        assert!(text.lines().skip(1).all(|l| l.contains(",unclassified,#1a1a2e")));
    }
}
