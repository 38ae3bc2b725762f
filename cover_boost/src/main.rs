use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use cover_utils::logging::{init_logging, LogConfig};
use cover_utils::{
    create_spinner, print_summary_report, tracks_from_directory, tracks_from_info, CoverArtError,
    CoverBatch, DownloadInfo, GroupMode, ImageConfig, Interpolation, TrackRecord,
    DEFAULT_CONFIG_PATH,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

#[derive(Parser)]
#[command(name = "cover-boost")]
#[command(version, about = "Deduplicate, square and rescale the cover art of downloaded tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the covers of one download (metadata JSON) or an image folder
    #[command(name = "run")]
    Run {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Where covers are written; defaults to the download folder or INPUT/covers.
        /// temp.png and temp_out.png in it are upscaler scratch files and are never read as covers
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(short, long)]
        target: Option<u32>,

        #[arg(short, long, value_enum)]
        group: Option<GroupArg>,

        #[arg(short, long, value_enum)]
        interpolation: Option<InterpolationArg>,

        /// AI engine name from the config
        #[arg(short, long, conflicts_with = "no_ai")]
        engine: Option<String>,

        #[arg(long)]
        no_ai: bool,

        #[arg(short, long)]
        recursive: bool,

        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,

        #[arg(short, long)]
        verbose: bool,
    },

    /// List configured AI engines and whether they are installed
    Engines {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Write the default config file
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum GroupArg {
    EachUnique,
    MostCommon,
}

impl From<GroupArg> for GroupMode {
    fn from(arg: GroupArg) -> Self {
        match arg {
            GroupArg::EachUnique => GroupMode::EachUnique,
            GroupArg::MostCommon => GroupMode::MostCommon,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum InterpolationArg {
    None,
    Linear,
    Area,
    Lanczos,
}

impl From<InterpolationArg> for Interpolation {
    fn from(arg: InterpolationArg) -> Self {
        match arg {
            InterpolationArg::None => Interpolation::None,
            InterpolationArg::Linear => Interpolation::Linear,
            InterpolationArg::Area => Interpolation::Area,
            InterpolationArg::Lanczos => Interpolation::Lanczos,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    if let Err(e) = init_logging("cover_boost", LogConfig::default().with_level(level)) {
        eprintln!("⚠️  Logging disabled: {:#}", e);
    }

    match cli.command {
        Commands::Run {
            input,
            config,
            output_dir,
            target,
            group,
            interpolation,
            engine,
            no_ai,
            recursive,
            output,
            verbose: _,
        } => {
            let mut config = ImageConfig::load_or_create(&config)
                .with_context(|| format!("Failed to load config {}", config.display()))?;
            if let Some(target) = target {
                config.image_size_target = target;
            }
            if let Some(group) = group {
                config.group_mode = group.into();
            }
            if let Some(interpolation) = interpolation {
                config.interpolation = interpolation.into();
            }
            if no_ai {
                config.ai_method = None;
            } else if engine.is_some() {
                config.ai_method = engine;
            }

            let records = load_records(&input, output_dir.as_deref(), recursive)?;
            if records.is_empty() {
                bail!("No cover images found in {}", input.display());
            }
            run_batch(config, records, output)?;
        }

        Commands::Engines { config } => {
            let config = ImageConfig::load_or_create(&config)
                .with_context(|| format!("Failed to load config {}", config.display()))?;
            print_engines(&config);
        }

        Commands::InitConfig { config: path, force } => {
            if path.exists() && !force {
                println!("ℹ️  Config already exists: {} (use --force to overwrite)", path.display());
            } else {
                ImageConfig::default()
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✅ Wrote default config to {}", path.display());
            }
        }
    }

    Ok(())
}

/// A `.json` file is download metadata, a directory is a folder of images.
fn load_records(input: &Path, output_dir: Option<&Path>, recursive: bool) -> anyhow::Result<Vec<TrackRecord>> {
    if input.is_dir() {
        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| input.join("covers"));
        return Ok(tracks_from_directory(input, &output_dir, recursive));
    }

    if !input.is_file() {
        bail!("Input path does not exist: {}", input.display());
    }
    let text = fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let info = DownloadInfo::from_json(&text)
        .with_context(|| format!("{} is not download metadata", input.display()))?;

    let mut records = tracks_from_info(&info);
    if let Some(dir) = output_dir {
        for record in &mut records {
            record.output_dir = dir.to_path_buf();
        }
    }
    Ok(records)
}

fn run_batch(config: ImageConfig, records: Vec<TrackRecord>, format: OutputFormat) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let titles: Vec<String> = records.iter().map(|r| r.title.clone()).collect();
    let mut batch = CoverBatch::new(config)?.with_running_flag(Arc::clone(&running));
    batch.set_records(records);

    let spinner = create_spinner(&format!("Processing {} track(s)", titles.len()));
    let start = Instant::now();
    let worker = std::thread::Builder::new()
        .name("cover-batch".to_string())
        .spawn(move || batch.run())
        .context("Failed to start batch worker")?;
    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Batch worker panicked"))?;
    spinner.finish_and_clear();

    let output = match result {
        Ok(output) => output,
        Err(CoverArtError::Cancelled) => {
            eprintln!("{}", style("⚠️  Cancelled, no covers were assigned").yellow().bold());
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("Batch failed"),
    };

    match format {
        OutputFormat::Json => {
            let tracks: Vec<_> = titles
                .iter()
                .zip(&output.outputs)
                .map(|(title, path)| json!({ "title": title, "cover": path }))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "tracks": tracks,
                    "report": output.report,
                }))?
            );
        }
        OutputFormat::Human => {
            for (title, path) in titles.iter().zip(&output.outputs) {
                println!("🎵 {} → {}", style(title).bold(), path.display());
            }
            print_summary_report(&output.summary(), &output.report, start.elapsed(), "Cover Boost");
        }
    }
    Ok(())
}

fn print_engines(config: &ImageConfig) {
    let installed = config.valid_ai_models();
    println!("🤖 AI engines (root: {})", config.ai_directory.display());
    for engine in &config.ai_engines {
        let mark = if installed.contains(&engine.name) {
            style("✅ installed").green()
        } else {
            style("❌ missing").red()
        };
        let selected = if config.ai_method.as_deref() == Some(engine.name.as_str()) {
            " (selected)"
        } else {
            ""
        };
        println!(
            "   {:<10} {}{}  {}",
            engine.name,
            mark,
            selected,
            style(engine.executable(&config.ai_directory).display()).dim()
        );
    }

    println!("🎚️  Interpolation methods:");
    for (method, label) in Interpolation::METHODS.iter().zip(config.interpolation_methods()) {
        let selected = if *method == config.interpolation { " (selected)" } else { "" };
        println!("   {}{}", label, selected);
    }
}
