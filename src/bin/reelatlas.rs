use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reelatlas::{
    AtlasBuilder, AtlasOptions, ExtractorBackend, IMAGE_EXTENSIONS, OperationType,
    ProgressCallback, ProgressInfo, SiteLayout, StalenessPolicy, build_manifest,
    list_layout_videos, write_manifest,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  reelatlas atlas --static-dir static --out build --progress\n  reelatlas atlas --rebuild --timepoints 2,4,6 --tile-size 128\n  reelatlas videos --json\n  reelatlas manifest --out build\n  reelatlas locate 7\n  reelatlas completions zsh > _reelatlas";

#[derive(Debug, Parser)]
#[command(
    name = "reelatlas",
    version,
    about = "Pre-render video thumbnail atlases and gallery manifests",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Args, Clone)]
struct SiteArgs {
    /// Directory holding `videos/` and `gallery_thumbs/`.
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Directory generated files are written to.
    #[arg(long, default_value = "build")]
    out: PathBuf,

    /// URL path the output directory is served under.
    #[arg(long, default_value = "/build")]
    served_root: String,
}

impl SiteArgs {
    fn layout(&self) -> SiteLayout {
        SiteLayout::new(&self.static_dir, &self.out).with_served_root(&self.served_root)
    }
}

#[derive(Debug, Args, Clone)]
struct AtlasArgs {
    /// Tile edge length in pixels.
    #[arg(long, default_value_t = reelatlas::DEFAULT_TILE_SIZE)]
    tile_size: u32,

    /// Comma-separated sampling timepoints in seconds.
    #[arg(long, value_delimiter = ',', default_values_t = reelatlas::DEFAULT_TIMEPOINTS)]
    timepoints: Vec<u64>,

    /// JPEG quality of the atlas (1-100).
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// Seconds one frame extraction may take before an error tile is used.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Run this ffmpeg executable per frame instead of decoding in-process.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Rebuild when the video listing changed since the last build.
    #[arg(long)]
    fingerprint: bool,
}

impl AtlasArgs {
    fn options(&self) -> AtlasOptions {
        let mut options = AtlasOptions::new()
            .with_tile_size(self.tile_size)
            .with_timepoints(self.timepoints.iter().copied())
            .with_jpeg_quality(self.quality)
            .with_extraction_timeout(Duration::from_secs(self.timeout));

        if let Some(ffmpeg) = &self.ffmpeg {
            options = options.with_backend(ExtractorBackend::Process {
                ffmpeg: ffmpeg.clone(),
            });
        }
        if self.fingerprint {
            options = options.with_staleness(StalenessPolicy::Fingerprint);
        }
        options
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the thumbnail atlas if it is missing (or stale).
    #[command(
        about = "Build the thumbnail atlas",
        after_help = "Examples:\n  reelatlas atlas --progress\n  reelatlas atlas --rebuild --json"
    )]
    Atlas {
        #[command(flatten)]
        site: SiteArgs,
        #[command(flatten)]
        atlas: AtlasArgs,
        /// Rebuild even if an atlas already exists.
        #[arg(long)]
        rebuild: bool,
        /// Print the atlas descriptor as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the videos that make up the atlas, in tile order.
    #[command(about = "List videos in atlas order")]
    Videos {
        #[command(flatten)]
        site: SiteArgs,
        /// Output the listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write the gallery manifest to `<out>/api/gallery_thumbs`.
    #[command(about = "Write the gallery manifest")]
    Manifest {
        #[command(flatten)]
        site: SiteArgs,
        /// Print the manifest instead of writing it.
        #[arg(long)]
        stdout: bool,
    },

    /// Show which video and timepoint a tile index belongs to.
    #[command(
        about = "Locate a tile in the built atlas",
        after_help = "Examples:\n  reelatlas locate 4\n  reelatlas locate 4 --json"
    )]
    Locate {
        /// Tile index.
        index: usize,
        #[command(flatten)]
        site: SiteArgs,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the JSON endpoints and generated files over HTTP.
    #[cfg(feature = "server")]
    #[command(about = "Run the HTTP server")]
    Serve {
        #[command(flatten)]
        site: SiteArgs,
        #[command(flatten)]
        atlas: AtlasArgs,
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: std::net::SocketAddr,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Drives an indicatif bar from build progress.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        match info.operation {
            OperationType::Compositing => {
                self.bar.set_message("compositing");
                self.bar.finish();
            }
            _ => {
                if let (Some(video), Some(timepoint)) = (&info.video, info.timepoint) {
                    let marker = if info.extracted { "" } else { " (error tile)" };
                    self.bar.set_message(format!(
                        "{video} @ {}s{marker}",
                        timepoint.as_secs_f64()
                    ));
                }
            }
        }
    }
}

fn init_logging(global: &GlobalOptions) {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global);

    #[cfg(feature = "libav")]
    if let Some(level) = &global.log_level {
        let parsed: reelatlas::FfmpegLogLevel = level
            .parse()
            .map_err(|_| format!("unsupported --log-level: {level}"))?;
        reelatlas::set_ffmpeg_log_level(parsed);
    }

    #[cfg(not(feature = "libav"))]
    if global.log_level.is_some() {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "--log-level requires building with the `libav` feature".yellow()
        );
    }

    Ok(())
}

fn atlas_options(
    atlas: &AtlasArgs,
    global: &GlobalOptions,
) -> Result<AtlasOptions, Box<dyn std::error::Error>> {
    if atlas.timepoints.is_empty() {
        return Err("--timepoints must name at least one timepoint".into());
    }
    let mut options = atlas.options();
    if global.progress {
        options = options.with_progress(Arc::new(TerminalProgress::new()?));
    }
    Ok(options)
}

fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Atlas {
            site,
            atlas,
            rebuild,
            json,
        } => {
            let layout = site.layout();
            let options = atlas_options(&atlas, &cli.global)?;
            let builder = AtlasBuilder::from_layout(&layout, options);
            let videos = list_layout_videos(&layout)?;

            let descriptor = runtime()?.block_on(async {
                if rebuild {
                    builder.rebuild(&videos).await
                } else {
                    builder.ensure_atlas(&videos).await
                }
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&descriptor)?);
            } else if descriptor.has_atlas {
                println!(
                    "{} {} ({} tile(s) of {}px)",
                    "saved".green().bold(),
                    builder.atlas_path().display(),
                    descriptor.thumbnail_count,
                    descriptor.tile_size
                );
            } else {
                println!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    "no videos found; atlas not built".yellow()
                );
            }
        }
        Commands::Videos { site, json } => {
            let videos = list_layout_videos(&site.layout())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&videos)?);
            } else {
                for (index, video) in videos.iter().enumerate() {
                    println!(
                        "{index:>3}  {:<40} {:>12} bytes  {}",
                        video.name,
                        video.size,
                        video.display_name.dimmed()
                    );
                }
                if cli.global.verbose {
                    eprintln!("{} video(s)", videos.len());
                }
            }
        }
        Commands::Manifest { site, stdout } => {
            let layout = site.layout();
            let manifest = build_manifest(
                &layout.gallery_dir(),
                IMAGE_EXTENSIONS,
                &layout.gallery_url_root(),
            )?;
            if stdout {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                let path = layout.manifest_path();
                write_manifest(&manifest, &path)?;
                println!(
                    "{} {} ({} item(s))",
                    "saved".green().bold(),
                    path.display(),
                    manifest.items.len()
                );
            }
        }
        Commands::Locate { index, site, json } => {
            let layout = site.layout();
            let builder = AtlasBuilder::from_layout(&layout, AtlasOptions::new());
            let metadata = builder.read_metadata()?.ok_or_else(|| {
                format!(
                    "no atlas metadata at {} (run `reelatlas atlas` first)",
                    builder.metadata_path().display()
                )
            })?;

            let atlas_layout = metadata.layout();
            let address = atlas_layout.locate(index).ok_or_else(|| {
                format!(
                    "tile {index} is out of range (atlas has {} tile(s))",
                    atlas_layout.tile_count()
                )
            })?;
            let (x, y) = atlas_layout
                .offset(index)
                .ok_or_else(|| format!("tile {index} is out of range"))?;
            let video = &metadata.videos[address.video];
            let timepoint = metadata.timepoints[address.timepoint];

            if json {
                let payload = json!({
                    "index": index,
                    "video": video,
                    "videoIndex": address.video,
                    "timepoint": timepoint,
                    "timepointIndex": address.timepoint,
                    "x": x,
                    "y": y,
                    "tileSize": metadata.tile_size,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Tile {index}: {video} @ {timepoint}s");
                println!(
                    "Offset: x={x} y={y} ({}x{} px)",
                    metadata.tile_size, metadata.tile_size
                );
            }
        }
        #[cfg(feature = "server")]
        Commands::Serve { site, atlas, addr } => {
            let layout = site.layout();
            let options = atlas_options(&atlas, &cli.global)?;
            let state = reelatlas::AppState::new(layout, options);
            println!("{} http://{addr}", "listening".green().bold());
            runtime()?.block_on(reelatlas::server::serve(addr, state))?;
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "reelatlas", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
