use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use framedex::{
    FfmpegLogLevel, IndexOptions, MediaSource, ProgressCallback, ProgressInfo, Rational, SeekMode,
};

const CLI_AFTER_HELP: &str = "Examples:\n  framedex index input.mkv --progress\n  framedex info input.mkv --json\n  framedex frame input.mkv 1200 --out frame.png --seek-mode unsafe\n  framedex keyframes input.mkv\n  framedex completions zsh > _framedex";

#[derive(Debug, Parser)]
#[command(
    name = "framedex",
    version,
    about = "Build frame indexes and decode exact frames from media files",
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
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar while indexing.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Decoder thread count.
    #[arg(long)]
    threads: Option<u32>,

    /// Store the index at this path instead of next to the input.
    #[arg(long)]
    index: Option<PathBuf>,

    /// Force the active video stream by container index.
    #[arg(long)]
    video_stream: Option<usize>,

    /// Force the active audio stream by container index.
    #[arg(long)]
    audio_stream: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build (or rebuild) the index of a media file.
    #[command(
        about = "Build the frame index",
        after_help = "Examples:\n  framedex index input.mkv\n  framedex index input.mkv --force --progress"
    )]
    Index {
        /// Input media path.
        input: PathBuf,
        /// Rebuild even when a current index exists.
        #[arg(long)]
        force: bool,
    },

    /// Print what the index knows about a media file.
    #[command(
        about = "Print indexed metadata",
        visible_alias = "meta",
        after_help = "Examples:\n  framedex info input.mkv\n  framedex info input.mkv --json"
    )]
    Info {
        /// Input media path.
        input: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decode one frame and save its luma plane as an image.
    #[command(
        about = "Decode a single frame",
        after_help = "Examples:\n  framedex frame input.mkv 0 --out first.png\n  framedex frame input.mkv 500 --out f.png --cfr 24000/1001"
    )]
    Frame {
        /// Input media path.
        input: PathBuf,
        /// Output frame number.
        number: u32,
        /// Output image path (png, jpg, bmp, tiff).
        #[arg(long)]
        out: PathBuf,
        /// Seek robustness: normal, unsafe or aggressive.
        #[arg(long, default_value = "normal")]
        seek_mode: String,
        /// Present the video at a constant rate (N/D, or "average").
        #[arg(long)]
        cfr: Option<String>,
        /// Honour repeat-field flags.
        #[arg(long)]
        repeat: bool,
    },

    /// List the keyframes of the active video stream.
    #[command(about = "List keyframes")]
    Keyframes {
        /// Input media path.
        input: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check an index for structural problems.
    #[command(about = "Validate the index")]
    Validate {
        /// Input media path.
        input: PathBuf,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

/// `None` for the stream's average rate.
fn parse_frame_rate(value: &str) -> Result<Option<Rational>, String> {
    if value.eq_ignore_ascii_case("average") {
        return Ok(None);
    }
    let rate: Rational = value.parse().map_err(|_| format!("invalid --cfr rate: {value}"))?;
    if !rate.is_valid() {
        return Err(format!("--cfr rate must be positive: {value}"));
    }
    Ok(Some(rate))
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Indexing progress as a bar over the input's byte size.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(total_bytes: u64) -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(position) = info.current_position {
            self.bar.set_position(position);
        }
        self.bar.set_message(format!("{} packets", info.current));
    }
}

fn base_options(global: &GlobalOptions, input: &Path) -> Result<(IndexOptions, Option<ProgressBar>), Box<dyn std::error::Error>> {
    let mut options = IndexOptions::new();
    if let Some(threads) = global.threads {
        options = options.with_decoder_threads(threads);
    }
    if let Some(index) = &global.index {
        options = options.with_index_path(index);
    }
    if let Some(stream) = global.video_stream {
        options = options.with_video_stream(stream);
    }
    if let Some(stream) = global.audio_stream {
        options = options.with_audio_stream(stream);
    }
    let mut bar = None;
    if global.progress {
        let progress = TerminalProgress::new(fs::metadata(input)?.len())?;
        bar = Some(progress.bar.clone());
        options = options.with_progress(Arc::new(progress)).with_batch_size(256);
    }
    Ok((options, bar))
}

fn open_source(options: IndexOptions, input: &Path, bar: Option<ProgressBar>) -> Result<MediaSource, Box<dyn std::error::Error>> {
    let source = MediaSource::build_or_load_index(input, options)?;
    if let Some(bar) = bar {
        bar.finish_with_message("indexed");
    }
    Ok(source)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "framedex=debug" } else { "framedex=warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        framedex::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Index { input, force } => {
            let (options, bar) = base_options(&cli.global, &input)?;
            if force {
                let index_path = options.index_path_for(&input);
                if index_path.exists() {
                    fs::remove_file(&index_path)?;
                }
            }
            let source = open_source(options, &input, bar)?;
            let index = source.index();
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Indexed {} stream(s) of {} -> {}",
                    index.streams.len(),
                    input.display(),
                    source.index_path().display()
                )
                .green()
            );
        }
        Commands::Info { input, json } => {
            let (options, bar) = base_options(&cli.global, &input)?;
            let source = open_source(options, &input, bar)?;
            let metadata = source.metadata();
            if json {
                let payload = json!({
                    "format": metadata.format,
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "video_streams": metadata.video_stream_count,
                    "audio_streams": metadata.audio_stream_count,
                    "video": metadata.video.as_ref().map(|video| json!({
                        "stream_index": video.stream_index,
                        "width": video.width,
                        "height": video.height,
                        "pixel_format": video.pixel_format,
                        "frame_rate": video.frame_rate.map(|rate| rate.to_string()),
                        "frame_count": video.frame_count,
                        "keyframe_count": video.keyframe_count,
                        "variable_frame_rate": video.variable_frame_rate,
                        "codec": video.codec,
                        "configurations": video.configuration_count,
                    })),
                    "audio": metadata.audio.as_ref().map(|audio| json!({
                        "stream_index": audio.stream_index,
                        "sample_rate": audio.sample_rate,
                        "channels": audio.channels,
                        "sample_format": audio.sample_format,
                        "codec": audio.codec,
                        "total_samples": audio.total_samples,
                    })),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Format: {}", metadata.format);
                println!("Duration: {:?}", metadata.duration);
                if let Some(video) = &metadata.video {
                    let rate = video
                        .frame_rate
                        .map(|rate| format!("{:.3} fps", rate.as_f64()))
                        .unwrap_or_else(|| "unknown rate".to_string());
                    println!(
                        "Video #{}: {}x{} {} @ {} [{}], {} frames, {} keyframes{}",
                        video.stream_index,
                        video.width,
                        video.height,
                        video.pixel_format,
                        rate,
                        video.codec,
                        video.frame_count,
                        video.keyframe_count,
                        if video.variable_frame_rate { ", VFR" } else { "" },
                    );
                }
                if let Some(audio) = &metadata.audio {
                    println!(
                        "Audio #{}: {} Hz, {} ch {} [{}], {} samples",
                        audio.stream_index,
                        audio.sample_rate,
                        audio.channels,
                        audio.sample_format,
                        audio.codec,
                        audio.total_samples,
                    );
                }
            }
        }
        Commands::Frame {
            input,
            number,
            out,
            seek_mode,
            cfr,
            repeat,
        } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let mode: SeekMode = seek_mode.parse()?;
            let (mut options, bar) = base_options(&cli.global, &input)?;
            options = options.with_seek_mode(mode).with_repeat_flag(repeat);
            if let Some(rate) = &cfr {
                options = options.with_constant_frame_rate(parse_frame_rate(rate)?);
            }
            let mut source = open_source(options, &input, bar)?;
            let frame = source.get_video_frame(number)?;
            frame.save(&out)?;
            if cli.global.verbose {
                eprintln!(
                    "frame {} from sample {:?} ({} mode, {} retries{})",
                    number,
                    frame.sample_number,
                    frame.report.mode,
                    frame.report.retries,
                    if frame.report.exact { "" } else { ", approximate" },
                );
            }
            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Saved frame {number} to {}", out.display()).green()
            );
        }
        Commands::Keyframes { input, json } => {
            let (options, bar) = base_options(&cli.global, &input)?;
            let source = open_source(options, &input, bar)?;
            let group_of_pictures = source.analyze_group_of_pictures()?;
            if json {
                let payload = json!({
                    "keyframes": group_of_pictures.keyframes.iter().map(|keyframe| json!({
                        "sample": keyframe.sample_number,
                        "frame": keyframe.frame_number,
                        "pts": keyframe.pts,
                        "seconds": keyframe.timestamp.as_secs_f64(),
                        "type": keyframe.picture_type.to_string(),
                        "leading_pictures": keyframe.leading_pictures,
                    })).collect::<Vec<_>>(),
                    "average_gop": group_of_pictures.average_group_of_pictures_size,
                    "open_gop": group_of_pictures.has_open_group_of_pictures,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for keyframe in &group_of_pictures.keyframes {
                    let frame = keyframe
                        .frame_number
                        .map(|frame| frame.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>8} {:>8} {:>12.3}s {}",
                        keyframe.sample_number,
                        frame,
                        keyframe.timestamp.as_secs_f64(),
                        keyframe.picture_type
                    );
                }
                println!(
                    "{} keyframes, average GOP {:.1}{}",
                    group_of_pictures.keyframes.len(),
                    group_of_pictures.average_group_of_pictures_size,
                    if group_of_pictures.has_open_group_of_pictures { ", open GOPs" } else { "" },
                );
            }
        }
        Commands::Validate { input } => {
            let (options, bar) = base_options(&cli.global, &input)?;
            let source = open_source(options, &input, bar)?;
            let report = source.validate();
            print!("{report}");
            if !report.is_valid() {
                return Err(format!("{} error(s) found", report.errors.len()).into());
            }
            println!("{}", "index is valid".green().bold());
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framedex", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
