use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use highlights_rs::fetch::ytdlp::YtDlp;
use highlights_rs::media::ffmpeg::Ffmpeg;
use highlights_rs::options::{EncodeOptions, Options, TargetPolicy};
use highlights_rs::overlay::{self, ScoreboardOptions};
use highlights_rs::{tool, Pipeline, RunSummary};

const DEFAULT_OUTPUT_NAME: &str = "Final_Highlights.mp4";

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(default_value = ".")]
    /// folder containing manifest .json files, or a single manifest file
    path: PathBuf,

    #[clap(short, long)]
    /// output video (default: Final_Highlights.mp4 in the manifest folder)
    output: Option<PathBuf>,

    #[clap(short, long, default_value = "4")]
    /// set the maximum number of parallel downloads and encodes
    parallel: usize,

    #[clap(short, long, default_value = "1")]
    /// set the number of retries for a download that failed on the network
    retries: usize,

    #[clap(long, default_value = "1080")]
    /// highest video height to request from the source
    max_height: u32,

    #[clap(long, default_value = "max")]
    /// resolution to re-encode to when clips differ: "max" or WIDTHxHEIGHT
    target: TargetPolicy,

    #[clap(long, default_value = "libx264")]
    video_codec: String,

    #[clap(long, default_value = "aac")]
    audio_codec: String,

    #[clap(long, default_value = "23")]
    crf: u32,

    #[clap(long, default_value = "fast")]
    preset: String,

    #[clap(long)]
    /// path to yt-dlp (default: looked up on PATH)
    yt_dlp: Option<PathBuf>,

    #[clap(long)]
    /// path to ffmpeg (default: looked up on PATH)
    ffmpeg: Option<PathBuf>,

    #[clap(long)]
    /// path to ffprobe (default: looked up on PATH)
    ffprobe: Option<PathBuf>,

    #[clap(long)]
    /// draw team names and the score onto every clip (re-encodes everything)
    scoreboard: bool,

    #[clap(long, requires = "scoreboard")]
    /// also draw a bar marking which team scored in each clip so far
    progression: bool,

    #[clap(long, requires = "scoreboard")]
    /// font file for the scoreboard text
    font: Option<PathBuf>,

    #[clap(long)]
    /// keep the temporary working directory after the run
    keep_temp: bool,

    #[clap(short, long)]
    /// log debug output
    verbose: bool,
}

/// `Final_Highlights.mp4` inside a manifest folder, `<stem>_Highlights.mp4`
/// next to a single manifest file.
fn default_output(path: &Path) -> PathBuf {
    if path.is_file() {
        let folder = path.parent().unwrap_or(Path::new("."));
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string());
        match stem {
            Some(stem) => folder.join(format!("{stem}_Highlights.mp4")),
            None => folder.join(DEFAULT_OUTPUT_NAME),
        }
    } else {
        path.join(DEFAULT_OUTPUT_NAME)
    }
}

fn init_logging(verbose: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "highlights_rs=debug,highlights=debug".to_string()
        } else {
            "highlights_rs=info,highlights=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> highlights_rs::Result<RunSummary> {
    if !args.path.exists() {
        return Err(highlights_rs::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("'{}' does not exist", args.path.display()),
        )));
    }

    let yt_dlp = tool::locate("yt-dlp", args.yt_dlp.as_deref())?;
    let ffmpeg = tool::locate("ffmpeg", args.ffmpeg.as_deref())?;
    let ffprobe = tool::locate("ffprobe", args.ffprobe.as_deref())?;
    info!(yt_dlp = %yt_dlp.display(), ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "tools");

    let options = Options {
        max_parallel_downloads: args.parallel,
        max_download_retries: args.retries,
        max_height: args.max_height,
        target: args.target,
        encode: EncodeOptions {
            video_codec: args.video_codec,
            audio_codec: args.audio_codec,
            crf: args.crf,
            preset: args.preset,
        },
        output: args.output.clone().unwrap_or_else(|| default_output(&args.path)),
        keep_temp: args.keep_temp,
        scoreboard: args.scoreboard.then(|| ScoreboardOptions {
            font: args.font.clone().unwrap_or_else(overlay::default_font),
            progression: args.progression,
        }),
    };

    println!("Options: {:?}", options);

    let pipeline = Pipeline::new(
        Arc::new(YtDlp::new(yt_dlp, options.max_height)),
        Arc::new(Ffmpeg::new(ffmpeg, ffprobe)),
        options,
    );

    tokio::select! {
        summary = pipeline.run(&args.path) => summary,
        _ = tokio::signal::ctrl_c() => {
            Err(highlights_rs::Error::Workspace("interrupted".to_string()))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(summary) => {
            println!("\n{}", summary.report());
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!(%err, "run aborted");
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
