use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::context::{BackendId, StageKind};

#[derive(Parser)]
#[command(
    name = "vidsmith",
    about = "Vidsmith - Turn online videos into transcripts, summaries, blog posts, and podcasts",
    version,
    long_about = "A CLI tool that drives a staged pipeline over a single video source: \
download, transcription, summarization, blog generation, and podcast synthesis. \
Completed stages are cached on disk, so re-running after a failure only redoes \
the missing work."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline against a video URL
    Run {
        /// Video URL to process
        #[arg(value_name = "URL")]
        url: String,

        /// Root directory for generated artifacts
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Summarization backend
        #[arg(long, value_enum, default_value = "template")]
        summarize_method: Method,

        /// Blog generation backend
        #[arg(long, value_enum, default_value = "template")]
        blog_method: Method,

        /// Podcast synthesis backend
        #[arg(long, value_enum, default_value = "local")]
        podcast_method: Method,

        /// Speech-recognition model size
        #[arg(short, long, value_name = "SIZE")]
        model: Option<String>,

        /// Maximum summary length in words
        #[arg(short = 'l', long, value_name = "WORDS")]
        max_length: Option<usize>,

        /// Per-stage timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Blog post title
        #[arg(short, long)]
        title: Option<String>,

        /// Stages that must succeed for exit code 0 (others may fail softly)
        #[arg(long, value_enum, value_name = "STAGE")]
        require: Vec<StageArg>,

        /// Write the run manifest as JSON to this file
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,

        /// Console output format for the manifest
        #[arg(short, long, value_enum, default_value = "text")]
        format: ManifestFormat,
    },

    /// Download a video's audio track
    Download {
        /// Video URL to download
        #[arg(value_name = "URL")]
        url: String,

        /// Output file path
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Transcribe a local media file
    Transcribe {
        /// Path to the media file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file path for the transcript
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Speech-recognition model size (tiny, base, small, medium, large)
        #[arg(short, long, value_name = "SIZE")]
        model: Option<String>,
    },

    /// Summarize a text file
    Summarize {
        /// Path to the input text file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file path for the summary
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Summarization backend
        #[arg(short, long, value_enum, default_value = "template")]
        method: Method,

        /// Maximum summary length in words
        #[arg(short = 'l', long, value_name = "WORDS")]
        max_length: Option<usize>,
    },

    /// Generate a blog post from a summary file
    Blog {
        /// Path to the summary text file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file path for the blog post
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Generation backend
        #[arg(short, long, value_enum, default_value = "template")]
        method: Method,

        /// Blog post title
        #[arg(short, long)]
        title: Option<String>,

        /// Original video URL for the footer link
        #[arg(short = 'u', long, value_name = "URL")]
        video_url: Option<String>,
    },

    /// Synthesize podcast audio from a summary file
    Podcast {
        /// Path to the summary text file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file path for the audio
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Synthesis backend
        #[arg(short, long, value_enum, default_value = "local")]
        method: Method,

        /// Voice selector for local synthesis
        #[arg(long)]
        voice: Option<String>,
    },

    /// Show or initialize configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Backend selector exposed on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// Local tool or model
    Local,
    /// Deterministic template, no external call
    Template,
    /// Hosted API
    Hosted,
}

impl From<Method> for BackendId {
    fn from(method: Method) -> Self {
        match method {
            Method::Local => BackendId::Local,
            Method::Template => BackendId::Template,
            Method::Hosted => BackendId::Hosted,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Local => write!(f, "local"),
            Method::Template => write!(f, "template"),
            Method::Hosted => write!(f, "hosted"),
        }
    }
}

/// Stage selector for `--require`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageArg {
    Download,
    Transcribe,
    Summarize,
    Blog,
    Podcast,
}

impl From<StageArg> for StageKind {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Download => StageKind::Download,
            StageArg::Transcribe => StageKind::Transcribe,
            StageArg::Summarize => StageKind::Summarize,
            StageArg::Blog => StageKind::BlogGen,
            StageArg::Podcast => StageKind::PodcastGen,
        }
    }
}

/// Console rendering for the run manifest.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ManifestFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}
