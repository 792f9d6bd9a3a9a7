use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::captions::DisplayMode;
use crate::ui::OutputFormat;

/// Caption timing for Quran recitations
#[derive(Parser, Debug)]
#[command(name = "quranvideo", author, version, about, long_about = None)]
pub struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Format for status messages
    #[arg(long = "output", value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file path (defaults to ~/.quranvideo/config.yaml)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Time captions for an ayah range and write SRT and JSON output
    Timings(TimingsArgs),
    /// Identify the surah and ayah range of a recitation
    Identify(IdentifyArgs),
    /// Identify a recitation, then time captions against it
    FromAudio(FromAudioArgs),
    /// Run every job listed in a batch YAML file
    Batch(BatchArgs),
    /// Config file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DisplayArgs {
    /// Caption display mode
    #[arg(long, value_enum, default_value_t = DisplayMode::Sequential)]
    pub mode: DisplayMode,

    /// Caption output path; the timeline JSON is written next to it
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub out: Option<PathBuf>,

    /// Leave translations out of the captions
    #[arg(long)]
    pub no_translation: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TimingsArgs {
    /// Surah number (1-114)
    #[arg(long)]
    pub surah: u32,

    /// First ayah in the surah
    #[arg(long, default_value_t = 1)]
    pub start: u32,

    /// Last ayah in the surah (defaults to --start)
    #[arg(long)]
    pub end: Option<u32>,

    /// Use this recitation instead of downloading per-ayah clips
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub audio: Option<PathBuf>,

    #[command(flatten)]
    pub display: DisplayArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IdentifyArgs {
    /// Recitation audio file
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub audio: PathBuf,

    /// Only consider this surah (1-114)
    #[arg(long)]
    pub expected_surah: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct FromAudioArgs {
    /// Recitation audio file
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub audio: PathBuf,

    /// Only consider this surah when identifying (1-114)
    #[arg(long)]
    pub expected_surah: Option<u32>,

    /// Skip identification when surah, start and end are all given
    #[arg(long)]
    pub surah: Option<u32>,

    #[arg(long)]
    pub start: Option<u32>,

    #[arg(long)]
    pub end: Option<u32>,

    #[command(flatten)]
    pub display: DisplayArgs,
}

impl FromAudioArgs {
    /// The range given on the command line, when complete.
    pub fn explicit_range(&self) -> Option<(u32, u32, u32)> {
        match (self.surah, self.start, self.end) {
            (Some(surah), Some(start), Some(end)) if surah > 0 && start > 0 && end > 0 => {
                Some((surah, start, end))
            }
            _ => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Batch YAML file with a `jobs` list
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write the default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}
