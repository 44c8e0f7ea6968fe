use clap::Parser;
use mp4frag::config::{Config, MAX_VERBOSITY};
use mp4frag_media::FragmentOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mp4frag")]
#[command(author, version, about = "Convert an MP4 file into a fragmented MP4 file")]
pub struct Cli {
    /// Input MP4 file
    pub input: PathBuf,

    /// Output fragmented MP4 file
    pub output: PathBuf,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fragment duration in milliseconds (default: detected from the video track)
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u32).range(1..))]
    pub fragment_duration: Option<u32>,

    /// Timescale for every output track
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub timescale: Option<u32>,

    /// Verbosity level (0 to 3)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_VERBOSITY as i64))]
    pub verbosity: Option<u8>,

    /// Log fragment boundary decisions (implies --verbosity 1)
    #[arg(long)]
    pub debug: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Merge the command line over the loaded config.
    pub fn fragment_options(&self, config: &Config) -> FragmentOptions {
        let mut options = config.fragment_options();
        if let Some(ms) = self.fragment_duration {
            options.fragment_duration = Some(ms);
        }
        if let Some(ts) = self.timescale {
            options.timescale = Some(ts);
        }
        if let Some(level) = self.verbosity {
            options.verbosity = level;
        }
        options.debug |= self.debug;
        options
    }
}
