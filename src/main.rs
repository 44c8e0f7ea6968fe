mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use mp4frag::config;
use mp4frag_media::{fragment_file, FragmentReport};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config_or_default(cli.config.as_deref())?;
    let options = cli.fragment_options(&config);

    // Respect RUST_LOG env var if set, otherwise derive from verbosity
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        // Boundary decisions are logged at debug level
        match (options.effective_verbosity(), options.debug) {
            (0, _) => "warn",
            (1, true) => "mp4frag=info,mp4frag_media=debug",
            (1, false) => "mp4frag=info,mp4frag_media=info",
            (2, _) => "mp4frag=debug,mp4frag_media=debug",
            _ => "mp4frag=trace,mp4frag_media=trace",
        }
        .to_string()
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    if !cli.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", cli.input);
    }

    tracing::info!("Fragmenting {:?} into {:?}", cli.input, cli.output);
    let report = fragment_file(&cli.input, &cli.output, &options)
        .with_context(|| format!("Failed to fragment {:?}", cli.input))?;

    if cli.json {
        let json_str = serde_json::to_string_pretty(&report)?;
        println!("{}", json_str);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &FragmentReport) {
    println!("Fragment duration: {} ms", report.fragment_duration);
    println!("Fragments: {}", report.fragments);
    println!("Bytes written: {}", report.bytes_written);

    println!("\nTracks: {}", report.tracks.len());
    for track in &report.tracks {
        println!(
            "  [{}] {}: {} samples in {} fragments",
            track.track_id, track.handler, track.samples, track.fragments
        );
    }
}
