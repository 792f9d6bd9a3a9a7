mod align;
mod audio;
mod batch;
mod captions;
mod cli;
mod common;
mod config;
mod pipeline;
mod quran;
mod recognize;
mod retry;
mod text;
mod timeline;
mod ui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands, ConfigCommands, DisplayArgs};
use crate::common::paths;
use crate::config::AppConfig;
use crate::pipeline::{Pipeline, TimingsRequest, identify_recitation};
use crate::ui::prelude::*;

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(paths::expand_path(&path.to_string_lossy())),
        None => paths::default_config_path(),
    }
}

fn load_config(path: &Path, debug: bool) -> Result<AppConfig> {
    let (config, created) = AppConfig::load_or_create(path)?;
    if !debug {
        ui::set_log_level(&config.logging.level);
    }
    if created {
        emit(
            Level::Info,
            "config.created",
            &format!("Created default config at {}", path.display()),
            None,
        );
    }
    Ok(config)
}

fn request_for(
    surah: u32,
    start: u32,
    end: u32,
    audio: Option<PathBuf>,
    display: &DisplayArgs,
) -> TimingsRequest {
    TimingsRequest {
        surah,
        start_ayah: start,
        end_ayah: end,
        mode: display.mode,
        audio,
        output: display.out.clone(),
        include_translation: !display.no_translation,
    }
}

fn report_outcome(outcome: &pipeline::TimingsOutcome) {
    for (label, path) in [("Captions", &outcome.captions), ("Timeline", &outcome.timeline)] {
        if let Some(path) = path {
            emit(
                Level::Success,
                "output.written",
                &format!("✓ {label}: {}", path.display()),
                Some(serde_json::json!({ "path": path })),
            );
        }
    }
}

async fn run(cli: Cli, token: &CancellationToken) -> Result<()> {
    let config_path = resolve_config_path(&cli)?;

    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Init { force } => {
                if config_path.exists() && !force {
                    bail!(
                        "config already exists at {} (use --force to overwrite)",
                        config_path.display()
                    );
                }
                AppConfig::default().save_to_path(&config_path)?;
                emit(
                    Level::Success,
                    "config.init",
                    &format!("✓ Wrote default config to {}", config_path.display()),
                    None,
                );
                Ok(())
            }
            ConfigCommands::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
        };
    }

    let config = load_config(&config_path, cli.debug)?;
    match cli.command {
        Commands::Timings(args) => {
            let end = args.end.unwrap_or(args.start);
            let request = request_for(args.surah, args.start, end, args.audio, &args.display);
            let outcome = Pipeline::new(&config)?.run(&request, token).await?;
            report_outcome(&outcome);
        }
        Commands::Identify(args) => {
            let result = identify_recitation(&config, &args.audio, args.expected_surah, token)
                .await?;
            if get_output_format() == OutputFormat::Text {
                println!(
                    "Surah {}, Ayahs {}-{}",
                    result.surah, result.start_ayah, result.end_ayah
                );
            }
        }
        Commands::FromAudio(args) => {
            let (surah, start, end) = match args.explicit_range() {
                Some(range) => {
                    emit(
                        Level::Info,
                        "identify.provided",
                        &format!(
                            "Using provided recitation range: Surah {}, Ayahs {}-{}",
                            range.0, range.1, range.2
                        ),
                        None,
                    );
                    range
                }
                None => {
                    let result =
                        identify_recitation(&config, &args.audio, args.expected_surah, token)
                            .await?;
                    (result.surah, result.start_ayah, result.end_ayah)
                }
            };
            let request = request_for(surah, start, end, Some(args.audio.clone()), &args.display);
            let outcome = Pipeline::new(&config)?.run(&request, token).await?;
            report_outcome(&outcome);
        }
        Commands::Batch(args) => {
            let file = paths::expand_path(&args.file.to_string_lossy());
            let summary = batch::run_batch(&config, &file, token)
                .await
                .with_context(|| format!("running batch {}", file.display()))?;
            if summary.succeeded == 0 {
                bail!("all {} batch jobs failed", summary.failed);
            }
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    ui::init(cli.output, !cli.no_color);
    ui::set_debug_mode(cli.debug);

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            emit(Level::Warn, "signal.interrupt", "Interrupted, cancelling", None);
            signal_token.cancel();
        }
    });

    if let Err(err) = run(cli, &token).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
