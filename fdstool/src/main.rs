//! fdstool - inspect, verify and build 4DS scene files

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fdsbuilder::builder::BuildOptions;
use fdsbuilder::source::SourceScene;
use fdstool::batch::{check_files, collect_files};
use fdstool::progress::{bar_style, ConsoleProgressListener};
use fdstool::report::{render_tree, SceneSummary};
use fourds::{encode_file_with, EncodeOptions, FrameOrder, SceneGraph};
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fdstool")]
#[command(about = "Inspect, verify and build 4DS scene files")]
#[command(version)]
struct Cli {
    /// Log decoding details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a short overview of a file
    Info { input: PathBuf },

    /// Print the frame hierarchy
    Tree { input: PathBuf },

    /// Write a JSON summary of a file
    Dump {
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode and re-encode files, reporting any that do not survive
    Check {
        /// Files or directories to scan for .4ds files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Rewrite a file with every parent ahead of its children
    Normalize { input: PathBuf, output: PathBuf },

    /// Build a 4DS file from a JSON scene description
    Build {
        input: PathBuf,

        /// Output .4ds file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep texture names as written in the description
        #[arg(long)]
        keep_texture_case: bool,

        /// Steps per unit when merging vertices
        #[arg(long)]
        quantization: Option<f32>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn load(input: &PathBuf) -> Result<fourds::Decoded> {
    SceneGraph::from_path(input).with_context(|| format!("reading {}", input.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { input } => {
            let decoded = load(&input)?;
            let summary = SceneSummary::new(&decoded);
            println!("{}", input.display());
            println!("  timestamp: {}", summary.timestamp);
            println!("  materials: {}", summary.materials.len());
            println!("  frames:    {}", summary.frames.len());
            for (kind, count) in summary.kind_counts() {
                println!("    {:<24} {}", kind, count);
            }
            println!("  animated:  {}", summary.animated);
            for warning in &summary.warnings {
                println!("  warning: {}", warning);
            }
        }

        Commands::Tree { input } => {
            let decoded = load(&input)?;
            print!("{}", render_tree(&decoded.scene));
        }

        Commands::Dump { input, output } => {
            let decoded = load(&input)?;
            let json = serde_json::to_string_pretty(&SceneSummary::new(&decoded))?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", json),
            }
        }

        Commands::Check { paths } => {
            let files = collect_files(&paths);
            if files.is_empty() {
                bail!("no .4ds files found");
            }
            let bar = ProgressBar::new(files.len() as u64);
            bar.set_style(bar_style());
            let results = check_files(&files, &bar);

            let mut failed = 0;
            let mut changed = 0;
            for result in &results {
                match &result.outcome {
                    Ok(report) if !report.identical => {
                        changed += 1;
                        println!("~ {} (normalised on re-encode)", result.path.display());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        failed += 1;
                        println!("! {}: {:#}", result.path.display(), err);
                    }
                }
            }
            tracing::info!(
                "{} files, {} failed, {} re-encoded differently",
                results.len(),
                failed,
                changed
            );
            if failed > 0 {
                bail!("{} of {} files failed", failed, results.len());
            }
        }

        Commands::Normalize { input, output } => {
            let decoded = load(&input)?;
            let options = EncodeOptions {
                order: FrameOrder::Hierarchy,
            };
            let bytes = encode_file_with(&decoded.scene, &options)
                .with_context(|| format!("encoding {}", input.display()))?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            tracing::info!("{} -> {}", input.display(), output.display());
        }

        Commands::Build {
            input,
            output,
            keep_texture_case,
            quantization,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("4ds"));
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let source: SourceScene = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;

            let mut options = BuildOptions::default();
            options.uppercase_textures = !keep_texture_case;
            if let Some(quantization) = quantization {
                options.quantization = quantization;
            }
            let mut progress = ConsoleProgressListener::new();
            let scene = fdsbuilder::build_scene(&source, options, &mut progress)
                .with_context(|| format!("building {}", input.display()))?;
            scene
                .to_path(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            tracing::info!(
                "{} -> {} ({} frames, {} materials)",
                input.display(),
                output.display(),
                scene.frames.len(),
                scene.materials.len()
            );
        }
    }
    Ok(())
}
