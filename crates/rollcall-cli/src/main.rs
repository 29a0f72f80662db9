use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

mod extract;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall enrollment and diagnostics CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a roster CSV from a directory of student photos
    Extract {
        /// Photo root with one `CODE_Display Name` subdirectory per student
        photos: PathBuf,
        /// Where to write the roster
        #[arg(short, long, default_value = "roster.csv")]
        out: PathBuf,
        /// Directory holding the ONNX models (default: system model dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Cameras {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize a roster CSV
    Roster {
        /// Roster CSV path
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            photos,
            out,
            model_dir,
        } => {
            let model_dir = model_dir.unwrap_or_else(rollcall_core::default_model_dir);
            extract::run(&photos, &out, &model_dir)
        }
        Commands::Cameras { json } => cameras(json),
        Commands::Roster { path } => roster_summary(&path),
    }
}

fn cameras(json: bool) -> Result<()> {
    let devices = rollcall_hw::Camera::list_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("no capture devices found");
        return Ok(());
    }
    for device in &devices {
        println!("{}  {} ({})", device.path, device.name, device.driver);
    }
    Ok(())
}

fn roster_summary(path: &Path) -> Result<()> {
    let roster = rollcall_core::Roster::load(path)?;

    println!("{}: {} entries", path.display(), roster.len());

    let placeholders = roster.unmatchable_count();
    if placeholders > 0 {
        println!("  {placeholders} placeholder entries (all-zero descriptor, never matched)");
    }

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for entry in roster.entries() {
        if !seen.insert(entry.code.as_str()) {
            duplicates.insert(entry.code.as_str());
        }
    }
    if !duplicates.is_empty() {
        let codes: Vec<&str> = duplicates.into_iter().collect();
        println!("  duplicate codes: {}", codes.join(", "));
    }

    Ok(())
}
