//! rollcalld: camera-driven attendance for one course.
//!
//! The daemon loads the roster and models, watches the configured
//! camera, and flips attendance rows to present as enrolled students
//! are recognized. Ctrl-C stops it after the in-flight frame.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod session;

use config::Config;
use session::SessionHandle;

#[derive(Parser, Debug)]
#[command(name = "rollcalld", version, about = "Camera-driven attendance daemon")]
struct Args {
    /// Course the session records attendance for.
    #[arg(long, value_name = "ID")]
    course: i64,

    /// Session date, defaults to today.
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let date = args
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    tracing::info!(
        course = args.course,
        date = %date,
        device = %config.camera_device,
        roster = %config.roster_path.display(),
        db = %config.db_path.display(),
        "rollcalld starting"
    );

    let SessionHandle { token, thread } = session::spawn_session(&config, args.course, date)?;
    let mut join = tokio::task::spawn_blocking(move || thread.join());

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            token.cancel();
            (&mut join).await
        }
        // The session thread stopped on its own, e.g. the camera went away.
        result = &mut join => result,
    };

    let thread_result = result?;
    let report = thread_result.map_err(|_| anyhow!("session thread panicked"))??;

    tracing::info!(
        frames = report.frames,
        newly_marked = report.newly_marked,
        "rollcalld stopped"
    );
    Ok(())
}
