use anyhow::{bail, Context};
use jobs_scout_lib::run::LogSink;
use jobs_scout_lib::storage::ResumeSource;
use jobs_scout_lib::{Config, JobsScout};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: jobs-scout <crawl | recommend \"<message>\" | save-resume <file> | select-course <url>>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("JOBS_SCOUT_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    if let Err(errors) = config.validate() {
        bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let scout = Arc::new(JobsScout::new(config)?);
    let print_line: LogSink = Arc::new(|line: &str| println!("{}", line));

    match command.as_str() {
        "crawl" => {
            let watcher = Arc::clone(&scout);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling crawl");
                    watcher.cancel_crawl();
                }
            });
            let summary = scout.start_crawl(Some(print_line)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "recommend" => {
            let message = args.get(1).map(String::as_str).unwrap_or("");
            let result = scout.recommend(message).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "save-resume" => {
            let Some(file) = args.get(1) else {
                bail!(USAGE);
            };
            let saved = scout.save_resume(&ResumeSource::File(PathBuf::from(file)))?;
            println!("Resume saved to {}", saved.display());
        }
        "select-course" => {
            let Some(url) = args.get(1) else {
                bail!(USAGE);
            };
            let items = scout.select_course(url, Some(print_line)).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }

    Ok(())
}
