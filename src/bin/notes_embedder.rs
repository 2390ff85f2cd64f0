use anyhow::Result;
use clap::Parser;
use notes_embedder::config::{env_file_path, load_env_file};
use notes_embedder::logging::init_tracing;
use notes_embedder::{run, LiveBackend, Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // The env file must be applied before clap reads its env fallbacks.
    let env_file = env_file_path();
    let env_report = load_env_file(&env_file);
    let settings = Settings::parse();
    init_tracing(&settings.log_level);
    for problem in &env_report.skipped {
        tracing::warn!(path = %env_file.display(), %problem, "ignored entry in environment file");
    }
    if env_report.found {
        tracing::debug!(
            path = %env_file.display(),
            applied = env_report.applied.len(),
            "loaded environment file"
        );
    }

    run(settings, &LiveBackend).await?;
    Ok(())
}
