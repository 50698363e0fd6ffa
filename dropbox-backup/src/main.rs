use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dropbox_backup::config::{self, BackupConfig, DEFAULT_ENV_FILE};
use dropbox_backup::logging;
use dropbox_backup::pipeline::BackupRuntime;
use dropbox_backup::progress::LogReporter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run { env_file: PathBuf },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut env_file = PathBuf::from(DEFAULT_ENV_FILE);
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env-file" => {
                let value = args.next().context("--env-file requires a path")?;
                env_file = PathBuf::from(value);
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { env_file })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: dropbox-backup [--env-file <path>]");
            println!("  --env-file <path>   Credential file (default {DEFAULT_ENV_FILE})");
            return Ok(());
        }
        CliMode::Run { env_file } => env_file,
    };

    dotenvy::from_path(&env_file)
        .with_context(|| format!("failed to load credentials from {}", env_file.display()))?;
    let config = BackupConfig::from_env();
    logging::init(&config.log_file).context("failed to initialize logging")?;
    let credential = config::credential_from_env().context("incomplete credential file")?;

    let runtime = BackupRuntime::bootstrap(config, credential, Arc::new(LogReporter))?;
    let summary = runtime.run().await.context("backup aborted")?;
    let counts = summary.report.summary;
    eprintln!(
        "[dropbox-backup] done: total={}, succeeded={}, failed={}, elapsed={:.3}s",
        counts.total,
        counts.succeeded,
        counts.failed,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
