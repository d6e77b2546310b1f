//! Composition probe.
//!
//! Loads a storefront configuration, composes one context from file-backed
//! registrations and prints the artifact as JSON.
//!
//! Usage: `storefront_cli <config.json> [context] [--settings-db <path>] [--log-dir <abs-dir>]`

use std::process::ExitCode;
use std::sync::Arc;
use storefront_core::db::open_db;
use storefront_core::{
    default_log_level, init_logging, FileRegistrationSource, SettingsRepository,
    SqliteSettingsRepository, Storefront, StorefrontConfig,
};

struct Args {
    config: String,
    context: Option<String>,
    settings_db: Option<String>,
    log_dir: Option<String>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut settings_db = None;
    let mut log_dir = None;
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--settings-db" => {
                settings_db = Some(raw.next().ok_or("--settings-db needs a path")?);
            }
            "--log-dir" => {
                log_dir = Some(raw.next().ok_or("--log-dir needs a directory")?);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag `{flag}`")),
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    let config = positional.next().ok_or("missing <config.json>")?;
    let context = positional.next();
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument `{extra}`"));
    }
    Ok(Args {
        config,
        context,
        settings_db,
        log_dir,
    })
}

fn run(args: Args) -> Result<String, String> {
    if let Some(log_dir) = &args.log_dir {
        init_logging(default_log_level(), log_dir).map_err(|err| err.to_string())?;
    }

    let config = StorefrontConfig::load(&args.config).map_err(|err| err.to_string())?;
    let context = args.context.unwrap_or_else(|| config.context.clone());

    let mut storefront = Storefront::new(config, Arc::new(FileRegistrationSource::new()));
    if let Some(path) = &args.settings_db {
        let conn = open_db(path).map_err(|err| err.to_string())?;
        let settings = SqliteSettingsRepository::new(&conn)
            .load_settings()
            .map_err(|err| err.to_string())?;
        storefront = storefront.with_settings(settings);
    }

    let artifact = storefront
        .compose_uncached(&context)
        .map_err(|err| err.to_string())?;
    artifact.to_json_pretty().map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!(
                "usage: storefront_cli <config.json> [context] [--settings-db <path>] [--log-dir <abs-dir>]"
            );
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
