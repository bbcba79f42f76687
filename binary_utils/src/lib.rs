use core::any::Any;
use std::io::Write as _;

use anyhow::{Error, Result};
use chrono::{Local, SecondsFormat};
use env_logger::{Builder, Env, WriteStyle};
use log::LevelFilter;

/// Environment variable holding `env_logger` filter directives that override the defaults.
pub const LOG_FILTER_VARIABLE: &str = "DORA_PROXY_LOG";

const WORKSPACE_CRATES: &[&str] = &["attestation_tracker", "binary_utils", "prometheus_metrics"];

pub fn initialize_logger(module_path: &str, always_write_style: bool) -> Result<()> {
    logger_builder(module_path, always_write_style)
        .try_init()
        .map_err(Into::into)
}

fn logger_builder(module_path: &str, always_write_style: bool) -> Builder {
    let mut builder = Builder::new();

    builder.filter_level(LevelFilter::Off);

    for crate_name in WORKSPACE_CRATES.iter().copied().chain([module_path]) {
        builder.filter_module(crate_name, LevelFilter::Info);
    }

    builder.format(|formatter, record| {
        writeln!(
            formatter,
            "[{}] {:<5} {}: {}",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record.level(),
            record.target(),
            record.args(),
        )
    });

    if always_write_style {
        builder.write_style(WriteStyle::Always);
    }

    builder.parse_env(Env::new().filter(LOG_FILTER_VARIABLE));

    builder
}

#[must_use]
pub fn payload_into_error(payload: Box<dyn Any + Send + 'static>) -> Error {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return Error::msg(*string),
        Err(other) => other,
    };

    if let Ok(string) = payload.downcast::<&str>() {
        return Error::msg(*string);
    }

    Error::msg("panic with payload of unknown type")
}
