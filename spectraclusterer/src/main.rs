use std::io;
use std::path::Path;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spectraclusterer::{SpectraClusterer, SpectraClustererError};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, SpectraClustererError> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                SpectraClustererError::LoggingError(format!(
                    "{} is not a file path",
                    path.display()
                ))
            })?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(Level::DEBUG.into())
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer().compact().with_writer(io::stderr).with_filter(
                EnvFilter::builder()
                    .with_default_directive(Level::INFO.into())
                    .from_env_lossy(),
            ),
        )
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SpectraClustererError::LoggingError(e.to_string()))?;
    tracing_log::LogTracer::init()
        .map_err(|e| SpectraClustererError::LoggingError(e.to_string()))?;
    Ok(guard)
}

fn main() -> Result<(), SpectraClustererError> {
    let args = SpectraClusterer::parse();

    let mut config = Figment::new()
        .merge(Serialized::defaults(&args))
        .merge(Toml::file("spectraclusterer.toml"));
    if let Some(path) = args.config_file.as_ref() {
        config = config.merge(Toml::file_exact(path));
    }
    config = config.merge(Env::prefixed("SPECTRACLUSTERER_"));
    let driver: SpectraClusterer = config.extract()?;

    let _guard = init_logging(driver.log_file.as_deref())?;
    if let Err(e) = driver.main() {
        tracing::error!("{e}");
        return Err(e);
    }
    Ok(())
}
