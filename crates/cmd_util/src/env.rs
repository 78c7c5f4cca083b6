use std::{
    env,
    fmt::Debug,
    path::Path,
    str::FromStr,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Read an environment variable into `T`, logging and falling back to
/// `default` on any parse failure. Used for the handful of tunables that
/// don't warrant a `clap` flag.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Guard object. Hold onto it for as long as you'd like tracing output to
/// keep flowing to the non-blocking file writer installed by
/// [`config_service`].
pub struct TracingGuard {
    _stdout_guard: tracing_appender::non_blocking::WorkerGuard,
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call this once at process startup. Installs a stdout layer plus,
/// if `log_file` is given, an append-mode file layer tee'd alongside it
/// (the worker's per-model `deployment.log`, opened in step 3 of the boot
/// sequence). `RUST_LOG`/`LOG_LEVEL` drives the filter; `LOG_FORMAT`
/// (`json`|`compact`|`pretty`) drives the rendering, defaulting to compact.
pub fn config_service(log_file: Option<&Path>) -> anyhow::Result<TracingGuard> {
    let mut layers = Vec::new();
    let color_disabled = std::env::var("NO_COLOR").is_ok();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(stdout_writer);
    let stdout_layer = match std::env::var("LOG_FORMAT") {
        Ok(s) if s == "json" => stdout_layer.event_format(format().json()).boxed(),
        Ok(s) if s == "pretty" => stdout_layer.event_format(format().pretty()).boxed(),
        _ => stdout_layer.event_format(format().compact()).boxed(),
    };
    let level = env_config("LOG_LEVEL", Level::INFO.to_string());
    let stdout_layer = stdout_layer
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.clone())),
        )
        .boxed();
    layers.push(stdout_layer);

    let file_guard = if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (file_writer, guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_writer)
            .event_format(format().compact())
            .with_filter(EnvFilter::new(level))
            .boxed();
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry().with(layers).init();

    Ok(TracingGuard {
        _stdout_guard: stdout_guard,
        _file_guard: file_guard,
    })
}

/// Call this from tests that want readable tracing output; safe to call
/// more than once.
pub fn config_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
