// ABOUTME: Shared logging setup for the secretary binaries
// ABOUTME: init() for stderr, init_file() for the interactive REPL, init_for() for one-shot commands

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line, matching the agent service's own logs
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}` (expected text or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    install_stderr(filter, format);
}

/// File-based logging for interactive sessions, so log lines never land in
/// the middle of streamed output. Default: WARN level, RUST_LOG override.
/// Logs to ~/.config/ai-secretary/{app_name}/{app_name}.log
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) -> Option<PathBuf> {
    match init_file_inner(app_name) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("Warning: failed to set up file logging: {e}");
            None
        }
    }
}

fn init_file_inner(app_name: &str) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let path = log_path(&config_dir, app_name);
    let log_file = open_log_file(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .try_init()?;

    Ok(path)
}

/// Crate-filtered logging to stderr. Default: INFO for the named crate, WARN
/// for everything else.
pub fn init_for(crate_name: &str, format: LogFormat) {
    install_stderr(crate_filter(crate_name), format);
}

fn crate_filter(crate_name: &str) -> EnvFilter {
    let directive = format!("{crate_name}=info");
    EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
}

fn install_stderr(filter: EnvFilter, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {e}");
    }
}

/// Where `init_file` writes for `app_name` under `config_dir`.
pub fn log_path(config_dir: &Path, app_name: &str) -> PathBuf {
    config_dir
        .join("ai-secretary")
        .join(app_name)
        .join(format!("{app_name}.log"))
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_layout() {
        let path = log_path(Path::new("/home/u/.config"), "secretary-chat");
        assert_eq!(
            path,
            PathBuf::from("/home/u/.config/ai-secretary/secretary-chat/secretary-chat.log")
        );
    }

    #[test]
    fn test_open_log_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "chat");
        open_log_file(&path).unwrap();
        assert!(path.exists());

        // Appending to an existing file also works
        open_log_file(&path).unwrap();
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Text);
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_crate_filter_accepts_odd_names() {
        // A name that is not a valid directive falls back instead of panicking
        let _ = crate_filter("not a crate=");
        let _ = crate_filter("secretary_chat");
    }

    #[test]
    fn exports_init() {
        let _ = super::init as fn(LogFormat);
    }

    #[test]
    fn exports_init_for() {
        let _ = super::init_for as fn(&str, LogFormat);
    }
}
