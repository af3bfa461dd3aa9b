// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Directory containing a pre-built client to serve.
    pub static_dir: Option<PathBuf>,
    /// JSON file of canned lies (`[{"lies": [...]}]`). The built-in pool is used when unset.
    pub fallback_lies_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:two_truths.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `STATIC_DIR` - Path to a client build for static file serving
    /// - `FALLBACK_LIES_PATH` - Path to a sample lies file
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| "sqlite:two_truths.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let static_dir = env("STATIC_DIR").map(PathBuf::from);
        let fallback_lies_path = env("FALLBACK_LIES_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Config {
            database_url,
            port,
            static_dir,
            fallback_lies_path,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
