//! User-friendly error formatting for CLI

use colored::Colorize;
use tcp_unix_proxy::ProxyError;

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &ProxyError) -> String {
    match error {
        ProxyError::Configuration { message, key } => {
            let suggestion = match key.as_deref() {
                Some("target_socket_path") => {
                    "Check that --socket points at an existing Unix domain socket"
                }
                _ => "Run with --help to see all available options",
            };
            format!(
                "{} Configuration error\n  {}\n\n{}\n  {}",
                "✗".red().bold(),
                message,
                "Suggestion:".yellow(),
                suggestion
            )
        }
        ProxyError::Bind { addr, source } => {
            format!(
                "{} Cannot listen on {}\n  {}\n\n{}\n  {}",
                "✗".red().bold(),
                addr,
                source,
                "Suggestion:".yellow(),
                "Is another process using this port? Use --port 0 to pick a free one"
            )
        }
        ProxyError::Io(err) => {
            format!("{} I/O error\n  {}", "✗".red().bold(), err)
        }
        _ => format!("{} {}", "✗".red().bold(), error),
    }
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &ProxyError) -> i32 {
    eprintln!("{}", format_error(error));
    1
}
