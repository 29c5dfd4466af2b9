//! Doctor command - verify system requirements and configuration.

use crate::cli::Output;
use crate::config::{Settings, SummarizationProvider};
use console::style;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings, config_path: Option<&str>) -> anyhow::Result<()> {
    Output::header("Jotta Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    // Check external tools
    println!("{}", style("External Tools").bold());
    let tool_checks = vec![
        check_tool("yt-dlp", "yt-dlp --version", install_hint_ytdlp()),
        check_tool("ffmpeg", "ffmpeg -version", install_hint_ffmpeg()),
    ];
    for check in &tool_checks {
        check.print();
    }
    checks.extend(tool_checks);

    println!();

    // Check API keys
    println!("{}", style("API Configuration").bold());
    let api_checks = vec![
        check_assemblyai_key(settings),
        check_summarization_key(settings),
    ];
    for check in &api_checks {
        check.print();
    }
    checks.extend(api_checks);

    println!();

    // Check directories
    println!("{}", style("Storage").bold());
    let dir_checks = check_directories(settings);
    for check in &dir_checks {
        check.print();
    }
    checks.extend(dir_checks);

    println!();

    // Check configuration
    println!("{}", style("Configuration").bold());
    let config_check = check_config_file(settings, config_path);
    config_check.print();
    checks.push(config_check);

    println!();

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Workers cannot run until they are fixed.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!(
            "All checks passed with {} warning(s).",
            warnings
        ));
    } else {
        Output::success("All checks passed! Jotta is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, version_cmd: &str, hint: &str) -> CheckResult {
    let parts: Vec<&str> = version_cmd.split_whitespace().collect();
    let cmd = parts[0];
    let args = &parts[1..];

    match Command::new(cmd).args(args).output() {
        Ok(output) if output.status.success() => {
            // Try to extract version from first line
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            // Truncate long version strings
            let version_display = if version.chars().count() > 50 {
                format!("{}...", version.chars().take(50).collect::<String>())
            } else {
                version
            };

            CheckResult::ok(name, &version_display)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Mask all but the ends of a secret.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Check that the AssemblyAI key is configured.
fn check_assemblyai_key(settings: &Settings) -> CheckResult {
    match settings.transcription.resolve_api_key() {
        Some(key) => CheckResult::ok(
            "ASSEMBLYAI_API_KEY",
            &format!("configured ({})", mask_key(&key)),
        ),
        None => CheckResult::error(
            "ASSEMBLYAI_API_KEY",
            "not set",
            "Set with: export ASSEMBLYAI_API_KEY='...' (or transcription.api_key)",
        ),
    }
}

/// Check the key for the configured summarization provider.
fn check_summarization_key(settings: &Settings) -> CheckResult {
    match settings.summarization.provider {
        SummarizationProvider::HuggingFace => match settings.summarization.resolve_api_key() {
            Some(key) => CheckResult::ok(
                "HUGGINGFACE_API_KEY",
                &format!("configured ({})", mask_key(&key)),
            ),
            None => CheckResult::warning(
                "HUGGINGFACE_API_KEY",
                "not set, using anonymous inference",
                "Anonymous requests are heavily rate limited. Set HUGGINGFACE_API_KEY.",
            ),
        },
        SummarizationProvider::OpenAI => match std::env::var("OPENAI_API_KEY") {
            Ok(key) if key.starts_with("sk-") && key.len() > 20 => CheckResult::ok(
                "OPENAI_API_KEY",
                &format!("configured ({})", mask_key(&key)),
            ),
            Ok(key) if key.is_empty() => CheckResult::error(
                "OPENAI_API_KEY",
                "empty",
                "Set with: export OPENAI_API_KEY='sk-...'",
            ),
            Ok(_) => CheckResult::warning(
                "OPENAI_API_KEY",
                "set but format looks unusual",
                "Expected format: sk-... (OpenAI API key)",
            ),
            Err(_) => CheckResult::error(
                "OPENAI_API_KEY",
                "not set",
                "Set with: export OPENAI_API_KEY='sk-...'",
            ),
        },
    }
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok(
            "Data directory",
            &format!("{}", data_dir.display()),
        ));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    if settings.store.provider == "memory" {
        results.push(CheckResult::warning(
            "Database",
            "in-memory store",
            "Jobs and flashcards are lost on exit. Set store.provider = \"sqlite\".",
        ));
        return results;
    }

    let db_path = settings.sqlite_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Database",
            &format!("{} ({})", db_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created on first submit",
        ));
    }

    results
}

/// Check if config file exists and passes validation.
fn check_config_file(settings: &Settings, config_path: Option<&str>) -> CheckResult {
    let config_path = config_path
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);

    if let Err(e) = settings.validate() {
        return CheckResult::error("Config file", &e.to_string(), "Fix with: jotta config edit");
    }
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: jotta config edit",
        )
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}

/// Platform-specific install hint for ffmpeg.
fn install_hint_ffmpeg() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install ffmpeg"
    } else if cfg!(target_os = "linux") {
        "Install with: sudo apt install ffmpeg (or your package manager)"
    } else {
        "Install from: https://ffmpeg.org/download.html"
    }
}
