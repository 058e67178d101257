//! `acir-cli` – host shell for the air-conditioner IR controller's storage.
//!
//! This binary drives the same stores the device firmware uses, backed by an
//! image file instead of on-board flash.  It:
//!
//! 1. Loads `~/.acir/config.toml`, writing a default one on first run.
//! 2. Opens the storage image and boots both stores, reporting any repair.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/config`, `/set`, `/learn`, `/recv`, `/scenes`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to exit cleanly.

mod repl;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use acir_hal::FileMedium;
use acir_store::layout::REGION_SIZE;
use acir_store::{BootReport, ConfigSource, DeviceStorage, SceneSource};
use colored::Colorize;
use tracing::warn;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (defaults to "info").  Set
    // ACIR_LOG_FORMAT=json for newline-delimited JSON logs.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("ACIR_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – exiting.".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings = match settings::load() {
        Ok(Some(s)) => {
            println!(
                "  Settings loaded from {}",
                settings::settings_path().display().to_string().bold()
            );
            s
        }
        Ok(None) => {
            let mut s = settings::Settings::default();
            match settings::save(&s) {
                Ok(()) => println!(
                    "  {} Default settings written to {}",
                    "✓".green().bold(),
                    settings::settings_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving settings".red(), e),
            }
            settings::apply_env_overrides(&mut s);
            s
        }
        Err(e) => {
            println!("{}: {}", "Settings error".red(), e);
            println!("  Using default settings.");
            let mut s = settings::Settings::default();
            settings::apply_env_overrides(&mut s);
            s
        }
    };

    let mac = match settings.mac_address() {
        Ok(mac) => mac,
        Err(e) => {
            println!("{}: {}", "Settings error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // ── Storage ───────────────────────────────────────────────────────────
    let medium = match FileMedium::open(settings.image_path.clone(), REGION_SIZE) {
        Ok(m) => m,
        Err(e) => {
            println!("{}: {}", "Cannot open storage image".red(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Image {}  MAC {}  policy {}",
        settings.image_path.display().to_string().bold(),
        mac.to_string().bold(),
        settings.match_policy.to_string().bold()
    );

    let (storage, report) =
        DeviceStorage::boot(medium, mac, settings.config_defaults(), settings.policy());
    print_boot_report(&report);
    println!("  {}", storage.config().describe().dimmed());

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(storage, shutdown);
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___   _________  "#.bold().cyan());
    println!("{}", r#"  / _ | / ___/  _/ _ \"#.bold().cyan());
    println!("{}", r#" / __ |/ /___/ // , _/"#.bold().cyan());
    println!("{}", r#"/_/ |_|\___/___/_/|_| "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "acir".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Air-conditioner IR scene & config storage");
    println!();
}

fn print_boot_report(report: &BootReport) {
    let config = match report.config {
        ConfigSource::Stored => "stored".green(),
        ConfigSource::Repaired => "repaired from redundant user id".yellow(),
        ConfigSource::Defaults => "defaults installed".yellow(),
    };
    let scenes = match report.scenes {
        SceneSource::Stored => format!("{} stored", report.scene_count).green(),
        SceneSource::Empty => "empty table installed".yellow(),
    };
    println!("  Config : {config}");
    println!("  Scenes : {scenes}");
    for e in &report.persist_errors {
        println!("  {} {}", "⚠ not persisted:".red(), e);
    }
}
