//! REPL – interactive shell over the device storage image.
//!
//! Supported slash-commands:
//!   /help                               – show this list
//!   /config                             – print the current config record
//!   /set <json>                         – apply a partial config update
//!   /userid <n>  /deviceid <n>          – write a redundant id slot
//!   /scenes                             – list learned scenes
//!   /learn <key> <on|off> <mode> <temp> – teach the next captured signal
//!   /recv <raw> [protocol]              – inject a captured signal
//!   /match <raw>                        – look a signal up without recalling
//!   /clear                              – drop every scene
//!   /schema                             – JSON schema of `/set` documents
//!   /quit | /exit                       – exit the CLI

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use acir_hal::FileMedium;
use acir_store::{DeviceStorage, LearnOutcome, ReceivePath, Scene};
use acir_types::{AcMode, AcSetting, ConfigUpdate, SignalReceived};
use chrono::Utc;
use colored::Colorize;
use tracing::debug;

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Config,
    Set(String),
    UserId(u32),
    DeviceId(u32),
    Scenes,
    Learn { key: String, setting: AcSetting },
    Recv { raw: String, protocol: Option<String> },
    Match(String),
    Clear,
    Schema,
    Quit,
}

const USAGE_LEARN: &str = "usage: /learn <key> <on|off> <mode> <temp>";

/// Parse one input line.  The error is a message for the operator.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match cmd {
        "/help" => Ok(Command::Help),
        "/config" => Ok(Command::Config),
        "/set" if !rest.is_empty() => Ok(Command::Set(rest.to_string())),
        "/set" => Err("usage: /set <json>".to_string()),
        "/userid" => parse_id(args.next(), "/userid").map(Command::UserId),
        "/deviceid" => parse_id(args.next(), "/deviceid").map(Command::DeviceId),
        "/scenes" => Ok(Command::Scenes),
        "/learn" => {
            let (Some(key), Some(power), Some(mode), Some(temp), None) =
                (args.next(), args.next(), args.next(), args.next(), args.next())
            else {
                return Err(USAGE_LEARN.to_string());
            };
            let power = match power {
                "on" => true,
                "off" => false,
                other => return Err(format!("power must be on or off, got '{other}'")),
            };
            let mode: AcMode = mode.parse().map_err(|e| format!("{e}"))?;
            let temperature: u8 = temp
                .parse()
                .map_err(|_| format!("temperature must be a number, got '{temp}'"))?;
            Ok(Command::Learn {
                key: key.to_string(),
                setting: AcSetting::new(power, mode, temperature),
            })
        }
        "/recv" => match (args.next(), args.next(), args.next()) {
            (Some(raw), protocol, None) => Ok(Command::Recv {
                raw: raw.to_string(),
                protocol: protocol.map(str::to_string),
            }),
            _ => Err("usage: /recv <raw> [protocol]".to_string()),
        },
        "/match" => match (args.next(), args.next()) {
            (Some(raw), None) => Ok(Command::Match(raw.to_string())),
            _ => Err("usage: /match <raw>".to_string()),
        },
        "/clear" => Ok(Command::Clear),
        "/schema" => Ok(Command::Schema),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command '{other}'")),
    }
}

fn parse_id(arg: Option<&str>, cmd: &str) -> Result<u32, String> {
    arg.ok_or_else(|| format!("usage: {cmd} <n>"))?
        .parse()
        .map_err(|_| format!("{cmd} expects an unsigned 32-bit integer"))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut storage: DeviceStorage<FileMedium>, shutdown: Arc<AtomicBool>) {
    let mut path = storage.receive_path();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "acir>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(outcome) = path.learning.borrow_mut().tick(Utc::now()) {
            print_learn_outcome(&outcome);
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(msg) => {
                println!("{} Type {} for available commands.", msg.red(), "/help".bold());
                continue;
            }
        };
        debug!(?command, "repl command");

        match command {
            Command::Help => cmd_help(),
            Command::Config => cmd_config(&storage),
            Command::Set(doc) => match storage.config_mut().update_from_json(&doc) {
                Ok(true) => println!("{}", "✓ Config updated.".green()),
                Ok(false) => println!("{}", "No recognised keys; nothing changed.".yellow()),
                Err(e) => println!("{}: {}", "Update failed".red(), e),
            },
            Command::UserId(id) => report(storage.config_mut().save_user_id(id), "User id saved"),
            Command::DeviceId(id) => {
                report(storage.config_mut().save_device_id(id), "Device id saved")
            }
            Command::Scenes => cmd_scenes(&storage),
            Command::Learn { key, setting } => {
                match path.learning.borrow_mut().start(&key, setting, Utc::now()) {
                    Ok(()) => println!(
                        "  Learning {} – send the signal with {} within 30 s.",
                        key.bold(),
                        "/recv <raw>".bold().cyan()
                    ),
                    Err(e) => println!("{}: {}", "Cannot learn".red(), e),
                }
            }
            Command::Recv { raw, protocol } => cmd_recv(&mut path, raw, protocol),
            Command::Match(raw) => match storage.scenes().borrow().match_scene(&raw) {
                Some(scene) => print_scene("match", scene),
                None => println!("{}", "No scene matches.".yellow()),
            },
            Command::Clear => report(storage.scenes().borrow_mut().clear_scenes(), "Scenes cleared"),
            Command::Schema => cmd_schema(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "acir Commands".bold().underline());
    println!("  {}                – print the config record", "/config".bold().cyan());
    println!("  {}            – apply a partial config update", "/set <json>".bold().cyan());
    println!("  {}   – write a redundant id slot", "/userid /deviceid <n>".bold().cyan());
    println!("  {}                – list learned scenes", "/scenes".bold().cyan());
    println!("  {} – teach the next signal", "/learn <key> <on|off> <mode> <temp>".bold().cyan());
    println!("  {}  – inject a captured signal", "/recv <raw> [protocol]".bold().cyan());
    println!("  {}          – look a signal up", "/match <raw>".bold().cyan());
    println!("  {}                 – drop every scene", "/clear".bold().cyan());
    println!("  {}                – JSON schema for /set", "/schema".bold().cyan());
    println!("  {}          – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_config(storage: &DeviceStorage<FileMedium>) {
    let config = storage.config();
    match serde_json::to_string_pretty(config.config()) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Cannot render config".red(), e),
    }
    println!("  deviceId : {}", config.device_id().to_string().yellow());
    println!("  mac      : {}", config.mac().to_string().dimmed());
}

fn cmd_scenes(storage: &DeviceStorage<FileMedium>) {
    let scenes = storage.scenes().borrow();
    println!(
        "{} ({}/{})",
        "Scenes".bold().underline(),
        scenes.len(),
        acir_store::SCENE_CAPACITY
    );
    if scenes.is_empty() {
        println!("  (none)");
    }
    for (i, scene) in scenes.scenes().iter().enumerate() {
        print_scene(&i.to_string(), scene);
    }
}

fn cmd_recv(path: &mut ReceivePath<FileMedium>, raw: String, protocol: Option<String>) {
    let event = SignalReceived::new(raw, protocol);
    let report = path.dispatcher.dispatch(&event);
    if report.errors > 0 {
        println!("{} {} listener(s) failed; see log.", "⚠".yellow(), report.errors);
    }
    match report.consumed_by.as_deref() {
        Some("learning") => {
            if let Some(outcome) = path.learning.borrow_mut().take_outcome() {
                print_learn_outcome(&outcome);
            }
        }
        Some("recall") => {
            if let Some(scene) = path.recall.borrow_mut().take_recalled() {
                print_scene("recalled", &scene);
            }
        }
        Some(other) => println!("  Consumed by {other}."),
        None if event.is_unrecognised() => println!("{}", "No scene matches.".yellow()),
        None => println!("  Decoded as {}; not a scene.", event.protocol.unwrap_or_default()),
    }
}

fn cmd_schema() {
    let schema = schemars::schema_for!(ConfigUpdate);
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Cannot render schema".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn report<E: std::fmt::Display>(result: Result<(), E>, done: &str) {
    match result {
        Ok(()) => println!("{} {}", "✓".green().bold(), done),
        Err(e) => println!("{}: {}", "Failed".red(), e),
    }
}

fn print_scene(label: &str, scene: &Scene) {
    println!(
        "  [{}] {} – {} {} {}°C ({} bytes)",
        label.dimmed(),
        scene.key.bold(),
        if scene.setting.power { "on".green() } else { "off".red() },
        scene.setting.mode,
        scene.setting.temperature,
        scene.raw.len()
    );
}

fn print_learn_outcome(outcome: &LearnOutcome) {
    match outcome {
        LearnOutcome::Learned { key, index } => {
            println!("{} Learned {} into slot {}.", "✓".green().bold(), key.bold(), index)
        }
        LearnOutcome::TimedOut { key } => {
            println!("{} Learning {} timed out.", "⚠".yellow(), key.bold())
        }
        LearnOutcome::Failed { key, error } => {
            println!("{}: {} – {}", "Learning failed".red(), key.bold(), error)
        }
    }
}
