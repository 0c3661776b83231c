//! REPL – operator console for a running fusion node.
//!
//! Supported slash-commands:
//!   /reset             – clear the fusion volume
//!   /extract           – publish the fused cloud and run the occlusion hand-off
//!   /activate <secs>   – open the secondary-sensor window
//!   /status            – gate holder, window state, engine counters
//!   /help              – show this list
//!   /quit | /exit      – stop the node and exit

use chrono::Utc;
use colored::Colorize;
use std::io::{self, BufRead, Write};

use fusionfeed_hal::sim::SimFusionEngine;
use fusionfeed_middleware::Topic;
use fusionfeed_runtime::FusionNode;
use fusionfeed_types::{ControlSignal, Event, EventPayload};

use crate::Shutdown;

const SOURCE: &str = "fusionfeed-cli";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Control(ControlSignal),
    Status,
    Help,
    Quit,
}

/// Parse one non-empty console line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default();
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments to {head}"));
    }

    match (head, arg) {
        ("/reset", None) => Ok(Command::Control(ControlSignal::Reset)),
        ("/extract", None) => Ok(Command::Control(ControlSignal::RequestExtraction)),
        ("/activate", Some(secs)) => secs
            .parse::<f64>()
            .map(|duration_secs| Command::Control(ControlSignal::ActivateSecondary { duration_secs }))
            .map_err(|_| format!("'{secs}' is not a number of seconds")),
        ("/activate", None) => Err("usage: /activate <seconds>".to_string()),
        ("/status", None) => Ok(Command::Status),
        ("/help", None) => Ok(Command::Help),
        ("/quit" | "/exit", None) => Ok(Command::Quit),
        (cmd, Some(_)) if matches!(cmd, "/reset" | "/extract" | "/status" | "/help" | "/quit" | "/exit") => {
            Err(format!("{cmd} takes no arguments"))
        }
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive console.
///
/// Returns on `/quit`, end of input, or once `shutdown` is triggered
/// elsewhere; in every case `shutdown` is triggered on the way out.
pub fn run(node: FusionNode<SimFusionEngine>, shutdown: Shutdown) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.is_triggered() {
            break;
        }

        print!("{} ", "fusionfeed>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
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

        match parse(line) {
            Ok(Command::Control(signal)) => send(&node, signal),
            Ok(Command::Status) => cmd_status(&node),
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
    shutdown.trigger();
}

fn send(node: &FusionNode<SimFusionEngine>, signal: ControlSignal) {
    let event = Event::new(SOURCE, EventPayload::Control(signal));
    match node.context().bus.publish_to(Topic::Control, event) {
        Ok(_) => println!("  {} {:?}", "→".green(), signal),
        Err(e) => println!("{}: {}", "Node not listening".red(), e),
    }
}

fn cmd_status(node: &FusionNode<SimFusionEngine>) {
    let ctx = node.context();
    let holder = ctx
        .gate
        .current_holder()
        .map_or_else(|| "free".green().to_string(), |h| h.to_string().yellow().to_string());
    let window = if ctx.secondary_window.is_active() {
        "open".green()
    } else {
        "closed".dimmed()
    };
    let frame_age = |slot: &fusionfeed_middleware::FrameSlot| {
        slot.latest().map_or_else(
            || "none".dimmed().to_string(),
            |f| format!("{} ms ago", (Utc::now() - f.captured_at()).num_milliseconds()),
        )
    };

    println!();
    println!("{}", "Node Status".bold().underline());
    println!("  Gate             : {}", holder);
    println!("  Secondary window : {}", window);
    println!("  Primary frame    : {}", frame_age(&ctx.primary_slot));
    println!("  Secondary frame  : {}", frame_age(&ctx.secondary_slot));
    match ctx.engine() {
        Ok(engine) => {
            let spec = engine.spec();
            println!(
                "  Volume           : {}³ voxels over {} m",
                spec.resolution, spec.size_m
            );
            println!("  Integrations     : {}", engine.integrations());
            println!("  Observed voxels  : {}", engine.observed_voxels());
            println!("  Resets           : {}", engine.resets());
        }
        Err(e) => println!("  Engine           : {}", e.to_string().red()),
    }
    println!();
}

fn cmd_help() {
    println!();
    println!("{}", "FusionFeed Commands".bold().underline());
    println!("  {}            – clear the fusion volume", "/reset".bold().cyan());
    println!("  {}          – publish fused cloud + occlusion hand-off", "/extract".bold().cyan());
    println!("  {} – open the secondary-sensor window", "/activate <secs>".bold().cyan());
    println!("  {}           – gate, window and engine counters", "/status".bold().cyan());
    println!("  {}      – stop the node and exit", "/quit  /exit".bold().cyan());
    println!();
}
