//! Terminal output for session events.

use std::time::Duration;

use jamsession::{GenerationConfig, SessionEvent, StopReason, WeightedPrompt};
use owo_colors::OwoColorize;

const COMMANDS: &str = "q | play | pause | save | bpm=<n|auto> | scale=<name|auto> | text:weight, ...";

pub fn event(event: &SessionEvent, cap: Duration) {
    match event {
        SessionEvent::Started => {
            println!("{} {}", "♪".bright_cyan(), "Generating music...".bright_cyan());
        }
        SessionEvent::AcceptingInput => {
            println!("{} {}", "Commands:".bold(), COMMANDS.dimmed());
        }
        SessionEvent::Hint(hint) => println!("{}", hint.yellow()),
        SessionEvent::PromptFiltered(prompt) => {
            println!("{} {}", "Prompt filtered:".bright_red(), prompt);
        }
        SessionEvent::ConfigChanged(config) => {
            println!("{} {}", "Config:".bright_green(), describe_config(config));
        }
        SessionEvent::PromptsChanged(prompts) => {
            println!("{} {}", "Prompts:".bright_green(), describe_prompts(prompts));
        }
        SessionEvent::Playing => println!("{}", "▶ playing".green()),
        SessionEvent::Paused => println!("{}", "⏸ paused".yellow()),
        SessionEvent::SaveRequested => println!("{}", "Will save when the session ends".green()),
        SessionEvent::AutoStopped => {
            println!(
                "{}",
                format!("Auto-stopped after {} seconds", cap.as_secs()).yellow()
            );
        }
        SessionEvent::Stopped(reason) => stopped(*reason),
        SessionEvent::Saved(path) => {
            println!("{} {}", "Saved".bright_green().bold(), path.display());
        }
        SessionEvent::NothingCaptured => println!("{}", "No audio was captured".yellow()),
    }
}

fn stopped(reason: StopReason) {
    match reason {
        StopReason::StreamEnded => println!("{} {}", "■ stopped:".red(), reason),
        _ => println!("{} {}", "■ stopped:".bold(), reason),
    }
}

pub fn describe_config(config: &GenerationConfig) -> String {
    let bpm = config
        .bpm
        .map(|b| b.to_string())
        .unwrap_or_else(|| "auto".to_string());
    let scale = config.scale.map(|s| s.name()).unwrap_or("auto");
    format!("bpm={} scale={}", bpm, scale)
}

pub fn describe_prompts(prompts: &[WeightedPrompt]) -> String {
    prompts
        .iter()
        .map(|p| format!("{}:{}", p.text, p.weight))
        .collect::<Vec<_>>()
        .join(", ")
}
