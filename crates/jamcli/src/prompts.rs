//! Questions asked before and after an interactive session.
//!
//! Answers come from the same [`LineSource`] the session later reads
//! commands from, so stdin has exactly one reader.

use std::io::Write;

use jamsession::{LineSource, Scale};
use owo_colors::OwoColorize;

pub const DEFAULT_BPM: u16 = 120;
pub const DEFAULT_SCALE: Scale = Scale::AFlatMajorFMinor;
pub const DEFAULT_PROMPT: &str = "Piano";

/// What the user picked before the session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub bpm: u16,
    pub scale: Scale,
    pub prompt: String,
}

pub async fn ask_session_setup(input: &mut dyn LineSource) -> SessionSetup {
    let answer = ask(input, &format!("BPM [{}]:", DEFAULT_BPM)).await;
    let bpm = match parse_bpm(answer.as_deref()) {
        Some(bpm) => bpm,
        None => {
            println!("{}", format!("Invalid BPM, using {}", DEFAULT_BPM).yellow());
            DEFAULT_BPM
        }
    };

    println!("Scales:");
    for (i, scale) in Scale::ALL.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, scale.name());
    }
    let answer = ask(input, &format!("Scale number [{}]:", DEFAULT_SCALE.name())).await;
    let scale = parse_scale_choice(answer.as_deref());

    let answer = ask(input, &format!("Prompt [{}]:", DEFAULT_PROMPT)).await;
    let prompt = parse_prompt(answer.as_deref());

    SessionSetup { bpm, scale, prompt }
}

/// Ask a yes/no question until it gets one. End of input counts as no.
pub async fn confirm(input: &mut dyn LineSource, question: &str) -> bool {
    loop {
        let Some(answer) = ask(input, question).await else {
            return false;
        };
        match parse_yes_no(&answer) {
            Some(yes) => return yes,
            None => println!("{}", "Please type y or n.".yellow()),
        }
    }
}

async fn ask(input: &mut dyn LineSource, question: &str) -> Option<String> {
    print!("{} ", question.bold());
    let _ = std::io::stdout().flush();
    input.next_line().await
}

/// Blank means the default. `None` means the answer was not a tempo.
pub fn parse_bpm(answer: Option<&str>) -> Option<u16> {
    let answer = answer.map(str::trim).unwrap_or_default();
    if answer.is_empty() {
        return Some(DEFAULT_BPM);
    }
    answer.parse().ok()
}

/// 1-based index into [`Scale::ALL`]. Anything else falls back to the default.
pub fn parse_scale_choice(answer: Option<&str>) -> Scale {
    answer
        .map(str::trim)
        .and_then(|a| a.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| Scale::ALL.get(i).copied())
        .unwrap_or(DEFAULT_SCALE)
}

pub fn parse_prompt(answer: Option<&str>) -> String {
    match answer.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => DEFAULT_PROMPT.to_string(),
    }
}

/// `None` for anything that is not a yes or a no.
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
