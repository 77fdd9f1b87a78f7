//! Line-oriented command parsing for the send loop.
//!
//! ```text
//! q | quit                 stop the session
//! play | pause             playback control
//! save                     keep the performance (interactive runs only)
//! bpm=<int|auto>           tempo
//! scale=<name|auto>        scale, see `Scale::ALL`
//! text:weight[, ...]       replace prompts with a weighted set
//! anything else            replace prompts with one prompt, weight 1.0
//! ```

use crate::types::{Scale, WeightedPrompt};
use tracing::warn;

pub const BPM_HINT: &str = "BPM must be int or AUTO";
pub const SCALE_HINT: &str = "Unknown scale";
pub const PROMPTS_HINT: &str = "Expected text:weight[, text:weight...]";

/// Which vocabulary the parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSet {
    /// Standalone terminal flow. `save` is a command.
    Interactive,
    /// Server-backed flow. Every run is saved, so `save` is just a prompt.
    Server,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    Play,
    Pause,
    Save,
    /// `None` hands tempo back to the model.
    SetTempo(Option<u16>),
    /// `None` hands the scale back to the model.
    SetScale(Option<Scale>),
    SetPrompts(Vec<WeightedPrompt>),
    /// Rejected input, with a one-line correction for the user.
    Invalid(String),
}

/// Parse one line of input. Returns `None` for blank lines.
pub fn parse_command(line: &str, set: CommandSet) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "q" | "quit" => return Some(Command::Quit),
        "play" => return Some(Command::Play),
        "pause" => return Some(Command::Pause),
        "save" if set == CommandSet::Interactive => return Some(Command::Save),
        _ => {}
    }

    if let Some(value) = strip_key(trimmed, "bpm=") {
        return Some(parse_tempo(value));
    }

    if let Some(value) = strip_key(trimmed, "scale=") {
        return Some(parse_scale(value));
    }

    if trimmed.contains(':') {
        return Some(parse_weighted_prompts(trimmed));
    }

    Some(Command::SetPrompts(vec![WeightedPrompt::new(trimmed, 1.0)]))
}

/// Case-insensitive `key=` prefix strip.
fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    if head.eq_ignore_ascii_case(key) {
        Some(&line[key.len()..])
    } else {
        None
    }
}

fn parse_tempo(value: &str) -> Command {
    let value = value.trim();
    if value.eq_ignore_ascii_case("auto") {
        return Command::SetTempo(None);
    }
    match value.parse::<u16>() {
        Ok(bpm) => Command::SetTempo(Some(bpm)),
        Err(_) => Command::Invalid(BPM_HINT.to_string()),
    }
}

fn parse_scale(value: &str) -> Command {
    let value = value.trim();
    if value.eq_ignore_ascii_case("auto") {
        return Command::SetScale(None);
    }
    match Scale::lookup(value) {
        Some(scale) => Command::SetScale(Some(scale)),
        None => Command::Invalid(SCALE_HINT.to_string()),
    }
}

/// Parse `text:weight` segments separated by commas.
///
/// Blank segments are skipped silently, malformed ones with a warning.
pub fn parse_weighted_prompts(line: &str) -> Command {
    let mut prompts = Vec::new();

    for segment in line.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let Some((text, weight)) = segment.split_once(':') else {
            warn!(segment, "skipping prompt segment without weight");
            continue;
        };

        let text = text.trim();
        if text.is_empty() {
            warn!(segment, "skipping prompt segment with empty text");
            continue;
        }

        match weight.trim().parse::<f32>() {
            Ok(weight) if weight.is_finite() => prompts.push(WeightedPrompt::new(text, weight)),
            _ => warn!(segment, "skipping prompt segment with invalid weight"),
        }
    }

    if prompts.is_empty() {
        Command::Invalid(PROMPTS_HINT.to_string())
    } else {
        Command::SetPrompts(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Option<Command> {
        parse_command(line, CommandSet::Interactive)
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("   \t"), None);
    }

    #[test]
    fn test_control_words() {
        assert_eq!(parse("q"), Some(Command::Quit));
        assert_eq!(parse("Q"), Some(Command::Quit));
        assert_eq!(parse(" quit "), Some(Command::Quit));
        assert_eq!(parse("PLAY"), Some(Command::Play));
        assert_eq!(parse("pause"), Some(Command::Pause));
        assert_eq!(parse("save"), Some(Command::Save));
    }

    #[test]
    fn test_save_is_a_prompt_in_server_mode() {
        assert_eq!(
            parse_command("save", CommandSet::Server),
            Some(Command::SetPrompts(vec![WeightedPrompt::new("save", 1.0)]))
        );
    }

    #[test]
    fn test_bpm() {
        assert_eq!(parse("bpm=140"), Some(Command::SetTempo(Some(140))));
        assert_eq!(parse("BPM= 90 "), Some(Command::SetTempo(Some(90))));
        assert_eq!(parse("bpm=AUTO"), Some(Command::SetTempo(None)));
        assert_eq!(parse("bpm=auto"), Some(Command::SetTempo(None)));
        assert_eq!(parse("bpm=fast"), Some(Command::Invalid(BPM_HINT.into())));
        assert_eq!(parse("bpm=12.5"), Some(Command::Invalid(BPM_HINT.into())));
        assert_eq!(parse("bpm="), Some(Command::Invalid(BPM_HINT.into())));
    }

    #[test]
    fn test_scale() {
        assert_eq!(
            parse("scale=C_MAJOR"),
            Some(Command::SetScale(Some(Scale::CMajorAMinor)))
        );
        assert_eq!(
            parse("scale=g_major_e_minor"),
            Some(Command::SetScale(Some(Scale::GMajorEMinor)))
        );
        assert_eq!(parse("Scale=auto"), Some(Command::SetScale(None)));
        assert_eq!(parse("scale=lydian"), Some(Command::Invalid(SCALE_HINT.into())));
    }

    #[test]
    fn test_weighted_prompts() {
        let expected = Some(Command::SetPrompts(vec![
            WeightedPrompt::new("piano", 0.5),
            WeightedPrompt::new("drums", 1.2),
        ]));
        assert_eq!(parse("piano:0.5, drums:1.2"), expected);
        assert_eq!(parse("piano:0.5,,drums:1.2"), expected);
        assert_eq!(parse(" piano : 0.5 ,drums:1.2, "), expected);
    }

    #[test]
    fn test_weighted_prompts_skip_malformed() {
        assert_eq!(
            parse("piano:0.5, drums, :2, bass:loud, synth:-1"),
            Some(Command::SetPrompts(vec![
                WeightedPrompt::new("piano", 0.5),
                WeightedPrompt::new("synth", -1.0),
            ]))
        );
    }

    #[test]
    fn test_weighted_prompts_all_malformed() {
        assert_eq!(parse("piano:x, drums:"), Some(Command::Invalid(PROMPTS_HINT.into())));
        assert_eq!(parse(":"), Some(Command::Invalid(PROMPTS_HINT.into())));
    }

    #[test]
    fn test_weight_splits_at_first_colon() {
        // "a:b:1" splits into text "a" and weight "b:1", which is malformed
        assert_eq!(parse("a:b:1"), Some(Command::Invalid(PROMPTS_HINT.into())));
    }

    #[test]
    fn test_plain_prompt() {
        assert_eq!(
            parse("  dreamy lo-fi piano  "),
            Some(Command::SetPrompts(vec![WeightedPrompt::new("dreamy lo-fi piano", 1.0)]))
        );
        // Looks like a key but isn't one we know
        assert_eq!(
            parse("tempo=fast"),
            Some(Command::SetPrompts(vec![WeightedPrompt::new("tempo=fast", 1.0)]))
        );
    }
}
