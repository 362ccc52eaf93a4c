//! Recent activity rendered as a braille sparkline table.

use chrono::{DateTime, Utc};

use crate::archive::Sample;

/// Character budget of one embed field value.
pub const MAX_FIELD_CHARS: usize = 1024;
/// Maximum number of samples considered.
pub const MAX_SAMPLES: usize = 21;
/// Maximum number of content lines, map headers included.
pub const MAX_LINES: usize = 25;

const FENCE_OPEN: &str = "```\n";
const FENCE_CLOSE: &str = "```";

/// Glyph ramp for a graph density. Each glyph covers up to `len` players.
pub fn glyphs(density: u8) -> &'static [char] {
    match density {
        8 => &['⡀', '⡄', '⡆', '⡇', '⣇', '⣧', '⣷', '⣿'],
        6 => &['⡀', '⡄', '⡆', '⣆', '⣦', '⣶'],
        _ => &['⠄', '⠆', '⠦', '⠶'],
    }
}

/// Bar for a player count: full glyphs, then one partial glyph.
pub fn player_bar(players: u32, density: u8) -> String {
    let ramp = glyphs(density);
    let increment = ramp.len() as i64;
    let mut bar = String::new();
    let mut remaining = i64::from(players);
    while remaining > 0 {
        let index = remaining.min(increment) as usize;
        bar.push(ramp[index - 1]);
        remaining -= increment;
    }
    bar
}

/// Whole minutes between two instants, rounded to nearest.
fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let ms = (a - b).num_milliseconds().abs();
    (ms + 30_000) / 60_000
}

fn age_label(minutes: i64) -> String {
    if minutes == 0 {
        "       NOW: ".to_string()
    } else {
        format!("{:>2} MIN AGO: ", minutes)
    }
}

/// Render the archive newest first, within the field budgets.
///
/// Each sample adds one increment (an optional map header and its line).
/// The first increment that would break the character or line budget ends
/// the table, so a shorter table is always a prefix of a longer one.
pub fn render_history(archive: &[Sample], density: u8, now: DateTime<Utc>) -> String {
    let mut output = String::from(FENCE_OPEN);
    let mut chars = output.chars().count();
    let mut lines = 0usize;
    let mut map: Option<&str> = None;

    for sample in archive.iter().rev().take(MAX_SAMPLES) {
        let mut increment = String::new();
        let mut increment_lines = 0;

        if let Some(info) = sample.info() {
            if map != Some(info.map.as_str()) {
                increment.push_str(&info.map);
                increment.push('\n');
                increment_lines += 1;
            }
        }

        let max_players = sample.info().map(|i| i.max_players).unwrap_or(100);
        let count = match &sample.outcome {
            Ok(info) => info.active_players().to_string(),
            Err(reason) => reason.to_string(),
        };

        increment.push_str(&age_label(minutes_between(now, sample.time)));
        increment.push_str(&player_bar(sample.active_players(), density));
        increment.push_str(&format!(" {:>width$}\n", count, width = max_players.to_string().len()));
        increment_lines += 1;

        let increment_chars = increment.chars().count();
        if chars + increment_chars > MAX_FIELD_CHARS - FENCE_CLOSE.len() || lines + increment_lines > MAX_LINES {
            break;
        }

        if let Some(info) = sample.info() {
            map = Some(info.map.as_str());
        }
        output.push_str(&increment);
        chars += increment_chars;
        lines += increment_lines;
    }

    output.push_str(FENCE_CLOSE);
    output
}
