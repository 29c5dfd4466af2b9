//! Subject reference parsing.

use crate::error::{JottaError, Result};
use regex::Regex;
use std::sync::OnceLock;

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A YouTube URL from its first character, or a bare video id
        Regex::new(
            r"(?x)
            ^(?:https?://)?
            (?:
                (?:www\.|m\.)?youtube\.com/(?:watch\?(?:[^\s\#]*&)?v=|embed/|v/|shorts/)
                |
                youtu\.be/
            )
            ([a-zA-Z0-9_-]{1,64})
            (?:[?&\#/]\S*)?$
            |
            ^([a-zA-Z0-9_-]{1,64})$
        ",
        )
        .expect("video id regex is valid")
    })
}

/// Normalize user input (URL or bare id) to a video id.
///
/// Bare ids are accepted as long as they are a single URL-safe token.
pub fn parse_subject_ref(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(JottaError::InvalidInput("Video ID is required".to_string()));
    }

    video_id_regex()
        .captures(input)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            JottaError::InvalidInput(format!("Invalid YouTube video ID or URL: {}", input))
        })
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}
