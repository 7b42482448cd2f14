use atlas_core::{ConnectionState, Speaker, TranscriptEvent};

/// Formats a transcript fragment as a console line.
pub fn transcript_line(event: &TranscriptEvent) -> String {
    let who = match event.speaker {
        Speaker::User => "You",
        Speaker::Agent => "Atlas",
    };
    format!("{who}: {}", event.text.trim())
}

pub fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connected => "listening",
        ConnectionState::Speaking => "speaking",
    }
}
