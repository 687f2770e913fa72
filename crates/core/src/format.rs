use crate::types::{AdSegment, Comment};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

pub fn format_segment(segment: &AdSegment) -> String {
    if segment.is_sentinel() {
        return "no ad".to_string();
    }
    format!(
        "{}–{} ({:.0}s)",
        format_timestamp(segment.start),
        format_timestamp(segment.end),
        segment.duration()
    )
}

/// Format comments one per line with their emission timestamps
pub fn format_comments_with_timestamps(comments: &[Comment]) -> String {
    comments
        .iter()
        .map(|c| format!("[{}] {}", format_timestamp(c.time), c.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
