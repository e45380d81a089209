use console::{style, Emoji, Term};
use geo_store::{Conversation, HistoryEntry, StorageUsage};

pub static CHECKMARK: Emoji<'_, '_> = Emoji("✅ ", "√ ");
pub static CIRCLE: Emoji<'_, '_> = Emoji("○ ", "o ");

pub fn print_done(term: &Term, msg: &str) {
    let _ = term.write_line(&format!("{} {}", CHECKMARK, style(msg).green()));
}

pub fn print_empty(term: &Term, what: &str) {
    let _ = term.write_line(&format!("{} {}", CIRCLE, style(format!("No {what} stored.")).dim()));
}

fn excerpt(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub fn render_conversations(term: &Term, conversations: &[Conversation]) {
    let _ = term.write_line(&format!(
        "{:<38} {:<20} {:<6} {:<40}",
        "ID", "SAVED", "FACTS", "FIRST QUESTION"
    ));
    let _ = term.write_line(&"-".repeat(106));
    for conversation in conversations {
        let question = conversation
            .messages
            .first()
            .map(|m| excerpt(&m.content, 40))
            .unwrap_or_default();
        let _ = term.write_line(&format!(
            "{:<38} {:<20} {:<6} {:<40}",
            conversation.id,
            format_time(conversation.timestamp),
            conversation.facts.len(),
            question
        ));
    }
}

pub fn render_history(term: &Term, entries: &[HistoryEntry]) {
    let _ = term.write_line(&format!("{:<6} {:<20} {:<40}", "ID", "ASKED", "QUERY"));
    let _ = term.write_line(&"-".repeat(68));
    for entry in entries {
        let _ = term.write_line(&format!(
            "{:<6} {:<20} {:<40}",
            entry.id,
            format_time(entry.timestamp),
            excerpt(&entry.query, 40)
        ));
    }
}

pub fn render_usage(term: &Term, usage: &StorageUsage) {
    let _ = term.write_line(&format!("{}", style("Local storage usage").bold().cyan()));
    for (label, bytes) in [
        ("Conversations", usage.conversations),
        ("Preferences", usage.preferences),
        ("History", usage.history),
    ] {
        let _ = term.write_line(&format!(
            "   {:<14} {}",
            label,
            StorageUsage::format_bytes(bytes)
        ));
    }
    let _ = term.write_line(&format!(
        "   {:<14} {}",
        style("Total").bold(),
        StorageUsage::format_bytes(usage.total)
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_long_lines() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("a very long question indeed", 10), "a very ...");
        assert_eq!(excerpt("first\nsecond", 10), "first");
    }

    #[test]
    fn format_time_renders_utc() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
    }
}
