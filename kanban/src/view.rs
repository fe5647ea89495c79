//! Plain-text rendering of a board for the command line.

use std::fmt::Write as _;

use chrono::{TimeZone, Utc};
use kanban_proto::task::Task;
use kanban_proto::user::User;

use crate::board::Board;

/// Formats an epoch-millisecond timestamp in `tz`.
pub fn format_timestamp<Tz>(ms: u64, tz: &Tz, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let Ok(ms) = i64::try_from(ms) else {
        return "?".to_string();
    };
    let chrono::LocalResult::Single(dt) = Utc.timestamp_millis_opt(ms) else {
        return "?".to_string();
    };
    // `Display` for a format with bad specifiers reports an error instead of text.
    let mut out = String::new();
    match write!(out, "{}", dt.with_timezone(tz).format(format)) {
        Ok(()) => out,
        Err(_) => "?".to_string(),
    }
}

/// Renders the board in local time.
#[must_use]
pub fn render(board: &Board, format: &str) -> String {
    render_in(board, &chrono::Local, format)
}

/// Renders the pending and completed sections with each task's comments.
pub fn render_in<Tz>(board: &Board, tz: &Tz, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    section(&mut out, "Pending", &board.pending(), tz, format);
    out.push('\n');
    section(&mut out, "Completed", &board.completed(), tz, format);
    out
}

fn section<Tz>(out: &mut String, title: &str, tasks: &[&Task], tz: &Tz, format: &str)
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let _ = writeln!(out, "{title} ({})", tasks.len());
    if tasks.is_empty() {
        out.push_str("  (none)\n");
        return;
    }
    for task in tasks {
        let mark = if task.completed { 'x' } else { ' ' };
        let _ = writeln!(
            out,
            "  [{mark}] #{} {}  ({})",
            task.id,
            task.text,
            format_timestamp(task.created_at, tz, format)
        );
        for comment in &task.comments {
            let _ = writeln!(
                out,
                "        {} @ {}: {}",
                comment.author_name,
                format_timestamp(comment.created_at, tz, format),
                comment.text
            );
        }
    }
}

/// Renders the user directory, marking the logged-in user.
#[must_use]
pub fn render_users(users: &[User], current: Option<&User>) -> String {
    if users.is_empty() {
        return "no users\n".to_string();
    }
    let mut out = String::new();
    for user in users {
        let marker = if current.is_some_and(|c| c.id == user.id) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(out, "{marker} {}  {} <{}>", user.id, user.name, user.email);
    }
    out
}
