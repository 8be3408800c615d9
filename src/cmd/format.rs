/*!
format.rs

Human-readable output for `salt-step` (JSON paths never use these helpers).

  - StyleOptions::detect()   NO_COLOR / NO_EMOJI / COLUMNS aware
  - color(role, text, &style)
  - emoji(tag, &style)
  - box_header(title, subtitle, &style)
  - table(headers, rows, &style)
  - minion_rows(results, &style) per-minion rows for the result table
  - truncate_ellipsis(s, max_chars)

Functions return strings; callers decide where to print.
*/

use std::borrow::Cow;

use salt_step::salt::MinionResult;
use serde_json::Value;

/* ---- Style Options ---- */

#[derive(Debug, Clone)]
pub struct StyleOptions {
    pub use_color: bool,
    pub use_emoji: bool,
    pub term_width: usize,
}

impl StyleOptions {
    pub fn detect() -> Self {
        let term_width = std::env::var("COLUMNS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|w| w.clamp(40, 220))
            .unwrap_or(100);
        StyleOptions {
            use_color: std::env::var_os("NO_COLOR").is_none(),
            use_emoji: std::env::var_os("NO_EMOJI").is_none(),
            term_width,
        }
    }
}

/* ---- Color / Emoji ---- */

#[derive(Debug, Clone, Copy)]
pub enum Role {
    Primary,
    Secondary,
    Accent,
    Success,
    Error,
    Dim,
}

pub fn color(role: Role, text: impl AsRef<str>, style: &StyleOptions) -> String {
    if !style.use_color {
        return text.as_ref().to_string();
    }
    let code = match role {
        Role::Primary => "38;5;45",
        Role::Secondary => "38;5;250",
        Role::Accent => "38;5;213",
        Role::Success => "38;5;82",
        Role::Error => "38;5;196",
        Role::Dim => "2",
    };
    format!("\x1b[{code}m{}\x1b[0m", text.as_ref())
}

pub fn emoji(tag: &str, style: &StyleOptions) -> &'static str {
    if !style.use_emoji {
        return "";
    }
    match tag {
        "success" => "✔",
        "error" => "✖",
        "info" => "ℹ",
        _ => "",
    }
}

/* ---- Box Header ---- */

/// Single-line title box; long content is truncated to the terminal width.
pub fn box_header(title: impl AsRef<str>, subtitle: Option<&str>, style: &StyleOptions) -> String {
    let title = color(Role::Primary, title, style);
    let inner = match subtitle {
        Some(sub) => format!("{title}  {}", color(Role::Secondary, sub, style)),
        None => title,
    };
    let max_inner = style.term_width.saturating_sub(4).max(10);
    let inner = if display_width(&inner) > max_inner {
        truncate_ellipsis(&strip_ansi(&inner), max_inner)
    } else {
        inner
    };
    let width = display_width(&inner) + 2;
    let bar = "─".repeat(width);
    format!("┌{bar}┐\n│ {inner} │\n└{bar}┘")
}

/* ---- Table Rendering ---- */

pub fn table(headers: &[&str], rows: &[Vec<String>], style: &StyleOptions) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(headers.len()) {
            widths[i] = widths[i].max(display_width(cell));
        }
    }

    // Shrink the last (free text) column to fit the terminal.
    let fixed: usize = widths[..widths.len() - 1].iter().sum::<usize>() + (headers.len() - 1) * 2;
    if let Some(last) = widths.last_mut() {
        *last = (*last).min(style.term_width.saturating_sub(fixed).max(8));
    }

    let render = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| pad_or_truncate(c, widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(color(
        Role::Accent,
        render(headers.iter().map(|h| h.to_string()).collect()),
        style,
    ));
    out.push(color(
        Role::Dim,
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "),
        style,
    ));
    for row in rows {
        out.push(render(row.clone()));
    }
    out.join("\n")
}

/// MINION / RETCODE / RETURN rows, failures highlighted.
pub fn minion_rows(results: &[MinionResult], style: &StyleOptions) -> Vec<Vec<String>> {
    results
        .iter()
        .map(|r| {
            let (mark, role) = if r.succeeded() {
                (emoji("success", style), Role::Success)
            } else {
                (emoji("error", style), Role::Error)
            };
            let ret = match &r.return_value {
                Value::String(s) => s.replace('\n', " "),
                other => other.to_string(),
            };
            vec![
                format!("{mark} {}", r.minion_id).trim().to_string(),
                color(role, r.retcode.to_string(), style),
                ret,
            ]
        })
        .collect()
}

fn pad_or_truncate(s: &str, width: usize) -> String {
    let len = display_width(s);
    if len <= width {
        return format!("{s}{}", " ".repeat(width - len));
    }
    truncate_ellipsis(&strip_ansi(s), width)
}

/* ---- Text Helpers ---- */

pub fn truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

fn strip_ansi(s: &str) -> Cow<'_, str> {
    if !s.contains('\x1b') {
        return Cow::Borrowed(s);
    }
    let mut buf = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for t in chars.by_ref() {
                if t.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        buf.push(c);
    }
    Cow::Owned(buf)
}

fn display_width(s: &str) -> usize {
    strip_ansi(s).chars().count()
}

/* ---- Tests ---- */
