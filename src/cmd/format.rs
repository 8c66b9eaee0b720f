/*!
format.rs

Human-output formatting for the `tu` CLI.

Goals:
  - One place for style decisions (NO_COLOR, NO_EMOJI, COLUMNS).
  - Return strings; callers decide where to print.
  - JSON paths never go through here.

Public API Summary:
  - StyleOptions::detect() -> StyleOptions
  - color(role, text, &StyleOptions) -> String
  - emoji(tag, &StyleOptions) -> &'static str
  - box_header(title, subtitle_opt, &StyleOptions) -> String
  - table(headers, rows, &StyleOptions) -> String
  - fields(pairs, &StyleOptions) -> String
  - truncate_ellipsis(s, max_chars) -> String
*/

use std::borrow::Cow;

/* -------------------------------------------------------------------------- */
/* Style Options                                                              */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone)]
pub struct StyleOptions {
    pub use_color: bool,
    pub use_emoji: bool,
    pub term_width: usize,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self::detect()
    }
}

impl StyleOptions {
    pub fn detect() -> Self {
        let width = std::env::var("COLUMNS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|w| w.clamp(40, 220))
            .unwrap_or(100);

        StyleOptions {
            use_color: std::env::var_os("NO_COLOR").is_none(),
            use_emoji: std::env::var_os("NO_EMOJI").is_none(),
            term_width: width,
        }
    }

    /// No color, no emoji, fixed width (tests and piped output).
    pub fn plain() -> Self {
        StyleOptions {
            use_color: false,
            use_emoji: false,
            term_width: 100,
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Color / Emoji                                                              */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy)]
pub enum Role {
    Primary,
    Secondary,
    Accent,
    Success,
    Warning,
    Error,
    Dim,
    Bold,
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
        Role::Warning => "38;5;214",
        Role::Error => "38;5;196",
        Role::Dim => "2",
        Role::Bold => "1",
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
        "warn" => "⚠",
        "info" => "ℹ",
        "run" => "🚀",
        "list" => "📜",
        "clock" => "⏱",
        "link" => "🔗",
        _ => "",
    }
}

/// `emoji` followed by a space, or nothing when emoji are off.
pub fn badge(tag: &str, style: &StyleOptions) -> String {
    match emoji(tag, style) {
        "" => String::new(),
        e => format!("{e} "),
    }
}

/* -------------------------------------------------------------------------- */
/* Box Header                                                                 */
/* -------------------------------------------------------------------------- */

/// Single-line boxed title; long titles are truncated to the terminal width.
pub fn box_header(
    title: impl AsRef<str>,
    subtitle: Option<impl AsRef<str>>,
    style: &StyleOptions,
) -> String {
    let inner = match subtitle.as_ref().map(|s| s.as_ref()) {
        Some(sub) if !sub.is_empty() => format!(
            "{}  {}",
            color(Role::Primary, title.as_ref(), style),
            color(Role::Secondary, sub, style)
        ),
        _ => color(Role::Primary, title.as_ref(), style),
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

/* -------------------------------------------------------------------------- */
/* Table / Fields                                                             */
/* -------------------------------------------------------------------------- */

/// Left-aligned columns separated by two spaces. The last column absorbs any
/// overflow and is truncated to fit the terminal.
pub fn table(headers: &[&str], rows: &[Vec<String>], style: &StyleOptions) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(cols) {
            widths[i] = widths[i].max(display_width(cell));
        }
    }

    let fixed: usize = widths[..cols - 1].iter().sum::<usize>() + (cols - 1) * 2;
    let last_budget = style.term_width.saturating_sub(fixed).max(8);
    widths[cols - 1] = widths[cols - 1].min(last_budget);

    let render_row = |cells: Vec<String>| -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            if i + 1 == cols {
                line.push_str(&truncate_ellipsis(cell, widths[i]));
            } else {
                line.push_str(cell);
                line.push_str(&" ".repeat(widths[i].saturating_sub(display_width(cell))));
            }
        }
        line.trim_end().to_string()
    };

    let mut out = vec![color(
        Role::Accent,
        render_row(headers.iter().map(|h| h.to_string()).collect()),
        style,
    )];
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(color(Role::Dim, sep.join("  "), style));
    for row in rows {
        let mut cells = row.clone();
        cells.resize(cols, String::new());
        out.push(render_row(cells));
    }
    out.join("\n")
}

/// Aligned `label: value` lines; `None` values are skipped.
pub fn fields(pairs: &[(&str, Option<String>)], style: &StyleOptions) -> String {
    let width = pairs
        .iter()
        .filter(|(_, v)| v.is_some())
        .map(|(k, _)| k.chars().count())
        .max()
        .unwrap_or(0);
    pairs
        .iter()
        .filter_map(|(k, v)| {
            v.as_ref().map(|v| {
                let label = format!("{k}:{}", " ".repeat(width - k.chars().count()));
                format!("  {} {v}", color(Role::Secondary, label, style))
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/* -------------------------------------------------------------------------- */
/* Text Helpers                                                               */
/* -------------------------------------------------------------------------- */

pub fn truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
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

/* -------------------------------------------------------------------------- */
/* Tests                                                                      */
/* -------------------------------------------------------------------------- */
