/*!
`history.rs`

`tu history [NAME] [--limit N] [--json]`
`tu history --clear`

Newest entries first. `NAME` filters on the recorded command name.
*/

use anyhow::Result;
use clap::Args;
use tu::history::HistoryEntry;

use crate::cmd::Context;
use crate::cmd::format::{Role, StyleOptions, badge, box_header, color, emoji, table};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only runs of this command
    pub name: Option<String>,

    /// Maximum number of entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,

    /// Delete the history file
    #[arg(long, conflicts_with_all = ["name", "json"])]
    pub clear: bool,

    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

pub fn execute_history(args: HistoryArgs, ctx: &Context) -> Result<()> {
    let store = ctx.history();
    if args.clear {
        let dropped = store.clear()?;
        ctx.say(format!(
            "{}Cleared {dropped} history entr{}",
            badge("success", &ctx.style),
            if dropped == 1 { "y" } else { "ies" }
        ));
        return Ok(());
    }

    let entries = store.recent(args.name.as_deref(), Some(args.limit));
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "count": entries.len(),
                "entries": entries,
            }))?
        );
        return Ok(());
    }

    let style = &ctx.style;
    println!(
        "{}",
        box_header(
            format!("{} History ({})", emoji("clock", style), entries.len()),
            args.name.as_deref(),
            style
        )
    );
    if entries.is_empty() {
        println!("{}", color(Role::Dim, format!("{} (none)", emoji("info", style)), style));
        return Ok(());
    }
    let rows: Vec<Vec<String>> = entries.iter().map(|e| row(e, style)).collect();
    println!("{}", table(&["WHEN", "CODE", "TIME", "COMMAND"], &rows, style));
    Ok(())
}

fn row(entry: &HistoryEntry, style: &StyleOptions) -> Vec<String> {
    let code = if entry.timed_out {
        color(Role::Warning, "timeout", style)
    } else if entry.return_code == 0 {
        color(Role::Success, "0", style)
    } else {
        color(Role::Error, entry.return_code.to_string(), style)
    };
    let mut line = entry.command_name.clone();
    if !entry.args.is_empty() {
        line.push(' ');
        line.push_str(&shell_words::join(&entry.args));
    }
    vec![
        entry
            .executed_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        code,
        format!("{:.2}s", entry.duration_secs),
        line,
    ]
}
