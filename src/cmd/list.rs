/*!
`list.rs`

`tu list [PATTERN] [--kind KIND] [--tag TAG] [--json]`
`tu show <NAME> [--json]`

Human listing is grouped by namespace: root-level names first, then each
namespace under its own header, all in lexical order.

JSON Output Shape (list):
{
  "status": "ok",
  "count": 2,
  "commands": [ { "name": "build", "kind": "shell", "target": "make", ... } ]
}
*/

use anyhow::Result;
use clap::Args;
use tu::RouterError;
use tu::model::{CommandKind, RegisteredCommand};
use tu::registry::{self, ListFilter};

use crate::cmd::Context;
use crate::cmd::format::{Role, box_header, color, emoji, fields, table};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Case-insensitive substring over names and aliases
    pub pattern: Option<String>,

    /// Only commands of this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<CommandKind>,

    /// Only commands carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// FQN or alias
    pub name: String,

    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

/// Serialized entry with its FQN inlined (the registry keys entries by name).
pub(crate) fn command_json(cmd: &RegisteredCommand) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cmd)?;
    value["name"] = serde_json::Value::String(cmd.name.clone());
    Ok(value)
}

pub fn execute_list(args: ListArgs, ctx: &Context) -> Result<()> {
    let reg = ctx.store.load()?;
    let filter = ListFilter {
        pattern: args.pattern.clone(),
        kind: args.kind,
        tag: args.tag.clone(),
    };
    let matched = registry::list(&reg, &filter);

    if args.json {
        let items = matched
            .iter()
            .map(|c| command_json(c))
            .collect::<Result<Vec<_>>>()?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "count": items.len(),
                "commands": items,
            }))?
        );
        return Ok(());
    }

    let style = &ctx.style;
    let subtitle = ctx.store.path().display().to_string();
    println!(
        "{}",
        box_header(
            format!("{} Commands ({})", emoji("list", style), matched.len()),
            Some(subtitle),
            style
        )
    );

    if matched.is_empty() {
        let hint = if reg.is_empty() {
            "no commands registered; try 'tu register <target>'"
        } else {
            "no commands match the filter"
        };
        println!("{}", color(Role::Dim, format!("{} ({hint})", emoji("info", style)), style));
        return Ok(());
    }

    for (namespace, members) in registry::group_by_namespace(&matched) {
        println!();
        let title = if namespace.is_empty() {
            "(root)".to_string()
        } else {
            format!("{namespace}:")
        };
        println!("{}", color(Role::Bold, title, style));

        let rows: Vec<Vec<String>> = members
            .iter()
            .map(|c| {
                let mut name = c.name.clone();
                if !c.aliases.is_empty() {
                    let aliases: Vec<&str> = c.aliases.iter().map(String::as_str).collect();
                    name.push_str(&format!(" ({})", aliases.join(", ")));
                }
                let detail = c.description.clone().unwrap_or_else(|| c.target.clone());
                vec![name, c.kind.to_string(), detail]
            })
            .collect();
        println!("{}", table(&["NAME", "KIND", "DESCRIPTION"], &rows, style));
    }
    Ok(())
}

pub fn execute_show(args: ShowArgs, ctx: &Context) -> Result<()> {
    let reg = ctx.store.load()?;
    let cmd = registry::get(&reg, &args.name).ok_or_else(|| RouterError::NotFound(args.name.clone()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "command": command_json(cmd)?,
            }))?
        );
        return Ok(());
    }

    let style = &ctx.style;
    println!("{}", box_header(&cmd.name, Some(cmd.kind.as_str()), style));
    let join = |items: Vec<&str>| (!items.is_empty()).then(|| items.join(", "));
    let env = cmd
        .env_overlay
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();
    println!(
        "{}",
        fields(
            &[
                ("Target", Some(cmd.target.clone())),
                ("Description", cmd.description.clone()),
                ("Aliases", join(cmd.aliases.iter().map(String::as_str).collect())),
                ("Tags", join(cmd.tags.iter().map(String::as_str).collect())),
                ("Depends on", join(cmd.depends_on.iter().map(String::as_str).collect())),
                ("Timeout", cmd.timeout_seconds.map(|t| format!("{t}s"))),
                ("Env", join(env.iter().map(String::as_str).collect())),
                ("Created", Some(cmd.created_at.to_rfc3339())),
                ("Updated", Some(cmd.updated_at.to_rfc3339())),
            ],
            style
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tu::registry::RegisterRequest;

    #[test]
    fn command_json_inlines_name() {
        let (reg, _) = registry::register(
            tu::Registry::new(),
            RegisterRequest::new("make build").named("build"),
            chrono::Utc::now(),
        )
        .unwrap();
        let value = command_json(reg.get("build").unwrap()).unwrap();
        assert_eq!(value["name"], "build");
        assert_eq!(value["kind"], "shell");
        assert_eq!(value["target"], "make build");
    }
}
