/*!
`transfer.rs`

`tu export <PATH>` writes the whole registry as JSON, or YAML when the path
ends in `.yaml` / `.yml`.

`tu import <PATH> [--merge]` replaces the registry with the file's content, or
adds its entries when `--merge` is given. A merge that would collide on any
name changes nothing. Both forms validate every incoming name first.
*/

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tu::store::{self, ImportMode};

use crate::cmd::Context;
use crate::cmd::format::badge;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Destination file (.json, .yaml or .yml)
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Source file (.json, .yaml or .yml)
    pub path: PathBuf,

    /// Add to the current registry instead of replacing it
    #[arg(long)]
    pub merge: bool,
}

pub fn execute_export(args: ExportArgs, ctx: &Context) -> Result<()> {
    let count = ctx
        .store
        .export(&args.path)
        .with_context(|| format!("Failed to export to {}", args.path.display()))?;
    ctx.say(format!(
        "{}Exported {count} command(s) to {}",
        badge("success", &ctx.style),
        args.path.display()
    ));
    Ok(())
}

pub fn execute_import(args: ImportArgs, ctx: &Context) -> Result<()> {
    let mode = if args.merge {
        ImportMode::Merge
    } else {
        ImportMode::Replace
    };
    let count = store::read_document(&args.path)
        .and_then(|incoming| ctx.mutate(|current| store::combine(current, incoming, mode)))
        .with_context(|| format!("Failed to import from {}", args.path.display()))?;
    let verb = match mode {
        ImportMode::Merge => "Merged",
        ImportMode::Replace => "Imported",
    };
    ctx.say_changed(format!(
        "{}{verb} {count} command(s) from {}",
        badge("success", &ctx.style),
        args.path.display()
    ));
    Ok(())
}
