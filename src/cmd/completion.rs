/*!
`completion.rs`

`tu complete <PARTIAL>` (hidden): prints subcommands, registered FQNs and
aliases that start with `PARTIAL`, one per line, sorted. The scripts below call
it for the first word after `tu`.

`tu completion <bash|zsh|fish> [--install]`: prints a completion script for
that shell, or with `--install` the steps to set it up.
*/

use std::collections::BTreeSet;

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use tu::Registry;

use crate::cmd::Context;

#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Prefix typed so far
    #[arg(default_value = "", allow_hyphen_values = true)]
    pub partial: String,
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Print installation steps instead of the bare script
    #[arg(long)]
    pub install: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

const BASH_SCRIPT: &str = r#"# bash completion for tu
_tu_completion() {
    local cur="${COMP_WORDS[COMP_CWORD]}"
    COMPREPLY=()
    if [ "$COMP_CWORD" -eq 1 ]; then
        local candidates
        candidates=$(tu complete "$cur" 2>/dev/null)
        COMPREPLY=( $(compgen -W "$candidates" -- "$cur") )
        return 0
    fi
    COMPREPLY=( $(compgen -f -- "$cur") )
}
complete -F _tu_completion tu
"#;

const ZSH_SCRIPT: &str = r#"#compdef tu

_tu() {
    if (( CURRENT == 2 )); then
        local -a candidates
        candidates=(${(f)"$(tu complete "${words[2]}" 2>/dev/null)"})
        compadd -a candidates
    else
        _files
    fi
}

_tu "$@"
"#;

const FISH_SCRIPT: &str = r#"# fish completion for tu
function __fish_tu_complete
    set -l cmd (commandline -opc)
    if test (count $cmd) -eq 1
        tu complete (commandline -ct) 2>/dev/null
    end
end

complete -c tu -f -n '__fish_use_subcommand' -a '(__fish_tu_complete)'
"#;

pub fn script(shell: Shell) -> &'static str {
    match shell {
        Shell::Bash => BASH_SCRIPT,
        Shell::Zsh => ZSH_SCRIPT,
        Shell::Fish => FISH_SCRIPT,
    }
}

pub fn install_instructions(shell: Shell) -> String {
    match shell {
        Shell::Bash => format!(
            "To install bash completion for tu, add this to your ~/.bashrc:\n\n{}\n\
             Or save the script to a file and source it:\n    \
             tu completion bash > ~/.tu-completion.bash\n    \
             echo 'source ~/.tu-completion.bash' >> ~/.bashrc\n",
            BASH_SCRIPT
        ),
        Shell::Zsh => "To install zsh completion for tu, save the script to your fpath:\n\n    \
             tu completion zsh > ~/.zsh/completion/_tu\n\n\
             And make sure your ~/.zshrc contains:\n    \
             fpath=(~/.zsh/completion $fpath)\n    \
             autoload -Uz compinit && compinit\n"
            .to_string(),
        Shell::Fish => "To install fish completion for tu:\n\n    \
             tu completion fish > ~/.config/fish/completions/tu.fish\n"
            .to_string(),
    }
}

/// Sorted, de-duplicated names starting with `partial`.
pub fn candidates<'a>(
    registry: &'a Registry,
    subcommands: impl IntoIterator<Item = &'a str>,
    partial: &str,
) -> Vec<&'a str> {
    subcommands
        .into_iter()
        .chain(registry.all_names())
        .filter(|n| n.starts_with(partial))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn execute_complete(args: CompleteArgs, ctx: &Context) -> Result<()> {
    // Completion must never print errors into the user's prompt.
    let reg = ctx.store.load().unwrap_or_default();
    let cli = crate::Cli::command();
    let subcommands = cli
        .get_subcommands()
        .filter(|c| !c.is_hide_set())
        .map(|c| c.get_name());
    for name in candidates(&reg, subcommands, &args.partial) {
        println!("{name}");
    }
    Ok(())
}

pub fn execute_completion(args: &CompletionArgs) -> Result<()> {
    if args.install {
        print!("{}", install_instructions(args.shell));
    } else {
        print!("{}", script(args.shell));
    }
    Ok(())
}
