//! `sta reorder`: rearrange the chain from trunk to the current branch.
//!
//! The new order comes from a file (`--file`) or from `$EDITOR` over a
//! temp file pre-filled with the current order, bottom to top.

use std::io::{IsTerminal, Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::errors::StackError;
use crate::events::EventSink;
use crate::program_name::program_name;

pub async fn run(sink: Arc<dyn EventSink>, file: Option<String>) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let current = engine.gateway().require_current_branch()?;
    if engine.graph().is_trunk(&current) {
        return Err(StackError::User("cannot reorder from the trunk; check out a stack branch".into()).into());
    }

    let new_order = match file {
        Some(path) => parse_order(
            &std::fs::read_to_string(&path).with_context(|| format!("failed to read order file '{}'", path))?,
        )?,
        None => {
            let chain = engine.graph().full_stack(&current)?;
            edit_order(&chain, engine.trunk())?
        }
    };

    let outcome = engine.reorder(&current, &new_order)?;
    super::into_conflict_error(outcome)?;
    Ok(())
}

/// Branch names, one per line; blanks and `#` comments ignored.
fn parse_order(contents: &str) -> Result<Vec<String>> {
    let branches: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if branches.is_empty() {
        return Err(StackError::User("the reorder list is empty".into()).into());
    }
    Ok(branches)
}

fn edit_order(chain: &[String], trunk: &str) -> Result<Vec<String>> {
    if !std::io::stdin().is_terminal() {
        return Err(StackError::Precondition(format!(
            "reorder needs a terminal for the editor; use '{} reorder --file <path>' non-interactively",
            program_name()
        ))
        .into());
    }

    let path = std::env::temp_dir().join(format!("{}-reorder-{}.txt", program_name(), std::process::id()));
    {
        let mut file = std::fs::File::create(&path).context("failed to create reorder file")?;
        writeln!(file, "# Rearrange the lines to reorder the stack (bottom to top).")?;
        writeln!(file, "# Lines starting with '#' are ignored.")?;
        writeln!(file, "#")?;
        writeln!(file, "# Trunk (fixed): {}", trunk)?;
        writeln!(file)?;
        for branch in chain {
            writeln!(file, "{}", branch)?;
        }
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".to_string());
    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to launch editor '{}'", editor))?;
    if !status.success() {
        let _ = std::fs::remove_file(&path);
        return Err(StackError::User("editor exited with a non-zero status".into()).into());
    }

    let mut contents = String::new();
    std::fs::File::open(&path)?.read_to_string(&mut contents)?;
    let _ = std::fs::remove_file(&path);
    parse_order(&contents)
}
