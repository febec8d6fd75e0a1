//! Pattern lifecycle commands

use crate::commands::{CommandContext, CommandResult};
use colored::*;
use facet_core::types::RunMode;

/// Handle `stop [name]`
pub fn cmd_stop(args: &str, ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        ctx.engine.stop_all();
        return CommandResult::Message("Stopped everything".yellow().to_string());
    }
    ctx.engine.stop(args);
    CommandResult::Message(format!("Stopped {}", args.cyan()))
}

/// Handle `play`
pub fn cmd_play(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    ctx.engine.play();
    CommandResult::Success
}

/// Handle `keep <code>`
pub fn cmd_keep(args: &str, ctx: &mut CommandContext) -> CommandResult {
    submit(args, RunMode::Keep, ctx)
}

/// Handle `once <code>`
pub fn cmd_once(args: &str, ctx: &mut CommandContext) -> CommandResult {
    submit(args, RunMode::Once, ctx)
}

fn submit(code: &str, mode: RunMode, ctx: &mut CommandContext) -> CommandResult {
    if code.is_empty() {
        return CommandResult::Error(format!("Usage: {} <code>", mode));
    }
    ctx.engine.submit(code, mode);
    CommandResult::Success
}

pub fn cmd_hooks_mute(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    ctx.engine.mute_hooks(true);
    CommandResult::Message("Hooks muted".yellow().to_string())
}

pub fn cmd_hooks_unmute(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    ctx.engine.mute_hooks(false);
    CommandResult::Message("Hooks unmuted".green().to_string())
}

pub fn cmd_hooks_clear(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    match ctx.engine.clear_hooks() {
        Some(cleared) => CommandResult::Message(format!("Cleared {} hook(s)", cleared)),
        None => CommandResult::Error("Engine did not answer".to_string()),
    }
}

/// Handle `mouse <x> <y>`
pub fn cmd_mouse(args: &str, ctx: &mut CommandContext) -> CommandResult {
    let coords: Vec<f64> = args
        .split_whitespace()
        .filter_map(|part| part.parse().ok())
        .collect();
    let &[x, y] = coords.as_slice() else {
        return CommandResult::Error("Usage: mouse <x> <y>".to_string());
    };
    ctx.mouse = (x, y);
    match ctx.engine.status(Some(ctx.mouse)) {
        Some(status) => {
            print_errors(&status.errors);
            CommandResult::Success
        }
        None => CommandResult::Error("Engine did not answer".to_string()),
    }
}

/// Handle `status`
pub fn cmd_status(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    let Some(status) = ctx.engine.status(None) else {
        return CommandResult::Error("Engine did not answer".to_string());
    };

    let mut output = format!("{}\n", "Status:".bold());
    output.push_str(&format!("  Tempo: {:.1} BPM\n", status.bpm));
    output.push_str(&format!("  CPU: {:.1}%\n", status.cpu_percent));
    output.push_str(&format!(
        "  Transport: {}\n",
        if ctx.engine.is_playing() {
            "playing".green()
        } else {
            "stopped".yellow()
        }
    ));
    output.push_str(&format!("  Evaluating: {}\n", status.in_flight));
    if status.regenerating.is_empty() {
        output.push_str(&format!("  Regenerating: {}", "none".dimmed()));
    } else {
        output.push_str(&format!(
            "  Regenerating: {}",
            status.regenerating.join(", ").cyan()
        ));
    }
    if status.hooks_muted {
        output.push_str(&format!("\n  Hooks: {}", "muted".yellow()));
    }
    print_errors(&status.errors);
    CommandResult::Message(output)
}

/// Handle `table`
pub fn cmd_table(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    let Some(table) = ctx.engine.table() else {
        return CommandResult::Error("Engine did not answer".to_string());
    };
    if table.is_empty() {
        return CommandResult::Message("Table is empty".dimmed().to_string());
    }
    let lines: Vec<String> = table
        .iter()
        .map(|(destination, property, buffer)| {
            let key = if property.is_empty() {
                destination.clone()
            } else {
                format!("{} {}", destination, property)
            };
            format!("  {}: {}", key.cyan(), abbreviate(buffer, 8))
        })
        .collect();
    CommandResult::Message(lines.join("\n"))
}

fn print_errors(errors: &[crate::engine::ReportedError]) {
    for error in errors {
        println!(
            "{} {} {}",
            "Error:".bright_red().bold(),
            error.message.red(),
            format!("({})", error.statement).dimmed()
        );
    }
}

/// First `count` values of a serialized buffer
fn abbreviate(buffer: &str, count: usize) -> String {
    let values: Vec<&str> = buffer.split_whitespace().collect();
    if values.len() <= count {
        values.join(" ")
    } else {
        format!("{} ... ({} values)", values[..count].join(" "), values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_long_buffers() {
        assert_eq!(abbreviate("1.0000 0.0000", 8), "1.0000 0.0000");
        assert_eq!(
            abbreviate("1 2 3 4", 2),
            "1 2 ... (4 values)"
        );
    }
}
