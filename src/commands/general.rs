//! General REPL commands (help, quit, tempo, steps, watch)

use crate::commands::{CommandContext, CommandResult};
use colored::*;

/// Handle `help` command
pub fn cmd_help(_args: &str, _ctx: &mut CommandContext) -> CommandResult {
    print_help();
    CommandResult::Success
}

/// Handle `quit` or `exit` command
pub fn cmd_quit(_args: &str, _ctx: &mut CommandContext) -> CommandResult {
    CommandResult::Exit
}

/// Handle `tempo [bpm]` command
pub fn cmd_tempo(args: &str, ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Message(format!("Current tempo: {:.1} BPM", ctx.engine.bpm()));
    }

    let Ok(bpm) = args.parse::<f64>() else {
        return CommandResult::Error(format!("Invalid tempo '{}'", args));
    };
    match ctx.engine.set_bpm(bpm) {
        Ok(()) => CommandResult::Message(
            format!("Tempo set to {:.1} BPM", bpm)
                .bright_green()
                .to_string(),
        ),
        Err(e) => CommandResult::Error(e.to_string()),
    }
}

/// Handle `steps [n]` command
pub fn cmd_steps(args: &str, ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Message(format!("Steps per loop: {}", ctx.engine.steps()));
    }

    let Ok(steps) = args.parse::<usize>() else {
        return CommandResult::Error(format!("Invalid step count '{}'", args));
    };
    match ctx.engine.set_steps(steps) {
        Ok(()) => CommandResult::Message(
            format!("Loop now has {} steps", steps)
                .bright_green()
                .to_string(),
        ),
        Err(e) => CommandResult::Error(e.to_string()),
    }
}

/// Handle `watch [file]` command
pub fn cmd_watch(args: &str, _ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Error("Usage: watch <file>".to_string());
    }
    CommandResult::Watch(args.to_string())
}

fn print_help() {
    println!("{}", "Facet Help".bold());
    println!("{}", "==========".bold());
    println!();
    println!("{}", "Patterns:".green());
    println!(
        "  {}  - Store a buffer for kick/vol",
        "kick vol [1 0 1 0]".cyan()
    );
    println!(
        "  {}  - Chain operations left to right",
        "synth freq [0 1].scale(200,400)".cyan()
    );
    println!(
        "  {}  - Play a sample on steps 1 and 9",
        "kick noise(64).play([0 0.5])".cyan()
    );
    println!(
        "  {}  - Send MIDI notes",
        "lead [60 64 67].note(100,125,1)".cyan()
    );
    println!(
        "  {}  - Regenerate every 4 bars",
        "every(4) hat noise(16).gt(0.5)".cyan()
    );
    println!("  Separate statements with {}. Comments use {} and {}.", ";".cyan(), "//".cyan(), "/* */".cyan());
    println!();
    println!("{}", "Commands:".green());
    println!("  {}            - Show or set the tempo", "tempo [bpm]".cyan());
    println!("  {}              - Show or set steps per loop", "steps [n]".cyan());
    println!("  {}               - Tempo, CPU load and recent errors", "status".cyan());
    println!("  {}                - Current destination table", "table".cyan());
    println!("  {}          - Stop one pattern, or everything", "stop [name]".cyan());
    println!("  {}                 - Restart the transport", "play".cyan());
    println!("  {}          - Evaluate once and keep the result", "keep <code>".cyan());
    println!("  {}          - Play for a single loop", "once <code>".cyan());
    println!("  {} - Control every(N) hooks", "hooks mute|unmute|clear".cyan());
    println!("  {}          - Set mousex/mousey", "mouse <x> <y>".cyan());
    println!("  {}         - Resubmit a file when it changes", "watch <file>".cyan());
    println!("  {} - MIDI output", "midi devices|connect|disconnect|status|panic".cyan());
    println!("  {}            - Leave", "quit / exit".cyan());
    println!();
}
