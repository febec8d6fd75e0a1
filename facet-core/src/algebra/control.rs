//! Pattern object controls
//!
//! These operators leave the value alone (or only rescale it) and instead
//! annotate the pattern object: where it plays, what MIDI it emits, how the
//! scheduler treats it.

use crate::algebra::resize::resample_nearest;
use crate::algebra::{round4, Args, ControlRule, Registry, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::evaluator::apply_operation;
use crate::parser::statement::parse_chain;
use crate::types::pattern::{DEFAULT_CONTROLLER, DEFAULT_DURATION_MS, DEFAULT_VELOCITY};
use crate::types::{
    flatten, ControlSchedule, NoteSchedule, PatternObject, PitchbendSchedule, Value,
};

fn channel(args: &Args, index: usize, ctx: &mut EvalContext) -> Result<u8> {
    let n = args.number(index, 1.0, ctx)?;
    Ok(n.round().clamp(1.0, 16.0) as u8)
}

/// Linear remap of flat samples onto `[new_min, new_max]`
fn scale_samples(samples: &[f64], new_min: f64, new_max: f64) -> Vec<f64> {
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    samples
        .iter()
        .map(|n| {
            if range == 0.0 || !range.is_finite() {
                new_min
            } else {
                round4((n - min) * (new_max - new_min) / range + new_min)
            }
        })
        .collect()
}

/// Per-note parameter: a number or a pattern, resized to the note count
fn per_note(
    args: &Args,
    index: usize,
    default: f64,
    len: usize,
    ctx: &mut EvalContext,
) -> Result<Vec<f64>> {
    let values = match args.value(index, ctx)? {
        Some(value) => value.leaves(),
        None => vec![default],
    };
    if values.is_empty() {
        return Ok(vec![default; len]);
    }
    Ok(resample_nearest(&values, len))
}

fn play(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let positions = match args.value(0, ctx)? {
        Some(value) => value.leaves(),
        None => vec![0.0],
    };
    pattern.sequence_data = positions
        .into_iter()
        .map(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 })
        .collect();
    Ok(())
}

fn note(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let data = flatten(&pattern.data);
    let len = data.len();
    let velocity = per_note(args, 0, DEFAULT_VELOCITY, len, ctx)?;
    let duration = per_note(args, 1, DEFAULT_DURATION_MS, len, ctx)?;
    pattern.notes = Some(NoteSchedule {
        data,
        velocity,
        duration,
        channel: channel(args, 2, ctx)?,
    });
    Ok(())
}

/// Semitone offsets of the named chords
pub fn chord_intervals(name: &str) -> Option<Vec<f64>> {
    let intervals: &[f64] = match name {
        "maj" | "major" => &[4.0, 7.0],
        "min" | "minor" => &[3.0, 7.0],
        "fifth" | "5th" | "5" => &[7.0],
        "seventh" | "7th" | "7" => &[4.0, 7.0, 10.0],
        "major seventh" | "maj7" => &[4.0, 7.0, 11.0],
        "minor seventh" | "m7" => &[3.0, 7.0, 10.0],
        "diminished" | "dim" => &[-1.0, 2.0, 5.0],
        "add2" => &[2.0, 4.0, 7.0],
        "add9" => &[4.0, 7.0, 14.0],
        _ => return None,
    };
    Some(intervals.to_vec())
}

// `chord('maj', 1)` or `chord([4 7 11])`; the inversion drops the lowest
// intervals an octave
fn chord(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let name = args.string(0).unwrap_or_default();
    let mut intervals = match chord_intervals(&name) {
        Some(intervals) => intervals,
        None => {
            let value = args.value(0, ctx).map_err(|_| {
                FacetError::argument(args.raw(), format!("invalid chord name: {}", name))
            })?;
            value.map(|v| v.leaves()).unwrap_or_default()
        }
    };
    let inversion = args.number(1, 0.0, ctx)?.round().clamp(0.0, 3.0) as usize;
    for interval in intervals.iter_mut().take(inversion) {
        *interval -= 12.0;
    }
    pattern.chord_intervals = intervals;
    Ok(())
}

fn cc(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let samples = flatten(&pattern.data);
    let controller = args
        .number(0, DEFAULT_CONTROLLER as f64, ctx)?
        .round()
        .clamp(0.0, 127.0) as u8;
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let data: Vec<f64> = scale_samples(&samples, min * 127.0, max * 127.0)
        .into_iter()
        .map(|n| n.clamp(0.0, 127.0))
        .collect();
    pattern.data = Value::seq(data.iter().copied());
    pattern.cc = Some(ControlSchedule {
        data,
        controller,
        channel: channel(args, 1, ctx)?,
    });
    Ok(())
}

fn pitchbend(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let data = scale_samples(&flatten(&pattern.data), -1.0, 1.0);
    pattern.data = Value::seq(data.iter().copied());
    pattern.pitchbend = Some(PitchbendSchedule {
        data,
        channel: channel(args, 0, ctx)?,
    });
    Ok(())
}

fn set(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let name = args
        .string(0)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| FacetError::argument(args.raw(), "set() needs a name"))?;
    let value = pattern.data.clone();
    ctx.store.set(&name, value.clone());
    ctx.env.define(name.clone(), value.clone());
    pattern.stored.retain(|(existing, _)| *existing != name);
    pattern.stored.push((name, value));
    Ok(())
}

fn keep(pattern: &mut PatternObject, _: &Args, _: &mut EvalContext) -> Result<()> {
    pattern.keep = true;
    Ok(())
}

fn once(pattern: &mut PatternObject, _: &Args, _: &mut EvalContext) -> Result<()> {
    pattern.once = true;
    pattern.keep = true;
    Ok(())
}

fn stop(pattern: &mut PatternObject, _: &Args, _: &mut EvalContext) -> Result<()> {
    pattern.stopped = true;
    Ok(())
}

fn skip(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let prob = args.number(0, 1.0, ctx)?.abs();
    if ctx.random() < prob {
        pattern.skipped = true;
    }
    Ok(())
}

fn every(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let n = args.number(0, 1.0, ctx)?.round().abs();
    pattern.hook_period = Some(if n < 1.0 { 1 } else { n as u32 });
    Ok(())
}

fn bpm(pattern: &mut PatternObject, _: &Args, _: &mut EvalContext) -> Result<()> {
    pattern.bpm_pattern = Some(flatten(&pattern.data));
    Ok(())
}

fn channels(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let n = args.number(0, 1.0, ctx)?.round();
    pattern.channels = if n < 1.0 { 1 } else { n as usize };
    Ok(())
}

fn pan(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let positions = args.pattern(0, ctx)?.leaves();
    pattern.pan = Some(positions.into_iter().map(|p| p.clamp(0.0, 1.0)).collect());
    Ok(())
}

// Recorded by the statement compiler; nothing to do on the value
fn mult(_: &mut PatternObject, _: &Args, _: &mut EvalContext) -> Result<()> {
    Ok(())
}

fn sometimes(pattern: &mut PatternObject, args: &Args, ctx: &mut EvalContext) -> Result<()> {
    let prob = args.number(0, 0.5, ctx)?.abs();
    let chain = args
        .string(1)
        .ok_or_else(|| FacetError::argument(args.raw(), "sometimes() needs an operation chain"))?;
    if ctx.random() >= prob {
        return Ok(());
    }
    for operation in parse_chain(&chain, ctx)? {
        apply_operation(pattern, &operation, ctx)?;
    }
    Ok(())
}

pub(crate) fn register(registry: &mut Registry) {
    let ops: [(&str, &str, &str, &str, ControlRule); 16] = [
        ("play", "Playback", "Plays the buffer at each position in 0..1 of the loop.", "play(positions = 0)", play),
        ("note", "MIDI", "Sends every element as a MIDI note.", "note(velocity = 100, duration = 125, channel = 1)", note),
        ("chord", "MIDI", "Adds chord tones to every note.", "chord(name, inversion = 0)", chord),
        ("cc", "MIDI", "Sends the pattern as MIDI control changes.", "cc(controller = 70, channel = 1)", cc),
        ("pitchbend", "MIDI", "Sends the pattern as MIDI pitch bend.", "pitchbend(channel = 1)", pitchbend),
        ("set", "Storage", "Stores the pattern under a name for get().", "set(name)", set),
        ("keep", "Lifecycle", "Keeps playing without regenerating.", "keep()", keep),
        ("once", "Lifecycle", "Plays a single time.", "once()", once),
        ("stop", "Lifecycle", "Stops the named pattern.", "stop()", stop),
        ("skip", "Lifecycle", "Drops this cycle's output with the given probability.", "skip(prob = 1)", skip),
        ("every", "Lifecycle", "Regenerates only every n bars.", "every(n = 1)", every),
        ("bpm", "Transport", "Drives the transport tempo from the pattern.", "bpm()", bpm),
        ("channels", "Playback", "Number of output channels in the rendered file.", "channels(n)", channels),
        ("pan", "Playback", "Pans the rendered file across its channels.", "pan(pattern)", pan),
        ("mult", "Routing", "Copies this buffer to another destination and property.", "mult(destination property)", mult),
        ("sometimes", "Chance", "Applies an operation chain with some probability.", "sometimes(prob, 'ops')", sometimes),
    ];
    for (name, category, description, signature, rule) in ops {
        registry.register(name, category, description, signature, Transform::Control(rule));
    }
}
