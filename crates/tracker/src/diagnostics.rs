//! Counters and the formatted phase-stack dump used in logs.

use std::fmt;

use crate::context::CaptureKind;
use crate::state::PhaseKind;
use crate::tracker::PhaseTracker;

const WIDTH: usize = 80;

/// Running counters kept by a tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub phases_entered: u64,
    pub peak_depth: usize,
    /// Non-reentrant phases entered while already active.
    pub runaway_phases: u64,
    pub printed_runaways: u32,
    pub depth_overflows: u64,
    pub unwind_failures: u64,
    /// Failures caused by a phase entered without required context.
    pub missing_context: u64,
    pub mismatched_pops: u64,
}

/// One stack frame as shown in a dump.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub depth: usize,
    pub phase: PhaseKind,
    pub source: Option<String>,
    pub modifiers: Vec<&'static str>,
    pub captures: Vec<(CaptureKind, usize)>,
    pub backtrace: Option<String>,
}

/// Human-readable report of the phase stack at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDump {
    pub title: String,
    pub offending: Option<PhaseKind>,
    /// Innermost first.
    pub frames: Vec<FrameSummary>,
    pub detail: Option<String>,
    pub counters: Diagnostics,
}

impl PhaseDump {
    pub fn capture(tracker: &PhaseTracker, title: &str, offending: Option<PhaseKind>) -> Self {
        let frames = tracker
            .frames()
            .iter()
            .enumerate()
            .rev()
            .map(|(depth, frame)| {
                let ctx = frame.context();
                FrameSummary {
                    depth,
                    phase: frame.kind(),
                    source: ctx.source_ref().map(|s| s.to_string()),
                    modifiers: frame.state().frame_modifiers().names(),
                    captures: ctx.capture_summary(),
                    backtrace: ctx.backtrace().map(|b| b.to_string()),
                }
            })
            .collect();
        Self {
            title: title.to_string(),
            offending,
            frames,
            detail: None,
            counters: *tracker.diagnostics(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn rule(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    writeln!(f, "{}", c.to_string().repeat(WIDTH))
}

fn centred(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    let pad = WIDTH.saturating_sub(text.len()) / 2;
    writeln!(f, "{}{}", " ".repeat(pad), text)
}

impl fmt::Display for PhaseDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        rule(f, '=')?;
        centred(f, &self.title)?;
        rule(f, '=')?;
        if let Some(phase) = self.offending {
            writeln!(f, "Phase: {phase}")?;
        }
        if let Some(detail) = &self.detail {
            writeln!(f, "Detail: {detail}")?;
        }
        writeln!(f, "Phase stack ({} frames, innermost first):", self.frames.len())?;
        for frame in &self.frames {
            rule(f, '-')?;
            writeln!(f, "  [{}] {}", frame.depth, frame.phase)?;
            if let Some(source) = &frame.source {
                writeln!(f, "      source: {source}")?;
            }
            writeln!(f, "      modifiers: {}", frame.modifiers.join(", "))?;
            for (kind, count) in &frame.captures {
                writeln!(f, "      {kind:<26}{count:>6}")?;
            }
            if let Some(backtrace) = &frame.backtrace {
                writeln!(f, "      entered at:")?;
                for line in backtrace.lines() {
                    writeln!(f, "        {line}")?;
                }
            }
        }
        rule(f, '-')?;
        let c = &self.counters;
        writeln!(f, "  phases entered:     {:>8}", c.phases_entered)?;
        writeln!(f, "  peak depth:         {:>8}", c.peak_depth)?;
        writeln!(f, "  runaway phases:     {:>8}", c.runaway_phases)?;
        writeln!(f, "  depth overflows:    {:>8}", c.depth_overflows)?;
        writeln!(f, "  unwind failures:    {:>8}", c.unwind_failures)?;
        writeln!(f, "  missing context:    {:>8}", c.missing_context)?;
        writeln!(f, "  mismatched pops:    {:>8}", c.mismatched_pops)?;
        rule(f, '=')
    }
}
