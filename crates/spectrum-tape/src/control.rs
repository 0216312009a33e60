//! TZX control flow: jumps, loops, call sequences and conditional stops.
//!
//! Only one loop and one call sequence are tracked at a time. A loop start
//! inside an active loop replaces it; a call sequence reached while another
//! is active replaces the return frame.

use format_tzx::BlockKind;
use log::debug;

/// Where playback continues after a zero-time block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fall through to the following block.
    Next,
    /// Continue at this ordinal.
    Goto(usize),
    /// Halt the tape; the cursor moves past the block.
    Stop,
    /// Natural end of tape: rewind and halt.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoopFrame {
    /// Ordinal of the loop start block.
    start: usize,
    remaining: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallFrame {
    /// Ordinal of the call sequence block.
    caller: usize,
    /// Index of the next call target to use.
    next: usize,
    targets: usize,
}

/// Loop and call state for one playback session.
#[derive(Debug, Clone, Default)]
pub struct ControlFlow {
    loop_frame: Option<LoopFrame>,
    call_frame: Option<CallFrame>,
}

impl ControlFlow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all frames (rewind, seek, eject).
    pub fn reset(&mut self) {
        self.loop_frame = None;
        self.call_frame = None;
    }

    /// Whether a loop is active.
    #[must_use]
    pub fn in_loop(&self) -> bool {
        self.loop_frame.is_some()
    }

    /// Whether a call sequence is active.
    #[must_use]
    pub fn in_call(&self) -> bool {
        self.call_frame.is_some()
    }

    /// Apply a zero-time block at `ordinal` on a tape of `count` blocks.
    ///
    /// Kinds that neither branch nor stop fall through with [`Flow::Next`].
    pub fn apply(&mut self, ordinal: usize, kind: &BlockKind, count: usize, is_48k: bool) -> Flow {
        match kind {
            BlockKind::Jump { offset: 0 } => Flow::Next,
            BlockKind::Jump { offset } => {
                let flow = relative(ordinal, *offset, count);
                debug!("jump {offset:+} from block {ordinal}: {flow:?}");
                flow
            }
            BlockKind::LoopStart { repetitions } => {
                self.loop_frame = Some(LoopFrame {
                    start: ordinal,
                    remaining: *repetitions,
                });
                Flow::Next
            }
            BlockKind::LoopEnd => match self.loop_frame.as_mut() {
                Some(frame) => {
                    frame.remaining = frame.remaining.saturating_sub(1);
                    if frame.remaining > 0 {
                        Flow::Goto(frame.start + 1)
                    } else {
                        self.loop_frame = None;
                        Flow::Next
                    }
                }
                None => Flow::Next,
            },
            BlockKind::CallSequence { targets } => {
                let next = match self.call_frame {
                    Some(frame) if frame.caller == ordinal => frame.next,
                    _ => 0,
                };
                let Some(&offset) = targets.get(next) else {
                    self.call_frame = None;
                    return Flow::Next;
                };
                self.call_frame = Some(CallFrame {
                    caller: ordinal,
                    next: next + 1,
                    targets: targets.len(),
                });
                let flow = relative(ordinal, offset, count);
                debug!("call {} of {} from block {ordinal}: {flow:?}", next + 1, targets.len());
                flow
            }
            BlockKind::Return => match self.call_frame {
                Some(frame) if frame.next < frame.targets => Flow::Goto(frame.caller),
                Some(frame) => {
                    self.call_frame = None;
                    forward(frame.caller + 1, count)
                }
                None => Flow::Next,
            },
            BlockKind::StopIf48K if is_48k => Flow::Stop,
            _ => Flow::Next,
        }
    }
}

fn relative(ordinal: usize, offset: i16, count: usize) -> Flow {
    let target = ordinal as i64 + i64::from(offset);
    forward(target.max(0) as usize, count)
}

fn forward(target: usize, count: usize) -> Flow {
    if target >= count {
        Flow::End
    } else {
        Flow::Goto(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_targets() {
        let mut flow = ControlFlow::new();
        assert_eq!(flow.apply(5, &BlockKind::Jump { offset: 2 }, 10, true), Flow::Goto(7));
        assert_eq!(flow.apply(5, &BlockKind::Jump { offset: -3 }, 10, true), Flow::Goto(2));
        // Before the first block clamps to block 0.
        assert_eq!(flow.apply(1, &BlockKind::Jump { offset: -9 }, 10, true), Flow::Goto(0));
        // At or past the end is the natural end of tape.
        assert_eq!(flow.apply(5, &BlockKind::Jump { offset: 5 }, 10, true), Flow::End);
        // A jump to itself would never produce a signal.
        assert_eq!(flow.apply(5, &BlockKind::Jump { offset: 0 }, 10, true), Flow::Next);
    }

    #[test]
    fn loop_repeats_then_falls_through() {
        let mut flow = ControlFlow::new();
        assert_eq!(flow.apply(0, &BlockKind::LoopStart { repetitions: 3 }, 5, true), Flow::Next);
        assert_eq!(flow.apply(2, &BlockKind::LoopEnd, 5, true), Flow::Goto(1));
        assert_eq!(flow.apply(2, &BlockKind::LoopEnd, 5, true), Flow::Goto(1));
        assert_eq!(flow.apply(2, &BlockKind::LoopEnd, 5, true), Flow::Next);
        assert!(!flow.in_loop());
    }

    #[test]
    fn zero_repetitions_play_once() {
        let mut flow = ControlFlow::new();
        flow.apply(0, &BlockKind::LoopStart { repetitions: 0 }, 3, true);
        assert_eq!(flow.apply(2, &BlockKind::LoopEnd, 3, true), Flow::Next);
    }

    #[test]
    fn loop_end_without_start_passes_through() {
        let mut flow = ControlFlow::new();
        assert_eq!(flow.apply(0, &BlockKind::LoopEnd, 3, true), Flow::Next);
    }

    #[test]
    fn inner_loop_replaces_outer() {
        let mut flow = ControlFlow::new();
        flow.apply(0, &BlockKind::LoopStart { repetitions: 5 }, 10, true);
        flow.apply(1, &BlockKind::LoopStart { repetitions: 2 }, 10, true);
        assert_eq!(flow.apply(3, &BlockKind::LoopEnd, 10, true), Flow::Goto(2));
        assert_eq!(flow.apply(3, &BlockKind::LoopEnd, 10, true), Flow::Next);
        // The outer loop was forgotten.
        assert_eq!(flow.apply(4, &BlockKind::LoopEnd, 10, true), Flow::Next);
    }

    #[test]
    fn call_sequence_visits_each_target() {
        let mut flow = ControlFlow::new();
        let call = BlockKind::CallSequence {
            targets: vec![3, 5],
        };
        assert_eq!(flow.apply(1, &call, 10, true), Flow::Goto(4));
        assert!(flow.in_call());
        // Return re-enters the call block, which picks the next target.
        assert_eq!(flow.apply(4, &BlockKind::Return, 10, true), Flow::Goto(1));
        assert_eq!(flow.apply(1, &call, 10, true), Flow::Goto(6));
        // After the last target, return continues past the call block.
        assert_eq!(flow.apply(6, &BlockKind::Return, 10, true), Flow::Goto(2));
        assert!(!flow.in_call());
    }

    #[test]
    fn empty_call_sequence_and_stray_return() {
        let mut flow = ControlFlow::new();
        assert_eq!(
            flow.apply(0, &BlockKind::CallSequence { targets: vec![] }, 3, true),
            Flow::Next
        );
        assert_eq!(flow.apply(1, &BlockKind::Return, 3, true), Flow::Next);
    }

    #[test]
    fn stop_if_48k_depends_on_model() {
        let mut flow = ControlFlow::new();
        assert_eq!(flow.apply(0, &BlockKind::StopIf48K, 3, true), Flow::Stop);
        assert_eq!(flow.apply(0, &BlockKind::StopIf48K, 3, false), Flow::Next);
    }

    #[test]
    fn metadata_falls_through() {
        let mut flow = ControlFlow::new();
        for kind in [
            BlockKind::Select,
            BlockKind::GroupEnd,
            BlockKind::Glue,
            BlockKind::TextDescription {
                text: "x".to_string(),
            },
        ] {
            assert_eq!(flow.apply(0, &kind, 3, true), Flow::Next);
        }
    }
}
