//! Peek-don't-consume console input scanning.
//!
//! While a foreground stage runs, the coordinator wants to know whether the
//! user is asking to background the job or has switched focus away, without
//! stealing input the running program may yet read. A [`ConsoleProbe`]
//! exposes pending input events non-destructively; an [`InputClassifier`]
//! turns repeated observations into a verdict. A single occurrence of the
//! background chord is ambiguous with the program simply not having read its
//! input yet, so the chord must survive several consecutive polls.

use std::collections::VecDeque;
use std::sync::Mutex;

/// An input event as seen by a peek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// The control chord that requests backgrounding the foreground job.
    BackgroundChord,
    /// The console lost focus.
    FocusLost,
    /// Anything else: ordinary keystrokes destined for the program.
    Other,
}

/// Non-destructive access to pending console input. The interactive
/// front-end supplies a real implementation; the executor only needs these
/// two operations.
pub trait ConsoleProbe: Send {
    /// Whether any input is pending right now.
    fn input_pending(&self) -> bool;

    /// Peek at the pending events without consuming them. Each call
    /// represents one poll interval.
    fn peek(&self) -> Vec<ConsoleEvent>;
}

/// A probe for non-interactive use: no input, ever.
pub struct NullProbe;

impl ConsoleProbe for NullProbe {
    fn input_pending(&self) -> bool {
        false
    }
    fn peek(&self) -> Vec<ConsoleEvent> {
        Vec::new()
    }
}

/// A probe fed from a script of per-poll event sets, for tests. Each peek
/// advances to the next scripted poll.
pub struct ScriptedProbe {
    polls: Mutex<VecDeque<Vec<ConsoleEvent>>>,
}

impl ScriptedProbe {
    pub fn new(polls: Vec<Vec<ConsoleEvent>>) -> Self {
        ScriptedProbe {
            polls: Mutex::new(polls.into()),
        }
    }
}

impl ConsoleProbe for ScriptedProbe {
    fn input_pending(&self) -> bool {
        self.polls
            .lock()
            .unwrap()
            .front()
            .is_some_and(|poll| !poll.is_empty())
    }
    fn peek(&self) -> Vec<ConsoleEvent> {
        self.polls.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// What the classifier concluded from the input stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputVerdict {
    /// The user wants the foreground job backgrounded.
    Background,
    /// The console has repeatedly lost focus.
    FocusLost,
}

/// Turns peeked input events into a verdict. Thresholds and reset rules are
/// explicit: the background chord must be present across consecutive polls,
/// and any unrelated input resets both counts.
pub struct InputClassifier {
    /// Consecutive polls the background chord must survive.
    pub background_threshold: u32,
    /// Focus-loss events required for a FocusLost verdict.
    pub focus_threshold: u32,

    chord_streak: u32,
    focus_events: u32,
}

impl InputClassifier {
    pub const DEFAULT_BACKGROUND_THRESHOLD: u32 = 3;
    pub const DEFAULT_FOCUS_THRESHOLD: u32 = 3;

    pub fn new() -> Self {
        InputClassifier {
            background_threshold: Self::DEFAULT_BACKGROUND_THRESHOLD,
            focus_threshold: Self::DEFAULT_FOCUS_THRESHOLD,
            chord_streak: 0,
            focus_events: 0,
        }
    }

    /// Feed one poll's worth of peeked events. An empty slice means input
    /// that was pending has been consumed by the program, which resolves the
    /// chord ambiguity in the program's favor.
    pub fn observe(&mut self, events: &[ConsoleEvent]) -> Option<InputVerdict> {
        if events.contains(&ConsoleEvent::Other) {
            self.chord_streak = 0;
            self.focus_events = 0;
            return None;
        }

        if events.contains(&ConsoleEvent::BackgroundChord) {
            self.chord_streak += 1;
        } else {
            self.chord_streak = 0;
        }
        self.focus_events += events
            .iter()
            .filter(|ev| **ev == ConsoleEvent::FocusLost)
            .count() as u32;

        if self.chord_streak >= self.background_threshold {
            return Some(InputVerdict::Background);
        }
        if self.focus_events >= self.focus_threshold {
            return Some(InputVerdict::FocusLost);
        }
        None
    }

    /// Whether a candidate is currently suspected; the caller shrinks its
    /// poll delay while this holds.
    pub fn suspicious(&self) -> bool {
        self.chord_streak > 0 || self.focus_events > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_consecutive_chords_background() {
        let mut classifier = InputClassifier::new();
        assert_eq!(classifier.observe(&[ConsoleEvent::BackgroundChord]), None);
        assert_eq!(classifier.observe(&[ConsoleEvent::BackgroundChord]), None);
        assert_eq!(
            classifier.observe(&[ConsoleEvent::BackgroundChord]),
            Some(InputVerdict::Background)
        );
    }

    #[test]
    fn test_unrelated_input_resets() {
        let mut classifier = InputClassifier::new();
        classifier.observe(&[ConsoleEvent::BackgroundChord]);
        classifier.observe(&[ConsoleEvent::BackgroundChord]);
        // Unrelated input: the program is being typed at, not us.
        assert_eq!(classifier.observe(&[ConsoleEvent::Other]), None);
        assert_eq!(classifier.observe(&[ConsoleEvent::BackgroundChord]), None);
        assert_eq!(classifier.observe(&[ConsoleEvent::BackgroundChord]), None);
        assert!(!classifier
            .observe(&[ConsoleEvent::BackgroundChord])
            .is_none());
    }

    #[test]
    fn test_focus_loss_accumulates() {
        let mut classifier = InputClassifier::new();
        assert_eq!(classifier.observe(&[ConsoleEvent::FocusLost]), None);
        assert_eq!(
            classifier.observe(&[ConsoleEvent::FocusLost, ConsoleEvent::FocusLost]),
            Some(InputVerdict::FocusLost)
        );
    }

    #[test]
    fn test_consumed_input_breaks_streak() {
        let mut classifier = InputClassifier::new();
        classifier.observe(&[ConsoleEvent::BackgroundChord]);
        classifier.observe(&[ConsoleEvent::BackgroundChord]);
        // Nothing pending this poll: the program read its input.
        classifier.observe(&[]);
        assert_eq!(classifier.observe(&[ConsoleEvent::BackgroundChord]), None);
        assert!(classifier.suspicious());
    }
}
