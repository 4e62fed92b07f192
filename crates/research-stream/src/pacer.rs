//! Typewriter-style reveal of buffered text.
//!
//! The pacer never owns the text. Callers pass the current buffered text on
//! every call; the pacer only tracks how much of it is visible. The buffered
//! text must only ever grow.

/// What a single frame did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to reveal (paused, or already showing everything).
    Idle,
    /// More text became visible; the source has not been reached yet.
    Advanced,
    /// The display reached the end of the source on this call.
    CaughtUp,
}

/// Paced view of the buffered text.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct DisplayState {
    pub displayed_text: String,
    pub is_revealing: bool,
    /// Revealed share of the buffered text by characters, 0 to 100.
    pub reveal_progress: f64,
}

#[derive(Debug)]
pub struct DisplayPacer {
    rate: u32,
    frame_rate: u32,
    revealed_bytes: usize,
    revealed_chars: usize,
    carry: u32,
    running: bool,
    fast_forwarded: bool,
}

impl DisplayPacer {
    /// Creates a paused pacer revealing `rate` characters per second at
    /// `frame_rate` ticks per second. Zero values are treated as one.
    pub fn new(rate: u32, frame_rate: u32) -> Self {
        Self {
            rate: rate.max(1),
            frame_rate: frame_rate.max(1),
            revealed_bytes: 0,
            revealed_chars: 0,
            carry: 0,
            running: false,
            fast_forwarded: false,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts (or restarts) the frame clock, leaving fast-forward mode.
    pub fn resume(&mut self) {
        self.running = true;
        self.fast_forwarded = false;
    }

    /// Advances one frame against the current `source`.
    pub fn tick(&mut self, source: &str) -> TickOutcome {
        if !self.running || self.revealed_bytes >= source.len() {
            return TickOutcome::Idle;
        }

        let mut step = self.rate / self.frame_rate;
        self.carry += self.rate % self.frame_rate;
        if self.carry >= self.frame_rate {
            self.carry -= self.frame_rate;
            step += 1;
        }
        let step = step.max(1) as usize;

        let rest = &source[self.revealed_bytes..];
        match rest.char_indices().nth(step) {
            Some((offset, _)) => {
                self.revealed_bytes += offset;
                self.revealed_chars += step;
                TickOutcome::Advanced
            }
            None => {
                self.reveal_all(source);
                TickOutcome::CaughtUp
            }
        }
    }

    /// Shows the whole source immediately and stops the animation.
    ///
    /// Returns true only if something was still hidden.
    pub fn fast_forward(&mut self, source: &str) -> bool {
        self.fast_forwarded = true;
        self.running = false;
        if self.revealed_bytes >= source.len() {
            return false;
        }
        self.reveal_all(source);
        true
    }

    /// True once `fast_forward` was called.
    pub fn is_fast_forwarded(&self) -> bool {
        self.fast_forwarded
    }

    /// True while hidden text remains.
    pub fn has_pending(&self, source: &str) -> bool {
        self.revealed_bytes < source.len()
    }

    pub fn display_state(&self, source: &str) -> DisplayState {
        let end = self.revealed_bytes.min(source.len());
        let total_chars = source.chars().count();
        let reveal_progress = if total_chars == 0 {
            0.0
        } else {
            (self.revealed_chars.min(total_chars) as f64 * 100.0) / total_chars as f64
        };
        DisplayState {
            displayed_text: source[..end].to_string(),
            is_revealing: self.running && end < source.len(),
            reveal_progress,
        }
    }

    fn reveal_all(&mut self, source: &str) {
        self.revealed_chars += source[self.revealed_bytes..].chars().count();
        self.revealed_bytes = source.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_end(pacer: &mut DisplayPacer, source: &str) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            let outcome = pacer.tick(source);
            frames.push(pacer.display_state(source).displayed_text);
            if outcome != TickOutcome::Advanced {
                return frames;
            }
        }
    }

    #[test]
    fn paused_pacer_reveals_nothing() {
        let mut pacer = DisplayPacer::new(150, 60);
        assert_eq!(pacer.tick("hello"), TickOutcome::Idle);
        assert_eq!(pacer.display_state("hello").displayed_text, "");
    }

    #[test]
    fn carries_the_fractional_rate_between_frames() {
        let source = "x".repeat(500);
        let mut pacer = DisplayPacer::new(150, 60);
        pacer.resume();
        let mut lengths = Vec::new();
        for _ in 0..4 {
            pacer.tick(&source);
            lengths.push(pacer.display_state(&source).displayed_text.len());
        }
        // 150 / 60 = 2.5 chars per frame.
        assert_eq!(lengths, vec![2, 5, 7, 10]);
        for _ in 0..56 {
            pacer.tick(&source);
        }
        assert_eq!(pacer.display_state(&source).displayed_text.len(), 150);
    }

    #[test]
    fn reveals_at_least_one_char_per_frame() {
        let mut pacer = DisplayPacer::new(10, 60);
        pacer.resume();
        pacer.tick("abc");
        assert_eq!(pacer.display_state("abc").displayed_text, "a");
    }

    #[test]
    fn every_frame_is_a_prefix_of_the_source() {
        let source = "Research: naïve 市场 analysis ✓ done";
        let mut pacer = DisplayPacer::new(90, 60);
        pacer.resume();
        let frames = run_to_end(&mut pacer, source);
        let mut previous = 0;
        for frame in &frames {
            assert!(source.starts_with(frame.as_str()));
            assert!(frame.len() >= previous);
            previous = frame.len();
        }
        assert_eq!(frames.last().map(String::as_str), Some(source));
    }

    #[test]
    fn retargets_when_the_source_grows() {
        let mut pacer = DisplayPacer::new(600, 60);
        pacer.resume();
        assert_eq!(pacer.tick("abc"), TickOutcome::CaughtUp);
        assert_eq!(pacer.tick("abc"), TickOutcome::Idle);
        let grown = format!("abc{}", "d".repeat(30));
        assert_eq!(pacer.tick(&grown), TickOutcome::Advanced);
        let state = pacer.display_state(&grown);
        assert_eq!(state.displayed_text, "abcdddddddddd");
        assert!(state.is_revealing);
    }

    #[test]
    fn same_trajectory_every_time() {
        let source = "deterministic reveal of a fixed buffer".repeat(3);
        let mut a = DisplayPacer::new(137, 60);
        let mut b = DisplayPacer::new(137, 60);
        a.resume();
        b.resume();
        assert_eq!(run_to_end(&mut a, &source), run_to_end(&mut b, &source));
    }

    #[test]
    fn fast_forward_reports_once() {
        let source = "abcdefghij";
        let mut pacer = DisplayPacer::new(60, 60);
        pacer.resume();
        pacer.tick(source);
        assert!(pacer.fast_forward(source));
        assert!(!pacer.fast_forward(source));
        let state = pacer.display_state(source);
        assert_eq!(state.displayed_text, source);
        assert!(!state.is_revealing);
        assert_eq!(state.reveal_progress, 100.0);
    }

    #[test]
    fn fast_forward_on_a_caught_up_display_is_a_no_op() {
        let mut pacer = DisplayPacer::new(600, 60);
        pacer.resume();
        pacer.tick("ab");
        assert!(!pacer.fast_forward("ab"));
    }

    #[test]
    fn progress_counts_characters() {
        let source = "ééééé";
        let mut pacer = DisplayPacer::new(60, 60);
        pacer.resume();
        pacer.tick(source);
        pacer.tick(source);
        let state = pacer.display_state(source);
        assert_eq!(state.displayed_text, "éé");
        assert_eq!(state.reveal_progress, 40.0);
    }
}
