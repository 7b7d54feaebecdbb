//! Response aggregation and readiness gating.
//!
//! Decides what each tool output line means: the tool becoming ready, part
//! of a multi-line response, a complete single-line response, or output
//! nobody asked for. Pure state machine; the engine actor drives it.
//!
//! ```text
//!   WaitingForPrompt ──prompt──► Idle ◄──────────────┐
//!                                 │ begin()          │ prompt / first line
//!                                 ▼                  │ abort()
//!                            Accumulating ───────────┘
//!
//!   any state ──stop()──► Stopped (terminal)
//! ```

/// Where the aggregator is in the response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// A prompt is configured and has not been seen yet.
    WaitingForPrompt,
    /// Ready, with no query in flight.
    Idle,
    /// A query was dispatched; collecting its response.
    Accumulating,
    /// The tool is gone. Terminal.
    Stopped,
}

/// What a single output line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Start-up noise before the prompt, or output after stop.
    Ignored,
    /// The first prompt arrived; the tool now accepts queries.
    Ready,
    /// Appended to the in-flight response; more to come.
    Pending,
    /// The in-flight response is complete. Every line is `\n` terminated.
    Complete(String),
    /// Output arrived while no query was in flight.
    Unsolicited(String),
}

/// Line-by-line response state machine.
#[derive(Debug)]
pub struct Aggregator {
    prompt: Option<String>,
    state: AggregatorState,
    buffer: String,
}

impl Aggregator {
    /// Without a prompt every response is exactly one line and the tool is
    /// ready immediately. With a prompt, readiness waits for the first
    /// prompt line and each response runs until the next one.
    #[must_use]
    pub fn new(prompt: Option<String>) -> Self {
        let state = if prompt.is_some() {
            AggregatorState::WaitingForPrompt
        } else {
            AggregatorState::Idle
        };
        Self {
            prompt,
            state,
            buffer: String::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Whether queries may be accepted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state,
            AggregatorState::Idle | AggregatorState::Accumulating
        )
    }

    /// Mark a query as dispatched. Only valid from `Idle`; returns whether
    /// the transition happened.
    pub fn begin(&mut self) -> bool {
        if self.state != AggregatorState::Idle {
            return false;
        }
        self.buffer.clear();
        self.state = AggregatorState::Accumulating;
        true
    }

    /// Abandon the in-flight response (cancellation) and return to `Idle`.
    ///
    /// Returns the partial output collected so far, if a response was in
    /// flight.
    pub fn abort(&mut self) -> Option<String> {
        if self.state != AggregatorState::Accumulating {
            return None;
        }
        self.state = AggregatorState::Idle;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Enter the terminal state. Returns whether a response was in flight.
    pub fn stop(&mut self) -> bool {
        let was_accumulating = self.state == AggregatorState::Accumulating;
        self.state = AggregatorState::Stopped;
        self.buffer.clear();
        was_accumulating
    }

    /// Interpret one trimmed, non-blank output line.
    pub fn on_line(&mut self, line: &str) -> LineOutcome {
        match self.state {
            AggregatorState::Stopped => LineOutcome::Ignored,
            AggregatorState::WaitingForPrompt => {
                if self.is_prompt(line) {
                    self.state = AggregatorState::Idle;
                    LineOutcome::Ready
                } else {
                    LineOutcome::Ignored
                }
            }
            AggregatorState::Idle => LineOutcome::Unsolicited(line.to_owned()),
            AggregatorState::Accumulating => {
                if self.prompt.is_none() {
                    self.state = AggregatorState::Idle;
                    return LineOutcome::Complete(format!("{line}\n"));
                }
                if self.is_prompt(line) {
                    self.state = AggregatorState::Idle;
                    return LineOutcome::Complete(std::mem::take(&mut self.buffer));
                }
                self.buffer.push_str(line);
                self.buffer.push('\n');
                LineOutcome::Pending
            }
        }
    }

    fn is_prompt(&self, line: &str) -> bool {
        self.prompt.as_deref() == Some(line)
    }
}
