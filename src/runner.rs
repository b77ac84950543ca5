//! Linear multi-question quiz runner.
//!
//! A runner owns the answer ledger and the navigation cursor for one pass
//! through an immutable question bank. Banks are shared between sessions
//! through an `Arc<[Q]>`, so constructing a runner never copies questions.

use crate::models::Question;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Anything the runner can score: a fixed option list with one correct entry.
pub trait Assessable {
    fn option_count(&self) -> usize;
    fn correct_option(&self) -> usize;

    /// An unanswered slot never counts, whatever the correct index is.
    fn is_correct(&self, selected: Option<usize>) -> bool {
        selected == Some(self.correct_option())
    }
}

impl Assessable for Question {
    fn option_count(&self) -> usize {
        self.options.len()
    }

    fn correct_option(&self) -> usize {
        self.correct_option_index
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    NotStarted,
    InProgress,
    ShowingResults,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("question bank must contain at least one question")]
    EmptyBank,
    #[error("operation requires phase {expected:?}, session is {actual:?}")]
    WrongPhase { expected: Phase, actual: Phase },
    #[error("option {index} is out of range for a question with {len} options")]
    OptionOutOfRange { index: usize, len: usize },
    #[error("question {index} is out of range for a bank of {len} questions")]
    QuestionOutOfRange { index: usize, len: usize },
    #[error("current question has no recorded answer")]
    AnswerRequired,
    #[error("{operation} is only available in exam mode")]
    ExamOnly { operation: &'static str },
}

/// What a successful `advance` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved(usize),
    Finished,
}

#[derive(Debug, Clone)]
pub struct QuizRunner<Q> {
    bank: Arc<[Q]>,
    ledger: Vec<Option<usize>>,
    cursor: usize,
    phase: Phase,
}

impl<Q: Assessable> QuizRunner<Q> {
    pub fn new(bank: Arc<[Q]>) -> Result<Self, RunnerError> {
        if bank.is_empty() {
            return Err(RunnerError::EmptyBank);
        }
        Ok(Self {
            ledger: vec![None; bank.len()],
            bank,
            cursor: 0,
            phase: Phase::NotStarted,
        })
    }

    pub fn bank(&self) -> &Arc<[Q]> {
        &self.bank
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn ledger(&self) -> &[Option<usize>] {
        &self.ledger
    }

    pub fn len(&self) -> usize {
        self.bank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bank.is_empty()
    }

    pub fn current(&self) -> &Q {
        &self.bank[self.cursor]
    }

    pub fn selected(&self) -> Option<usize> {
        self.ledger[self.cursor]
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 == self.bank.len()
    }

    /// True when the question under the cursor has a recorded answer.
    pub fn can_advance(&self) -> bool {
        self.phase == Phase::InProgress && self.selected().is_some()
    }

    pub fn can_retreat(&self) -> bool {
        self.phase == Phase::InProgress && self.cursor > 0
    }

    pub fn answered_count(&self) -> usize {
        self.ledger.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn start(&mut self) -> Result<(), RunnerError> {
        self.expect_phase(Phase::NotStarted)?;
        self.phase = Phase::InProgress;
        Ok(())
    }

    /// Records `option` for the question under the cursor, replacing any
    /// earlier choice.
    pub fn select_option(&mut self, option: usize) -> Result<(), RunnerError> {
        self.expect_phase(Phase::InProgress)?;
        let len = self.current().option_count();
        if option >= len {
            return Err(RunnerError::OptionOutOfRange { index: option, len });
        }
        self.ledger[self.cursor] = Some(option);
        Ok(())
    }

    /// Moves forward one question, or finishes the quiz from the last one.
    /// The answer guard is the caller's concern.
    pub fn advance(&mut self) -> Result<Advance, RunnerError> {
        self.expect_phase(Phase::InProgress)?;
        if self.is_last() {
            self.phase = Phase::ShowingResults;
            Ok(Advance::Finished)
        } else {
            self.cursor += 1;
            Ok(Advance::Moved(self.cursor))
        }
    }

    /// Moves back one question; a no-op at the first question.
    pub fn retreat(&mut self) -> Result<usize, RunnerError> {
        self.expect_phase(Phase::InProgress)?;
        self.cursor = self.cursor.saturating_sub(1);
        Ok(self.cursor)
    }

    pub fn jump_to(&mut self, index: usize) -> Result<(), RunnerError> {
        self.expect_phase(Phase::InProgress)?;
        if index >= self.bank.len() {
            return Err(RunnerError::QuestionOutOfRange {
                index,
                len: self.bank.len(),
            });
        }
        self.cursor = index;
        Ok(())
    }

    /// Clears every answer and begins again from the first question.
    pub fn restart(&mut self) {
        self.ledger.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        self.phase = Phase::InProgress;
    }

    /// Ends the pass from any cursor position. Exam submit and timer only.
    pub(crate) fn finish(&mut self) -> Result<(), RunnerError> {
        self.expect_phase(Phase::InProgress)?;
        self.phase = Phase::ShowingResults;
        Ok(())
    }

    fn expect_phase(&self, expected: Phase) -> Result<(), RunnerError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RunnerError::WrongPhase {
                expected,
                actual: self.phase,
            })
        }
    }
}
