use crate::runner::{Advance, Assessable, Phase, QuizRunner, RunnerError};
use crate::summary::{summarize, Summary};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Section quizzes: one answer before moving on, feedback after each answer.
    #[default]
    Practice,
    /// Mock exams: free navigation, flags, early submit and an optional clock.
    Exam,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ExamStats {
    pub answered: usize,
    pub unanswered: usize,
    pub flagged: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub is_correct: bool,
    pub correct_option_index: usize,
}

#[derive(Debug, Clone)]
pub struct Assessment<Q> {
    runner: QuizRunner<Q>,
    mode: SessionMode,
    flagged: BTreeSet<usize>,
    time_limit: Option<TimeDelta>,
    started_at: Option<DateTime<Utc>>,
}

impl<Q: Assessable> Assessment<Q> {
    pub fn new(runner: QuizRunner<Q>, mode: SessionMode, time_limit_secs: Option<u64>) -> Self {
        let time_limit = match mode {
            SessionMode::Exam => time_limit_secs.map(|s| {
                i64::try_from(s)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .unwrap_or(TimeDelta::MAX)
            }),
            SessionMode::Practice => None,
        };
        Self {
            runner,
            mode,
            flagged: BTreeSet::new(),
            time_limit,
            started_at: None,
        }
    }

    pub fn runner(&self) -> &QuizRunner<Q> {
        &self.runner
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.runner.phase()
    }

    pub fn flagged(&self) -> &BTreeSet<usize> {
        &self.flagged
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), RunnerError> {
        self.runner.start()?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn select_option(&mut self, option: usize) -> Result<(), RunnerError> {
        self.runner.select_option(option)
    }

    /// Practice sessions refuse to move on from an unanswered question.
    pub fn advance(&mut self) -> Result<Advance, RunnerError> {
        if self.mode == SessionMode::Practice
            && self.runner.phase() == Phase::InProgress
            && !self.runner.can_advance()
        {
            return Err(RunnerError::AnswerRequired);
        }
        self.runner.advance()
    }

    pub fn retreat(&mut self) -> Result<usize, RunnerError> {
        self.runner.retreat()
    }

    pub fn jump_to(&mut self, index: usize) -> Result<(), RunnerError> {
        self.require_exam("jumping between questions")?;
        self.runner.jump_to(index)
    }

    /// Flips the flag on the current question and returns the new state.
    pub fn toggle_flag(&mut self) -> Result<bool, RunnerError> {
        self.require_exam("flagging")?;
        self.require_in_progress()?;
        let cursor = self.runner.cursor();
        if self.flagged.remove(&cursor) {
            Ok(false)
        } else {
            self.flagged.insert(cursor);
            Ok(true)
        }
    }

    /// Moves to the flagged question after the current one. From the last
    /// flagged question, or from an unflagged one, goes to the first flag.
    pub fn next_flagged(&mut self) -> Result<Option<usize>, RunnerError> {
        self.require_exam("flag navigation")?;
        self.require_in_progress()?;
        let cursor = self.runner.cursor();
        let target = if self.flagged.contains(&cursor) {
            self.flagged
                .range(cursor + 1..)
                .next()
                .or_else(|| self.flagged.iter().next())
                .copied()
        } else {
            self.flagged.iter().next().copied()
        };
        if let Some(index) = target {
            self.runner.jump_to(index)?;
        }
        Ok(target)
    }

    pub fn submit(&mut self) -> Result<(), RunnerError> {
        self.require_exam("early submission")?;
        self.runner.finish()
    }

    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.runner.restart();
        self.flagged.clear();
        self.started_at = Some(now);
    }

    /// Whole seconds left on the clock, `None` when the session is untimed or
    /// not running.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.runner.phase() != Phase::InProgress {
            return None;
        }
        let (limit, started) = (self.time_limit?, self.started_at?);
        let left = limit.checked_sub(&(now - started)).unwrap_or(limit);
        Some(left.num_seconds().max(0) as u64)
    }

    /// Submits the exam once its time limit has elapsed. Returns true only on
    /// the call that performed the submission.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let (Some(limit), Some(started)) = (self.time_limit, self.started_at) else {
            return false;
        };
        if self.runner.phase() != Phase::InProgress || now - started < limit {
            return false;
        }
        self.runner.finish().is_ok()
    }

    pub fn stats(&self) -> ExamStats {
        let answered = self.runner.answered_count();
        ExamStats {
            answered,
            unanswered: self.runner.len() - answered,
            flagged: self.flagged.len(),
        }
    }

    /// Practice feedback for the current question once it has an answer.
    pub fn feedback(&self) -> Option<Feedback> {
        if self.mode != SessionMode::Practice || self.runner.phase() != Phase::InProgress {
            return None;
        }
        let selected = self.runner.selected()?;
        let current = self.runner.current();
        Some(Feedback {
            is_correct: current.is_correct(Some(selected)),
            correct_option_index: current.correct_option(),
        })
    }

    pub fn summary(&self) -> Result<Summary<'_, Q>, RunnerError> {
        if self.runner.phase() != Phase::ShowingResults {
            return Err(RunnerError::WrongPhase {
                expected: Phase::ShowingResults,
                actual: self.runner.phase(),
            });
        }
        Ok(summarize(self.runner.bank(), self.runner.ledger()))
    }

    fn require_exam(&self, operation: &'static str) -> Result<(), RunnerError> {
        match self.mode {
            SessionMode::Exam => Ok(()),
            SessionMode::Practice => Err(RunnerError::ExamOnly { operation }),
        }
    }

    fn require_in_progress(&self) -> Result<(), RunnerError> {
        match self.runner.phase() {
            Phase::InProgress => Ok(()),
            actual => Err(RunnerError::WrongPhase {
                expected: Phase::InProgress,
                actual,
            }),
        }
    }
}
