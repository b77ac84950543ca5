use crate::runner::Assessable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Correct,
    Incorrect,
    Unanswered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFilter {
    #[default]
    All,
    Correct,
    Incorrect,
    Unanswered,
    Flagged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome<'a, Q> {
    pub position: usize,
    pub question: &'a Q,
    pub selected_option: Option<usize>,
    pub is_correct: bool,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary<'a, Q> {
    pub score: usize,
    pub total: usize,
    pub percentage: u32,
    pub per_question: Vec<QuestionOutcome<'a, Q>>,
}

/// Scores `ledger` against `bank`. Both come from the same runner, so their
/// lengths always match.
pub fn summarize<'a, Q: Assessable>(bank: &'a [Q], ledger: &[Option<usize>]) -> Summary<'a, Q> {
    debug_assert_eq!(bank.len(), ledger.len(), "ledger must mirror the question bank");
    let per_question: Vec<_> = bank
        .iter()
        .zip(ledger)
        .enumerate()
        .map(|(position, (question, &selected))| {
            let is_correct = question.is_correct(selected);
            let status = match selected {
                None => QuestionStatus::Unanswered,
                Some(_) if is_correct => QuestionStatus::Correct,
                Some(_) => QuestionStatus::Incorrect,
            };
            QuestionOutcome {
                position,
                question,
                selected_option: selected,
                is_correct,
                status,
            }
        })
        .collect();
    let score = per_question.iter().filter(|o| o.is_correct).count();
    let total = bank.len();
    Summary {
        score,
        total,
        percentage: percentage(score, total),
        per_question,
    }
}

pub fn percentage(score: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        (score as f64 * 100.0 / total as f64).round() as u32
    }
}

impl<'a, Q> Summary<'a, Q> {
    pub fn passed(&self, threshold: u8) -> bool {
        self.percentage >= u32::from(threshold)
    }

    pub fn filtered(&self, filter: ReviewFilter, flagged: &BTreeSet<usize>) -> Vec<&QuestionOutcome<'a, Q>> {
        self.per_question
            .iter()
            .filter(|o| match filter {
                ReviewFilter::All => true,
                ReviewFilter::Correct => o.status == QuestionStatus::Correct,
                ReviewFilter::Incorrect => o.status == QuestionStatus::Incorrect,
                ReviewFilter::Unanswered => o.status == QuestionStatus::Unanswered,
                ReviewFilter::Flagged => flagged.contains(&o.position),
            })
            .collect()
    }
}
