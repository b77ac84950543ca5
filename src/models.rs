use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum QuestionId {
    Number(u64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Number(n) => write!(f, "{n}"),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    #[serde(alias = "question")]
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    pub correct_option_index: usize,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Relative weights used when drawing an exam paper by difficulty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DifficultyMix {
    pub basic: f64,
    pub intermediate: f64,
    pub advanced: f64,
}

impl Default for DifficultyMix {
    fn default() -> Self {
        Self {
            basic: 0.3,
            intermediate: 0.5,
            advanced: 0.2,
        }
    }
}

impl DifficultyMix {
    pub fn total(&self) -> f64 {
        self.basic + self.intermediate + self.advanced
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamConfig {
    pub total_questions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
    pub pass_threshold: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_mix: Option<DifficultyMix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBank {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam: Option<ExamConfig>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

/// Longest exam clock a bank may declare: one week.
pub const MAX_TIME_LIMIT_SECS: u64 = 7 * 24 * 60 * 60;

pub fn validate_bank(bank: &QuestionBank) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if bank.id.trim().is_empty() {
        issues.push(ValidationIssue::new("id", "must not be empty"));
    }
    if bank.title.trim().is_empty() {
        issues.push(ValidationIssue::new("title", "must not be empty"));
    }
    if let Some(d) = &bank.description {
        if d.trim().is_empty() {
            issues.push(ValidationIssue::new("description", "must not be empty when present"));
        }
    }
    if bank.questions.is_empty() {
        issues.push(ValidationIssue::new("questions", "must contain at least one question"));
    }
    if let Some(exam) = &bank.exam {
        if exam.total_questions == 0 {
            issues.push(ValidationIssue::new("exam.totalQuestions", "must be at least 1"));
        }
        if exam
            .time_limit_secs
            .is_some_and(|secs| secs == 0 || secs > MAX_TIME_LIMIT_SECS)
        {
            issues.push(ValidationIssue::new(
                "exam.timeLimitSecs",
                format!("must be between 1 and {MAX_TIME_LIMIT_SECS} seconds"),
            ));
        }
        if exam.pass_threshold > 100 {
            issues.push(ValidationIssue::new("exam.passThreshold", "must be a percentage"));
        }
        if let Some(mix) = &exam.difficulty_mix {
            if mix.basic < 0.0 || mix.intermediate < 0.0 || mix.advanced < 0.0 || mix.total() <= 0.0 {
                issues.push(ValidationIssue::new(
                    "exam.difficultyMix",
                    "weights must be non-negative with a positive sum",
                ));
            }
        }
    }

    let declared: HashSet<&str> = bank.categories.iter().map(String::as_str).collect();
    let mut ids = HashSet::new();
    for (i, q) in bank.questions.iter().enumerate() {
        if let QuestionId::Text(text) = &q.id {
            if text.trim().is_empty() {
                issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must not be empty"));
            }
        }
        if !ids.insert(q.id.clone()) {
            issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must be unique"));
        }
        if q.prompt.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].prompt"), "must not be empty"));
        }
        if q.options.len() < 2 {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].options"),
                "must contain at least 2 options",
            ));
        }
        for (j, opt) in q.options.iter().enumerate() {
            if opt.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].options[{j}]"),
                    "must not be empty",
                ));
            }
        }
        if q.correct_option_index >= q.options.len() {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].correctOptionIndex"),
                "must reference an existing option",
            ));
        }
        if let Some(category) = &q.category {
            if !declared.is_empty() && !declared.contains(category.as_str()) {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].category"),
                    "must be one of the bank categories",
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
