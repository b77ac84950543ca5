//! Question selection for section quizzes and mock exam papers.

use crate::exam::SessionMode;
use crate::models::{Difficulty, DifficultyMix, Question, QuestionBank};
use rand::seq::SliceRandom;
use rand::Rng;

pub fn by_section<'a>(questions: &'a [Question], section: &str) -> Vec<&'a Question> {
    questions
        .iter()
        .filter(|q| q.section.as_deref() == Some(section))
        .collect()
}

pub fn by_difficulty(questions: &[Question], difficulty: Difficulty) -> Vec<&Question> {
    questions
        .iter()
        .filter(|q| q.difficulty == Some(difficulty))
        .collect()
}

pub fn by_category<'a>(questions: &'a [Question], category: &str) -> Vec<&'a Question> {
    questions
        .iter()
        .filter(|q| q.category.as_deref() == Some(category))
        .collect()
}

pub fn random_subset<'a, R: Rng + ?Sized>(
    questions: &'a [Question],
    count: usize,
    rng: &mut R,
) -> Vec<&'a Question> {
    let mut pool: Vec<&Question> = questions.iter().collect();
    pool.shuffle(rng);
    pool.truncate(count);
    pool
}

/// Splits `count` into basic/intermediate/advanced targets. Advanced takes
/// whatever rounding leaves over.
fn difficulty_targets(count: usize, mix: &DifficultyMix) -> [(Difficulty, usize); 3] {
    let total = mix.total();
    let share = |w: f64| {
        if total > 0.0 {
            (count as f64 * w / total).round() as usize
        } else {
            0
        }
    };
    let basic = share(mix.basic).min(count);
    let intermediate = share(mix.intermediate).min(count - basic);
    [
        (Difficulty::Basic, basic),
        (Difficulty::Intermediate, intermediate),
        (Difficulty::Advanced, count - basic - intermediate),
    ]
}

fn draw_by_difficulty<'a, R: Rng + ?Sized>(
    pool: &[&'a Question],
    count: usize,
    mix: &DifficultyMix,
    rng: &mut R,
) -> Vec<&'a Question> {
    let mut picked = Vec::with_capacity(count);
    for (difficulty, target) in difficulty_targets(count, mix) {
        let mut tier: Vec<&Question> = pool
            .iter()
            .copied()
            .filter(|q| q.difficulty == Some(difficulty))
            .collect();
        tier.shuffle(rng);
        picked.extend(tier.into_iter().take(target));
    }
    picked
}

fn fill_shortfall<'a, R: Rng + ?Sized>(
    questions: &'a [Question],
    picked: &mut Vec<&'a Question>,
    count: usize,
    rng: &mut R,
) {
    if picked.len() >= count {
        return;
    }
    let mut rest: Vec<&Question> = questions
        .iter()
        .filter(|q| !picked.iter().any(|p| std::ptr::eq(*p, *q)))
        .collect();
    rest.shuffle(rng);
    let needed = count - picked.len();
    picked.extend(rest.into_iter().take(needed));
}

/// Draws a paper weighted by difficulty. Questions without a difficulty only
/// appear through the shortfall fill.
pub fn balanced_by_difficulty<'a, R: Rng + ?Sized>(
    questions: &'a [Question],
    count: usize,
    mix: &DifficultyMix,
    rng: &mut R,
) -> Vec<&'a Question> {
    let pool: Vec<&Question> = questions.iter().collect();
    let mut picked = draw_by_difficulty(&pool, count, mix, rng);
    fill_shortfall(questions, &mut picked, count, rng);
    picked.shuffle(rng);
    picked.truncate(count);
    picked
}

/// Spreads `count` evenly over `categories`, earlier categories taking the
/// remainder, then weights each share by difficulty.
pub fn balanced_by_category<'a, R: Rng + ?Sized>(
    questions: &'a [Question],
    count: usize,
    categories: &[String],
    mix: &DifficultyMix,
    rng: &mut R,
) -> Vec<&'a Question> {
    if categories.is_empty() {
        return balanced_by_difficulty(questions, count, mix, rng);
    }
    let base = count / categories.len();
    let remainder = count % categories.len();
    let mut picked = Vec::with_capacity(count);
    for (index, category) in categories.iter().enumerate() {
        let target = base + usize::from(index < remainder);
        let pool = by_category(questions, category);
        if pool.is_empty() {
            continue;
        }
        picked.extend(draw_by_difficulty(&pool, target, mix, rng));
    }
    fill_shortfall(questions, &mut picked, count, rng);
    picked.shuffle(rng);
    picked.truncate(count);
    picked
}

#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub mode: SessionMode,
    pub question_count: Option<usize>,
    pub section: Option<String>,
}

/// Picks the questions for one session. Practice keeps authored order; exam
/// papers follow the bank's exam configuration.
pub fn select_for_session<R: Rng + ?Sized>(
    bank: &QuestionBank,
    request: &SelectionRequest,
    rng: &mut R,
) -> Vec<Question> {
    let questions = &bank.questions;
    let picked: Vec<&Question> = match request.mode {
        SessionMode::Practice => {
            let mut picked = match &request.section {
                Some(section) => by_section(questions, section),
                None => questions.iter().collect(),
            };
            if let Some(count) = request.question_count {
                picked.truncate(count);
            }
            picked
        }
        SessionMode::Exam => {
            let exam = bank.exam.as_ref();
            let count = request
                .question_count
                .or_else(|| exam.map(|e| e.total_questions))
                .unwrap_or(questions.len());
            let mix = exam.and_then(|e| e.difficulty_mix);
            let has_difficulty = questions.iter().any(|q| q.difficulty.is_some());
            if !bank.categories.is_empty() {
                balanced_by_category(questions, count, &bank.categories, &mix.unwrap_or_default(), rng)
            } else if mix.is_some() || has_difficulty {
                balanced_by_difficulty(questions, count, &mix.unwrap_or_default(), rng)
            } else {
                random_subset(questions, count, rng)
            }
        }
    };
    picked.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::question;
    use crate::models::ExamConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn graded(id: u64, difficulty: Difficulty, category: &str) -> Question {
        let mut q = question(id, &["a", "b", "c", "d"], 0);
        q.difficulty = Some(difficulty);
        q.category = Some(category.to_string());
        q.section = Some(format!("{}", id % 3));
        q
    }

    fn bank() -> Vec<Question> {
        let mut out = Vec::new();
        let mut id = 0;
        for category in ["Safe Isolation", "Fault Finding"] {
            for difficulty in [Difficulty::Basic, Difficulty::Intermediate, Difficulty::Advanced] {
                for _ in 0..6 {
                    id += 1;
                    out.push(graded(id, difficulty, category));
                }
            }
        }
        out
    }

    fn ids(qs: &[&Question]) -> HashSet<String> {
        qs.iter().map(|q| q.id.to_string()).collect()
    }

    #[test]
    fn difficulty_targets_sum_to_count() {
        let mix = DifficultyMix {
            basic: 40.0,
            intermediate: 45.0,
            advanced: 15.0,
        };
        let targets = difficulty_targets(30, &mix);
        assert_eq!(targets[0].1, 12);
        assert_eq!(targets[1].1, 14);
        assert_eq!(targets[2].1, 4);
        let sum: usize = targets.iter().map(|t| t.1).sum();
        assert_eq!(sum, 30);
    }

    #[test]
    fn balanced_difficulty_has_exact_count_without_duplicates() {
        let questions = bank();
        let mut rng = StdRng::seed_from_u64(7);
        let picked = balanced_by_difficulty(&questions, 10, &DifficultyMix::default(), &mut rng);
        assert_eq!(picked.len(), 10);
        assert_eq!(ids(&picked).len(), 10);
        let basic = picked.iter().filter(|q| q.difficulty == Some(Difficulty::Basic)).count();
        assert_eq!(basic, 3);
    }

    #[test]
    fn balanced_category_splits_evenly_and_fills_shortfall() {
        let questions = bank();
        let categories = vec!["Safe Isolation".to_string(), "Fault Finding".to_string()];
        let mut rng = StdRng::seed_from_u64(11);
        let picked = balanced_by_category(&questions, 9, &categories, &DifficultyMix::default(), &mut rng);
        assert_eq!(picked.len(), 9);
        assert_eq!(ids(&picked).len(), 9);
        let isolation = picked
            .iter()
            .filter(|q| q.category.as_deref() == Some("Safe Isolation"))
            .count();
        assert_eq!(isolation, 5);

        let too_many = balanced_by_category(&questions, 40, &categories, &DifficultyMix::default(), &mut rng);
        assert_eq!(too_many.len(), questions.len());
    }

    #[test]
    fn random_subset_is_bounded_and_seeded() {
        let questions = bank();
        let a = random_subset(&questions, 5, &mut StdRng::seed_from_u64(3));
        let b = random_subset(&questions, 5, &mut StdRng::seed_from_u64(3));
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(random_subset(&questions, 100, &mut StdRng::seed_from_u64(3)).len(), 36);
    }

    #[test]
    fn filters() {
        let questions = bank();
        assert_eq!(by_difficulty(&questions, Difficulty::Advanced).len(), 12);
        assert_eq!(by_category(&questions, "Fault Finding").len(), 18);
        assert_eq!(by_section(&questions, "0").len(), 12);
    }

    #[test]
    fn practice_selection_keeps_authored_order() {
        let qb = QuestionBank {
            id: "b".into(),
            title: "B".into(),
            description: None,
            categories: vec![],
            exam: None,
            questions: bank(),
        };
        let request = SelectionRequest {
            mode: SessionMode::Practice,
            question_count: Some(4),
            section: Some("1".into()),
        };
        let picked = select_for_session(&qb, &request, &mut StdRng::seed_from_u64(1));
        let got: Vec<String> = picked.iter().map(|q| q.id.to_string()).collect();
        assert_eq!(got, vec!["1", "4", "7", "10"]);
    }

    #[test]
    fn exam_selection_uses_exam_config() {
        let qb = QuestionBank {
            id: "b".into(),
            title: "B".into(),
            description: None,
            categories: vec!["Safe Isolation".into(), "Fault Finding".into()],
            exam: Some(ExamConfig {
                total_questions: 12,
                time_limit_secs: Some(1800),
                pass_threshold: 80,
                exit_path: None,
                difficulty_mix: None,
            }),
            questions: bank(),
        };
        let request = SelectionRequest {
            mode: SessionMode::Exam,
            ..Default::default()
        };
        let picked = select_for_session(&qb, &request, &mut StdRng::seed_from_u64(5));
        assert_eq!(picked.len(), 12);
    }
}
