use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::terms::Term;

pub const DISTRACTOR_COUNT: usize = 3;

/// Multiple-choice question derived from a term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub term: String,
    pub correct_answer: String,
    pub options: Vec<String>,
}

/// Builds a shuffled round of at most `max_questions` questions.
///
/// Every question carries its own definition plus three distractors taken from
/// the other terms of the set, padded with placeholders for small sets.
pub fn build_questions<R: Rng + ?Sized>(
    terms: &[Term],
    max_questions: usize,
    rng: &mut R,
) -> Vec<Question> {
    let mut questions: Vec<Question> = terms
        .iter()
        .map(|term| build_question(term, terms, rng))
        .collect();

    questions.shuffle(rng);
    questions.truncate(max_questions);
    questions
}

fn build_question<R: Rng + ?Sized>(term: &Term, all: &[Term], rng: &mut R) -> Question {
    let correct = &term.definition;

    let mut pool: Vec<&str> = Vec::with_capacity(all.len());
    for other in all {
        if other.id == term.id || other.definition == *correct {
            continue;
        }
        if !pool.contains(&other.definition.as_str()) {
            pool.push(&other.definition);
        }
    }
    pool.shuffle(rng);

    let mut options: Vec<String> = pool
        .into_iter()
        .take(DISTRACTOR_COUNT)
        .map(str::to_string)
        .collect();

    let mut filler = 1;
    while options.len() < DISTRACTOR_COUNT {
        let placeholder = format!("Random Wrong Answer {filler}");
        filler += 1;
        // a real definition could collide with the placeholder text
        if placeholder != *correct && !options.contains(&placeholder) {
            options.push(placeholder);
        }
    }

    options.push(correct.clone());
    options.shuffle(rng);

    Question {
        id: term.id,
        term: term.term.clone(),
        correct_answer: correct.clone(),
        options,
    }
}
