use crate::models::{AnswerMap, Quiz};

/// Number of recorded answers matching their question's correct option.
///
/// Pure function of the quiz and the answer map, so recomputation is
/// idempotent. Answers to questions the quiz does not contain score nothing.
pub fn score_answers(quiz: &Quiz, answers: &AnswerMap) -> u32 {
    answers
        .iter()
        .filter(|(question_id, selected)| {
            quiz.question(question_id)
                .is_some_and(|question| question.is_correct(**selected))
        })
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptionIndex, Question, QuestionId};

    fn question(id: &str, correct: i64) -> Question {
        Question {
            id: QuestionId::from(id),
            text: format!("question {id}"),
            options: ["a".into(), "b".into(), "c".into(), "d".into()],
            correct_option_index: OptionIndex::try_from(correct).unwrap(),
            category: String::new(),
            subcategory: None,
        }
    }

    fn quiz() -> Quiz {
        Quiz {
            id: "quiz-1".into(),
            title: "Diagnostic".into(),
            questions: vec![question("q1", 0), question("q2", 1), question("q3", 3)],
        }
    }

    fn answer(map: &mut AnswerMap, id: &str, index: i64) {
        map.insert(QuestionId::from(id), OptionIndex::try_from(index).unwrap());
    }

    #[test]
    fn counts_only_correct_answers() {
        let mut answers = AnswerMap::new();
        answer(&mut answers, "q1", 0);
        answer(&mut answers, "q2", 2);
        answer(&mut answers, "q3", 3);

        assert_eq!(score_answers(&quiz(), &answers), 2);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let quiz = quiz();
        let mut answers = AnswerMap::new();
        answer(&mut answers, "q2", 1);

        let first = score_answers(&quiz, &answers);
        let second = score_answers(&quiz, &answers);
        assert_eq!(first, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_answers_score_zero() {
        assert_eq!(score_answers(&quiz(), &AnswerMap::new()), 0);
    }
}
