//! Per-module scoring rules. Every scorable item is worth one mark.
//!
//! The band thresholds are product decisions and are kept exactly as configured in the
//! grading rubric.

use std::collections::BTreeMap;

use crate::db::models::{Answer, Question, Response, ResponseKey, Test};
use crate::db::types::{ModuleKey, ModuleKind};
use crate::services::similarity::similarity;

/// `(minimum similarity, credit)` pairs for read-aloud and repeat modules.
const VOICE_BANDS: &[(u32, f64)] =
    &[(90, 1.0), (80, 0.8), (70, 0.6), (60, 0.4), (50, 0.2), (30, 0.1)];

/// `(minimum words, credit)` pairs for storytelling.
const STORY_BANDS: &[(u32, f64)] =
    &[(100, 1.0), (80, 0.8), (60, 0.6), (40, 0.4), (20, 0.2), (10, 0.1)];

/// `(minimum similarity, credit)` pairs for spoken comprehension answers.
const COMPREHENSION_BANDS: &[(u32, f64)] =
    &[(85, 1.0), (75, 0.8), (65, 0.6), (55, 0.4), (40, 0.2), (25, 0.1)];

fn banded(value: u32, bands: &[(u32, f64)]) -> f64 {
    bands.iter().find(|(threshold, _)| value >= *threshold).map_or(0.0, |(_, credit)| *credit)
}

/// Mark in `0.0..=1.0` for one answer. Answers of the wrong shape score zero.
pub fn score(
    module: ModuleKey,
    question: &Question,
    sub_index: Option<usize>,
    answer: &Answer,
) -> f64 {
    match (module.kind(), question, answer) {
        (ModuleKind::Mcq, Question::Mcq(q), Answer::Choice { selected_option }) => {
            if *selected_option == q.correct_answer {
                1.0
            } else {
                0.0
            }
        }
        (ModuleKind::Voice, Question::VoicePrompt(q), Answer::Transcript { transcript, .. }) => {
            banded(similarity(&q.text, transcript), VOICE_BANDS)
        }
        (
            ModuleKind::Storytelling,
            Question::StoryPrompt(_),
            Answer::Transcript { word_count, .. },
        ) => {
            let words = u32::try_from(*word_count).unwrap_or(u32::MAX);
            banded(words, STORY_BANDS)
        }
        (
            ModuleKind::Comprehension,
            Question::ComprehensionStory(story),
            Answer::Transcript { transcript, .. },
        ) => {
            let expected = sub_index
                .and_then(|index| story.mcqs.get(index))
                .and_then(|mcq| mcq.correct_answer_text());
            match expected {
                Some(expected) => banded(similarity(expected, transcript), COMPREHENSION_BANDS),
                None => 0.0,
            }
        }
        _ => 0.0,
    }
}

/// Recomputes a module total from the stored responses.
///
/// Scores are derived from the question definitions every time, so repeated calls without
/// new responses return the same value.
pub fn module_total(
    test: &Test,
    module: ModuleKey,
    responses: &BTreeMap<ResponseKey, Response>,
) -> f64 {
    let Some(definition) = test.module(module) else {
        return 0.0;
    };

    let total: f64 = responses
        .iter()
        .filter(|(key, response)| key.module == module && response.submitted)
        .filter_map(|(key, response)| {
            definition
                .questions
                .iter()
                .find(|question| question.id() == key.question_id)
                .map(|question| score(module, question, key.sub_index, &response.answer))
        })
        .sum();
    round_marks(total)
}

pub fn round_marks(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        ComprehensionMcq, ComprehensionStory, McqQuestion, StoryPrompt, VoicePrompt,
    };
    use crate::test_support;
    use time::OffsetDateTime;

    fn mcq() -> Question {
        Question::Mcq(McqQuestion {
            id: "q1".to_string(),
            question: "Pick B".to_string(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: 1,
        })
    }

    fn words(count: usize) -> Answer {
        Answer::transcript(vec!["word"; count].join(" "))
    }

    #[test]
    fn mcq_correct_option_scores_one() {
        let q = mcq();
        let right = Answer::Choice { selected_option: 1 };
        let wrong = Answer::Choice { selected_option: 0 };
        assert_eq!(score(ModuleKey::Aptitude, &q, None, &right), 1.0);
        assert_eq!(score(ModuleKey::GrammarMcq, &q, None, &wrong), 0.0);
    }

    #[test]
    fn voice_exact_transcript_scores_full_band() {
        let q = Question::VoicePrompt(VoicePrompt {
            id: "v1".to_string(),
            text: "The quick brown fox".to_string(),
        });
        let answer = Answer::transcript("the quick brown fox");
        assert_eq!(score(ModuleKey::ReadingSpeaking, &q, None, &answer), 1.0);
        assert_eq!(score(ModuleKey::ReadingSpeaking, &q, None, &Answer::transcript("")), 0.0);
    }

    #[test]
    fn voice_bands_follow_thresholds() {
        assert_eq!(banded(100, VOICE_BANDS), 1.0);
        assert_eq!(banded(89, VOICE_BANDS), 0.8);
        assert_eq!(banded(70, VOICE_BANDS), 0.6);
        assert_eq!(banded(65, VOICE_BANDS), 0.4);
        assert_eq!(banded(50, VOICE_BANDS), 0.2);
        assert_eq!(banded(30, VOICE_BANDS), 0.1);
        assert_eq!(banded(29, VOICE_BANDS), 0.0);
    }

    #[test]
    fn storytelling_uses_word_count_bands() {
        let q = Question::StoryPrompt(StoryPrompt {
            id: "s1".to_string(),
            question: "Describe your town".to_string(),
        });
        assert_eq!(score(ModuleKey::Storytelling, &q, None, &words(45)), 0.4);
        assert_eq!(score(ModuleKey::Storytelling, &q, None, &words(100)), 1.0);
        assert_eq!(score(ModuleKey::Storytelling, &q, None, &words(80)), 0.8);
        assert_eq!(score(ModuleKey::Storytelling, &q, None, &words(19)), 0.1);
        assert_eq!(score(ModuleKey::Storytelling, &q, None, &words(9)), 0.0);
    }

    #[test]
    fn comprehension_compares_against_correct_option_text() {
        let q = Question::ComprehensionStory(ComprehensionStory {
            id: "c1".to_string(),
            story: "Tom went to the market to buy apples.".to_string(),
            mcqs: vec![ComprehensionMcq {
                question: "What did Tom buy?".to_string(),
                options: vec!["Oranges".into(), "Apples".into()],
                correct_answer: 1,
            }],
        });
        let module = ModuleKey::ListeningComprehension;
        assert_eq!(score(module, &q, Some(0), &Answer::transcript("apples")), 1.0);
        assert_eq!(score(module, &q, Some(0), &Answer::transcript("bananas")), 0.0);
        assert_eq!(score(module, &q, Some(3), &Answer::transcript("apples")), 0.0);
        assert_eq!(banded(84, COMPREHENSION_BANDS), 0.8);
        assert_eq!(banded(25, COMPREHENSION_BANDS), 0.1);
        assert_eq!(banded(24, COMPREHENSION_BANDS), 0.0);
    }

    #[test]
    fn mismatched_answer_shape_scores_zero() {
        assert_eq!(score(ModuleKey::Aptitude, &mcq(), None, &Answer::transcript("B")), 0.0);
    }

    #[test]
    fn module_total_is_idempotent() {
        let test = test_support::two_module_test();
        let mut responses = BTreeMap::new();
        responses.insert(
            ResponseKey {
                module: ModuleKey::Aptitude,
                question_id: "apt-1".to_string(),
                sub_index: None,
            },
            Response {
                answer: Answer::Choice { selected_option: 1 },
                score: 1.0,
                submitted: true,
                recorded_at: OffsetDateTime::now_utc(),
            },
        );

        let first = module_total(&test, ModuleKey::Aptitude, &responses);
        let second = module_total(&test, ModuleKey::Aptitude, &responses);
        assert_eq!(first, 1.0);
        assert_eq!(first, second);
        assert_eq!(module_total(&test, ModuleKey::GrammarMcq, &responses), 0.0);
    }
}
