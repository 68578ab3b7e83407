//! Next-word suggestions for a partial utterance.
//!
//! Given what the speaker has said so far, the masked language model is asked
//! for the next word, and then once more per candidate for the word after it.
//! Only purely alphabetic candidates survive: punctuation, digits, subword
//! pieces (`##s`) and special tokens are dropped after truncating to the top
//! `k`, so fewer than `k` words may come back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_properties::{GeneralCategoryGroup, UnicodeGeneralCategory};

use crate::error::Result;
use crate::pipelines::fill_mask::{
    FillMaskModel, FillMaskPipeline, FillMaskPrediction, MASK_TOKEN,
};

/// Number of candidates considered at each level.
pub const DEFAULT_TOP_K: usize = 5;

/// Anything able to rank candidates for a single `[MASK]` in `text`.
pub trait MaskFiller: Send + Sync {
    fn fill_mask(&self, text: &str, k: usize) -> Result<Vec<FillMaskPrediction>>;
}

impl<M> MaskFiller for FillMaskPipeline<M>
where
    M: FillMaskModel + Send + Sync,
{
    fn fill_mask(&self, text: &str, k: usize) -> Result<Vec<FillMaskPrediction>> {
        self.predict_top_k(text, k)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub speech: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSuggestions {
    /// Best next words, most probable first.
    pub top1_words: Vec<String>,
    /// Follow-up words for each entry of `top1_words`.
    pub combinations: BTreeMap<String, Vec<String>>,
}

/// True for non-empty words made only of letters (general category `L*`).
///
/// Letter numbers such as `ⅷ` and combining vowel signs such as `ा` carry the
/// Unicode `Alphabetic` property but are not letters, so they are rejected.
pub fn is_alphabetic_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.general_category_group() == GeneralCategoryGroup::Letter)
}

/// Keeps the alphabetic words among the first `k` predictions, in rank order.
/// A word repeated further down the ranking is dropped.
pub fn alphabetic_words(predictions: Vec<FillMaskPrediction>, k: usize) -> Vec<String> {
    let mut words: Vec<String> = Vec::with_capacity(k);
    for prediction in predictions.into_iter().take(k) {
        if is_alphabetic_word(&prediction.word) && !words.contains(&prediction.word) {
            words.push(prediction.word);
        }
    }
    words
}

fn masked(prefix: &str) -> String {
    format!("{prefix} {MASK_TOKEN}")
}

/// Runs `1 + top1_words.len()` sequential fill-mask queries.
///
/// Any failing query fails the whole call; there are no partial results.
pub fn suggest<F>(filler: &F, speech: &str, k: usize) -> Result<SpeechSuggestions>
where
    F: MaskFiller + ?Sized,
{
    let first = filler.fill_mask(&masked(speech), k)?;
    let top1_words = alphabetic_words(first, k);

    let mut combinations = BTreeMap::new();
    for word in &top1_words {
        let second = filler.fill_mask(&masked(&format!("{speech} {word}")), k)?;
        combinations.insert(word.clone(), alphabetic_words(second, k));
    }

    tracing::debug!(
        speech_len = speech.len(),
        words = top1_words.len(),
        "built suggestions"
    );
    Ok(SpeechSuggestions {
        top1_words,
        combinations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowSpeakError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ScriptedFiller {
        answers: HashMap<String, Vec<&'static str>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFiller {
        fn new(answers: &[(&str, Vec<&'static str>)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(text, words)| (text.to_string(), words.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MaskFiller for ScriptedFiller {
        fn fill_mask(&self, text: &str, k: usize) -> Result<Vec<FillMaskPrediction>> {
            self.calls.lock().unwrap().push(text.to_string());
            let words = self
                .answers
                .get(text)
                .ok_or_else(|| FlowSpeakError::Inference(format!("unexpected query {text:?}")))?;
            Ok(words
                .iter()
                .take(k)
                .enumerate()
                .map(|(rank, word)| FillMaskPrediction {
                    word: word.to_string(),
                    score: 1.0 / (rank as f32 + 2.0),
                })
                .collect())
        }
    }

    fn prediction(word: &str) -> FillMaskPrediction {
        FillMaskPrediction {
            word: word.to_string(),
            score: 0.1,
        }
    }

    #[test]
    fn alphabetic_filter() {
        assert!(is_alphabetic_word("store"));
        assert!(is_alphabetic_word("café"));
        assert!(!is_alphabetic_word(""));
        assert!(!is_alphabetic_word("##s"));
        assert!(!is_alphabetic_word("[SEP]"));
        assert!(!is_alphabetic_word("1990"));
        assert!(!is_alphabetic_word("new york"));
        assert!(!is_alphabetic_word("."));
        assert!(is_alphabetic_word("ǅ"));
        assert!(is_alphabetic_word("ʰ"));
        assert!(is_alphabetic_word("東京"));
    }

    #[test]
    fn letter_numbers_and_vowel_signs_are_not_words() {
        assert!(!is_alphabetic_word("ⅰ"));
        assert!(!is_alphabetic_word("ⅷ"));
        assert!(!is_alphabetic_word("ा"));
        assert!(!is_alphabetic_word("का"));
        let predictions = ["ⅷ", "ा", "store"].into_iter().map(prediction).collect();
        assert_eq!(alphabetic_words(predictions, 5), vec!["store"]);
    }

    #[test]
    fn truncates_before_filtering() {
        let predictions = ["the", ",", "a", ".", "my", "your"]
            .into_iter()
            .map(prediction)
            .collect();
        assert_eq!(alphabetic_words(predictions, 5), vec!["the", "a", "my"]);
    }

    #[test]
    fn duplicates_keep_first_rank() {
        let predictions = ["park", "store", "park"].into_iter().map(prediction).collect();
        assert_eq!(alphabetic_words(predictions, 5), vec!["park", "store"]);
    }

    #[test]
    fn builds_combinations_for_each_word() {
        let filler = ScriptedFiller::new(&[
            ("I went to the [MASK]", vec!["store", "park", ".", "doctor", "##s"]),
            ("I went to the store [MASK]", vec![".", "and", "to", "yesterday", ";"]),
            ("I went to the park [MASK]", vec!["with", "and", "."]),
            ("I went to the doctor [MASK]", vec!["today", "because", "2", "for", "."]),
        ]);

        let suggestions = suggest(&filler, "I went to the", DEFAULT_TOP_K).unwrap();
        assert_eq!(suggestions.top1_words, vec!["store", "park", "doctor"]);
        assert_eq!(suggestions.combinations.len(), 3);
        assert_eq!(
            suggestions.combinations["store"],
            vec!["and", "to", "yesterday"]
        );
        assert_eq!(suggestions.combinations["park"], vec!["with", "and"]);
        assert_eq!(
            suggestions.combinations["doctor"],
            vec!["today", "because", "for"]
        );

        let calls = filler.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], "I went to the [MASK]");
    }

    #[test]
    fn empty_speech_is_a_mask_only_query() {
        let filler = ScriptedFiller::new(&[(" [MASK]", vec![".", ",", "\"", ";", "!"])]);
        let suggestions = suggest(&filler, "", DEFAULT_TOP_K).unwrap();
        assert!(suggestions.top1_words.is_empty());
        assert!(suggestions.combinations.is_empty());
    }

    #[test]
    fn failing_follow_up_aborts_everything() {
        let filler = ScriptedFiller::new(&[("hello [MASK]", vec!["there", "world"])]);
        let err = suggest(&filler, "hello", DEFAULT_TOP_K).unwrap_err();
        assert!(matches!(err, FlowSpeakError::Inference(_)));
    }

    #[test]
    fn request_defaults_to_empty_speech() {
        let request: SpeechRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.speech, "");
        let request: SpeechRequest =
            serde_json::from_str(r#"{"speech": "hi", "lang": "en"}"#).unwrap();
        assert_eq!(request.speech, "hi");
    }

    #[test]
    fn suggestions_serialize_with_wire_names() {
        let mut combinations = BTreeMap::new();
        combinations.insert("store".to_string(), vec!["and".to_string()]);
        let suggestions = SpeechSuggestions {
            top1_words: vec!["store".to_string()],
            combinations,
        };
        assert_eq!(
            serde_json::to_value(&suggestions).unwrap(),
            serde_json::json!({"top1_words": ["store"], "combinations": {"store": ["and"]}})
        );
    }
}
