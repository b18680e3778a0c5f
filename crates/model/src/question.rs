use alloc::string::String;
use core::num::NonZeroI32;
use serde::{Deserialize, Serialize};

/// Acceptable schema for new exam questions.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawQuestion {
    /// Question to be displayed in chat.
    pub question: String,
    /// The four possible answers, in their stored order.
    pub choices: [String; 4],
    /// One-based index of the correct choice.
    pub answer: i16,
}

impl RawQuestion {
    /// Text of the correct choice, if the stored index is in range.
    pub fn correct_choice(&self) -> Option<&str> {
        let index = usize::try_from(self.answer.checked_sub(1)?).ok()?;
        self.choices.get(index).map(String::as_str)
    }
}

/// A question as persisted in the bank.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Question {
    /// Identifier assigned by the database.
    pub id: NonZeroI32,
    pub raw: RawQuestion,
}

#[cfg(test)]
mod tests {
    use super::RawQuestion;
    use alloc::string::ToString;

    fn sample() -> RawQuestion {
        RawQuestion {
            question: "Largest planet?".to_string(),
            choices: ["Mercury".to_string(), "Venus".to_string(), "Jupiter".to_string(), "Mars".to_string()],
            answer: 3,
        }
    }

    #[test]
    fn correct_choice_resolves_one_based_index() {
        assert_eq!(sample().correct_choice(), Some("Jupiter"));
    }

    #[test]
    fn correct_choice_rejects_out_of_range_index() {
        let mut raw = sample();
        raw.answer = 0;
        assert_eq!(raw.correct_choice(), None);
        raw.answer = 5;
        assert_eq!(raw.correct_choice(), None);
    }
}
