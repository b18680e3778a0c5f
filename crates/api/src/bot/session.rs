use alloc::{string::String, vec::Vec};
use core::num::NonZeroU64;
use model::{Question, Settings};
use rand::seq::SliceRandom;

/// The settings an exam was started under, frozen for the session's lifetime.
/// Later configuration changes never affect an exam already in flight.
#[derive(Clone, Copy)]
pub struct Snapshot {
    pub cooldown_minutes: i16,
    pub manage_channel: Option<NonZeroU64>,
    pub graduate_role: Option<NonZeroU64>,
}

impl From<Settings> for Snapshot {
    fn from(settings: Settings) -> Self {
        Self {
            cooldown_minutes: settings.cooldown_minutes,
            manage_channel: settings.manage_channel,
            graduate_role: settings.graduate_role,
        }
    }
}

/// Outcome of a single answer event.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    /// Correct answer with more questions remaining.
    Advanced,
    /// Correct answer to the final question.
    Completed,
    /// Wrong answer. The exam ends on the spot.
    Failed {
        /// Text of the question that was missed.
        missed: String,
    },
}

/// One user's in-flight exam attempt.
///
/// The drawn question list is fixed at construction. The index only ever
/// moves forward; once it reaches the question count the session is complete
/// and the only remaining transition is the role claim.
pub struct Session {
    questions: Vec<Question>,
    index: usize,
    correct: usize,
    snapshot: Snapshot,
}

impl Session {
    pub fn new(questions: Vec<Question>, snapshot: Snapshot) -> Self {
        Self { questions, index: 0, correct: 0, snapshot }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Zero-based index of the question currently awaiting an answer.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn current(&self) -> Option<&Question> {
        self.questions.get(self.index)
    }

    pub fn is_completed(&self) -> bool {
        self.index >= self.questions.len()
    }

    /// Consumes one answer event, where `choice` is the stored one-based slot
    /// of the selected option. Completed sessions are left untouched.
    pub fn answer(&mut self, choice: i16) -> Progress {
        let Some(question) = self.questions.get(self.index) else {
            return Progress::Completed;
        };
        if choice != question.raw.answer {
            return Progress::Failed { missed: question.raw.question.clone() };
        }
        self.correct += 1;
        self.index += 1;
        if self.index < self.questions.len() {
            Progress::Advanced
        } else {
            Progress::Completed
        }
    }

    /// Produces a fresh display order for the current question's options as
    /// `(stored slot, text)` pairs. The slot rides along as the select-menu
    /// value, so grading never depends on display order.
    pub fn shuffle_current<R: rand::Rng>(&self, rng: &mut R) -> Option<Vec<(i16, &str)>> {
        let question = self.current()?;
        let mut options: Vec<_> = (1..).zip(question.raw.choices.iter()).map(|(slot, text)| (slot, text.as_str())).collect();
        options.shuffle(rng);
        Some(options)
    }
}

#[cfg(test)]
mod tests {
    use super::{Progress, Session, Snapshot};
    use alloc::{format, string::ToString, vec::Vec};
    use core::num::NonZeroI32;
    use model::{Question, RawQuestion};
    use rand::{rngs::StdRng, SeedableRng};

    fn questions(n: usize) -> Vec<Question> {
        (1..=n)
            .map(|i| Question {
                id: NonZeroI32::new(i as i32).unwrap(),
                raw: RawQuestion {
                    question: format!("Question {i}?"),
                    choices: [
                        format!("{i}-first"),
                        format!("{i}-second"),
                        format!("{i}-third"),
                        format!("{i}-fourth"),
                    ],
                    answer: ((i - 1) % 4 + 1) as i16,
                },
            })
            .collect()
    }

    fn snapshot() -> Snapshot {
        Snapshot { cooldown_minutes: 0, manage_channel: None, graduate_role: None }
    }

    #[test]
    fn all_correct_answers_reach_completion() {
        let drawn = questions(3);
        let answers: Vec<_> = drawn.iter().map(|q| q.raw.answer).collect();
        let mut session = Session::new(drawn, snapshot());

        assert_eq!(session.position(), 0);
        assert_eq!(session.answer(answers[0]), Progress::Advanced);
        assert_eq!(session.position(), 1);
        assert_eq!(session.answer(answers[1]), Progress::Advanced);
        assert_eq!(session.position(), 2);
        assert_eq!(session.answer(answers[2]), Progress::Completed);

        assert!(session.is_completed());
        assert_eq!(session.correct(), 3);
        assert!(session.current().is_none());
    }

    #[test]
    fn first_wrong_answer_fails_at_any_index() {
        for fail_at in 0..5 {
            let drawn = questions(5);
            let mut session = Session::new(drawn.clone(), snapshot());
            for question in drawn.iter().take(fail_at) {
                assert_eq!(session.answer(question.raw.answer), Progress::Advanced);
            }
            let wrong = drawn[fail_at].raw.answer % 4 + 1;
            assert_eq!(
                session.answer(wrong),
                Progress::Failed { missed: format!("Question {}?", fail_at + 1) },
            );
            // A failure never advances the cursor.
            assert_eq!(session.position(), fail_at);
            assert_eq!(session.correct(), fail_at);
            assert!(!session.is_completed());
        }
    }

    #[test]
    fn question_list_is_fixed_once_drawn() {
        let drawn = questions(4);
        let mut session = Session::new(drawn.clone(), snapshot());
        let mut rng = StdRng::seed_from_u64(7);
        for expected in &drawn {
            // Re-rendering shuffles the display but never swaps the question.
            for _ in 0..3 {
                session.shuffle_current(&mut rng).unwrap();
                assert_eq!(session.current().unwrap().id, expected.id);
            }
            session.answer(expected.raw.answer);
        }
        assert!(session.is_completed());
    }

    #[test]
    fn shuffle_is_a_permutation_that_preserves_the_answer() {
        let drawn = questions(1);
        let raw = drawn[0].raw.clone();
        let session = Session::new(drawn, snapshot());
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let shuffled = session.shuffle_current(&mut rng).unwrap();
            assert_eq!(shuffled.len(), 4);

            let mut slots: Vec<_> = shuffled.iter().map(|(slot, _)| *slot).collect();
            slots.sort_unstable();
            assert_eq!(slots, [1, 2, 3, 4]);

            for (slot, text) in &shuffled {
                assert_eq!(*text, raw.choices[(slot - 1) as usize].as_str());
            }
            let (_, correct_text) = shuffled.iter().find(|(slot, _)| *slot == raw.answer).unwrap();
            assert_eq!(correct_text.to_string(), raw.correct_choice().unwrap());
        }
    }

    #[test]
    fn completed_sessions_ignore_further_answers() {
        let drawn = questions(1);
        let answer = drawn[0].raw.answer;
        let mut session = Session::new(drawn, snapshot());
        assert_eq!(session.answer(answer), Progress::Completed);
        assert_eq!(session.answer(answer % 4 + 1), Progress::Completed);
        assert_eq!(session.correct(), 1);
    }
}
