use core::num::NonZeroU64;
use serde::{Deserialize, Serialize};

/// The singleton per-deployment configuration row.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    /// How many questions one exam draws.
    pub question_amount: i16,
    /// Minutes before a user may retake the exam. Zero disables cooldowns.
    pub cooldown_minutes: i16,
    /// Channel in which the exam command must be invoked.
    pub exam_channel: Option<NonZeroU64>,
    /// Channel for question management and failure announcements.
    pub manage_channel: Option<NonZeroU64>,
    /// Role allowed to manage the question bank.
    pub manager_role: Option<NonZeroU64>,
    /// Role granted upon passing the exam.
    pub graduate_role: Option<NonZeroU64>,
}
