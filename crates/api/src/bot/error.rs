use core::fmt::{self, Display};
use core::num::NonZeroU64;

pub enum Error {
    UnsupportedInteraction,
    UnknownUser,
    UnknownChannel,
    UnknownCommandName,
    InvalidParams,
    MissingAdmin,
    NotConfigured,
    ExamChannelUnset,
    ManageChannelUnset,
    ManagerRoleUnset,
    GraduateRoleUnset,
    WrongChannel(NonZeroU64),
    MissingManagerRole(NonZeroU64),
    OnCooldown { minutes: i64, seconds: i64 },
    NotEnoughQuestions { have: i64, need: i16 },
    EmptyBank,
    UnknownQuestion,
    NotYourExam,
    NoActiveExam,
    ExamInProgress,
    Database,
    Fatal,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongChannel(channel) => write!(f, "Please use this command in <#{channel}>."),
            Self::MissingManagerRole(role) => {
                write!(f, "You need the <@&{role}> role to manage the question bank.")
            }
            Self::OnCooldown { minutes, seconds } if *minutes > 0 => {
                write!(f, "The exam is cooling down. Try again in {minutes} min {seconds} s.")
            }
            Self::OnCooldown { seconds, .. } => {
                write!(f, "The exam is cooling down. Try again in {seconds} s.")
            }
            Self::NotEnoughQuestions { have, need } => {
                write!(f, "The question bank only has {have} of the {need} required questions.")
            }
            Self::UnsupportedInteraction => f.write_str("Unsupported interaction."),
            Self::UnknownUser => f.write_str("Unknown user."),
            Self::UnknownChannel => f.write_str("This command must be invoked from a channel."),
            Self::UnknownCommandName => f.write_str("Unknown command name."),
            Self::InvalidParams => f.write_str("Invalid parameter list."),
            Self::MissingAdmin => f.write_str("You need administrator permissions to use this command."),
            Self::NotConfigured => {
                f.write_str("The exam settings have not been initialized. Contact an administrator.")
            }
            Self::ExamChannelUnset => f.write_str("No exam channel has been configured. Use `/set_exam_room` first."),
            Self::ManageChannelUnset => {
                f.write_str("No management channel has been configured. Use `/set_manage_room` first.")
            }
            Self::ManagerRoleUnset => f.write_str("No manager role has been configured. Use `/set_manage_role` first."),
            Self::GraduateRoleUnset => {
                f.write_str("No graduate role has been configured. Use `/set_graduate_role` first.")
            }
            Self::EmptyBank => f.write_str("The question bank is currently empty."),
            Self::UnknownQuestion => f.write_str("Question not found."),
            Self::NotYourExam => f.write_str("This is not your exam."),
            Self::NoActiveExam => f.write_str("You have no exam in progress. It may have already ended."),
            Self::ExamInProgress => f.write_str("Finish the exam before claiming the role."),
            Self::Database => f.write_str("We encountered an unexpected database error on our end."),
            Self::Fatal => f.write_str("Oops! We have encountered an unrecoverable error on our end."),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
