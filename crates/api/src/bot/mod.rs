mod error;
mod session;

use alloc::{
    format,
    string::{String, ToString},
    vec,
    vec::Vec,
};
use core::num::{NonZeroI32, NonZeroU64};
use dashmap::DashMap;
use db::Database;
use model::{RawQuestion, Settings};
use session::{Progress, Session, Snapshot};
use twilight_model::{
    application::interaction::{
        application_command::{CommandData, CommandDataOption, CommandOptionValue},
        message_component::MessageComponentInteractionData,
        Interaction, InteractionData, InteractionType,
    },
    channel::message::{
        component::{ActionRow, Button, ButtonStyle, ComponentType, SelectMenu, SelectMenuOption},
        Component, Embed, MessageFlags,
    },
    guild::Permissions,
    http::interaction::{InteractionResponse, InteractionResponseData, InteractionResponseType},
    id::{
        marker::{ChannelMarker, GuildMarker, RoleMarker, UserMarker},
        Id,
    },
    user::User,
};

type UserId = Id<UserMarker>;

/// Active exam attempts keyed by their owning user.
type Registry = DashMap<UserId, Session>;

pub struct Bot {
    client: twilight_http::Client,
    db: Database,
    exams: Registry,
}

fn reply_ephemeral(text: String) -> InteractionResponse {
    InteractionResponse {
        kind: InteractionResponseType::ChannelMessageWithSource,
        data: Some(InteractionResponseData {
            content: Some(text),
            flags: Some(MessageFlags::EPHEMERAL),
            ..Default::default()
        }),
    }
}

fn update_message(data: InteractionResponseData) -> InteractionResponse {
    InteractionResponse { kind: InteractionResponseType::UpdateMessage, data: Some(data) }
}

fn terminal_message(content: String) -> InteractionResponse {
    update_message(InteractionResponseData {
        content: Some(content),
        embeds: Some(Vec::new()),
        components: Some(Vec::new()),
        ..Default::default()
    })
}

fn ensure_admin(permissions: Option<Permissions>) -> error::Result<()> {
    if permissions.is_some_and(|p| p.contains(Permissions::ADMINISTRATOR)) {
        Ok(())
    } else {
        Err(error::Error::MissingAdmin)
    }
}

fn channel_option(options: &[CommandDataOption], name: &str) -> error::Result<NonZeroU64> {
    let [CommandDataOption { name: arg, value: CommandOptionValue::Channel(channel) }] = options else {
        return Err(error::Error::InvalidParams);
    };
    if arg.as_str() != name {
        return Err(error::Error::UnknownCommandName);
    }
    Ok(channel.into_nonzero())
}

fn role_option(options: &[CommandDataOption], name: &str) -> error::Result<NonZeroU64> {
    let [CommandDataOption { name: arg, value: CommandOptionValue::Role(role) }] = options else {
        return Err(error::Error::InvalidParams);
    };
    if arg.as_str() != name {
        return Err(error::Error::UnknownCommandName);
    }
    Ok(role.into_nonzero())
}

fn integer_option(options: &[CommandDataOption], name: &str) -> error::Result<i64> {
    let [CommandDataOption { name: arg, value: CommandOptionValue::Integer(value) }] = options else {
        return Err(error::Error::InvalidParams);
    };
    if arg.as_str() != name {
        return Err(error::Error::UnknownCommandName);
    }
    Ok(*value)
}

/// Resolves a component custom id of the form `kind:owner` and checks that
/// the submitting user is the owner. Only the owning user may drive a
/// session; everyone else is turned away before any state is touched.
fn component_event(actor: UserId, custom_id: &str) -> error::Result<(&str, UserId)> {
    let (kind, owner) = custom_id.split_once(':').ok_or(error::Error::Fatal)?;
    let owner: NonZeroU64 = owner.parse().map_err(|_| error::Error::Fatal)?;
    let owner = Id::from(owner);
    if actor == owner {
        Ok((kind, owner))
    } else {
        Err(error::Error::NotYourExam)
    }
}

fn is_permission_error(err: &twilight_http::Error) -> bool {
    matches!(err.kind(), twilight_http::error::ErrorType::Response { status, .. } if status.get() == 403)
}

/// Renders the session's current question with a fresh option shuffle.
fn render_question(user: UserId, session: &Session) -> Option<(Embed, Vec<Component>)> {
    let question = session.current()?;
    let mut rng = rand::thread_rng();
    let options = session.shuffle_current(&mut rng)?;

    let embed = Embed {
        author: None,
        color: Some(0x2ECC71),
        description: Some(question.raw.question.clone()),
        fields: Vec::new(),
        footer: None,
        image: None,
        kind: String::from("rich"),
        provider: None,
        thumbnail: None,
        timestamp: None,
        title: Some(format!("Question {} / {}", session.position() + 1, session.len())),
        url: None,
        video: None,
    };

    let options = options
        .into_iter()
        .map(|(slot, text)| SelectMenuOption {
            default: false,
            description: None,
            emoji: None,
            // Discord caps select labels at 100 characters.
            label: text.chars().take(100).collect(),
            value: slot.to_string(),
        })
        .collect();
    let components = vec![Component::ActionRow(ActionRow {
        components: vec![Component::SelectMenu(SelectMenu {
            custom_id: format!("exam:{user}"),
            disabled: false,
            max_values: Some(1),
            min_values: Some(1),
            options,
            placeholder: Some(String::from("Your answer")),
        })],
    })];
    Some((embed, components))
}

fn render_completed(user: UserId, total: usize) -> (Embed, Vec<Component>) {
    let embed = Embed {
        author: None,
        color: Some(0xF1C40F),
        description: Some(format!("All {total} answers correct. Claim your role below.")),
        fields: Vec::new(),
        footer: None,
        image: None,
        kind: String::from("rich"),
        provider: None,
        thumbnail: None,
        timestamp: None,
        title: Some(String::from("Exam complete")),
        url: None,
        video: None,
    };
    let components = vec![Component::ActionRow(ActionRow {
        components: vec![Component::Button(Button {
            custom_id: Some(format!("claim:{user}")),
            disabled: false,
            emoji: None,
            label: Some(String::from("Claim role")),
            style: ButtonStyle::Success,
            url: None,
        })],
    })];
    (embed, components)
}

impl Bot {
    pub fn new(db: Database, token: String) -> Self {
        Self { client: twilight_http::Client::new(token), db, exams: Registry::new() }
    }

    pub async fn on_message(&self, interaction: Interaction) -> InteractionResponse {
        let result = match interaction.kind {
            InteractionType::Ping => Ok(InteractionResponse { kind: InteractionResponseType::Pong, data: None }),
            InteractionType::ApplicationCommand => self.on_app_command(interaction).await,
            InteractionType::MessageComponent => self.on_msg_component(interaction).await,
            _ => Err(error::Error::UnsupportedInteraction),
        };

        match result {
            Ok(res) => res,
            Err(err) => reply_ephemeral(err.to_string()),
        }
    }

    async fn on_app_command(&self, interaction: Interaction) -> error::Result<InteractionResponse> {
        let channel = interaction.channel.as_ref().map(|channel| channel.id);
        let (permissions, roles, member_user) = match interaction.member {
            Some(member) => (member.permissions, member.roles, member.user),
            None => (None, Vec::new(), None),
        };
        let user = member_user.xor(interaction.user).ok_or(error::Error::UnknownUser)?;
        let data = interaction.data.ok_or(error::Error::Fatal)?;
        let InteractionData::ApplicationCommand(data) = data else {
            return Err(error::Error::Fatal);
        };

        let CommandData { name, options, .. } = *data;
        let channel = channel.ok_or(error::Error::UnknownChannel)?;

        match name.as_str() {
            "set_exam_room" => {
                ensure_admin(permissions)?;
                let target = channel_option(&options, "channel")?;
                self.apply_setting(self.db.set_exam_channel(target).await)?;
                Ok(reply_ephemeral(format!("The exam channel is now <#{target}>.")))
            }
            "set_manage_room" => {
                ensure_admin(permissions)?;
                let target = channel_option(&options, "channel")?;
                self.apply_setting(self.db.set_manage_channel(target).await)?;
                Ok(reply_ephemeral(format!("The question management channel is now <#{target}>.")))
            }
            "set_manage_role" => {
                ensure_admin(permissions)?;
                let target = role_option(&options, "role")?;
                self.apply_setting(self.db.set_manager_role(target).await)?;
                Ok(reply_ephemeral(format!("The examiner role is now <@&{target}>.")))
            }
            "set_graduate_role" => {
                ensure_admin(permissions)?;
                let target = role_option(&options, "role")?;
                self.apply_setting(self.db.set_graduate_role(target).await)?;
                Ok(reply_ephemeral(format!("The graduate role is now <@&{target}>.")))
            }
            "set_exam_amount" => {
                ensure_admin(permissions)?;
                let amount = integer_option(&options, "amount")?;
                let amount = i16::try_from(amount).map_err(|_| error::Error::InvalidParams)?;
                self.apply_setting(self.db.set_question_amount(amount).await)?;
                Ok(reply_ephemeral(format!("Exams will now draw {amount} questions.")))
            }
            "set_exam_cooldown" => {
                ensure_admin(permissions)?;
                let minutes = integer_option(&options, "minutes")?;
                let minutes = i16::try_from(minutes).map_err(|_| error::Error::InvalidParams)?;
                self.apply_setting(self.db.set_cooldown_minutes(minutes).await)?;
                Ok(reply_ephemeral(format!("The failure cooldown is now {minutes} minutes. Zero disables it.")))
            }
            "add_question" => self.on_add_question(channel, permissions, &roles, &options).await,
            "delete_question" => self.on_delete_question(channel, permissions, &roles, &options).await,
            "list_questions" => self.on_list_questions(channel, permissions, &roles).await,
            "reset_questions" => {
                self.ensure_manager_access(channel, permissions, &roles).await?;
                self.db.reset_questions().await.map_err(|_| error::Error::Database)?;
                Ok(reply_ephemeral(String::from("The question bank has been reset.")))
            }
            "exam" => self.on_exam_command(user.id, channel).await,
            _ => Err(error::Error::UnknownCommandName),
        }
    }

    fn apply_setting(&self, result: db::error::Result<()>) -> error::Result<()> {
        result.map_err(|err| match err {
            db::error::Error::BadInput => error::Error::InvalidParams,
            db::error::Error::NotFound => error::Error::NotConfigured,
            db::error::Error::Fatal => error::Error::Database,
        })
    }

    /// Question management requires the configured manage channel and either
    /// the manager role or administrator permissions.
    async fn ensure_manager_access(
        &self,
        channel: Id<ChannelMarker>,
        permissions: Option<Permissions>,
        roles: &[Id<RoleMarker>],
    ) -> error::Result<Settings> {
        let settings = match self.db.get_settings().await {
            Ok(settings) => settings,
            Err(db::error::Error::NotFound) => return Err(error::Error::NotConfigured),
            Err(_) => return Err(error::Error::Database),
        };

        let manage = settings.manage_channel.ok_or(error::Error::ManageChannelUnset)?;
        if channel.into_nonzero() != manage {
            return Err(error::Error::WrongChannel(manage));
        }

        let manager = settings.manager_role.ok_or(error::Error::ManagerRoleUnset)?;
        let has_role = roles.iter().any(|role| role.into_nonzero() == manager);
        let is_admin = permissions.is_some_and(|p| p.contains(Permissions::ADMINISTRATOR));
        if has_role || is_admin {
            Ok(settings)
        } else {
            Err(error::Error::MissingManagerRole(manager))
        }
    }

    async fn on_add_question(
        &self,
        channel: Id<ChannelMarker>,
        permissions: Option<Permissions>,
        roles: &[Id<RoleMarker>],
        options: &[CommandDataOption],
    ) -> error::Result<InteractionResponse> {
        self.ensure_manager_access(channel, permissions, roles).await?;

        let [
            CommandDataOption { name: question_arg, value: CommandOptionValue::String(question) },
            CommandDataOption { name: first_arg, value: CommandOptionValue::String(first) },
            CommandDataOption { name: second_arg, value: CommandOptionValue::String(second) },
            CommandDataOption { name: third_arg, value: CommandOptionValue::String(third) },
            CommandDataOption { name: fourth_arg, value: CommandOptionValue::String(fourth) },
            CommandDataOption { name: answer_arg, value: CommandOptionValue::Integer(answer) },
        ] = options else {
            return Err(error::Error::InvalidParams);
        };

        if question_arg.as_str() != "question"
            || first_arg.as_str() != "option1"
            || second_arg.as_str() != "option2"
            || third_arg.as_str() != "option3"
            || fourth_arg.as_str() != "option4"
            || answer_arg.as_str() != "answer"
        {
            return Err(error::Error::UnknownCommandName);
        }

        let answer = i16::try_from(*answer).map_err(|_| error::Error::InvalidParams)?;
        if !(1..=4).contains(&answer) {
            return Err(error::Error::InvalidParams);
        }

        let raw = RawQuestion {
            question: question.clone(),
            choices: [first.clone(), second.clone(), third.clone(), fourth.clone()],
            answer,
        };
        let qid = match self.db.add_question(&raw).await {
            Ok(id) => id,
            Err(db::error::Error::BadInput) => return Err(error::Error::InvalidParams),
            Err(_) => return Err(error::Error::Database),
        };
        Ok(reply_ephemeral(format!("Added question `{qid}`: {question}")))
    }

    async fn on_delete_question(
        &self,
        channel: Id<ChannelMarker>,
        permissions: Option<Permissions>,
        roles: &[Id<RoleMarker>],
        options: &[CommandDataOption],
    ) -> error::Result<InteractionResponse> {
        self.ensure_manager_access(channel, permissions, roles).await?;

        let qid = integer_option(options, "id")?;
        let qid = i32::try_from(qid).map_err(|_| error::Error::UnknownQuestion)?;
        let qid = NonZeroI32::new(qid).ok_or(error::Error::UnknownQuestion)?;
        match self.db.delete_question(qid).await {
            Ok(text) => Ok(reply_ephemeral(format!("Deleted question `{qid}`: {text}"))),
            Err(db::error::Error::NotFound) => Err(error::Error::UnknownQuestion),
            Err(_) => Err(error::Error::Database),
        }
    }

    async fn on_list_questions(
        &self,
        channel: Id<ChannelMarker>,
        permissions: Option<Permissions>,
        roles: &[Id<RoleMarker>],
    ) -> error::Result<InteractionResponse> {
        self.ensure_manager_access(channel, permissions, roles).await?;

        use db::TryStreamExt;
        let entries: Vec<_> = self
            .db
            .list_questions()
            .await
            .map_err(|_| error::Error::Database)?
            .map_ok(|question| (question.id, question.raw.question))
            .try_collect()
            .await
            .map_err(|_| error::Error::Database)?;
        if entries.is_empty() {
            return Err(error::Error::EmptyBank);
        }

        // Embed descriptions cap out at 4096 characters.
        let mut description = String::new();
        for (id, question) in entries {
            let line = format!("**ID {id}** - {question}\n");
            if description.len() + line.len() > 4000 {
                description.push_str("... (only part of the bank is shown)");
                break;
            }
            description.push_str(&line);
        }

        let embed = Embed {
            author: None,
            color: Some(0x236EA5),
            description: Some(description),
            fields: Vec::new(),
            footer: None,
            image: None,
            kind: String::from("rich"),
            provider: None,
            thumbnail: None,
            timestamp: None,
            title: Some(String::from("Question Bank")),
            url: None,
            video: None,
        };
        Ok(InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                embeds: Some(vec![embed]),
                flags: Some(MessageFlags::EPHEMERAL),
                ..Default::default()
            }),
        })
    }

    async fn on_exam_command(&self, user: UserId, channel: Id<ChannelMarker>) -> error::Result<InteractionResponse> {
        let settings = match self.db.get_settings().await {
            Ok(settings) => settings,
            Err(db::error::Error::NotFound) => return Err(error::Error::NotConfigured),
            Err(_) => return Err(error::Error::Database),
        };
        let exam_channel = settings.exam_channel.ok_or(error::Error::ExamChannelUnset)?;
        if settings.graduate_role.is_none() {
            return Err(error::Error::GraduateRoleUnset);
        }
        if channel.into_nonzero() != exam_channel {
            return Err(error::Error::WrongChannel(exam_channel));
        }

        let uid = user.into_nonzero();
        if settings.cooldown_minutes > 0 {
            if let Some((_, remaining)) = self.db.get_cooldown(uid).await.map_err(|_| error::Error::Database)? {
                if remaining > db::COOLDOWN_GRACE_SECS {
                    return Err(error::Error::OnCooldown { minutes: remaining / 60, seconds: remaining % 60 });
                }
            }
        }

        let need = settings.question_amount;
        let have = self.db.count_questions().await.map_err(|_| error::Error::Database)?;
        if have == 0 {
            return Err(error::Error::EmptyBank);
        }
        if have < i64::from(need) {
            return Err(error::Error::NotEnoughQuestions { have, need });
        }

        // Starting is what arms the cooldown, so walking away from an exam
        // still counts as an attempt.
        if settings.cooldown_minutes > 0 {
            self.db.set_cooldown(uid, settings.cooldown_minutes).await.map_err(|_| error::Error::Database)?;
        }

        let questions = self.db.draw_questions(need).await.map_err(|_| error::Error::Database)?;
        let total = questions.len();
        let session = Session::new(questions, Snapshot::from(settings));
        let (embed, components) = render_question(user, &session).ok_or(error::Error::Fatal)?;
        // A restart simply replaces any stale attempt.
        self.exams.insert(user, session);

        Ok(InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                content: Some(format!("The exam has begun! {total} questions, one wrong answer ends it.")),
                embeds: Some(vec![embed]),
                components: Some(components),
                flags: Some(MessageFlags::EPHEMERAL),
                ..Default::default()
            }),
        })
    }

    async fn on_msg_component(&self, interaction: Interaction) -> error::Result<InteractionResponse> {
        let User { id: actor, .. } =
            interaction.member.and_then(|member| member.user).xor(interaction.user).ok_or(error::Error::UnknownUser)?;
        let guild = interaction.guild_id;
        let data = interaction.data.ok_or(error::Error::Fatal)?;
        let InteractionData::MessageComponent(MessageComponentInteractionData {
            component_type,
            custom_id,
            mut values,
            ..
        }) = data
        else {
            return Err(error::Error::Fatal);
        };

        let (kind, owner) = component_event(actor, &custom_id)?;

        match (kind, component_type) {
            ("exam", ComponentType::SelectMenu) => {
                let choice =
                    values.pop().ok_or(error::Error::Fatal)?.parse().map_err(|_| error::Error::InvalidParams)?;
                self.on_answer(owner, choice).await
            }
            ("claim", ComponentType::Button) => self.on_claim(owner, guild).await,
            _ => Err(error::Error::UnsupportedInteraction),
        }
    }

    async fn on_answer(&self, owner: UserId, choice: i16) -> error::Result<InteractionResponse> {
        // The registry guard must not be held across an await.
        let progress = {
            let mut session = self.exams.get_mut(&owner).ok_or(error::Error::NoActiveExam)?;
            session.answer(choice)
        };

        match progress {
            Progress::Advanced => {
                let session = self.exams.get(&owner).ok_or(error::Error::Fatal)?;
                let (embed, components) = render_question(owner, &session).ok_or(error::Error::Fatal)?;
                Ok(update_message(InteractionResponseData {
                    content: Some(String::new()),
                    embeds: Some(vec![embed]),
                    components: Some(components),
                    ..Default::default()
                }))
            }
            Progress::Completed => {
                let total = self.exams.get(&owner).ok_or(error::Error::Fatal)?.correct();
                let (embed, components) = render_completed(owner, total);
                Ok(update_message(InteractionResponseData {
                    content: Some(String::new()),
                    embeds: Some(vec![embed]),
                    components: Some(components),
                    ..Default::default()
                }))
            }
            Progress::Failed { missed } => {
                let (_, session) = self.exams.remove(&owner).ok_or(error::Error::Fatal)?;
                let snapshot = session.snapshot();
                drop(session);

                let mut until = None;
                if snapshot.cooldown_minutes > 0 {
                    match self.db.set_cooldown(owner.into_nonzero(), snapshot.cooldown_minutes).await {
                        Ok(expiry) => until = Some(expiry),
                        Err(err) => log::error!("failed to record the failure cooldown: {err:?}"),
                    }
                }
                if let Some(channel) = snapshot.manage_channel {
                    self.announce_failure(channel, owner, &missed, until).await;
                }

                Ok(terminal_message(String::from("Wrong answer! The exam is over.")))
            }
        }
    }

    async fn on_claim(&self, owner: UserId, guild: Option<Id<GuildMarker>>) -> error::Result<InteractionResponse> {
        {
            let session = self.exams.get(&owner).ok_or(error::Error::NoActiveExam)?;
            if !session.is_completed() {
                return Err(error::Error::ExamInProgress);
            }
        }
        let (_, session) = self.exams.remove(&owner).ok_or(error::Error::NoActiveExam)?;
        let snapshot = session.snapshot();
        drop(session);

        let Some(role) = snapshot.graduate_role else {
            return Ok(terminal_message(String::from(
                "You passed, but no graduate role is configured. Contact an administrator.",
            )));
        };
        let guild = guild.ok_or(error::Error::Fatal)?;
        let role = Id::from(role);

        // Exactly one grant attempt; every outcome is terminal.
        let content = match self.client.add_guild_member_role(guild, owner, role).await {
            Ok(_) => format!("Congratulations! You now have the <@&{role}> role."),
            Err(err) if is_permission_error(&err) => {
                String::from("You passed, but we lack permission to grant the role. Contact an administrator.")
            }
            Err(err) => {
                log::error!("failed to grant the graduate role: {err}");
                format!("You passed, but the <@&{role}> role could not be granted.")
            }
        };
        Ok(terminal_message(content))
    }

    async fn announce_failure(&self, channel: NonZeroU64, user: UserId, missed: &str, until: Option<i64>) {
        let mut content = format!("Exam failure notice.\nMember: <@{user}>\nMissed question: **{missed}**");
        if let Some(until) = until {
            content.push_str(&format!("\nRetake available at <t:{until}:t>."));
        }

        let request = match self.client.create_message(Id::from(channel)).content(&content) {
            Ok(request) => request,
            Err(err) => {
                log::error!("invalid failure notice: {err}");
                return;
            }
        };
        if let Err(err) = request.await {
            log::error!("failed to deliver the failure notice: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{component_event, error, Id, Registry, Session, Snapshot, UserId};
    use alloc::{format, string::String};
    use core::num::NonZeroI32;
    use model::{Question, RawQuestion};

    fn session() -> Session {
        let question = Question {
            id: NonZeroI32::new(1).unwrap(),
            raw: RawQuestion {
                question: String::from("Largest planet?"),
                choices: [
                    String::from("Mercury"),
                    String::from("Venus"),
                    String::from("Jupiter"),
                    String::from("Mars"),
                ],
                answer: 3,
            },
        };
        Session::new(alloc::vec![question], Snapshot { cooldown_minutes: 0, manage_channel: None, graduate_role: None })
    }

    #[test]
    fn component_events_resolve_their_owner() {
        let owner: UserId = Id::new(7);
        let custom_id = format!("exam:{owner}");
        let Ok((kind, parsed)) = component_event(owner, &custom_id) else {
            panic!("the owner must be allowed through");
        };
        assert_eq!(kind, "exam");
        assert_eq!(parsed, owner);
    }

    #[test]
    fn foreign_users_cannot_drive_a_session() {
        let owner: UserId = Id::new(7);
        let intruder: UserId = Id::new(8);
        let exams = Registry::new();
        exams.insert(owner, session());

        let custom_id = format!("exam:{owner}");
        let result = component_event(intruder, &custom_id);
        assert!(matches!(result, Err(error::Error::NotYourExam)));

        // The rejected event leaves the session exactly where it was.
        let entry = exams.get(&owner).unwrap();
        assert_eq!(entry.position(), 0);
        assert_eq!(entry.correct(), 0);
        assert!(!entry.is_completed());
    }

    #[test]
    fn malformed_custom_ids_are_rejected() {
        let actor: UserId = Id::new(7);
        assert!(matches!(component_event(actor, "exam"), Err(error::Error::Fatal)));
        assert!(matches!(component_event(actor, "exam:not-a-number"), Err(error::Error::Fatal)));
        assert!(matches!(component_event(actor, "exam:0"), Err(error::Error::Fatal)));
    }
}
