#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;

use alloc::boxed::Box;
use core::num::{NonZeroI32, NonZeroU64};
use tokio_postgres::error::SqlState;

pub use futures_util::{TryStream, TryStreamExt};
pub use model::{Question, RawQuestion, Settings};
pub use tokio_postgres::{tls::NoTls, Client, Config};

pub struct Database(Client);

impl From<Client> for Database {
    fn from(client: Client) -> Self {
        Self(client)
    }
}

/// Seconds of slack before an almost-expired cooldown stops blocking exams.
pub const COOLDOWN_GRACE_SECS: i64 = 3;

const MIGRATIONS: &str = "CREATE TABLE IF NOT EXISTS questions ( \
        id SERIAL PRIMARY KEY, \
        question TEXT NOT NULL, \
        option1 TEXT NOT NULL, \
        option2 TEXT NOT NULL, \
        option3 TEXT NOT NULL, \
        option4 TEXT NOT NULL, \
        answer SMALLINT NOT NULL CHECK (answer BETWEEN 1 AND 4) \
    ); \
    CREATE TABLE IF NOT EXISTS exam_settings ( \
        id SMALLINT PRIMARY KEY, \
        question_amount SMALLINT NOT NULL DEFAULT 5, \
        failure_cooldown_minutes SMALLINT NOT NULL DEFAULT 0 \
    ); \
    CREATE TABLE IF NOT EXISTS user_cooldowns ( \
        user_id BIGINT PRIMARY KEY, \
        cooldown_until BIGINT NOT NULL \
    ); \
    INSERT INTO exam_settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING; \
    ALTER TABLE exam_settings ADD COLUMN IF NOT EXISTS exam_room_id BIGINT; \
    ALTER TABLE exam_settings ADD COLUMN IF NOT EXISTS add_exam_room_id BIGINT; \
    ALTER TABLE exam_settings ADD COLUMN IF NOT EXISTS manage_exam_role_id BIGINT; \
    ALTER TABLE exam_settings ADD COLUMN IF NOT EXISTS graduater_role_id BIGINT;";

fn deserialize_raw_question_from_row(row: &tokio_postgres::Row) -> Result<RawQuestion, tokio_postgres::Error> {
    let question = row.try_get("question")?;
    let choices =
        [row.try_get("option1")?, row.try_get("option2")?, row.try_get("option3")?, row.try_get("option4")?];
    let answer = row.try_get("answer")?;
    Ok(RawQuestion { question, choices, answer })
}

fn deserialize_question_from_row(row: tokio_postgres::Row) -> error::Result<Question> {
    let id: i32 = row.try_get("id").map_err(|_| error::Error::Fatal)?;
    let id = NonZeroI32::new(id).ok_or(error::Error::Fatal)?;
    let raw = deserialize_raw_question_from_row(&row).map_err(|_| error::Error::Fatal)?;
    Ok(Question { id, raw })
}

fn deserialize_settings_from_row(row: tokio_postgres::Row) -> error::Result<Settings> {
    fn id_column(row: &tokio_postgres::Row, name: &str) -> error::Result<Option<NonZeroU64>> {
        let id: Option<i64> = row.try_get(name).map_err(|_| error::Error::Fatal)?;
        Ok(id.and_then(|id| NonZeroU64::new(id as u64)))
    }
    Ok(Settings {
        question_amount: row.try_get("question_amount").map_err(|_| error::Error::Fatal)?,
        cooldown_minutes: row.try_get("failure_cooldown_minutes").map_err(|_| error::Error::Fatal)?,
        exam_channel: id_column(&row, "exam_room_id")?,
        manage_channel: id_column(&row, "add_exam_room_id")?,
        manager_role: id_column(&row, "manage_exam_role_id")?,
        graduate_role: id_column(&row, "graduater_role_id")?,
    })
}

impl Database {
    /// Creates the tables, seeds the settings singleton, and applies the
    /// additive column migrations. Existing data is never dropped.
    pub async fn migrate(&self) -> error::Result<()> {
        self.0.batch_execute(MIGRATIONS).await.map_err(|_| error::Error::Fatal)
    }

    pub async fn get_settings(&self) -> error::Result<Settings> {
        let row = self
            .0
            .query_opt(
                "SELECT question_amount, failure_cooldown_minutes, exam_room_id, add_exam_room_id, \
                 manage_exam_role_id, graduater_role_id FROM exam_settings WHERE id = 1",
                &[],
            )
            .await
            .map_err(|_| error::Error::Fatal)?
            .ok_or(error::Error::NotFound)?;
        deserialize_settings_from_row(row)
    }

    async fn set_settings_id(&self, column: &str, value: NonZeroU64) -> error::Result<()> {
        let id = value.get() as i64;
        let query = alloc::format!("UPDATE exam_settings SET {column} = $1 WHERE id = 1");
        match self.0.execute(query.as_str(), &[&id]).await {
            Ok(1) => Ok(()),
            Ok(_) => Err(error::Error::NotFound),
            Err(_) => Err(error::Error::Fatal),
        }
    }

    pub async fn set_exam_channel(&self, channel: NonZeroU64) -> error::Result<()> {
        self.set_settings_id("exam_room_id", channel).await
    }

    pub async fn set_manage_channel(&self, channel: NonZeroU64) -> error::Result<()> {
        self.set_settings_id("add_exam_room_id", channel).await
    }

    pub async fn set_manager_role(&self, role: NonZeroU64) -> error::Result<()> {
        self.set_settings_id("manage_exam_role_id", role).await
    }

    pub async fn set_graduate_role(&self, role: NonZeroU64) -> error::Result<()> {
        self.set_settings_id("graduater_role_id", role).await
    }

    pub async fn set_question_amount(&self, amount: i16) -> error::Result<()> {
        if !(1..=999).contains(&amount) {
            return Err(error::Error::BadInput);
        }
        match self.0.execute("UPDATE exam_settings SET question_amount = $1 WHERE id = 1", &[&amount]).await {
            Ok(1) => Ok(()),
            Ok(_) => Err(error::Error::NotFound),
            Err(_) => Err(error::Error::Fatal),
        }
    }

    pub async fn set_cooldown_minutes(&self, minutes: i16) -> error::Result<()> {
        if !(0..=1440).contains(&minutes) {
            return Err(error::Error::BadInput);
        }
        match self.0.execute("UPDATE exam_settings SET failure_cooldown_minutes = $1 WHERE id = 1", &[&minutes]).await
        {
            Ok(1) => Ok(()),
            Ok(_) => Err(error::Error::NotFound),
            Err(_) => Err(error::Error::Fatal),
        }
    }

    pub async fn add_question(&self, raw: &RawQuestion) -> error::Result<NonZeroI32> {
        let [first, second, third, fourth] = &raw.choices;
        let err = match self
            .0
            .query_opt(
                "INSERT INTO questions (question, option1, option2, option3, option4, answer) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                &[&raw.question, first, second, third, fourth, &raw.answer],
            )
            .await
        {
            Ok(row) => {
                let row = row.ok_or(error::Error::Fatal)?;
                let id: i32 = row.try_get("id").map_err(|_| error::Error::Fatal)?;
                return NonZeroI32::new(id).ok_or(error::Error::Fatal);
            }
            Err(err) => err,
        };

        let err = err.as_db_error().ok_or(error::Error::Fatal)?;
        if *err.code() == SqlState::CHECK_VIOLATION {
            Err(error::Error::BadInput)
        } else {
            Err(error::Error::Fatal)
        }
    }

    /// Deletes one question and reports its text.
    pub async fn delete_question(&self, question: NonZeroI32) -> error::Result<Box<str>> {
        let qid = question.get();
        let row = self
            .0
            .query_opt("DELETE FROM questions WHERE id = $1 RETURNING question", &[&qid])
            .await
            .map_err(|_| error::Error::Fatal)?
            .ok_or(error::Error::NotFound)?;
        row.try_get("question").map_err(|_| error::Error::Fatal)
    }

    pub async fn list_questions(&self) -> error::Result<impl TryStream<Ok = Question, Error = error::Error> + '_> {
        Ok(self
            .0
            .query_raw(
                "SELECT id, question, option1, option2, option3, option4, answer FROM questions ORDER BY id",
                core::iter::empty::<&i32>(),
            )
            .await
            .map_err(|_| error::Error::Fatal)?
            .map_err(|_| error::Error::Fatal)
            .and_then(|row| core::future::ready(deserialize_question_from_row(row))))
    }

    pub async fn count_questions(&self) -> error::Result<i64> {
        let row = self.0.query_one("SELECT COUNT(*) FROM questions", &[]).await.map_err(|_| error::Error::Fatal)?;
        row.try_get(0).map_err(|_| error::Error::Fatal)
    }

    /// Draws up to `amount` questions uniformly at random without replacement.
    pub async fn draw_questions(&self, amount: i16) -> error::Result<alloc::vec::Vec<Question>> {
        let limit = i64::from(amount);
        self.0
            .query(
                "SELECT id, question, option1, option2, option3, option4, answer FROM questions \
                 ORDER BY RANDOM() LIMIT $1",
                &[&limit],
            )
            .await
            .map_err(|_| error::Error::Fatal)?
            .into_iter()
            .map(deserialize_question_from_row)
            .collect()
    }

    /// Empties the bank and restarts the identity sequence at one.
    pub async fn reset_questions(&self) -> error::Result<()> {
        self.0.batch_execute("TRUNCATE TABLE questions RESTART IDENTITY").await.map_err(|_| error::Error::Fatal)
    }

    /// Reports the user's cooldown as `(expiry, remaining)` in Unix seconds.
    /// The clock is the database's, so callers never consult their own.
    pub async fn get_cooldown(&self, user: NonZeroU64) -> error::Result<Option<(i64, i64)>> {
        let uid = user.get() as i64;
        let row = match self
            .0
            .query_opt(
                "SELECT cooldown_until, cooldown_until - trunc(extract(epoch FROM now()))::BIGINT AS remaining \
                 FROM user_cooldowns WHERE user_id = $1",
                &[&uid],
            )
            .await
            .map_err(|_| error::Error::Fatal)?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        let until = row.try_get("cooldown_until").map_err(|_| error::Error::Fatal)?;
        let remaining = row.try_get("remaining").map_err(|_| error::Error::Fatal)?;
        Ok(Some((until, remaining)))
    }

    /// Upserts the user's cooldown to now plus `minutes` and reports the new
    /// expiry in Unix seconds. Last writer wins.
    pub async fn set_cooldown(&self, user: NonZeroU64, minutes: i16) -> error::Result<i64> {
        let uid = user.get() as i64;
        let minutes = i64::from(minutes);
        let row = self
            .0
            .query_one(
                "INSERT INTO user_cooldowns (user_id, cooldown_until) \
                 VALUES ($1, trunc(extract(epoch FROM now()))::BIGINT + $2::BIGINT * 60) \
                 ON CONFLICT (user_id) DO UPDATE SET cooldown_until = EXCLUDED.cooldown_until \
                 RETURNING cooldown_until",
                &[&uid, &minutes],
            )
            .await
            .map_err(|_| error::Error::Fatal)?;
        row.try_get("cooldown_until").map_err(|_| error::Error::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::{error, Config, Database, NoTls, NonZeroU64, RawQuestion, TryStreamExt, COOLDOWN_GRACE_SECS};

    fn raw(question: &str, answer: i16) -> RawQuestion {
        RawQuestion {
            question: question.into(),
            choices: ["a".into(), "b".into(), "c".into(), "d".into()],
            answer,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    #[ignore = "requires a live Postgres instance"]
    async fn database_test() {
        use std::env::var;
        let user = var("PG_USERNAME").unwrap();
        let pass = var("PG_PASSWORD").unwrap();
        let host = var("PG_HOSTNAME").unwrap();
        let data = var("PG_DATABASE").unwrap();

        let (client, conn) = Config::new()
            .user(&user)
            .password(&pass)
            .host(&host)
            .dbname(&data)
            .port(5432)
            .connect(NoTls)
            .await
            .expect("cannot connect to database");
        let handle = tokio::spawn(conn);
        let db = Database::from(client);
        db.migrate().await.unwrap();

        // The settings singleton exists with defaults after migration.
        let settings = db.get_settings().await.unwrap();
        assert!(settings.question_amount >= 1);

        // Update each settings field individually.
        let channel = NonZeroU64::new(100).unwrap();
        let role = NonZeroU64::new(200).unwrap();
        db.set_exam_channel(channel).await.unwrap();
        db.set_manage_channel(channel).await.unwrap();
        db.set_manager_role(role).await.unwrap();
        db.set_graduate_role(role).await.unwrap();
        db.set_question_amount(3).await.unwrap();
        db.set_cooldown_minutes(5).await.unwrap();
        assert_eq!(db.set_question_amount(0).await, Err(error::Error::BadInput));
        assert_eq!(db.set_cooldown_minutes(2000).await, Err(error::Error::BadInput));

        let settings = db.get_settings().await.unwrap();
        assert_eq!(settings.question_amount, 3);
        assert_eq!(settings.cooldown_minutes, 5);
        assert_eq!(settings.exam_channel, Some(channel));
        assert_eq!(settings.graduate_role, Some(role));

        // Question bank round-trip.
        db.reset_questions().await.unwrap();
        let first = db.add_question(&raw("First?", 1)).await.unwrap();
        assert_eq!(first.get(), 1);
        let second = db.add_question(&raw("Second?", 4)).await.unwrap();
        let third = db.add_question(&raw("Third?", 2)).await.unwrap();
        assert_eq!(db.add_question(&raw("Bad answer?", 5)).await, Err(error::Error::BadInput));
        assert_eq!(db.count_questions().await.unwrap(), 3);

        let listed: Vec<_> = db.list_questions().await.unwrap().try_collect().await.unwrap();
        assert_eq!(listed.iter().map(|q| q.id).collect::<Vec<_>>(), vec![first, second, third]);

        // Draws never exceed the bank and never repeat a question.
        let drawn = db.draw_questions(2).await.unwrap();
        assert_eq!(drawn.len(), 2);
        assert_ne!(drawn[0].id, drawn[1].id);
        assert_eq!(db.draw_questions(10).await.unwrap().len(), 3);

        assert_eq!(db.delete_question(second).await.unwrap().as_ref(), "Second?");
        assert_eq!(db.delete_question(second).await, Err(error::Error::NotFound));
        assert_eq!(db.count_questions().await.unwrap(), 2);

        // Identity restarts after a reset.
        db.reset_questions().await.unwrap();
        assert_eq!(db.count_questions().await.unwrap(), 0);
        assert_eq!(db.add_question(&raw("Fresh?", 3)).await.unwrap().get(), 1);

        // Cooldown bookkeeping.
        let uid = NonZeroU64::new(42).unwrap();
        let until = db.set_cooldown(uid, 5).await.unwrap();
        let (stored, remaining) = db.get_cooldown(uid).await.unwrap().unwrap();
        assert_eq!(stored, until);
        assert!(remaining > COOLDOWN_GRACE_SECS && remaining <= 300);

        // Upsert overwrites rather than extending.
        let rewritten = db.set_cooldown(uid, 0).await.unwrap();
        let (_, remaining) = db.get_cooldown(uid).await.unwrap().unwrap();
        assert!(rewritten <= until);
        assert!(remaining <= 0);
        assert!(db.get_cooldown(NonZeroU64::new(43).unwrap()).await.unwrap().is_none());

        drop(db);
        handle.abort();
    }
}
