//! SQLite database operations
//!
//! All database access goes through this module.
//! Uses SQLx with migrations from `./migrations`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use super::repository::Repository;
use crate::error::AppError;

/// How long a claimed account stays out of the due set while it is checked
const CHECK_CLAIM_LEASE_MINUTES: i64 = 15;

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

fn from_unix(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

fn account_from_row(row: &SqliteRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        handle: row.try_get("handle")?,
        created_at: row.try_get("created_at")?,
        user_url: row.try_get("user_url")?,
        display_name: row.try_get("display_name")?,
        summary: row.try_get("summary")?,
        profile_image_url: row.try_get("profile_image_url")?,
        site_url: row.try_get("site_url")?,
        feed_url: row.try_get("feed_url")?,
        feed_last_updated: row.try_get("feed_last_updated")?,
        next_check_due: from_unix(row.try_get("next_check_due")?),
        public_key_pem: row.try_get("public_key_pem")?,
    })
}

fn follower_from_row(row: &SqliteRow) -> Result<Follower, sqlx::Error> {
    Ok(Follower {
        user_url: row.try_get("user_url")?,
        handle: row.try_get("handle")?,
        host: row.try_get("host")?,
        user_inbox: row.try_get("user_inbox")?,
        shared_inbox: row.try_get("shared_inbox")?,
        follow_activity_id: row.try_get("follow_activity_id")?,
        approve_status: ApproveStatus::from_i64(row.try_get("approve_status")?),
    })
}

const ACCOUNT_COLUMNS: &str = "id, handle, created_at, user_url, display_name, summary, \
    profile_image_url, site_url, feed_url, feed_last_updated, next_check_due, public_key_pem";

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist and
    /// runs pending migrations.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Migration(e)
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    async fn account_id_for(&self, handle: &str) -> Result<Option<String>, AppError> {
        let id = sqlx::query_scalar::<_, String>("SELECT id FROM accounts WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn require_account_id(&self, handle: &str) -> Result<String, AppError> {
        self.account_id_for(handle).await?.ok_or(AppError::NotFound)
    }

    async fn count_for_handle(&self, sql: &str, handle: &str) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(sql)
            .bind(handle)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Repository for Database {
    async fn add_account_if_not_exist(
        &self,
        account: &NewAccount,
        private_key_pem: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                id, handle, created_at, user_url, display_name, summary,
                profile_image_url, site_url, feed_url, feed_last_updated,
                next_check_due, public_key_pem, private_key_pem
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (handle) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(&account.handle)
        .bind(Utc::now())
        .bind(&account.user_url)
        .bind(&account.display_name)
        .bind(&account.summary)
        .bind(&account.profile_image_url)
        .bind(&account.site_url)
        .bind(&account.feed_url)
        .bind(account.feed_last_updated)
        .bind(account.next_check_due.timestamp())
        .bind(&account.public_key_pem)
        .bind(private_key_pem)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_account(&self, handle: &str) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE handle = ?"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn does_account_exist(&self, handle: &str) -> Result<bool, AppError> {
        Ok(self.account_id_for(handle).await?.is_some())
    }

    async fn get_private_key(&self, handle: &str) -> Result<Option<String>, AppError> {
        let key =
            sqlx::query_scalar::<_, String>("SELECT private_key_pem FROM accounts WHERE handle = ?")
                .bind(handle)
                .fetch_optional(&self.pool)
                .await?;
        Ok(key)
    }

    async fn get_feed_last_updated(&self, account_id: &str) -> Result<DateTime<Utc>, AppError> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT feed_last_updated FROM accounts WHERE id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)
    }

    async fn update_account_feed_times(
        &self,
        account_id: &str,
        feed_last_updated: DateTime<Utc>,
        next_check_due: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET feed_last_updated = CASE
                    WHEN julianday(?) > julianday(feed_last_updated) THEN ?
                    ELSE feed_last_updated
                END,
                next_check_due = ?
            WHERE id = ?
            "#,
        )
        .bind(feed_last_updated)
        .bind(feed_last_updated)
        .bind(next_check_due.timestamp())
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn add_feed_post_if_new(
        &self,
        account_id: &str,
        post: &FeedPost,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO feed_posts (account_id, post_hash, post_time, link, title, description)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id, post_hash) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(post.post_hash)
        .bind(post.post_time)
        .bind(&post.link)
        .bind(&post.title)
        .bind(&post.description)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_toot(&self, account_id: &str, toot: &Toot) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO toots (account_id, post_hash, tooted_at, status_id, content)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(toot.post_hash)
        .bind(toot.tooted_at)
        .bind(&toot.status_id)
        .bind(&toot.content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_account_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Option<Account>, u64), AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<(Option<Account>, u64), AppError> = async {
            let due_count = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM accounts WHERE feed_url != '' AND next_check_due <= ?",
            )
            .bind(now.timestamp())
            .fetch_one(&mut *conn)
            .await?;

            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                 WHERE feed_url != '' AND next_check_due <= ? \
                 ORDER BY next_check_due ASC LIMIT 1"
            ))
            .bind(now.timestamp())
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = row else {
                return Ok((None, due_count.max(0) as u64));
            };
            let account = account_from_row(&row)?;

            let lease_until = now + Duration::minutes(CHECK_CLAIM_LEASE_MINUTES);
            sqlx::query("UPDATE accounts SET next_check_due = ? WHERE id = ?")
                .bind(lease_until.timestamp())
                .bind(&account.id)
                .execute(&mut *conn)
                .await?;

            Ok((Some(account), due_count.max(0) as u64))
        }
        .await;

        match result {
            Ok(claimed) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(claimed)
            }
            Err(error) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(error)
            }
        }
    }

    async fn get_next_id(&self) -> Result<u64, AppError> {
        let value = sqlx::query_scalar::<_, i64>(
            "UPDATE id_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(value as u64)
    }

    async fn add_follower(&self, handle: &str, follower: &Follower) -> Result<(), AppError> {
        let account_id = self.require_account_id(handle).await?;

        sqlx::query(
            r#"
            INSERT INTO followers (
                account_id, user_url, handle, host, user_inbox, shared_inbox,
                follow_activity_id, approve_status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id, user_url) DO UPDATE SET
                handle = excluded.handle,
                host = excluded.host,
                user_inbox = excluded.user_inbox,
                shared_inbox = excluded.shared_inbox,
                follow_activity_id = excluded.follow_activity_id
            "#,
        )
        .bind(&account_id)
        .bind(&follower.user_url)
        .bind(&follower.handle)
        .bind(&follower.host)
        .bind(&follower.user_inbox)
        .bind(&follower.shared_inbox)
        .bind(&follower.follow_activity_id)
        .bind(follower.approve_status.as_i64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_follower(&self, handle: &str, follower_url: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM followers
            WHERE user_url = ?
              AND account_id = (SELECT id FROM accounts WHERE handle = ?)
            "#,
        )
        .bind(follower_url)
        .bind(handle)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_followers(&self, handle: &str) -> Result<Vec<Follower>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT f.user_url, f.handle, f.host, f.user_inbox, f.shared_inbox,
                   f.follow_activity_id, f.approve_status
            FROM followers f
            JOIN accounts a ON a.id = f.account_id
            WHERE a.handle = ?
            ORDER BY f.id ASC
            "#,
        )
        .bind(handle)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(follower_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn set_follower_approve_status(
        &self,
        handle: &str,
        follower_url: &str,
        status: ApproveStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE followers SET approve_status = ?
            WHERE user_url = ?
              AND account_id = (SELECT id FROM accounts WHERE handle = ?)
            "#,
        )
        .bind(status.as_i64())
        .bind(follower_url)
        .bind(handle)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn get_post_count(&self, handle: &str) -> Result<u64, AppError> {
        self.count_for_handle(
            "SELECT COUNT(*) FROM feed_posts p JOIN accounts a ON a.id = p.account_id WHERE a.handle = ?",
            handle,
        )
        .await
    }

    async fn get_toot_count(&self, handle: &str) -> Result<u64, AppError> {
        self.count_for_handle(
            "SELECT COUNT(*) FROM toots t JOIN accounts a ON a.id = t.account_id WHERE a.handle = ?",
            handle,
        )
        .await
    }

    async fn get_approved_follower_count(&self, handle: &str) -> Result<u64, AppError> {
        self.count_for_handle(
            "SELECT COUNT(*) FROM followers f JOIN accounts a ON a.id = f.account_id \
             WHERE a.handle = ? AND f.approve_status = 1",
            handle,
        )
        .await
    }

    async fn record_mention(&self, handle: &str, mention: &Mention) -> Result<bool, AppError> {
        let account_id = self.require_account_id(handle).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO mentions (account_id, note_id, actor_url, content, received_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (account_id, note_id) DO NOTHING
            "#,
        )
        .bind(&account_id)
        .bind(&mention.note_id)
        .bind(&mention.actor_url)
        .bind(&mention.content)
        .bind(mention.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_mention_count(&self, handle: &str) -> Result<u64, AppError> {
        self.count_for_handle(
            "SELECT COUNT(*) FROM mentions m JOIN accounts a ON a.id = m.account_id WHERE a.handle = ?",
            handle,
        )
        .await
    }

    async fn get_recent_toots(&self, handle: &str, limit: u32) -> Result<Vec<Toot>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT t.post_hash, t.tooted_at, t.status_id, t.content
            FROM toots t
            JOIN accounts a ON a.id = t.account_id
            WHERE a.handle = ?
            ORDER BY t.id DESC
            LIMIT ?
            "#,
        )
        .bind(handle)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let toots = rows
            .iter()
            .map(|row| {
                Ok(Toot {
                    post_hash: row.try_get("post_hash")?,
                    tooted_at: row.try_get("tooted_at")?,
                    status_id: row.try_get("status_id")?,
                    content: row.try_get("content")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(toots)
    }
}
