//! Relational authenticator backed by a [`sqlx`] connection pool.

use async_trait::async_trait;
use sqlx::{ColumnIndex, Database, Decode, Encode, Pool, Row, Type};
use tracing::debug;

use crate::authenticator::Authenticator;
use crate::credentials::Credentials;
use crate::error::BoxError;

/// Authenticator looking users up from a database table.
///
/// The user row is fetched with a parameterized query and the stored bcrypt
/// hash is verified against the supplied password. Table and column names
/// default to `users`, `user` and `hash`.
///
/// ```no_run
/// # async fn example() -> Result<(), tower_basic_auth::BoxError> {
/// use sqlx::SqlitePool;
/// use tower_basic_auth::{BasicAuth, SqlAuthenticator};
///
/// let pool = SqlitePool::connect("sqlite:users.db").await?;
/// let auth = BasicAuth::builder()
///     .authenticator(SqlAuthenticator::new(pool).table("accounts"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SqlAuthenticator<DB: Database> {
    pool: Pool<DB>,
    table: String,
    username_column: String,
    hash_column: String,
}

impl<DB: Database> SqlAuthenticator<DB> {
    /// Creates an authenticator with the default table and column names.
    pub fn new(pool: Pool<DB>) -> Self {
        SqlAuthenticator {
            pool,
            table: "users".into(),
            username_column: "user".into(),
            hash_column: "hash".into(),
        }
    }

    /// Sets the table to look users up from.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Sets the column holding usernames.
    pub fn username_column(mut self, column: impl Into<String>) -> Self {
        self.username_column = column.into();
        self
    }

    /// Sets the column holding password hashes.
    pub fn hash_column(mut self, column: impl Into<String>) -> Self {
        self.hash_column = column.into();
        self
    }

    fn query(&self) -> String {
        // Placeholder syntax differs per driver.
        let placeholder = if DB::NAME == "PostgreSQL" { "$1" } else { "?" };
        format!(
            "SELECT * FROM {} WHERE {} = {} LIMIT 1",
            self.table, self.username_column, placeholder
        )
    }
}

impl<DB: Database> Clone for SqlAuthenticator<DB> {
    fn clone(&self) -> Self {
        SqlAuthenticator {
            pool: self.pool.clone(),
            table: self.table.clone(),
            username_column: self.username_column.clone(),
            hash_column: self.hash_column.clone(),
        }
    }
}

#[async_trait]
impl<DB> Authenticator for SqlAuthenticator<DB>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: sqlx::IntoArguments<'q, DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'r> String: Decode<'r, DB> + Type<DB>,
    for<'s> &'s str: ColumnIndex<DB::Row>,
    for<'c> &'c Pool<DB>: sqlx::Executor<'c, Database = DB>,
{
    async fn authenticate(&self, credentials: &Credentials) -> Result<bool, BoxError> {
        let (Some(user), Some(password)) = (credentials.user(), credentials.password()) else {
            return Ok(false);
        };

        let sql = self.query();
        let row = sqlx::query::<DB>(&sql)
            .bind(user.to_owned())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let hash: String = row.try_get(self.hash_column.as_str())?;
                Ok(bcrypt::verify(password, &hash).unwrap_or(false))
            }
            None => {
                debug!(user, "no matching row");
                Ok(false)
            }
        }
    }
}
