use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("feed {0} not found")]
    FeedNotFound(i64),
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A post URL that is already in the store is a skip, not an error.
#[derive(Debug)]
pub enum PostInsert {
    Created(Post),
    DuplicateSkipped,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedOverview {
    pub name: String,
    pub url: String,
    pub created_by: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PostWithFeed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_name: String,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_fetched_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT,
                published_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- users ---

    pub async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Delete every user; feeds, follows and posts cascade away with them.
    pub async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(())
    }

    // --- feeds ---

    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: i64,
    ) -> Result<Feed, StoreError> {
        let now = Utc::now();
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedOverview>, StoreError> {
        let feeds = sqlx::query_as::<_, FeedOverview>(
            r#"
            SELECT f.name, f.url, u.name AS created_by
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Never-fetched feeds first, then the oldest `last_fetched_at`, ties
    /// broken by id.
    pub async fn next_stale_feed(&self) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Stamp the feed as fetched right now and return the updated row.
    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<Feed, StoreError> {
        let now = Utc::now();
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?1, updated_at = ?1
            WHERE id = ?2
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        feed.ok_or(StoreError::FeedNotFound(feed_id))
    }

    // --- follows ---

    pub async fn follow_feed(&self, user_id: i64, feed_id: i64) -> Result<FeedFollow, StoreError> {
        let now = Utc::now();
        let follow = sqlx::query_as::<_, FeedFollow>(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(follow)
    }

    pub async fn unfollow_feed(&self, user_id: i64, feed_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn feeds_followed_by(&self, user_id: i64) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT f.* FROM feeds f
            JOIN feed_follows ff ON ff.feed_id = f.id
            WHERE ff.user_id = ?
            ORDER BY f.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    // --- posts ---

    /// Insert a post; the unique constraint on posts.url decides whether
    /// it is new.
    pub async fn create_post(&self, post: NewPost) -> Result<PostInsert, StoreError> {
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (feed_id, title, url, description, published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(post) => Ok(PostInsert::Created(post)),
            Err(err) if is_unique_violation(&err) => Ok(PostInsert::DuplicateSkipped),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<PostWithFeed>, StoreError> {
        let posts = sqlx::query_as::<_, PostWithFeed>(
            r#"
            SELECT p.id, p.title, p.url, p.description, p.published_at, f.name AS feed_name
            FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            JOIN feeds f ON f.id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn count_posts_for_feed(&self, feed_id: i64) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
