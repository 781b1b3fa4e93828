use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::{Database, User};
use crate::poller::Poller;

const DEFAULT_BROWSE_LIMIT: i64 = 2;

#[derive(Debug, Parser)]
#[command(name = "feedloop", version, about = "A multi-user CLI RSS aggregator")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new user and log in as them
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// List all registered users
    Users,
    /// Delete all users, feeds and posts
    Reset,
    /// Add a feed owned by the current user and follow it
    Addfeed { name: String, url: String },
    /// List every feed and who added it
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// List the feeds the current user follows
    Following,
    /// Stop following a feed
    Unfollow { url: String },
    /// Poll feeds forever, stalest first, until interrupted
    Agg {
        /// Time between polls, e.g. "30s" or "1m"
        #[arg(value_parser = parse_poll_interval)]
        interval: Duration,
    },
    /// Show the newest posts from feeds the current user follows
    Browse {
        /// How many posts to show
        #[arg(default_value_t = DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
}

// The poll ticker panics on a zero period, so catch it at parse time.
fn parse_poll_interval(raw: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(raw).map_err(|err| err.to_string())?;
    if interval.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(interval)
}

pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub config_path: PathBuf,
}

pub async fn dispatch(state: &mut AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Register { name } => register(state, &name).await,
        Command::Login { name } => login(state, &name).await,
        Command::Users => users(state).await,
        Command::Reset => reset(state).await,
        Command::Addfeed { name, url } => add_feed(state, &name, &url).await,
        Command::Feeds => feeds(state).await,
        Command::Follow { url } => follow(state, &url).await,
        Command::Following => following(state).await,
        Command::Unfollow { url } => unfollow(state, &url).await,
        Command::Agg { interval } => agg(state, interval).await,
        Command::Browse { limit } => browse(state, limit).await,
    }
}

/// The user named in config, re-checked against the store; a stale config
/// must not act for a deleted account.
async fn current_user(state: &AppState) -> anyhow::Result<User> {
    let name = state
        .config
        .current_user
        .as_deref()
        .context("not logged in; run register or login first")?;
    state
        .db
        .get_user_by_name(name)
        .await?
        .with_context(|| format!("current user '{}' no longer exists", name))
}

async fn register(state: &mut AppState, name: &str) -> anyhow::Result<()> {
    if state.db.get_user_by_name(name).await?.is_some() {
        bail!("user '{}' already exists", name);
    }
    let user = state.db.create_user(name).await?;
    state.config.set_user(&user.name, &state.config_path)?;
    println!("user '{}' created and logged in", user.name);
    Ok(())
}

async fn login(state: &mut AppState, name: &str) -> anyhow::Result<()> {
    let user = state
        .db
        .get_user_by_name(name)
        .await?
        .with_context(|| format!("user '{}' doesn't exist", name))?;
    state.config.set_user(&user.name, &state.config_path)?;
    println!("switched to user '{}'", user.name);
    Ok(())
}

async fn users(state: &AppState) -> anyhow::Result<()> {
    let users = state.db.list_users().await?;
    let current = state.config.current_user.as_deref();
    for user in users {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

async fn reset(state: &AppState) -> anyhow::Result<()> {
    state.db.reset().await?;
    println!("database reset");
    Ok(())
}

async fn add_feed(state: &AppState, name: &str, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let feed = state
        .db
        .create_feed(name, url, user.id)
        .await
        .with_context(|| format!("couldn't add feed '{}'", url))?;
    state.db.follow_feed(user.id, feed.id).await?;
    println!("added feed '{}' ({}) and followed it", feed.name, feed.url);
    Ok(())
}

async fn feeds(state: &AppState) -> anyhow::Result<()> {
    let feeds = state.db.list_feeds().await?;
    if feeds.is_empty() {
        println!("no feeds yet");
        return Ok(());
    }
    for feed in feeds {
        println!("* {} ({}) added by {}", feed.name, feed.url, feed.created_by);
    }
    Ok(())
}

async fn follow(state: &AppState, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("no feed with url '{}'", url))?;
    state
        .db
        .follow_feed(user.id, feed.id)
        .await
        .with_context(|| format!("couldn't follow '{}'", feed.name))?;
    println!("{} is now following '{}'", user.name, feed.name);
    Ok(())
}

async fn following(state: &AppState) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let feeds = state.db.feeds_followed_by(user.id).await?;
    if feeds.is_empty() {
        println!("{} is not following any feeds", user.name);
        return Ok(());
    }
    println!("{} is following:", user.name);
    for feed in feeds {
        println!("* {}", feed.name);
    }
    Ok(())
}

async fn unfollow(state: &AppState, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("no feed with url '{}'", url))?;
    if state.db.unfollow_feed(user.id, feed.id).await? {
        println!("unfollowed '{}'", feed.name);
    } else {
        println!("{} wasn't following '{}'", user.name, feed.name);
    }
    Ok(())
}

async fn agg(state: &AppState, interval: Duration) -> anyhow::Result<()> {
    let poller = Poller::new(state.db.clone(), interval);
    poller
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

async fn browse(state: &AppState, limit: i64) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let posts = state.db.posts_for_user(user.id, limit).await?;
    println!("found {} posts for '{}':", posts.len(), user.name);
    for post in posts {
        let date = post
            .published_at
            .map(|d| d.format("%a %b %e").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        println!("{} from {}", date, post.feed_name);
        println!("--- {} ---", post.title);
        if let Some(description) = &post.description {
            println!("    {}", description);
        }
        println!("link: {}", post.url);
        println!("=====================================");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_state() -> (AppState, TempDir) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let state = AppState {
            db,
            config: Config::default(),
            config_path,
        };
        (state, dir)
    }

    // Argument parsing tests
    mod cli_tests {
        use super::*;
        use clap::CommandFactory;

        #[test]
        fn test_cli_is_well_formed() {
            Cli::command().debug_assert();
        }

        #[test]
        fn test_parse_register() {
            let cli = Cli::try_parse_from(["feedloop", "register", "alice"]).unwrap();
            match cli.command {
                Command::Register { name } => assert_eq!(name, "alice"),
                other => panic!("unexpected command: {:?}", other),
            }
        }

        #[test]
        fn test_parse_agg_interval() {
            let cli = Cli::try_parse_from(["feedloop", "agg", "1m"]).unwrap();
            match cli.command {
                Command::Agg { interval } => assert_eq!(interval, Duration::from_secs(60)),
                other => panic!("unexpected command: {:?}", other),
            }
        }

        #[test]
        fn test_parse_agg_rejects_bad_interval() {
            let result = Cli::try_parse_from(["feedloop", "agg", "whenever"]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_agg_rejects_zero_interval() {
            let result = Cli::try_parse_from(["feedloop", "agg", "0s"]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_browse_default_limit() {
            let cli = Cli::try_parse_from(["feedloop", "browse"]).unwrap();
            match cli.command {
                Command::Browse { limit } => assert_eq!(limit, 2),
                other => panic!("unexpected command: {:?}", other),
            }
        }

        #[test]
        fn test_parse_browse_explicit_limit() {
            let cli = Cli::try_parse_from(["feedloop", "browse", "10"]).unwrap();
            match cli.command {
                Command::Browse { limit } => assert_eq!(limit, 10),
                other => panic!("unexpected command: {:?}", other),
            }
        }

        #[test]
        fn test_parse_config_override() {
            let cli = Cli::try_parse_from(["feedloop", "--config", "/tmp/alt.toml", "users"])
                .unwrap();
            assert_eq!(cli.config, Some(PathBuf::from("/tmp/alt.toml")));
        }
    }

    // Handler tests
    mod handler_tests {
        use super::*;

        #[tokio::test]
        async fn test_register_creates_user_and_logs_in() {
            let (mut state, _dir) = create_test_state().await;

            dispatch(
                &mut state,
                Command::Register {
                    name: "alice".to_string(),
                },
            )
            .await
            .unwrap();

            assert!(state.db.get_user_by_name("alice").await.unwrap().is_some());
            assert_eq!(state.config.current_user.as_deref(), Some("alice"));

            // The login was persisted, not just held in memory.
            let saved = Config::load(&state.config_path).unwrap();
            assert_eq!(saved.current_user.as_deref(), Some("alice"));
        }

        #[tokio::test]
        async fn test_register_duplicate_fails() {
            let (mut state, _dir) = create_test_state().await;
            state.db.create_user("alice").await.unwrap();

            let result = dispatch(
                &mut state,
                Command::Register {
                    name: "alice".to_string(),
                },
            )
            .await;

            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_login_switches_user() {
            let (mut state, _dir) = create_test_state().await;
            state.db.create_user("alice").await.unwrap();
            state.db.create_user("bob").await.unwrap();
            state.config.current_user = Some("alice".to_string());

            dispatch(
                &mut state,
                Command::Login {
                    name: "bob".to_string(),
                },
            )
            .await
            .unwrap();

            assert_eq!(state.config.current_user.as_deref(), Some("bob"));
        }

        #[tokio::test]
        async fn test_login_unknown_user_fails() {
            let (mut state, _dir) = create_test_state().await;

            let result = dispatch(
                &mut state,
                Command::Login {
                    name: "nobody".to_string(),
                },
            )
            .await;

            assert!(result.is_err());
            assert!(state.config.current_user.is_none());
        }

        #[tokio::test]
        async fn test_addfeed_requires_login() {
            let (mut state, _dir) = create_test_state().await;

            let result = dispatch(
                &mut state,
                Command::Addfeed {
                    name: "Blog".to_string(),
                    url: "https://example.com/rss".to_string(),
                },
            )
            .await;

            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_addfeed_creates_and_follows() {
            let (mut state, _dir) = create_test_state().await;
            let user = state.db.create_user("alice").await.unwrap();
            state.config.current_user = Some("alice".to_string());

            dispatch(
                &mut state,
                Command::Addfeed {
                    name: "Blog".to_string(),
                    url: "https://example.com/rss".to_string(),
                },
            )
            .await
            .unwrap();

            let feed = state
                .db
                .get_feed_by_url("https://example.com/rss")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(feed.name, "Blog");
            assert_eq!(feed.user_id, user.id);

            let followed = state.db.feeds_followed_by(user.id).await.unwrap();
            assert_eq!(followed.len(), 1);
            assert_eq!(followed[0].id, feed.id);
        }

        #[tokio::test]
        async fn test_stale_current_user_is_rejected() {
            let (mut state, _dir) = create_test_state().await;
            state.config.current_user = Some("ghost".to_string());

            let result = dispatch(&mut state, Command::Following).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_follow_and_unfollow() {
            let (mut state, _dir) = create_test_state().await;
            let alice = state.db.create_user("alice").await.unwrap();
            let bob = state.db.create_user("bob").await.unwrap();
            let feed = state
                .db
                .create_feed("Blog", "https://example.com/rss", alice.id)
                .await
                .unwrap();
            state.config.current_user = Some("bob".to_string());

            dispatch(
                &mut state,
                Command::Follow {
                    url: "https://example.com/rss".to_string(),
                },
            )
            .await
            .unwrap();
            let followed = state.db.feeds_followed_by(bob.id).await.unwrap();
            assert_eq!(followed.len(), 1);
            assert_eq!(followed[0].id, feed.id);

            dispatch(
                &mut state,
                Command::Unfollow {
                    url: "https://example.com/rss".to_string(),
                },
            )
            .await
            .unwrap();
            assert!(state.db.feeds_followed_by(bob.id).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_follow_unknown_url_fails() {
            let (mut state, _dir) = create_test_state().await;
            state.db.create_user("alice").await.unwrap();
            state.config.current_user = Some("alice".to_string());

            let result = dispatch(
                &mut state,
                Command::Follow {
                    url: "https://nowhere.example/rss".to_string(),
                },
            )
            .await;

            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_reset_empties_store() {
            let (mut state, _dir) = create_test_state().await;
            let user = state.db.create_user("alice").await.unwrap();
            state
                .db
                .create_feed("Blog", "https://example.com/rss", user.id)
                .await
                .unwrap();

            dispatch(&mut state, Command::Reset).await.unwrap();

            assert!(state.db.list_users().await.unwrap().is_empty());
            assert!(state.db.list_feeds().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_browse_with_no_posts() {
            let (mut state, _dir) = create_test_state().await;
            state.db.create_user("alice").await.unwrap();
            state.config.current_user = Some("alice".to_string());

            let result = dispatch(&mut state, Command::Browse { limit: 2 }).await;
            assert!(result.is_ok());
        }
    }
}
