use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

mod config;
mod db;
mod delivery;
mod error;
mod feed;
mod models;
mod poller;
mod services;
mod text;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use feed::{parse_opml_file, FeedFetcher};
use models::{Destination, Feed, NewSubscription, Subscription};
use poller::Poller;
use services::DiscordNotifier;

const USAGE: &str = "\
Usage:
  feed-relay [run]                                        poll feeds and deliver new entries
  feed-relay --refresh                                    run a single cycle and exit
  feed-relay subscribe <url> <guild> <channel> [name] [role]
  feed-relay unsubscribe <subscription-id>
  feed-relay edit-feed <old-url> <new-url>
  feed-relay remove-feed <url>
  feed-relay list [guild]
  feed-relay latest <subscription-id>
  feed-relay --import <opml-file> <guild> <channel>

`list` and `latest` print JSON when given --json.";

enum Command {
    Run,
    Refresh,
    Subscribe {
        url: String,
        guild: String,
        channel: String,
        name: Option<String>,
        role: Option<String>,
    },
    Unsubscribe(i64),
    EditFeed { old_url: String, new_url: String },
    RemoveFeed(String),
    List(Option<String>),
    Latest(i64),
    Import { path: PathBuf, guild: String, channel: String },
}

#[derive(Serialize)]
struct Listing<'a> {
    subscription: &'a Subscription,
    destination: &'a Destination,
    feed: &'a Feed,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            [] | ["run"] => Command::Run,
            ["--refresh"] => Command::Refresh,
            ["subscribe", url, guild, channel, rest @ ..] if rest.len() <= 2 => Command::Subscribe {
                url: url.to_string(),
                guild: guild.to_string(),
                channel: channel.to_string(),
                name: rest.first().map(|s| s.to_string()),
                role: rest.get(1).map(|s| s.to_string()),
            },
            ["unsubscribe", id] => Command::Unsubscribe(id.parse().ok()?),
            ["edit-feed", old_url, new_url] => Command::EditFeed {
                old_url: old_url.to_string(),
                new_url: new_url.to_string(),
            },
            ["remove-feed", url] => Command::RemoveFeed(url.to_string()),
            ["list"] => Command::List(None),
            ["list", guild] => Command::List(Some(guild.to_string())),
            ["latest", id] => Command::Latest(id.parse().ok()?),
            ["--import", path, guild, channel] => Command::Import {
                path: PathBuf::from(path),
                guild: guild.to_string(),
                channel: channel.to_string(),
            },
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    args.retain(|a| a != "--json");
    let Some(command) = Command::parse(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = Config::load()?;
    let repo = Repository::new(&config.db_path).await?;

    match command {
        Command::Run => {
            let poller = build_poller(repo, &config)?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C, shutting down");
                }
                shutdown_tx.send(true).ok();
            });
            poller.run(shutdown_rx).await?;
        }
        Command::Refresh => {
            let report = build_poller(repo, &config)?.run_once().await?;
            println!("Refreshed: {}", report);
        }
        Command::Subscribe {
            url,
            guild,
            channel,
            name,
            role,
        } => {
            let fetcher = FeedFetcher::new(&config.user_agent, config.max_concurrent_fetches)?;
            let feed = match repo.find_feed_by_url(&url).await? {
                Some(feed) => feed,
                None => repo.upsert_feed(fetcher.discover_feed(&url).await?).await?,
            };
            let target = repo
                .subscribe(NewSubscription {
                    feed_id: feed.id.clone(),
                    guild_ref: guild,
                    channel_ref: channel,
                    display_name: name.unwrap_or_else(|| feed.title.clone()),
                    role_ref: role,
                })
                .await?;
            println!(
                "Subscription {}: '{}' ({}) -> channel {}",
                target.subscription.id,
                target.subscription.display_name,
                feed.url,
                target.destination.channel_ref
            );
        }
        Command::Unsubscribe(id) => {
            repo.unsubscribe(id).await?;
            println!("Removed subscription {}", id);
        }
        Command::EditFeed { old_url, new_url } => {
            let feed = repo.update_feed_url(&old_url, &new_url).await?;
            println!("Feed {} now points at {}", feed.id, feed.url);
        }
        Command::RemoveFeed(url) => {
            repo.delete_feed(&url).await?;
            println!("Removed {} and its subscriptions", url);
        }
        Command::List(guild) => {
            let listing = repo.list_subscriptions(guild).await?;
            if json {
                let rows: Vec<Listing> = listing
                    .iter()
                    .map(|(target, feed)| Listing {
                        subscription: &target.subscription,
                        destination: &target.destination,
                        feed,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if listing.is_empty() {
                println!("No subscriptions");
            }
            for (target, feed) in listing {
                let sub = &target.subscription;
                println!(
                    "{:>5}  {:<24} {}  guild {} channel {}{}",
                    sub.id,
                    sub.display_name,
                    feed.url,
                    target.destination.guild_ref,
                    target.destination.channel_ref,
                    sub.role_ref
                        .as_deref()
                        .map(|role| format!(" role {}", role))
                        .unwrap_or_default()
                );
            }
        }
        Command::Latest(id) => {
            let target = repo
                .get_subscription(id)
                .await?
                .ok_or(AppError::SubscriptionNotFound(id))?;
            match repo.latest_entry(&target.subscription.feed_id).await? {
                Some(entry) if json => println!("{}", serde_json::to_string_pretty(&entry)?),
                Some(entry) => {
                    println!("{}\n{}", entry.title, entry.link);
                    if let Some(published) = entry.published_at {
                        println!("Published {}", published.format("%Y-%m-%d %H:%M UTC"));
                    }
                }
                None => println!("Nothing seen yet for subscription {}", id),
            }
        }
        Command::Import {
            path,
            guild,
            channel,
        } => {
            let (added, skipped) = import_opml(&repo, &path, &guild, &channel).await?;
            println!(
                "Imported {} subscriptions from {:?} ({} already present)",
                added, path, skipped
            );
        }
    }

    Ok(())
}

fn build_poller(repo: Repository, config: &Config) -> Result<Poller> {
    let notifier = Arc::new(DiscordNotifier::new(
        config.discord_token()?,
        config.delivery_style,
    ));
    let fetcher = FeedFetcher::new(&config.user_agent, config.max_concurrent_fetches)?;
    Ok(Poller::new(repo, fetcher, notifier, config))
}

/// Subscribes one channel to every feed in an OPML file. Feeds are created
/// without fetching them; the first cycle fills in their entries.
async fn import_opml(
    repo: &Repository,
    path: &std::path::Path,
    guild: &str,
    channel: &str,
) -> Result<(usize, usize)> {
    let mut added = 0;
    let mut skipped = 0;

    for new_feed in parse_opml_file(path)? {
        let feed = repo.upsert_feed(new_feed).await?;
        let subscription = NewSubscription {
            feed_id: feed.id.clone(),
            guild_ref: guild.to_string(),
            channel_ref: channel.to_string(),
            display_name: feed.title.clone(),
            role_ref: None,
        };
        match repo.subscribe(subscription).await {
            Ok(_) => added += 1,
            Err(AppError::AlreadySubscribed { .. }) => skipped += 1,
            Err(e) => return Err(e),
        }
    }

    Ok((added, skipped))
}
