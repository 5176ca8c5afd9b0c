#![forbid(unsafe_code)]

//! Command-line access to a client-held catalog: the same documents the
//! front end keeps locally (`animes`, `watchHistory`), stored as JSON files
//! in a data directory.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use anistream_tools::{
    catalog::{Episode, Title},
    episodes::{declared_range, list_episodes},
    error::CoreError,
    history::record_watch,
    player::watch_page,
    related::related_titles,
    store::{CatalogStore, HistoryStore, JsonFileStore},
    video_source::{VideoRef, resolve_video},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_DIR: &str = "anistream-data";

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and edit a local anistream catalog.")]
struct Cli {
    #[arg(
        long = "data-dir",
        value_name = "PATH",
        default_value = DEFAULT_DATA_DIR,
        help = "Directory holding the catalog documents"
    )]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every title with its view count.
    Titles,
    /// Replace the catalog with the titles in a JSON file.
    Import { file: PathBuf },
    /// Open a watch page: counts a view and starts a history entry.
    Watch {
        title_id: String,
        #[arg(long)]
        episode: Option<String>,
    },
    /// Show how a title's video would be rendered, without counting a view.
    Resolve {
        title_id: String,
        #[arg(long)]
        episode: Option<i64>,
    },
    Episodes {
        title_id: String,
        #[arg(long)]
        episode: Option<i64>,
    },
    Related { title_id: String },
    /// Record playback progress (0-100) for a title.
    Progress {
        title_id: String,
        #[arg(long)]
        episode: i64,
        #[arg(long)]
        percent: f64,
    },
    History,
    /// Store a video reference (URL, iframe snippet or JSON descriptor).
    SetVideo {
        title_id: String,
        value: String,
        #[arg(long, help = "Attach to this episode instead of the title")]
        episode: Option<i64>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TitleSummary<'a> {
    id: &'a str,
    title: &'a str,
    genre: Option<&'a str>,
    views: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = JsonFileStore::open(&cli.data_dir)?;
    run(&store, cli.command)
}

fn run(store: &JsonFileStore, command: Command) -> Result<()> {
    match command {
        Command::Titles => {
            let titles = store.get_all_titles()?;
            let summaries: Vec<TitleSummary<'_>> = titles
                .iter()
                .map(|title| TitleSummary {
                    id: &title.id,
                    title: &title.title,
                    genre: title.genre.as_deref(),
                    views: title.views,
                })
                .collect();
            print_json(&summaries)
        }
        Command::Import { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let titles: Vec<Title> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing titles from {}", file.display()))?;
            store.save_titles(&titles)?;
            info!(count = titles.len(), "catalog imported");
            Ok(())
        }
        Command::Watch { title_id, episode } => {
            let page = watch_page(store, store, &title_id, episode.as_deref())?;
            print_json(&page)
        }
        Command::Resolve { title_id, episode } => {
            let title = find_title(store, &title_id)?;
            print_json(&resolve_video(&title, episode))
        }
        Command::Episodes { title_id, episode } => {
            let title = find_title(store, &title_id)?;
            print_json(&list_episodes(&title, episode))
        }
        Command::Related { title_id } => {
            let titles = store.get_all_titles()?;
            let title = titles
                .iter()
                .find(|title| title.id == title_id)
                .ok_or_else(|| CoreError::MissingTitle(title_id.clone()))?;
            print_json(&related_titles(&titles, &title.id, title.genre.as_deref()))
        }
        Command::Progress {
            title_id,
            episode,
            percent,
        } => {
            let ledger = record_watch(store, &title_id, episode, percent)?;
            print_json(&ledger)
        }
        Command::History => print_json(&store.get_history()?),
        Command::SetVideo {
            title_id,
            value,
            episode,
        } => {
            let mut titles = store.get_all_titles()?;
            let title = titles
                .iter_mut()
                .find(|title| title.id == title_id)
                .ok_or_else(|| CoreError::MissingTitle(title_id.clone()))?;
            set_video(title, VideoRef::parse(&value), episode)?;
            store.save_titles(&titles)?;
            Ok(())
        }
    }
}

fn find_title(store: &JsonFileStore, title_id: &str) -> Result<Title> {
    store
        .get_all_titles()?
        .into_iter()
        .find(|title| title.id == title_id)
        .ok_or_else(|| CoreError::MissingTitle(title_id.to_owned()).into())
}

/// Attaches `video_ref` to the title, or to one episode of it. A title that
/// only declares `totalEpisodes` gets explicit records for that range first,
/// so the episode list keeps every declared number.
fn set_video(title: &mut Title, video_ref: Option<VideoRef>, episode: Option<i64>) -> Result<()> {
    let Some(number) = episode else {
        title.video_url = video_ref;
        return Ok(());
    };
    if number < 1 {
        bail!("episode numbers start at 1, got {number}");
    }

    if title.episodes.is_empty() {
        title.episodes = declared_range(title)
            .map(|existing| Episode::new(existing, None))
            .collect();
    }

    match title
        .episodes
        .iter_mut()
        .find(|existing| existing.number() == Some(number))
    {
        Some(existing) => existing.video_url = video_ref,
        None => title.episodes.push(Episode::new(number, video_ref)),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{text}");
    Ok(())
}
