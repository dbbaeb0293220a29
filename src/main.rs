use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod eid;
mod index;
mod lock;
mod reconcile;
mod search;
mod storage;
#[cfg(test)]
mod tests;

use app::{backend::AppBackend, local::AppLocal, AppFactory};
use catalog::{ItemCreate, ItemUpdate, Pagination};
use cli::{CategoryArgs, Command, ItemArgs};
use lock::FileLock;

/// Split a comma separated keyword list.
pub fn parse_keywords(keywords: String) -> Vec<String> {
    keywords
        .split(',')
        .map(|keyword| keyword.trim().to_string())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();
    let paths = AppFactory::get_paths()?;

    let lock = if args.command.is_mutating() {
        Some(FileLock::try_acquire(&paths.data_path).context("couldnt lock catalog")?)
    } else {
        None
    };

    let app = AppFactory::create_local_app(&paths)?;

    // parked deltas go first so they stay ahead of this command's deltas
    if lock.is_some() && !matches!(args.command, Command::Replay { .. }) {
        let replayed = app.replay_failed();
        if replayed > 0 {
            log::info!("replaying {replayed} parked index changes");
        }
    }

    let result = run(&app, args.command);

    // deltas still queued must reach the index before exit
    app.shutdown();
    drop(lock);

    result
}

fn run(app: &AppLocal, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Item { action } => run_item(app, action),
        Command::Category { action } => run_category(app, action),

        Command::Search {
            query,
            category,
            page,
            size,
        } => {
            let pagination = Pagination::new(
                page,
                size.unwrap_or(app.config().search.default_page_size),
            );

            let results = match category {
                Some(category_id) => {
                    app.search_by_title_and_category(&query, category_id, &pagination)?
                }
                None => app.search_by_title(&query, &pagination)?,
            };
            print_json(&results)
        }

        Command::Query { text } => {
            let results = app.search_index(&text)?;
            print_json(&results)
        }

        Command::Resync {} => print_json(&app.resync()),

        Command::Replay { list } => {
            if list {
                return print_json(&app.failed_deltas());
            }

            let count = app.replay_failed();
            app.flush();
            println!("{count} index changes replayed");
            let left = app.failed_deltas().len();
            if left > 0 {
                log::warn!("{left} index changes failed again");
            }
            Ok(())
        }
    }
}

fn run_item(app: &AppLocal, action: ItemArgs) -> anyhow::Result<()> {
    match action {
        ItemArgs::Add {
            title,
            description,
            keywords,
        } => {
            let item = app.create_item(ItemCreate {
                title,
                description,
                keywords: keywords.map(parse_keywords),
            })?;
            print_json(&item)
        }
        ItemArgs::Update {
            id,
            title,
            description,
            keywords,
            append_keywords,
            remove_keywords,
        } => {
            let update = ItemUpdate {
                title,
                description,
                keywords: keywords.map(parse_keywords),
                append_keywords: append_keywords.map(parse_keywords),
                remove_keywords: remove_keywords.map(parse_keywords),
            };

            if update.is_empty() {
                println!("This update request does nothing");
                return Ok(());
            }

            print_json(&app.update_item(id, update)?)
        }
        ItemArgs::Delete { id } => {
            let item = app.delete_item(id)?;
            println!("item {} removed", item.id);
            Ok(())
        }
        ItemArgs::Show { id } => print_json(&app.item(id)?),
        ItemArgs::Place { id, category } => print_json(&app.add_item_to_category(id, category)?),
        ItemArgs::Unplace { id } => print_json(&app.remove_item_from_category(id)?),
    }
}

fn run_category(app: &AppLocal, action: CategoryArgs) -> anyhow::Result<()> {
    match action {
        CategoryArgs::Add { title } => print_json(&app.create_category(title)?),
        CategoryArgs::Rename { id, title } => print_json(&app.rename_category(id, title)?),
        CategoryArgs::Delete { id } => {
            let detached = app.delete_category(id)?;
            println!(
                "category {} removed, {} items detached, {} categories moved up",
                detached.category,
                detached.detached_items.len(),
                detached.promoted_children.len()
            );
            Ok(())
        }
        CategoryArgs::Attach { id, parent } => {
            print_json(&app.add_category_to_category(id, parent)?)
        }
        CategoryArgs::Detach { id } => print_json(&app.remove_category_from_category(id)?),
        CategoryArgs::List {} => print_json(&app.categories()?),
    }
}
