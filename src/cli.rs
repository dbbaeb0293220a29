use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ItemArgs {
    /// Create an item
    Add {
        /// Item title
        #[clap(short, long)]
        title: String,

        /// Item description
        #[clap(short, long)]
        description: Option<String>,

        /// Comma separated keywords
        #[clap(short, long)]
        keywords: Option<String>,
    },
    /// Update an item
    Update {
        id: u64,

        /// Item title
        #[clap(short, long)]
        title: Option<String>,

        /// Item description
        #[clap(short, long)]
        description: Option<String>,

        /// Replace keywords
        #[clap(short, long)]
        keywords: Option<String>,

        /// Appends keywords
        #[clap(short = 'a', long)]
        append_keywords: Option<String>,

        /// Delete keywords
        #[clap(short = 'r', long)]
        remove_keywords: Option<String>,
    },
    /// Delete an item
    Delete { id: u64 },
    /// Print an item
    Show { id: u64 },
    /// Put an item into a leaf category
    Place {
        id: u64,

        #[clap(short, long)]
        category: u64,
    },
    /// Take an item out of its category
    Unplace { id: u64 },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryArgs {
    /// Create a root category
    Add { title: String },
    /// Rename a category
    Rename { id: u64, title: String },
    /// Delete a category. Items are detached, children move up one level.
    Delete { id: u64 },
    /// Make a category the child of another
    Attach {
        id: u64,

        #[clap(short, long)]
        parent: u64,
    },
    /// Move a category back to the root
    Detach { id: u64 },
    /// List all categories
    List {},
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage items
    Item {
        #[clap(subcommand)]
        action: ItemArgs,
    },
    /// Manage categories
    Category {
        #[clap(subcommand)]
        action: CategoryArgs,
    },
    /// Fuzzy search item titles in the catalog
    Search {
        query: String,

        /// Only search members of this category
        #[clap(short, long)]
        category: Option<u64>,

        /// Zero based page
        #[clap(short, long, default_value = "0")]
        page: usize,

        /// Page size. Defaults to search.default_page_size
        #[clap(short, long)]
        size: Option<usize>,
    },
    /// Query the external index and check it for drift
    Query { text: String },
    /// Rebuild the external index from the catalog
    Resync {},
    /// Re-send index changes that previously failed
    Replay {
        /// Only list them
        #[clap(short, long, default_value = "false")]
        list: bool,
    },
}

impl Command {
    /// Commands that write the catalog or the dead-letter file.
    pub fn is_mutating(&self) -> bool {
        match self {
            Command::Item { action } => !matches!(action, ItemArgs::Show { .. }),
            Command::Category { action } => !matches!(action, CategoryArgs::List {}),
            Command::Replay { list } => !list,
            Command::Search { .. } | Command::Query { .. } | Command::Resync {} => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let args =
            Args::try_parse_from(["kiosk-search", "search", "wifi 5", "-c", "2", "--size", "4"])
                .unwrap();
        match args.command {
            Command::Search {
                query,
                category,
                page,
                size,
            } => {
                assert_eq!(query, "wifi 5");
                assert_eq!(category, Some(2));
                assert_eq!(page, 0);
                assert_eq!(size, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_mutating_commands() {
        let parse = |argv: &[&str]| Args::try_parse_from(argv).unwrap().command;

        assert!(parse(&["kiosk-search", "item", "delete", "3"]).is_mutating());
        assert!(parse(&["kiosk-search", "category", "attach", "1", "-p", "2"]).is_mutating());
        assert!(!parse(&["kiosk-search", "item", "show", "3"]).is_mutating());
        assert!(!parse(&["kiosk-search", "replay", "--list"]).is_mutating());
        assert!(!parse(&["kiosk-search", "query", "wifi"]).is_mutating());
    }
}
