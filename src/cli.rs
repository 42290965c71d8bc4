use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    version,
    about = "Index a directory of text, PDF, DOCX and image files and search it by meaning"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Choose the directory to index and its file filters
    Init(InitArgs),
    /// Bring the index up to date with the files on disk
    Sync,
    /// Search indexed documents by text or by image
    Search(SearchArgs),
    /// List indexed documents
    Docs(DocsArgs),
    /// Remove one document from the index
    Forget {
        /// Path of the document as listed by `docsift docs`
        path: String,
    },
    /// Show index statistics
    Status(StatusArgs),
    /// Read and change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Init --

#[derive(Debug, Parser)]
pub struct InitArgs {
    /// Directory to index
    pub root: PathBuf,

    /// Comma-separated extension whitelist (e.g. txt,md,pdf)
    #[arg(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Glob pattern of paths to skip, relative to the root (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query; omit when searching with --image
    #[arg(required_unless_present = "image")]
    pub query: Option<String>,

    /// Search with an image file instead of text
    #[arg(long, conflicts_with = "query")]
    pub image: Option<PathBuf>,

    /// Number of documents to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long, conflicts_with = "files")]
    pub json: bool,

    /// Output only file paths (one per line)
    #[arg(long)]
    pub files: bool,
}

// -- Docs --

#[derive(Debug, Parser)]
pub struct DocsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print one setting
    Get {
        key: String,
    },
    /// Change one setting
    Set {
        key: String,
        value: String,
    },
    /// Remove a stored setting so its default applies again
    Unset {
        key: String,
    },
    /// Print every stored setting
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docsift",
            &mut std::io::stdout(),
        );
    }
}
