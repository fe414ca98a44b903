use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use padel_core::auth::OAuthProvider;

#[derive(Parser)]
#[command(name = "padel")]
#[command(about = "Organize padel matches from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// CLI profile name for Supabase configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign up, sign in and inspect the current session
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Manage matches
    #[command(alias = "m")]
    Matches {
        #[command(subcommand)]
        command: MatchCommands,
    },
    /// Manage the to-do list
    Todos {
        #[command(subcommand)]
        command: TodoCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderArg {
    Google,
    Facebook,
}

impl From<ProviderArg> for OAuthProvider {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Google => Self::Google,
            ProviderArg::Facebook => Self::Facebook,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Create an account with email and password
    Signup {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign in with email and password and store the session in the keychain
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Print the authorization URL for a third-party provider
    Oauth {
        #[arg(value_enum)]
        provider: ProviderArg,
        /// Where the provider should send the browser afterwards
        #[arg(long, value_name = "URL")]
        redirect_to: Option<String>,
    },
    /// Show auth status for the profile
    Status,
    /// Sign out and clear the stored session
    Logout,
}

#[derive(Subcommand)]
pub enum MatchCommands {
    /// List matches, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a new match
    #[command(alias = "new")]
    Add {
        /// Match date, e.g. 2024-05-01T19:30 or 2024-05-01
        #[arg(long, value_name = "DATE")]
        date: String,
        #[arg(long, value_name = "PLACE")]
        location: String,
        /// Player names in order; the first two play for team A
        #[arg(long = "player", value_name = "NAME", num_args = 1)]
        players: Vec<String>,
        #[arg(long, value_name = "GAMES")]
        score_a: Option<String>,
        #[arg(long, value_name = "GAMES")]
        score_b: Option<String>,
    },
    /// Set the final score of a match
    Score {
        /// Match ID or unique ID prefix
        id: String,
        #[arg(long, value_name = "GAMES")]
        score_a: u32,
        #[arg(long, value_name = "GAMES")]
        score_b: u32,
    },
    /// Delete a match
    Delete {
        /// Match ID or unique ID prefix
        id: String,
    },
    /// Keep the list on screen and redraw it on every change
    Watch,
}

#[derive(Subcommand)]
pub enum TodoCommands {
    /// List to-dos, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a to-do
    Add {
        /// To-do title
        title: Vec<String>,
    },
    /// Flip a to-do between open and done
    Toggle {
        /// To-do ID or unique ID prefix
        id: String,
    },
    /// Delete a to-do
    Delete {
        /// To-do ID or unique ID prefix
        id: String,
    },
    /// Keep the list on screen and redraw it on every change
    Watch,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Table holding matches
        #[arg(long, value_name = "TABLE")]
        matches_table: Option<String>,
        /// Table holding to-dos
        #[arg(long, value_name = "TABLE")]
        todos_table: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
