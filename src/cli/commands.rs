use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agathon", version, about = "Agathon AI tutoring server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Chat with the tutor through a running server
    Chat {
        /// Base URL of the server
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        /// Bearer token to authenticate with
        #[arg(short, long)]
        token: Option<String>,
        /// Guide with questions instead of giving answers
        #[arg(long)]
        socratic: bool,
        /// Text description of the current canvas
        #[arg(long)]
        canvas: Option<String>,
    },

    /// Print the instruction sent to the image model
    Prompt {
        /// feedback, suggest or answer
        #[arg(short, long, default_value = "feedback")]
        mode: String,
        /// auto or voice
        #[arg(short, long, default_value = "auto")]
        source: String,
        #[arg(long)]
        socratic: bool,
        /// Optional tutor prompt from the student
        prompt: Option<String>,
    },

    /// Manage user profiles, credits and plans
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Search or sync a user's knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Inspect saved whiteboards
    Whiteboard {
        #[command(subcommand)]
        action: WhiteboardAction,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Show a profile, creating a free one if missing
    Show { user: String },

    /// Add (or with a negative amount, remove) credits
    Grant {
        user: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },

    /// Change the plan tier and status
    SetPlan {
        user: String,
        /// free, premium or enterprise
        #[arg(short, long)]
        tier: String,
        /// active, inactive, canceled or past_due
        #[arg(short, long, default_value = "active")]
        status: String,
        /// Plan expires this many days from now
        #[arg(long)]
        days: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum KnowledgeAction {
    /// Run the keyword search used for tutoring context
    Search { user: String, query: String },

    /// Pull documents from the user's connected accounts
    Sync {
        user: String,
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Register a connected account id for a user
    AddAccount {
        user: String,
        /// Connected account id issued by the connector service
        id: String,
        /// e.g. googledrive or googleclassroom
        #[arg(short, long)]
        provider: String,
    },
}

#[derive(Subcommand)]
pub enum WhiteboardAction {
    /// List a user's whiteboards
    List {
        user: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Print a whiteboard's stored snapshot
    Show { user: String, id: Uuid },
}
