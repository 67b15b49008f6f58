use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

mod commands;

/// ipagrab - download iOS app packages from the App Store
#[derive(Parser)]
#[command(name = "ipagrab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with an Apple ID
    Login {
        /// Apple ID email address
        #[arg(short, long)]
        email: Option<String>,

        /// Two-factor verification code, if you already have one
        #[arg(long)]
        auth_code: Option<String>,
    },

    /// Sign out and discard the stored session
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Search the App Store catalog
    Search {
        /// Search term
        term: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: u32,

        /// Include tvOS apps in the results
        #[arg(long)]
        include_tvos: bool,
    },

    /// Acquire a free-app license for the account
    Purchase {
        /// Numeric app id
        #[arg(short = 'i', long)]
        app_id: Option<u64>,

        /// Bundle identifier (e.g., com.example.notes)
        #[arg(short, long)]
        bundle_id: Option<String>,
    },

    /// List the version history of an app
    Versions {
        /// Numeric app id
        #[arg(short = 'i', long)]
        app_id: Option<u64>,

        /// Bundle identifier
        #[arg(short, long)]
        bundle_id: Option<String>,
    },

    /// Show metadata for specific versions of an app
    Metadata {
        /// Numeric app id
        #[arg(short = 'i', long)]
        app_id: Option<u64>,

        /// Bundle identifier
        #[arg(short, long)]
        bundle_id: Option<String>,

        /// External version ids to describe (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        version_ids: Vec<String>,
    },

    /// Download an IPA package
    Download {
        /// Numeric app id
        #[arg(short = 'i', long)]
        app_id: Option<u64>,

        /// Bundle identifier
        #[arg(short, long)]
        bundle_id: Option<String>,

        /// External version id (defaults to the latest build)
        #[arg(long)]
        version_id: Option<String>,

        /// Acquire a license first if the account lacks one
        #[arg(long)]
        purchase: bool,

        /// Copy the finished package to this path
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Login { email, auth_code } => commands::login::run(email, auth_code),
        Commands::Logout => commands::login::run_logout(),
        Commands::Whoami => commands::whoami::run(),
        Commands::Search {
            term,
            limit,
            include_tvos,
        } => commands::search::run(term, limit, include_tvos),
        Commands::Purchase { app_id, bundle_id } => commands::purchase::run(app_id, bundle_id),
        Commands::Versions { app_id, bundle_id } => commands::versions::run(app_id, bundle_id),
        Commands::Metadata {
            app_id,
            bundle_id,
            version_ids,
        } => commands::metadata::run(app_id, bundle_id, version_ids),
        Commands::Download {
            app_id,
            bundle_id,
            version_id,
            purchase,
            output,
        } => commands::download::run(app_id, bundle_id, version_id, purchase, output),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ipagrab", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
