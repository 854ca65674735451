use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use appwall_core::anticensor::{DialStrategy, RetryStrategy};
use appwall_core::status::Override;
use policy_engine::{BlockType, Filter, FirewallFilter, TopLevelFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "appwall",
    version,
    about = "Per-app firewall and anti-censorship policy control"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
    /// Inspect and change per-app firewall status
    Apps {
        #[command(subcommand)]
        action: AppsCommand,
    },
    /// Apply one block type to every app matching the filter
    Bulk {
        block_type: BlockType,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show or select the anti-censorship dial strategy
    Dial { strategy: Option<DialStrategy> },
    /// Show or select the anti-censorship retry strategy
    Retry { strategy: Option<RetryStrategy> },
    Status,
}

#[derive(Subcommand, Debug)]
enum AppsCommand {
    /// Merge packages from a JSON inventory file
    Import { file: PathBuf },
    Remove { package: String },
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Flip the Wi-Fi block for an app (uid or package name)
    Wifi {
        target: String,
        #[arg(long)]
        yes: bool,
    },
    /// Flip the mobile data block for an app (uid or package name)
    Mobile {
        target: String,
        #[arg(long)]
        yes: bool,
    },
    /// Toggle an override; selecting the active one clears it
    Override {
        target: String,
        selected: Override,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(long, default_value_t = TopLevelFilter::All)]
    class: TopLevelFilter,
    #[arg(long, default_value_t = FirewallFilter::All)]
    firewall: FirewallFilter,
    #[arg(long = "category")]
    categories: Vec<String>,
    #[arg(long, default_value = "")]
    search: String,
}

impl FilterArgs {
    fn into_filter(self) -> Filter {
        Filter {
            top_level: self.class,
            firewall: self.firewall,
            categories: self.categories.into_iter().collect(),
            search: self.search,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path, force } => init_config(path, force),
        Commands::Config { print } => {
            if print {
                commands::config::print_effective(cli.config)
            } else {
                Ok(())
            }
        }
        Commands::Apps { action } => {
            let action = match action {
                AppsCommand::Import { file } => commands::apps::AppsAction::Import { file },
                AppsCommand::Remove { package } => commands::apps::AppsAction::Remove { package },
                AppsCommand::List { filter, json } => commands::apps::AppsAction::List {
                    filter: filter.into_filter(),
                    json,
                },
                AppsCommand::Wifi { target, yes } => commands::apps::AppsAction::Toggle {
                    target,
                    action: policy_engine::FirewallAction::ToggleWifi,
                    yes,
                },
                AppsCommand::Mobile { target, yes } => commands::apps::AppsAction::Toggle {
                    target,
                    action: policy_engine::FirewallAction::ToggleMobileData,
                    yes,
                },
                AppsCommand::Override {
                    target,
                    selected,
                    yes,
                } => commands::apps::AppsAction::Toggle {
                    target,
                    action: policy_engine::FirewallAction::SetOverride(selected),
                    yes,
                },
            };
            commands::apps::execute(cli.config, action)
        }
        Commands::Bulk {
            block_type,
            filter,
            yes,
            json,
        } => commands::bulk::execute(commands::bulk::BulkInputs {
            config_path: cli.config,
            block_type,
            filter: filter.into_filter(),
            confirmed: yes,
            json,
        }),
        Commands::Dial { strategy } => commands::anticensor::dial(cli.config, strategy),
        Commands::Retry { strategy } => commands::anticensor::retry(cli.config, strategy),
        Commands::Status => commands::status::execute(cli.config),
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let paths = appwall_core::config::ConfigPaths::resolve()?;
    let config_path = path.unwrap_or(paths.config_path);
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let config = appwall_core::config::Config::default_config();
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());
    Ok(())
}
