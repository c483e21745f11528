use clap::Parser;
use multivault::cli::{self, Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { require_token, fec } => cli::cmd_init(&cli, require_token, fec),
        Commands::Status => cli::cmd_status(&cli),
        Commands::Get { ref output } => cli::cmd_get(&cli, output.as_ref()),
        Commands::Put { ref file } => cli::cmd_put(&cli, file.as_ref()),
        Commands::Passwd => cli::cmd_passwd(&cli),
        Commands::User { ref action } => cli::cmd_user(&cli, action),
        Commands::Token { ref action } => cli::cmd_token(&cli, action),
        Commands::Policy { ref action } => cli::cmd_policy(&cli, action),
        Commands::Migrate { ref legacy } => cli::cmd_migrate(&cli, legacy),
    };

    if let Err(e) = result {
        multivault::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
