use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;

mod cli;
mod core;
mod crypto;
mod db;
mod models;

use crate::cli::{handlers, Args, CliCommand};
use crate::core::config::Config;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::load();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to set up logging: {}", e);
    }
    log::debug!("Loaded config: {:?}", config);

    if let Err(e) = run(args, &config).await {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args, config: &Config) -> Result<(), Box<dyn Error>> {
    match args.command {
        CliCommand::CreateUser { db, email, role } => {
            let db = handlers::open_database(&db).await?;
            handlers::handle_create_user(&db, config, &email, &role).await
        }
        CliCommand::ResetUser { db, email, yes } => {
            let db = handlers::open_database(&db).await?;
            handlers::handle_reset_user(&db, config, &email, yes).await
        }
        CliCommand::Db { db, migrate, init, status } => {
            if !migrate && !init && !status {
                println!("Invalid parameters");
                return Err("nothing to do, pass --migrate, --init or --status".into());
            }
            let db = handlers::open_database(&db).await?;
            handlers::handle_db(&db, migrate, init, status).await
        }
        CliCommand::GeneratePassword { length, charset, count } => {
            handlers::handle_generate_password(config, length, charset.as_deref(), count)
        }
    }
}

// Log to LOG_FILE when configured, stderr otherwise
fn init_logging(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.log_level)
        .format_timestamp_secs()
        .format_module_path(true)
        .format_target(false);

    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}
