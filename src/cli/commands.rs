// src/cli/commands.rs
use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::core::config::{ConfigError, DatabaseSettings};
use crate::core::roles;

/// Connection options shared by every command that touches the database
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Database type (mysql or sqlite)
    #[arg(long = "dbtype", env = "DB_TYPE")]
    pub db_type: String,

    /// Database server
    #[arg(long = "dbserver", env = "DB_SERVER", default_value = "localhost")]
    pub db_server: String,

    /// Database name (mysql)
    #[arg(long = "dbname", env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Database user (mysql)
    #[arg(long = "dbuser", env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database user password (mysql)
    #[arg(long = "dbpassword", env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database file (sqlite)
    #[arg(long = "dbfile", env = "DB_FILE")]
    pub db_file: Option<PathBuf>,
}

impl DbArgs {
    pub fn settings(&self) -> Result<DatabaseSettings, ConfigError> {
        DatabaseSettings::from_parts(
            &self.db_type,
            Some(&self.db_server),
            self.db_name.as_deref(),
            self.db_user.as_deref(),
            self.db_password.as_deref(),
            self.db_file.clone(),
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Create a user with a generated password
    CreateUser {
        #[command(flatten)]
        db: DbArgs,

        /// Email address of the new user
        #[arg(long, required = true)]
        email: String,

        /// The name of the role the user is added to
        #[arg(long, default_value = roles::USER)]
        role: String,
    },

    /// Replace a user's password with a generated one
    ResetUser {
        #[command(flatten)]
        db: DbArgs,

        /// Email address of the user
        #[arg(long, required = true)]
        email: String,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Database maintenance
    Db {
        #[command(flatten)]
        db: DbArgs,

        /// Perform database migrations
        #[arg(long)]
        migrate: bool,

        /// Initialize roles and other stuff
        #[arg(long)]
        init: bool,

        /// List applied and pending migrations
        #[arg(long)]
        status: bool,
    },

    /// Print random passwords without touching the database
    GeneratePassword {
        /// Password length (defaults to DEFAULT_PASSWORD_LENGTH or 16)
        #[arg(long, short, allow_negative_numbers = true)]
        length: Option<i64>,

        /// Characters to draw from (duplicates are ignored)
        #[arg(long, short)]
        charset: Option<String>,

        /// Number of passwords to print
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
    },
}
