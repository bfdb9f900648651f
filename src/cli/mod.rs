// src/cli/mod.rs
use clap::Parser;

pub mod commands;
pub mod handlers;

pub use commands::{CliCommand, DbArgs};

#[derive(Parser, Debug)]
#[command(author, version, about = "Administer users, roles and schema of an identity database", long_about = None)]
pub struct Args {
    /// Command to execute
    #[command(subcommand)]
    pub command: CliCommand,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn argument_model_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_create_user() {
        let args = Args::try_parse_from([
            "identity_admin",
            "create-user",
            "--dbtype",
            "sqlite",
            "--dbfile",
            "identity.db",
            "--email",
            "ops@example.com",
        ])
        .unwrap();

        match args.command {
            CliCommand::CreateUser { db, email, role } => {
                assert_eq!(db.db_type, "sqlite");
                assert_eq!(email, "ops@example.com");
                assert_eq!(role, "User");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn generate_password_accepts_negative_length() {
        // rejected later by the generator, not by the parser
        let args =
            Args::try_parse_from(["identity_admin", "generate-password", "--length", "-5"]).unwrap();
        match args.command {
            CliCommand::GeneratePassword { length, count, .. } => {
                assert_eq!(length, Some(-5));
                assert_eq!(count, 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn db_verb_requires_dbtype() {
        std::env::remove_var("DB_TYPE");
        assert!(Args::try_parse_from(["identity_admin", "db", "--migrate"]).is_err());
    }
}
