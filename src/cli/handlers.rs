// src/cli/handlers.rs
use std::error::Error;

use inquire::Confirm;

use crate::cli::DbArgs;
use crate::core::config::Config;
use crate::core::identity::{IdentityError, UserManager};
use crate::core::roles::{self, SeedOutcome};
use crate::crypto;
use crate::db::{migrations, Database, DatabaseBackend};

pub async fn open_database(args: &DbArgs) -> Result<Database, Box<dyn Error>> {
    let settings = args.settings()?;
    match Database::connect(&settings).await {
        Ok(db) => {
            log::debug!("Using {} backend", db.get_backend_type());
            Ok(db)
        }
        Err(e) => {
            log::error!("Connecting to {} failed: {}", settings.describe(), e);
            Err(Box::new(e))
        }
    }
}

fn print_errors(heading: &str, error: &IdentityError) {
    println!("❌ Errors occurred ({})!", heading);
    for description in error.descriptions() {
        println!("   {}", description);
    }
}

pub async fn handle_create_user<B: DatabaseBackend>(
    db: &B,
    config: &Config,
    email: &str,
    role: &str,
) -> Result<(), Box<dyn Error>> {
    let role = roles::check_role(Some(role))?;
    let manager = UserManager::new(db, config);
    let password = manager.generate_password()?;

    // user name and email are the same
    let user = match manager.create_user(email, email, &password).await {
        Ok(user) => user,
        Err(e) => {
            print_errors("create user", &e);
            return Err(format!("user {} was not created", email).into());
        }
    };

    println!("✅ New user created!");
    println!("User name: {}", user.user_name);
    println!("Password:  {}", password);

    if let Err(e) = manager.add_to_role(&user, role).await {
        print_errors("add to role", &e);
        return Err(format!("user {} was not added to role {}", user.user_name, role).into());
    }
    println!("✅ User added to role {}!", role);
    log::debug!("{} now holds roles {:?}", user.user_name, manager.roles_of(&user).await?);

    Ok(())
}

pub async fn handle_reset_user<B: DatabaseBackend>(
    db: &B,
    config: &Config,
    email: &str,
    skip_confirmation: bool,
) -> Result<(), Box<dyn Error>> {
    let manager = UserManager::new(db, config);

    let user = match manager.find_by_name(email).await? {
        Some(user) => user,
        None => {
            println!("❓ User {} not found!", email);
            return Err(format!("user {} not found", email).into());
        }
    };

    if !skip_confirmation {
        let confirmed = Confirm::new(&format!("Reset the password of {}?", user.user_name))
            .with_default(false)
            .prompt()?;
        if !confirmed {
            println!("Password of {} left unchanged.", user.user_name);
            return Ok(());
        }
    }

    match manager.reset_with_generated_password(&user).await {
        Ok(new_password) => {
            println!("✅ Password for {} reset!", user.user_name);
            println!("New password: {}", new_password);
            Ok(())
        }
        Err(e) => {
            print_errors("reset password", &e);
            Err(format!("password of {} was not reset", user.user_name).into())
        }
    }
}

pub async fn handle_db<B: DatabaseBackend>(
    db: &B,
    migrate: bool,
    init: bool,
    status: bool,
) -> Result<(), Box<dyn Error>> {
    if status {
        let applied = db.applied_migrations().await?;
        let pending = migrations::pending(db).await?;

        println!("Applied migrations: {}", applied.len());
        for id in &applied {
            println!("   {}", id);
        }
        println!("Pending migrations: {}", pending.len());
        for migration in &pending {
            println!("   {}", migration.id);
        }
    }

    // schema first, the role table must exist before seeding
    if migrate {
        let applied = migrations::migrate(db).await?;
        if applied.is_empty() {
            println!("✅ Database is up to date");
        } else {
            println!("✅ Applied {} migration(s): {}", applied.len(), applied.join(", "));
        }
    }

    if init {
        match roles::seed_roles(db).await? {
            SeedOutcome::Initialized => println!("✅ Initialized roles table"),
            SeedOutcome::AlreadyInitialized => println!("Roles table already initialized"),
        }
    }

    Ok(())
}

pub fn handle_generate_password(
    config: &Config,
    length: Option<i64>,
    charset: Option<&str>,
    count: usize,
) -> Result<(), Box<dyn Error>> {
    let length = length.unwrap_or(config.default_password_length);

    for _ in 0..count {
        println!("{}", crypto::generate_password(length, charset)?);
    }

    Ok(())
}
