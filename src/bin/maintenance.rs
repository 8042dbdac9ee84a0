use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use backoffice::{
    auth::{password, Role},
    config::AppConfig,
    db,
    models::{NewCompany, NewProfile},
    schema::{companies, profiles},
};

const USAGE: &str = "Usage: maintenance create-company <name> <admin-email> <password>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-company") => match &args[1..] {
            [name, email, password] => create_company(name, email, password)?,
            _ => {
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        },
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Bootstraps a company and its first super-admin.
fn create_company(name: &str, email: &str, password: &str) -> Result<()> {
    let name = name.trim();
    let email = email.trim().to_ascii_lowercase();
    if name.is_empty() {
        bail!("company name must not be empty");
    }
    if !email.contains('@') {
        bail!("admin email must be a valid address");
    }
    if password.chars().count() < password::MIN_PASSWORD_LENGTH {
        bail!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LENGTH
        );
    }

    let config = AppConfig::from_env()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        println!("Applied {applied} migrations.");
    }
    let mut conn = pool.get().context("failed to get database connection")?;

    let company = NewCompany {
        id: Uuid::new_v4(),
        name: name.to_string(),
    };
    let admin = NewProfile {
        id: Uuid::new_v4(),
        company_id: company.id,
        email: email.clone(),
        full_name: email.clone(),
        password_hash: Some(password::hash_password(password)?),
        role: Role::SuperAdmin.as_str().to_string(),
    };

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(companies::table)
            .values(&company)
            .execute(conn)?;
        diesel::insert_into(profiles::table)
            .values(&admin)
            .execute(conn)?;
        Ok(())
    })
    .context("failed to create company")?;

    println!("Created company {} ({})", name, company.id);
    println!("Super-admin {} ({})", email, admin.id);
    Ok(())
}
