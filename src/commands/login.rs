use anyhow::{Context, Result};
use ipagrab::LoginOutcome;
use std::io::{self, Write};

pub fn run(email: Option<String>, auth_code: Option<String>) -> Result<()> {
    let store = super::open_store()?;

    let email = match email {
        Some(email) => email,
        None => {
            print!("Apple ID: ");
            io::stdout().flush()?;
            let mut email = String::new();
            io::stdin().read_line(&mut email)?;
            email.trim().to_string()
        }
    };
    if email.is_empty() {
        anyhow::bail!("Apple ID cannot be empty");
    }

    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    println!();
    println!("Authenticating...");

    let mut auth_code = auth_code;
    loop {
        match store.login(&email, &password, auth_code.as_deref())? {
            LoginOutcome::Authenticated(account) => {
                println!("✓ Signed in as {}", account.email);
                if !account.name.is_empty() {
                    println!();
                    println!("  Name:       {}", account.name);
                }
                if let Ok(country) = account.country_code() {
                    println!("  Storefront: {}", country);
                }
                return Ok(());
            }
            LoginOutcome::VerificationRequired { prompt } => {
                println!();
                println!("Two-factor authentication required.");
                println!("({})", prompt);
                println!();
                print!("Verification code: ");
                io::stdout().flush()?;
                let mut code = String::new();
                io::stdin().read_line(&mut code)?;
                let code = code.trim().to_string();
                if code.is_empty() {
                    anyhow::bail!("Verification code cannot be empty");
                }
                auth_code = Some(code);
            }
        }
    }
}

/// Logout - drop the stored account and session cookies
pub fn run_logout() -> Result<()> {
    let store = super::open_store()?;

    if !store.is_authenticated() {
        println!("You are not currently signed in.");
        return Ok(());
    }

    store.logout()?;

    println!("✓ Signed out");
    println!();
    println!("Your stored credentials and session cookies have been removed.");
    println!("To sign in again, run: ipagrab login");

    Ok(())
}
