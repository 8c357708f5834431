//! Session commands.
//!
//! # Usage
//!
//! ```bash
//! BRICKYARD_PASSWORD=... brickyard login -e emmet@bricks.example
//! echo "$PASSWORD" | brickyard login -e emmet@bricks.example
//! brickyard whoami
//! brickyard logout
//! ```

use std::io::BufRead;

use brickyard_client::{AppState, SessionError, Toast};
use brickyard_core::{Email, EmailError};
use secrecy::SecretString;
use thiserror::Error;

use super::report;

/// Environment variable checked for the password before reading stdin.
const PASSWORD_ENV: &str = "BRICKYARD_PASSWORD";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("Failed to read password: {0}")]
    Password(#[from] std::io::Error),

    #[error("A password is required")]
    EmptyPassword,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Sign in with `email`.
pub async fn login(app: &AppState, email: &str) -> Result<(), AuthError> {
    let email = Email::parse(email)?;
    let password = read_password()?;

    // Status and connectivity failures were already shown by the client.
    let user = app.session().login(&email, &password).await?;

    let name = user.name.as_deref().unwrap_or(email.as_str());
    report(app, Some(Toast::success(format!("Signed in as {name}"))));
    Ok(())
}

/// Sign out.
pub fn logout(app: &AppState) -> Result<(), AuthError> {
    app.session().logout()?;
    report(app, Some(Toast::success("Signed out")));
    Ok(())
}

/// Print the signed-in user.
#[allow(clippy::print_stdout)]
pub fn whoami(app: &AppState) {
    match app.session().current_user() {
        Some(user) => {
            let email = user.email.as_deref().unwrap_or("-");
            let role = if user.is_admin { " (admin)" } else { "" };
            println!("{} <{email}>{role}", user.id);
        }
        None => println!("Not signed in"),
    }
}

fn read_password() -> Result<SecretString, AuthError> {
    if let Ok(password) = std::env::var(PASSWORD_ENV)
        && !password.is_empty()
    {
        return Ok(SecretString::from(password));
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(AuthError::EmptyPassword);
    }
    Ok(SecretString::from(password.to_owned()))
}
