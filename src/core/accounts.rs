//! Customer accounts - signup, login, profiles, and password resets.
//!
//! Form input is validated locally before the store is touched. Passwords are stored
//! only as Argon2 hashes and never returned. A successful login yields an explicit
//! [`Session`] that the other storefront operations take as a parameter.

use crate::{
    errors::{Error, Result},
    models::{UserProfile, UserRecord},
    store::{DocumentStore, UpdateBatch, paths, read_as, read_children},
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, info, instrument};

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex")
});
#[allow(clippy::expect_used)]
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{4,}$").expect("Invalid regex"));
#[allow(clippy::expect_used)]
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(?:[-\s]\d{4})?$").expect("Invalid regex"));
#[allow(clippy::expect_used)]
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\+\d{1,2}\s)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$").expect("Invalid regex")
});

const PASSWORD_SPECIALS: &str = "@$!%*?&";
const MIN_PASSWORD_LEN: usize = 8;

/// What a session is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

/// The signed-in user, passed explicitly to operations that need an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: Role,
}

impl Session {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// # Errors
    /// Returns `Error::Forbidden` unless the session has the admin role.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }
}

/// Signup form as entered by the customer.
#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub phone: String,
}

/// Profile fields to change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

fn invalid(field: &'static str, message: &str) -> Error {
    Error::Validation {
        field,
        message: message.to_string(),
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "is required"));
    }
    Ok(())
}

/// Checks a password against the strength rules: at least eight characters with
/// a lowercase letter, an uppercase letter, a digit, and one of `@$!%*?&`.
pub fn validate_password(password: &str, confirm: &str) -> Result<()> {
    require("password", password)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid("password", "must be at least 8 characters"));
    }
    let strong = password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if !strong {
        return Err(invalid(
            "password",
            "must contain an uppercase letter, a lowercase letter, a number, and a special character",
        ));
    }
    if password != confirm {
        return Err(invalid("confirm_password", "passwords must match"));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    require("email", email)?;
    if !EMAIL_RE.is_match(email.trim()) {
        return Err(invalid("email", "invalid email format"));
    }
    Ok(())
}

fn validate_zip(zip: &str) -> Result<()> {
    require("zip", zip)?;
    if !ZIP_RE.is_match(zip.trim()) {
        return Err(invalid("zip", "invalid ZIP code format"));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<()> {
    require("phone", phone)?;
    if !PHONE_RE.is_match(phone.trim()) {
        return Err(invalid("phone", "invalid phone number format"));
    }
    Ok(())
}

/// Validates every field of a signup form without touching the store.
///
/// # Errors
/// Returns `Error::Validation` naming the first offending field.
pub fn validate_signup(form: &SignupForm) -> Result<()> {
    require("first_name", &form.first_name)?;
    require("last_name", &form.last_name)?;
    validate_email(&form.email)?;
    require("username", &form.username)?;
    if !USERNAME_RE.is_match(&form.username) {
        return Err(invalid(
            "username",
            "must be at least 4 characters of letters, numbers, and underscores",
        ));
    }
    validate_password(&form.password, &form.confirm_password)?;
    require("address", &form.address)?;
    require("city", &form.city)?;
    require("state", &form.state)?;
    validate_zip(&form.zip)?;
    validate_phone(&form.phone)
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::PasswordHash)
}

fn verify_password(password: &str, hash: &str) -> Result<()> {
    let parsed = PasswordHash::new(hash).map_err(|_| Error::InvalidCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::InvalidCredentials)
}

async fn all_users<S: DocumentStore>(store: &S) -> Result<Vec<UserProfile>> {
    let users: Vec<(String, UserProfile)> = read_children(store, &paths::users()).await?;
    Ok(users
        .into_iter()
        .map(|(username, mut profile)| {
            profile.username = username;
            profile
        })
        .collect())
}

/// Registers a new customer.
///
/// # Errors
/// - `Error::Validation` for malformed input, before any store call
/// - `Error::UsernameTaken` (also for a name differing only in case) or
///   `Error::EmailTaken` found by the pre-check read, before any write
#[instrument(skip_all, fields(username = %form.username))]
pub async fn signup<S: DocumentStore>(store: &S, form: &SignupForm) -> Result<UserProfile> {
    validate_signup(form)?;
    let username = form.username.trim();
    let email = form.email.trim();

    let user_path = paths::user(username)?;
    if store.read(&user_path).await?.is_some() {
        return Err(Error::UsernameTaken {
            username: username.to_string(),
        });
    }
    let existing = all_users(store).await?;
    if existing
        .iter()
        .any(|u| u.username.eq_ignore_ascii_case(username))
    {
        return Err(Error::UsernameTaken {
            username: username.to_string(),
        });
    }
    if existing.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
        return Err(Error::EmailTaken {
            email: email.to_string(),
        });
    }

    let profile = UserProfile {
        username: username.to_string(),
        first_name: form.first_name.trim().to_string(),
        last_name: form.last_name.trim().to_string(),
        email: email.to_string(),
        phone: form.phone.trim().to_string(),
        address: form.address.trim().to_string(),
        city: form.city.trim().to_string(),
        state: form.state.trim().to_string(),
        zip: form.zip.trim().to_string(),
        created_at: Utc::now(),
    };
    let record = UserRecord {
        profile: profile.clone(),
        password_hash: hash_password(&form.password)?,
    };
    store
        .write(&user_path, serde_json::to_value(&record)?)
        .await?;
    info!("Registered customer {}", username);
    Ok(profile)
}

/// Verifies credentials and opens a session. Usernames listed in `admins` get the
/// admin role.
///
/// # Errors
/// Returns `Error::InvalidCredentials` for an unknown user or a wrong password alike.
#[instrument(skip_all, fields(username = %username))]
pub async fn login<S: DocumentStore>(
    store: &S,
    username: &str,
    password: &str,
    admins: &[String],
) -> Result<Session> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(Error::InvalidCredentials);
    }
    let path = paths::user(username).map_err(|_| Error::InvalidCredentials)?;
    let record: UserRecord = read_as(store, &path)
        .await?
        .ok_or(Error::InvalidCredentials)?;
    verify_password(password, &record.password_hash)?;

    let role = if admins.iter().any(|a| a == username) {
        Role::Admin
    } else {
        Role::Customer
    };
    debug!("Login succeeded with role {:?}", role);
    Ok(Session {
        username: username.to_string(),
        role,
    })
}

/// Reads a customer's profile.
///
/// # Errors
/// Returns `Error::UserNotFound` when no such user exists.
pub async fn get_profile<S: DocumentStore>(store: &S, username: &str) -> Result<UserProfile> {
    let profile: Option<UserProfile> = read_as(store, &paths::user(username)?).await?;
    let mut profile = profile.ok_or_else(|| Error::UserNotFound {
        username: username.to_string(),
    })?;
    profile.username = username.to_string();
    Ok(profile)
}

/// Applies a partial profile update for the session's user. The cart and password
/// hash stored alongside the profile are left alone.
///
/// # Errors
/// - `Error::NoChanges` when the update is empty or matches the stored profile
/// - `Error::Validation` for a malformed email, ZIP, phone, or a blanked field
/// - `Error::EmailTaken` when the new email belongs to someone else
pub async fn update_profile<S: DocumentStore>(
    store: &S,
    session: &Session,
    update: ProfileUpdate,
) -> Result<UserProfile> {
    let current = get_profile(store, &session.username).await?;
    let user = paths::user(&session.username)?;

    let fields: [(&str, &'static str, Option<String>, &str); 8] = [
        ("firstName", "first_name", update.first_name, current.first_name.as_str()),
        ("lastName", "last_name", update.last_name, current.last_name.as_str()),
        ("email", "email", update.email, current.email.as_str()),
        ("phone", "phone", update.phone, current.phone.as_str()),
        ("address", "address", update.address, current.address.as_str()),
        ("city", "city", update.city, current.city.as_str()),
        ("state", "state", update.state, current.state.as_str()),
        ("zip", "zip", update.zip, current.zip.as_str()),
    ];

    let mut batch = UpdateBatch::new();
    let mut new_email = None;
    for (key, field, value, old) in fields {
        let Some(value) = value.map(|v| v.trim().to_string()) else {
            continue;
        };
        if value == old {
            continue;
        }
        match key {
            "email" => {
                validate_email(&value)?;
                new_email = Some(value.clone());
            }
            "zip" => validate_zip(&value)?,
            "phone" => validate_phone(&value)?,
            _ => require(field, &value)?,
        }
        batch = batch.set(user.child(key)?, Value::String(value));
    }
    if batch.is_empty() {
        return Err(Error::NoChanges);
    }
    if let Some(email) = new_email {
        let taken = all_users(store).await?.into_iter().any(|u| {
            u.username != session.username && u.email.eq_ignore_ascii_case(&email)
        });
        if taken {
            return Err(Error::EmailTaken { email });
        }
    }

    store.update(batch).await?;
    get_profile(store, &session.username).await
}

/// Sets a new password for the user identified by exact username, or failing that
/// by email matched case-insensitively.
///
/// # Errors
/// - `Error::Validation` when the new password is weak or unconfirmed
/// - `Error::UserNotFound` when no user matches the identifier
#[instrument(skip_all)]
pub async fn reset_password<S: DocumentStore>(
    store: &S,
    identifier: &str,
    new_password: &str,
    confirm_password: &str,
) -> Result<()> {
    let identifier = identifier.trim();
    require("identifier", identifier)?;
    validate_password(new_password, confirm_password)?;

    let users = all_users(store).await?;
    let user = users
        .iter()
        .find(|u| u.username == identifier)
        .or_else(|| users.iter().find(|u| u.email.eq_ignore_ascii_case(identifier)))
        .ok_or_else(|| Error::UserNotFound {
            username: identifier.to_string(),
        })?;

    let hash = hash_password(new_password)?;
    store
        .write(
            &paths::user(&user.username)?.child("passwordHash")?,
            Value::String(hash),
        )
        .await?;
    info!("Password reset for {}", user.username);
    Ok(())
}
