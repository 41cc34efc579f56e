//! Shared test domain: a user with an email address.

#![allow(dead_code)]

use eventide::{Aggregate, Handle, Message};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Install a test-writer subscriber once; filtered by `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().compact().with_test_writer())
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    Created { email: String },
    EmailChanged { email: String },
}

impl Message for UserEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "user-created",
            Self::EmailChanged { .. } => "user-email-changed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserError {
    #[error("user already exists")]
    AlreadyExists,
    #[error("user does not exist")]
    Missing,
    #[error("email is unchanged")]
    Unchanged,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: Option<String>,
    pub changes: u32,
}

impl Aggregate for User {
    const KIND: &'static str = "user";
    type Error = UserError;
    type Event = UserEvent;
    type Id = String;

    fn apply(&mut self, event: &UserEvent) -> Result<(), UserError> {
        match event {
            UserEvent::Created { email } => {
                if self.email.is_some() {
                    return Err(UserError::AlreadyExists);
                }
                self.email = Some(email.clone());
            }
            UserEvent::EmailChanged { email } => {
                if self.email.is_none() {
                    return Err(UserError::Missing);
                }
                self.email = Some(email.clone());
                self.changes += 1;
            }
        }
        Ok(())
    }
}

pub struct Register {
    pub email: String,
}

pub struct ChangeEmail {
    pub email: String,
}

impl Handle<Register> for User {
    fn handle(&self, command: &Register) -> Result<Vec<UserEvent>, UserError> {
        if self.email.is_some() {
            return Err(UserError::AlreadyExists);
        }
        Ok(vec![UserEvent::Created {
            email: command.email.clone(),
        }])
    }
}

impl Handle<ChangeEmail> for User {
    fn handle(&self, command: &ChangeEmail) -> Result<Vec<UserEvent>, UserError> {
        match &self.email {
            None => Err(UserError::Missing),
            Some(current) if *current == command.email => Err(UserError::Unchanged),
            Some(_) => Ok(vec![UserEvent::EmailChanged {
                email: command.email.clone(),
            }]),
        }
    }
}

pub fn register(email: &str) -> Register {
    Register {
        email: email.to_string(),
    }
}

pub fn change_email(email: &str) -> ChangeEmail {
    ChangeEmail {
        email: email.to_string(),
    }
}
