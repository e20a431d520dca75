//! Signed-in user as reported by the auth provider.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
  pub uid: String,
  pub display_name: Option<String>,
  pub email: Option<String>,
}

impl UserSession {
  pub fn new(uid: impl Into<String>) -> Self {
    Self {
      uid: uid.into(),
      display_name: None,
      email: None,
    }
  }
}

/// Source of the current session. Page logic only reads it.
pub trait AuthProvider: Send + Sync {
  fn current_session(&self) -> Option<UserSession>;

  fn sign_out(&self) -> Result<()>;
}

/// Session fixed at startup (from the command line).
pub struct StaticAuth {
  session: Mutex<Option<UserSession>>,
}

impl StaticAuth {
  pub fn new(session: Option<UserSession>) -> Self {
    Self {
      session: Mutex::new(session),
    }
  }
}

impl AuthProvider for StaticAuth {
  fn current_session(&self) -> Option<UserSession> {
    self.session.lock().ok().and_then(|s| s.clone())
  }

  fn sign_out(&self) -> Result<()> {
    let mut session = self
      .session
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if let Some(s) = session.take() {
      info!(uid = %s.uid, "Signed out");
    }
    Ok(())
  }
}
