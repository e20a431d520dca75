//! Route table and navigation requests.

use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::subscription::SubscriptionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  Home,
  Login,
  Plans,
  Pros,
  Clients,
  Interventions,
  Analytics,
  Support,
  Settings,
  RenewPlan,
}

impl Route {
  pub fn path(self) -> &'static str {
    match self {
      Self::Home => "/",
      Self::Login => "/login",
      Self::Plans => "/plans",
      Self::Pros => "/pros",
      Self::Clients => "/clients",
      Self::Interventions => "/interventions",
      Self::Analytics => "/analytics",
      Self::Support => "/support",
      Self::Settings => "/settings",
      Self::RenewPlan => "/re-new-plan",
    }
  }

  /// Resolve a location (query string allowed) to a route.
  pub fn from_path(location: &str) -> Option<Self> {
    let path = location.split('?').next().unwrap_or_default();
    let path = if path.len() > 1 {
      path.trim_end_matches('/')
    } else {
      path
    };

    match path {
      "/" | "" => Some(Self::Home),
      "/login" => Some(Self::Login),
      "/plans" => Some(Self::Plans),
      "/pros" => Some(Self::Pros),
      "/clients" => Some(Self::Clients),
      "/interventions" => Some(Self::Interventions),
      "/analytics" => Some(Self::Analytics),
      // Old sidebar links pointed at the misspelled path
      "/support" | "/supprot" => Some(Self::Support),
      "/settings" => Some(Self::Settings),
      "/re-new-plan" => Some(Self::RenewPlan),
      _ => None,
    }
  }
}

/// A request to move to another route.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
  pub route: Route,
  /// Query flags such as `expired=true`
  pub flags: Vec<&'static str>,
  /// Subscription shown as context on the destination page
  pub state: Option<SubscriptionRecord>,
  /// Replace the current history entry instead of pushing
  pub replace: bool,
}

impl Navigation {
  pub fn to(route: Route) -> Self {
    Self {
      route,
      flags: Vec::new(),
      state: None,
      replace: false,
    }
  }

  pub fn with_flag(mut self, flag: &'static str) -> Self {
    self.flags.push(flag);
    self
  }

  pub fn with_state(mut self, record: SubscriptionRecord) -> Self {
    self.state = Some(record);
    self
  }

  pub fn replacing(mut self) -> Self {
    self.replace = true;
    self
  }

  pub fn has_flag(&self, flag: &str) -> bool {
    self.flags.iter().any(|f| *f == flag)
  }
}

impl fmt::Display for Navigation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.route.path())?;
    for (i, flag) in self.flags.iter().enumerate() {
      let sep = if i == 0 { '?' } else { '&' };
      write!(f, "{}{}=true", sep, flag)?;
    }
    Ok(())
  }
}

pub trait Router: Send + Sync {
  fn navigate(&self, navigation: Navigation);

  fn current_path(&self) -> String;
}

/// Router that only records where it was asked to go.
pub struct MemoryRouter {
  current: Mutex<String>,
  history: Mutex<Vec<Navigation>>,
}

impl MemoryRouter {
  pub fn new(start: impl Into<String>) -> Self {
    Self {
      current: Mutex::new(start.into()),
      history: Mutex::new(Vec::new()),
    }
  }

  pub fn history(&self) -> Vec<Navigation> {
    self.history.lock().map(|h| h.clone()).unwrap_or_default()
  }

  pub fn last(&self) -> Option<Navigation> {
    self.history().pop()
  }
}

impl Router for MemoryRouter {
  fn navigate(&self, navigation: Navigation) {
    debug!(to = %navigation, "Navigate");
    if let Ok(mut current) = self.current.lock() {
      *current = navigation.to_string();
    }
    if let Ok(mut history) = self.history.lock() {
      history.push(navigation);
    }
  }

  fn current_path(&self) -> String {
    self.current.lock().map(|c| c.clone()).unwrap_or_default()
  }
}
