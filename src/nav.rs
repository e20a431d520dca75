/// Sidebar navigation for the dashboard shell
use crate::routes::Route;
use crate::session::UserSession;

#[derive(Debug, Clone)]
pub struct NavItem {
  pub title: &'static str,
  pub route: Route,
}

/// Main sidebar entries
pub const NAV_ITEMS: &[NavItem] = &[
  NavItem {
    title: "Dashboard",
    route: Route::Home,
  },
  NavItem {
    title: "Pros",
    route: Route::Pros,
  },
  NavItem {
    title: "Clients",
    route: Route::Clients,
  },
  NavItem {
    title: "Interventions",
    route: Route::Interventions,
  },
  NavItem {
    title: "Analytics",
    route: Route::Analytics,
  },
];

/// Entries pinned below the main list
pub const FOOTER_ITEMS: &[NavItem] = &[
  NavItem {
    title: "Support",
    route: Route::Support,
  },
  NavItem {
    title: "Settings",
    route: Route::Settings,
  },
];

pub const DEFAULT_DISPLAY_NAME: &str = "Tnker Admin";
pub const UPGRADE_LABEL: &str = "Upgrade Plan";

/// Sidebar state for the current location and user.
#[derive(Debug, Clone)]
pub struct Sidebar {
  pub active: Option<Route>,
  pub display_name: String,
  pub email: Option<String>,
}

impl Sidebar {
  pub fn new(current_path: &str, session: Option<&UserSession>) -> Self {
    let display_name = session
      .and_then(|s| s.display_name.clone())
      .filter(|name| !name.trim().is_empty())
      .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

    Self {
      active: Route::from_path(current_path),
      display_name,
      email: session.and_then(|s| s.email.clone()),
    }
  }

  pub fn is_active(&self, item: &NavItem) -> bool {
    self.active == Some(item.route)
  }

  pub fn upgrade_route(&self) -> Route {
    Route::RenewPlan
  }

  /// Plain text rendering, one entry per line.
  pub fn render(&self) -> String {
    let mut lines = Vec::new();
    for item in NAV_ITEMS {
      lines.push(self.line(item));
    }
    lines.push(String::new());
    for item in FOOTER_ITEMS {
      lines.push(self.line(item));
    }
    lines.push(String::new());
    lines.push(self.display_name.clone());
    if let Some(email) = &self.email {
      lines.push(email.clone());
    }
    lines.push(format!("{} -> {}", UPGRADE_LABEL, self.upgrade_route().path()));
    lines.join("\n")
  }

  fn line(&self, item: &NavItem) -> String {
    let marker = if self.is_active(item) { '>' } else { ' ' };
    format!("{} {:<14} {}", marker, item.title, item.route.path())
  }
}
