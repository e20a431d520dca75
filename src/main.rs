mod cache;
mod clock;
mod config;
mod dashboard;
mod nav;
mod remote;
mod routes;
mod session;
mod subscription;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache::{CacheKey, CacheLayer, KeyValueStore, NoopStore, ResourceKind, SqliteStore};
use clock::{Clock, SystemClock};
use config::Config;
use dashboard::TotalUsers;
use nav::Sidebar;
use remote::{DocumentService, FirestoreClient, MemoryDocumentService};
use routes::{MemoryRouter, Navigation, Route, Router};
use session::{AuthProvider, StaticAuth, UserSession};
use subscription::{
  GateOutcome, Notice, PlanChoice, PlanChoiceOutcome, PlansPage, PlansView, ProtectedRoute,
  SubscriptionGate, SubscriptionRecord,
};

#[derive(Parser, Debug)]
#[command(name = "tnker")]
#[command(about = "Subscription gate and cached widgets of the Tnker agency dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tnker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Signed-in agency uid; omit to act signed out
  #[arg(short, long, global = true)]
  uid: Option<String>,

  /// Display name of the signed-in user
  #[arg(long, global = true)]
  name: Option<String>,

  /// Email of the signed-in user
  #[arg(long, global = true)]
  email: Option<String>,

  /// Location the dashboard is at
  #[arg(short, long, global = true, default_value = "/")]
  path: String,

  /// Serve documents from a JSON fixture instead of Firestore
  #[arg(short, long, global = true)]
  fixture: Option<PathBuf>,

  /// Debug logging (RUST_LOG overrides)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the subscription gate for --path
  Gate,
  /// Show the plan-selection page
  Plans,
  /// Request a subscription to a plan
  Subscribe {
    /// Plan id
    plan: String,
    /// Duration in months (defaults to the plan's first duration)
    #[arg(short, long)]
    months: Option<u32>,
    /// Coupon code
    #[arg(long)]
    coupon: Option<String>,
  },
  /// Show the Total Users card
  Stats {
    /// Drop cached counts first
    #[arg(short, long)]
    refresh: bool,
  },
  /// Drop every cached entry of the agency
  Refresh,
  /// Print the sidebar for --path
  Nav,
  /// Sign out
  Logout,
}

/// Collaborators shared by the commands.
struct Context {
  config: Config,
  service: Arc<dyn DocumentService>,
  cache: CacheLayer,
  auth: Arc<dyn AuthProvider>,
  router: Arc<MemoryRouter>,
}

impl Context {
  fn new(args: &Args, config: Config) -> Result<Self> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let storage: Arc<dyn KeyValueStore> = if config.cache.enabled {
      Arc::new(SqliteStore::open(&Config::data_dir()?)?)
    } else {
      Arc::new(NoopStore)
    };

    let service: Arc<dyn DocumentService> = match &args.fixture {
      Some(path) => Arc::new(MemoryDocumentService::from_fixture(path, clock.clone())?),
      None => Arc::new(FirestoreClient::new(&config)?),
    };

    Ok(Self {
      config,
      service,
      cache: CacheLayer::new(storage, clock),
      auth: Arc::new(StaticAuth::new(session_from_args(args))),
      router: Arc::new(MemoryRouter::new(args.path.clone())),
    })
  }

  fn session(&self) -> Result<UserSession> {
    self
      .auth
      .current_session()
      .ok_or_else(|| eyre!("No signed-in user, pass --uid"))
  }

  fn gate(&self) -> SubscriptionGate {
    SubscriptionGate::new(self.service.clone(), self.cache.clone(), self.config.cache.plan_ttl())
      .with_failure_policy(self.config.gate.failure_policy)
  }

  fn plans_page(&self) -> PlansPage {
    PlansPage::new(
      self.service.clone(),
      self.cache.clone(),
      self.auth.clone(),
      self.router.clone(),
    )
  }

  fn total_users(&self) -> TotalUsers {
    TotalUsers::new(
      self.service.clone(),
      self.cache.clone(),
      self.config.cache.users_total_ttl(),
    )
  }
}

fn session_from_args(args: &Args) -> Option<UserSession> {
  args.uid.as_ref().map(|uid| UserSession {
    display_name: args.name.clone(),
    email: args.email.clone(),
    ..UserSession::new(uid.clone())
  })
}

/// Navigation that would have led to `path`, flags included.
fn arrival_from_path(path: &str) -> Option<Navigation> {
  let route = Route::from_path(path)?;
  let query = path.split_once('?').map(|(_, q)| q).unwrap_or_default();
  let mut navigation = Navigation::to(route);
  for flag in ["pending", "expired"] {
    if query.split('&').any(|pair| pair == format!("{}=true", flag)) {
      navigation = navigation.with_flag(flag);
    }
  }
  Some(navigation)
}

fn init_tracing(verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
    if verbose {
      "tnker=debug".to_string()
    } else {
      "warn".to_string()
    }
  });

  let log_dir = Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "tnker.log"));

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer),
    )
    .with(tracing_subscriber::EnvFilter::new(filter))
    .init();

  Ok(guard)
}

/// Run the gate, retrying once after a failure. A redirect to the
/// plan-selection page renders that page with the redirect's state.
async fn run_gate(ctx: &Context) -> Result<String> {
  let mut route = ProtectedRoute::new(ctx.gate(), ctx.auth.clone(), ctx.router.clone());
  route.enter().await;
  if matches!(route.outcome(), GateOutcome::Failed(_)) {
    warn!("Subscription check failed, retrying once");
    route.reset();
    route.enter().await;
  }

  let admitted = route.render(|record| {
    let mut lines = vec![format!("Admitted: {} ({})", record.name, record.status.as_str())];
    if let Some(end) = record.end_date {
      lines.push(format!("Ends: {}", end.format("%Y-%m-%d")));
    }
    lines
  });
  if let Some(lines) = admitted {
    return Ok(lines.join("\n"));
  }
  if route.is_loading() {
    return Ok("Loading...".to_string());
  }

  let mut out = Vec::new();
  match route.outcome() {
    GateOutcome::Failed(reason) => {
      out.push(format!("Could not check the subscription: {}", reason))
    }
    _ => {
      if let Some(navigation) = ctx.router.last() {
        out.push(format!("Redirect: {}", navigation));
        if navigation.route == Route::Plans {
          let view = ctx.plans_page().load(Some(&navigation)).await;
          out.push(render_plans(&view));
        }
      }
    }
  }
  Ok(out.join("\n"))
}

async fn run_plans(ctx: &Context) -> Result<String> {
  let arrival = arrival_from_path(&ctx.router.current_path());
  let view = ctx.plans_page().load(arrival.as_ref()).await;
  Ok(render_plans(&view))
}

fn limit(value: Option<u32>) -> String {
  value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn render_current(current: &SubscriptionRecord) -> Vec<String> {
  let mut lines = vec![
    format!("Current plan: {}", current.name),
    format!("  Status: {}", current.status.as_str()),
    format!(
      "  Clients: {}  Staff: {}",
      limit(current.max_clients),
      limit(current.max_staff)
    ),
  ];
  if let Some(months) = current.period_months {
    lines.push(format!("  Period: {} months", months));
  }
  if let Some(end) = current.end_date {
    lines.push(format!("  Ends: {}", end.format("%Y-%m-%d")));
  }
  lines
}

fn render_plans(view: &PlansView) -> String {
  let mut out: Vec<String> = view
    .notices
    .iter()
    .map(|notice: &Notice| format!("! {}", notice.message()))
    .collect();
  if let Some(current) = &view.current {
    out.extend(render_current(current));
  }
  if view.is_under_construction() {
    out.push(subscription::plans::UNDER_CONSTRUCTION.to_string());
    out.push(subscription::plans::SITE_URL.to_string());
    return out.join("\n");
  }

  for plan in &view.plans {
    out.push(format!(
      "{:<12} {:<20} clients: {:<6} staff: {}",
      plan.id,
      plan.name,
      limit(plan.max_clients),
      limit(plan.max_staff)
    ));
    for duration in &plan.durations {
      out.push(format!("    {:>3} months  {:.2}", duration.duration, duration.price));
    }
  }
  if !view.subscribe_enabled {
    out.push("Subscribing is disabled until the pending payment clears.".to_string());
  }
  out.join("\n")
}

async fn run_subscribe(
  ctx: &Context,
  plan: &str,
  months: Option<u32>,
  coupon: Option<String>,
) -> Result<String> {
  let session = ctx.session()?;
  let page = ctx.plans_page();
  let plan = page.plan(plan).await?;

  let out = match page
    .choose_plan(&session, &plan, &PlanChoice { months, coupon })
    .await?
  {
    PlanChoiceOutcome::Subscribed { path, price } => format!(
      "Requested {} at {:.2}: {}\nRedirect: {}",
      plan.name,
      price,
      path,
      ctx.router.current_path()
    ),
    PlanChoiceOutcome::CouponRejected(reason) => format!("Coupon rejected: {}", reason),
  };
  Ok(out)
}

async fn run_stats(ctx: &Context, refresh: bool) -> Result<String> {
  let session = ctx.session()?;
  let widget = ctx.total_users();
  let view = if refresh {
    widget.refresh(&session).await?
  } else {
    widget.load(&session).await?
  };

  Ok(format!(
    "Total Users: {}\nLast check: {}",
    view.value,
    widget.last_check(&view)
  ))
}

fn run_refresh(ctx: &Context) -> Result<String> {
  let session = ctx.session()?;
  let mut keys = dashboard::refresh_keys(&session.uid);
  keys.push(CacheKey::new(ResourceKind::AgencyPlan, &session.uid));
  ctx.cache.clear_cache(&keys)?;
  debug!(uid = %session.uid, count = keys.len(), "Cache cleared");
  Ok(format!("Cleared {} cached entries", keys.len()))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;

  // The sidebar needs no remote service
  if let Command::Nav = args.command {
    let session = session_from_args(&args);
    println!("{}", Sidebar::new(&args.path, session.as_ref()).render());
    return Ok(());
  }

  let ctx = Context::new(&args, config)?;

  let out = match &args.command {
    Command::Gate => run_gate(&ctx).await?,
    Command::Plans => run_plans(&ctx).await?,
    Command::Subscribe {
      plan,
      months,
      coupon,
    } => run_subscribe(&ctx, plan, *months, coupon.clone()).await?,
    Command::Stats { refresh } => run_stats(&ctx, *refresh).await?,
    Command::Refresh => run_refresh(&ctx)?,
    Command::Nav => String::new(),
    Command::Logout => {
      ctx.plans_page().logout();
      "Signed out".to_string()
    }
  };
  println!("{}", out);

  Ok(())
}
