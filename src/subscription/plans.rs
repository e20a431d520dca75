//! Plan-selection page: the plan catalogue, coupons and subscribing.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use super::types::{
  coupon_path, subscriptions_collection, Coupon, Plan, PlanDuration, SubscriptionRecord,
  SubscriptionStatus, PLANS_COLLECTION,
};
use crate::cache::{CacheKey, CacheLayer, ResourceKind};
use crate::remote::{DocumentService, Query};
use crate::routes::{Navigation, Route, Router};
use crate::session::{AuthProvider, UserSession};

pub const UNDER_CONSTRUCTION: &str = "Plans under construction, please try again later";
pub const SITE_URL: &str = "https://tnker.tn/";

/// Banner shown when the gate sent the agency here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
  Pending,
  Expired,
}

impl Notice {
  pub fn message(self) -> &'static str {
    match self {
      Self::Pending => "Your subscription is still awaiting payment.",
      Self::Expired => "Your subscription has expired.",
    }
  }
}

/// Everything the plan-selection page shows.
#[derive(Debug, Clone)]
pub struct PlansView {
  pub plans: Vec<Plan>,
  /// Subscription carried over from the redirect, shown as the current plan
  pub current: Option<SubscriptionRecord>,
  pub notices: Vec<Notice>,
  /// Subscribing is blocked while a payment is pending
  pub subscribe_enabled: bool,
}

impl PlansView {
  pub fn is_under_construction(&self) -> bool {
    self.plans.is_empty()
  }
}

/// What the agency picked in the confirmation dialog.
#[derive(Debug, Clone, Default)]
pub struct PlanChoice {
  /// Length in months; the plan's first duration when `None`
  pub months: Option<u32>,
  pub coupon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponError {
  NotFound,
  NotOwned,
  Expired,
}

impl fmt::Display for CouponError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let msg = match self {
      Self::NotFound => "Coupon not found or expired",
      Self::NotOwned => "This coupon does not belong to you",
      Self::Expired => "Coupon expired",
    };
    f.write_str(msg)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanChoiceOutcome {
  /// Pending subscription created at `path`
  Subscribed { path: String, price: f64 },
  CouponRejected(CouponError),
}

/// Check a coupon for `agency` and return its discount in percent.
pub fn validate_coupon(
  coupon: &Coupon,
  agency: &str,
  now: DateTime<Utc>,
) -> Result<f64, CouponError> {
  if let Some(owner) = coupon.agency_id.as_deref() {
    if !owner.is_empty() && owner != agency {
      return Err(CouponError::NotOwned);
    }
  }
  if coupon.expiration_date.is_some_and(|expires| expires < now) {
    return Err(CouponError::Expired);
  }
  Ok(coupon.solde)
}

pub fn discounted_price(price: f64, discount_percent: f64) -> f64 {
  price - price * (discount_percent / 100.0)
}

fn pick_duration<'a>(plan: &'a Plan, months: Option<u32>) -> Result<&'a PlanDuration> {
  match months {
    Some(m) => plan
      .durations
      .iter()
      .find(|d| d.duration == m)
      .ok_or_else(|| eyre!("Plan {} has no {}-month option", plan.name, m)),
    None => plan
      .durations
      .first()
      .ok_or_else(|| eyre!("Plan {} has no durations", plan.name)),
  }
}

pub struct PlansPage {
  service: Arc<dyn DocumentService>,
  cache: CacheLayer,
  auth: Arc<dyn AuthProvider>,
  router: Arc<dyn Router>,
}

impl PlansPage {
  pub fn new(
    service: Arc<dyn DocumentService>,
    cache: CacheLayer,
    auth: Arc<dyn AuthProvider>,
    router: Arc<dyn Router>,
  ) -> Self {
    Self {
      service,
      cache,
      auth,
      router,
    }
  }

  /// Load the registrable plans. `arrival` is the redirect that led here, if any.
  pub async fn load(&self, arrival: Option<&Navigation>) -> PlansView {
    let plans = match self.registrable_plans().await {
      Ok(plans) => plans,
      Err(e) => {
        error!(error = %e, "Error fetching plans");
        Vec::new()
      }
    };

    let mut notices = Vec::new();
    let mut pending = false;
    if let Some(nav) = arrival {
      if nav.has_flag("pending") {
        pending = true;
        notices.push(Notice::Pending);
      }
      if nav.has_flag("expired") {
        notices.push(Notice::Expired);
      }
    }

    PlansView {
      plans,
      current: arrival.and_then(|nav| nav.state.clone()),
      notices,
      subscribe_enabled: !pending,
    }
  }

  async fn registrable_plans(&self) -> Result<Vec<Plan>> {
    let query = Query::collection(PLANS_COLLECTION).where_eq("showInRegistration", true);
    self
      .service
      .query(&query)
      .await?
      .iter()
      .map(|doc| doc.decode())
      .collect()
  }

  /// Look up a plan by id.
  pub async fn plan(&self, id: &str) -> Result<Plan> {
    self
      .service
      .get(&format!("{}/{}", PLANS_COLLECTION, id))
      .await?
      .ok_or_else(|| eyre!("Plan {} not found", id))?
      .decode()
  }

  /// Subscribe the agency to `plan`, creating a Pending subscription.
  pub async fn choose_plan(
    &self,
    session: &UserSession,
    plan: &Plan,
    choice: &PlanChoice,
  ) -> Result<PlanChoiceOutcome> {
    let duration = pick_duration(plan, choice.months)?;
    let mut price = duration.price;
    let mut discount = None;

    if let Some(code) = choice.coupon.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
      let coupon = match self.service.get(&coupon_path(code)).await? {
        Some(doc) => doc.decode::<Coupon>()?,
        None => return Ok(PlanChoiceOutcome::CouponRejected(CouponError::NotFound)),
      };
      match validate_coupon(&coupon, &session.uid, self.cache.clock().now()) {
        Ok(percent) => {
          price = discounted_price(price, percent);
          discount = Some(percent);
        }
        Err(reason) => {
          info!(uid = %session.uid, coupon = %code, %reason, "Coupon rejected");
          return Ok(PlanChoiceOutcome::CouponRejected(reason));
        }
      }
    }

    let fields = json!({
      "agency": session.uid,
      "plan": plan.id,
      "name": plan.name,
      "maxClients": plan.max_clients,
      "maxStaff": plan.max_staff,
      "features": plan.features,
      "periode": duration.duration,
      "status": SubscriptionStatus::Pending.as_str(),
      "price": price,
      "coupon": discount,
    });
    let fields: Map<String, Value> = match fields {
      Value::Object(map) => map,
      _ => return Err(eyre!("Subscription fields must be an object")),
    };

    let path = self
      .service
      .create(&subscriptions_collection(&session.uid), fields)
      .await?;
    info!(uid = %session.uid, plan = %plan.id, %path, "Subscription requested");

    // The cached plan no longer describes the agency's latest subscription
    self
      .cache
      .clear_cache(&[CacheKey::new(ResourceKind::AgencyPlan, &session.uid)])?;
    self.router.navigate(Navigation::to(Route::Home));

    Ok(PlanChoiceOutcome::Subscribed { path, price })
  }

  pub fn logout(&self) {
    if let Err(e) = self.auth.sign_out() {
      error!(error = %e, "Error signing out");
    }
  }
}
