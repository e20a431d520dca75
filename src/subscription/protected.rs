//! Wrapper that runs the gate before a protected page renders.

use std::sync::Arc;

use super::gate::{GateOutcome, SubscriptionGate};
use super::types::SubscriptionRecord;
use crate::routes::Router;
use crate::session::AuthProvider;

/// Protected-route state for one page view.
///
/// The gate runs on entry while the loading flag is set; a decision clears
/// the flag and later entries reuse it until [`reset`](Self::reset).
pub struct ProtectedRoute {
  gate: SubscriptionGate,
  auth: Arc<dyn AuthProvider>,
  router: Arc<dyn Router>,
  loading: bool,
  outcome: GateOutcome,
}

impl ProtectedRoute {
  pub fn new(gate: SubscriptionGate, auth: Arc<dyn AuthProvider>, router: Arc<dyn Router>) -> Self {
    Self {
      gate,
      auth,
      router,
      loading: true,
      outcome: GateOutcome::Loading,
    }
  }

  /// Evaluate the gate if needed and apply any redirect.
  pub async fn enter(&mut self) -> &GateOutcome {
    if self.loading {
      let session = self.auth.current_session();
      let path = self.router.current_path();
      self.outcome = self.gate.evaluate(session.as_ref(), &path).await;
      self.loading = matches!(self.outcome, GateOutcome::Loading);

      if let Some(navigation) = self.outcome.navigation() {
        self.router.navigate(navigation);
      }
    }
    &self.outcome
  }

  /// Force the next [`enter`](Self::enter) to run the gate again.
  pub fn reset(&mut self) {
    self.loading = true;
    self.outcome = GateOutcome::Loading;
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn outcome(&self) -> &GateOutcome {
    &self.outcome
  }

  /// Render the protected content, only once admitted.
  pub fn render<T>(&self, children: impl FnOnce(&SubscriptionRecord) -> T) -> Option<T> {
    match &self.outcome {
      GateOutcome::Admitted(record) => Some(children(record)),
      _ => None,
    }
  }
}
