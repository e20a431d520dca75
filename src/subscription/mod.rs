//! Subscription state: the route gate, the protected-route wrapper and the
//! plan-selection page.

pub mod gate;
pub mod plans;
pub mod protected;
pub mod types;

pub use gate::{GateOutcome, SubscriptionGate};
pub use plans::{Notice, PlanChoice, PlanChoiceOutcome, PlansPage, PlansView};
pub use protected::ProtectedRoute;
pub use types::SubscriptionRecord;
