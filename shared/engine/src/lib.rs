pub mod api;
pub mod automation;
pub mod credentials;
pub mod error;
pub mod hints;
pub mod layout;
pub mod registry;
pub mod rules;
pub mod session;
pub mod store;
pub mod tree;

pub use automation::{Automation, Outcome, ResetReport};
pub use error::StoreError;
pub use hints::{HintError, HintQueue};
pub use layout::{CountdownConfig, VenueLayout};
pub use registry::{ScopeGuard, SubscriptionScope};
pub use rules::{Effect, Rule, RuleTable};
pub use session::{Phase, Session, SessionEnd};
pub use store::{DocumentStore, FieldUpdates, MemoryStore};
pub use tree::{watch_room, TreeBuilder, TreeEvent};
