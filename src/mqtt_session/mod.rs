pub mod client_session;

pub use client_session::{ClientState, SessionState, SubscriptionFilters};
