pub mod gate;
pub mod handlers;
pub mod session;

pub use gate::{guard, landing, Access, Route, SessionGate, SessionSubscription};
