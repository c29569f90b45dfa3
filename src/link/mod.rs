//! Connection lifecycle
//!
//! [`LinkStateMachine`] decides, [`RetryGovernor`] rations attempts, and
//! [`LinkManager`] runs both against a transport driver.

pub mod governor;
pub mod manager;
pub mod state;

pub use governor::{RetryGovernor, Verdict};
pub use manager::{LinkManager, LinkStats};
pub use state::{Directive, LinkEvent, LinkState, LinkStateMachine};
