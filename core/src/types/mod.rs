pub mod endpoint;
pub mod event;
pub mod jig;
pub mod scenario;
pub mod state;
pub mod unit;
