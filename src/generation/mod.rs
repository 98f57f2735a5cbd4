//! Bounded autoregressive generation over a sliding token window.

mod config;
mod error;
mod predictor;
mod session;
mod window;

pub use config::*;
pub use error::*;
pub use predictor::*;
pub use session::*;
pub use window::*;
