pub mod config;
pub mod control;
pub mod download;
mod error;
pub mod ingress;
pub mod probe;
pub mod retry;
pub mod runner;
pub mod session;

pub use error::CastError;
pub use session::{Collaborators, Session, SessionOptions};
