//! Core types shared by every layer: constants, errors, session states and
//! the traits the host plugs into the engine.

pub mod constants;
mod error;
mod state;
mod traits;

pub use error::*;
pub use state::*;
pub use traits::*;
