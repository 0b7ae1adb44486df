//! The web module for handling the Axum API.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod models;
pub mod stream;

pub use api::{app_with_state, create_router, AppState, AppStateInner};
