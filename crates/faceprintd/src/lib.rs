//! faceprintd — HTTP front end for the faceprint register/verify service.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::{build_router, run};
pub use state::AppState;
