pub mod check;
pub mod crew;
pub mod dispatch;
pub mod login;
pub mod routes;
pub mod serve;

pub use dispatch::dispatch;

use handoff_core::config::{load_dotenv, RawEnv};
use std::path::Path;

/// Load the optional `.env` file, then snapshot the process environment.
pub(crate) fn capture_env(env_file: Option<&Path>) -> RawEnv {
    load_dotenv(env_file);
    RawEnv::from_process()
}
