// CP02 fast-charging station control and aggregation - shared library

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod state;

pub use config::Config;
pub use dispatcher::{dispatch, list_actions};
pub use error::DispatchError;
pub use state::AppState;
