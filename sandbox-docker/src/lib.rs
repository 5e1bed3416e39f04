//! [`sandbox::Runtime`] backed by the `docker` command line client.

mod command;
mod connector;
mod prerequisites;
mod runtime;

pub use connector::DockerConnector;
pub use prerequisites::{DEFAULT_ENDPOINT, check_prerequisites, validate_endpoint};
pub use runtime::DockerRuntime;
