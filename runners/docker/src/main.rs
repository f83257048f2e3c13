//! A Berth runner backed by the local Docker engine

/// The Docker implementation of the container runtime
mod docker;

/// The prelude module contains all the commonly used types and traits that are
/// used across the crate. This is mostly used to avoid having to import a lot
/// of things from different modules.
pub mod prelude {
	pub use common::prelude::*;

	pub use crate::docker::DockerRuntime;
}

use crate::prelude::*;

#[tokio::main]
async fn main() {
	Runner::<DockerRuntime>::run().await;
}
