//! The deployment and reconciliation engine of Berth. This library contains
//! everything a runner needs: namespace network allocation, git reference
//! resolution, the deploy pipeline, webhook ingestion and the reconciler that
//! keeps the reverse proxy in sync with running containers. All a runner has to
//! provide is an implementation of [`ContainerRuntime`][1] for its container
//! engine.
//!
//! [1]: prelude::ContainerRuntime

/// Resolves the build arguments passed to an app's image build
mod build_args;
/// The executor module contains the trait that the runner needs to implement
/// to run containers.
mod executor;
/// Allocation of private subnets to namespaces
mod network;
/// Generation of the reverse proxy's route documents
mod proxy;
/// The reconciler that derives proxy routes from container lifecycle events
mod reconciler;
/// Maps a git reference selector to a single commit
mod resolver;
/// All the runner related structs and functions.
mod runner;
/// The use cases of the engine: namespaces, apps and deployments
mod service;
/// Persistence of namespaces and everything they own
mod store;
/// This module contains all the utilities used by the runner. This includes
/// things like the config parser and the extension traits.
mod utils;
/// The capability trait for version control, and its `git2` implementation
mod vcs;
/// Webhook ingestion from git providers and trigger matching
mod webhook;

#[cfg(test)]
mod testing;

/// The prelude module contains all the things you need to import to get
/// started with the runner.
pub mod prelude {
	pub use models::{prelude::*, *};
	pub use tracing::{debug, error, info, instrument, trace, warn};

	pub use crate::{
		build_args::{BuildArgResolver, DefaultBuildArgs},
		executor::*,
		network::{allocate_subnet, SubnetAllocation},
		proxy::{ProxyConfigWriter, ProxyRouteBuilder},
		reconciler::Reconciler,
		resolver::{resolve_from_refs, resolve_reference, short_version},
		runner::Runner,
		service::{AppState, CreateAppRequest, DeployDispatcher, SpawnDeployDispatcher},
		store::{FileNamespaceStore, NamespaceStore},
		utils::{config::*, ext_traits::*},
		vcs::{GitClient, GitCredentials, GitUrl, RemoteRefs, VersionControl},
		webhook::{setup_routes, HookRegistrar, HookRegistration},
	};
}
