use std::{collections::HashMap, future::Future, path::Path};

use futures::Stream;
use typed_builder::TypedBuilder;

use crate::prelude::*;

/// This trait is the main trait that the runner needs to implement to run
/// containers. Every call the engine makes into the container engine goes
/// through here, so a runner only has to translate these calls to its own
/// engine's API.
///
/// Handles are cloned freely and shared across tasks, so implementations are
/// expected to be cheap to clone (usually a wrapper around a client that is
/// itself reference counted).
pub trait ContainerRuntime: Clone + Send + Sync + 'static {
	/// The name of the runner. The runner's configuration is read from
	/// `runner.<name>` files, and its logs are enabled under `<name>_runner`.
	const NAME: &'static str;

	/// Connects to the container engine
	fn connect(settings: &RunnerSettings) -> impl Future<Output = Result<Self, ErrorType>> + Send;

	/// Lists all containers known to the runtime, running or not
	fn list_containers(
		&self,
	) -> impl Future<Output = Result<Vec<ContainerDetails>, ErrorType>> + Send;

	/// Inspects a container by name or ID. Returns [`None`] if the container
	/// does not exist.
	fn inspect_container(
		&self,
		name_or_id: &str,
	) -> impl Future<Output = Result<Option<ContainerDetails>, ErrorType>> + Send;

	/// Creates a container with the given options and attaches it to every
	/// network in the options, without starting it. Returns the ID of the
	/// created container.
	fn create_container(
		&self,
		options: ContainerRunOptions,
	) -> impl Future<Output = Result<String, ErrorType>> + Send;

	/// Creates a container and starts it. Returns the ID of the created
	/// container.
	fn run_container(
		&self,
		options: ContainerRunOptions,
	) -> impl Future<Output = Result<String, ErrorType>> + Send {
		async move {
			let id = self.create_container(options).await?;
			self.start_container(&id).await?;
			Ok(id)
		}
	}

	/// Starts a stopped container
	fn start_container(&self, id: &str) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Stops a running container. Stopping a container that is not running is
	/// not an error.
	fn stop_container(&self, id: &str) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Removes a container. With `force`, a running container is killed first.
	fn remove_container(
		&self,
		id: &str,
		force: bool,
	) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Creates a bridge network, optionally with a fixed subnet and gateway.
	/// Returns the ID of the created network.
	fn create_network(
		&self,
		name: &str,
		subnet: Option<&str>,
		gateway: Option<&str>,
	) -> impl Future<Output = Result<String, ErrorType>> + Send;

	/// Inspects a network by name. Returns [`None`] if the network does not
	/// exist.
	fn inspect_network(
		&self,
		name: &str,
	) -> impl Future<Output = Result<Option<NetworkDetails>, ErrorType>> + Send;

	/// Removes a network by name
	fn remove_network(&self, name: &str) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Connects an existing container to an existing network
	fn connect_network(
		&self,
		network: &str,
		container: &str,
	) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Builds an image from the given context directory. The build fails if any
	/// step of the build fails.
	fn build_image(
		&self,
		context_dir: &Path,
		options: BuildOptions,
	) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Pulls an image from its registry
	fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Returns the stream of container lifecycle events, in the order the
	/// runtime emits them. The stream ends when the runtime closes it.
	fn container_events(
		&self,
	) -> impl Stream<Item = Result<RuntimeEvent, ErrorType>> + Send + 'static;
}

/// The details of a container, as reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
	/// The ID of the container
	pub id: String,
	/// The name of the container, without any leading `/`
	pub name: String,
	/// The labels the container was created with
	pub labels: HashMap<String, String>,
	/// Whether the container is currently running
	pub running: bool,
	/// The IP address of the container on each network it is attached to,
	/// keyed by network name
	pub network_addresses: HashMap<String, String>,
}

/// The options a container is created with
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct ContainerRunOptions {
	/// The name of the container
	#[builder(setter(into))]
	pub name: String,
	/// The image the container runs
	#[builder(setter(into))]
	pub image: String,
	/// The number of CPU cores the container is limited to, if any
	#[builder(default, setter(strip_option))]
	pub cpu: Option<f64>,
	/// The memory limit of the container in GB, if any
	#[builder(default, setter(strip_option))]
	pub memory_gb: Option<u32>,
	/// The environment variables, as `KEY=value`
	#[builder(default)]
	pub env: Vec<String>,
	/// The networks the container is attached to. The first one is used when
	/// the container is created, the rest are connected before it starts.
	#[builder(default)]
	pub networks: Vec<String>,
	/// The labels the container is created with
	#[builder(default)]
	pub labels: HashMap<String, String>,
	/// The TCP ports published on the host
	#[builder(default)]
	pub ports: Vec<PortBinding>,
	/// The volumes and host paths mounted, as `source:target[:mode]`
	#[builder(default)]
	pub binds: Vec<String>,
	/// Overrides the arguments of the image's command
	#[builder(default)]
	pub command: Vec<String>,
}

/// A container port published on a host port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
	pub host: u16,
	pub container: u16,
}

/// The details of a network, as reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkDetails {
	/// The ID of the network
	pub id: String,
	/// The name of the network
	pub name: String,
	/// The subnet of the network, if it has a fixed one
	pub subnet: Option<String>,
	/// The gateway of the network, if it has a fixed one
	pub gateway: Option<String>,
}

/// The options an image is built with
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct BuildOptions {
	/// The tag of the built image, e.g. `web:deadbee`
	#[builder(setter(into))]
	pub tag: String,
	/// The path of the Dockerfile, relative to the context directory
	#[builder(setter(into), default = "Dockerfile".to_string())]
	pub dockerfile: String,
	/// The build arguments passed to the build
	#[builder(default)]
	pub build_args: HashMap<String, String>,
}

/// What happened to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEventAction {
	/// The container started
	Start,
	/// The container stopped, for any reason
	Die,
	/// Anything else. Ignored by the reconciler
	Other(String),
}

impl From<&str> for RuntimeEventAction {
	fn from(action: &str) -> Self {
		match action {
			"start" => Self::Start,
			"die" => Self::Die,
			other => Self::Other(other.to_string()),
		}
	}
}

/// A container lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
	/// The ID of the container the event is about
	pub container_id: String,
	/// What happened to the container
	pub action: RuntimeEventAction,
	/// The attributes attached to the event. For container events these
	/// include the container's labels
	pub attributes: HashMap<String, String>,
}
