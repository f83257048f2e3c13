use std::{
	collections::HashMap,
	future::Future,
	hash::Hash,
	path::PathBuf,
	sync::{Arc, Mutex as SyncMutex, PoisonError},
	time::Duration,
};

use tokio::{sync::Mutex, time};

use crate::prelude::*;

/// Creating, inspecting and removing apps
mod app;
/// The deploy pipeline
mod deployment;
/// The ingress network and the reverse proxy in front of every app
mod ingress;
/// Creating, inspecting and removing namespaces
mod namespace;

pub use self::app::CreateAppRequest;

/// The global state of the engine. This holds the capability handles every use
/// case works through, the configuration, and the locks serializing
/// conflicting work.
///
/// Cloning is cheap and every clone shares the same locks.
pub struct AppState<R, V, S = FileNamespaceStore>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// The container engine
	pub runtime: R,
	/// The git client
	pub vcs: V,
	/// Where namespaces are persisted
	pub store: S,
	/// The runner configuration
	pub config: Arc<RunnerSettings>,
	/// Resolves the build arguments of an app's image
	pub build_args: Arc<dyn BuildArgResolver>,
	/// Registers push webhooks on app repositories
	pub hooks: HookRegistrar,
	/// The locks shared by all clones
	locks: Arc<Locks>,
}

impl<R, V, S> Clone for AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	fn clone(&self) -> Self {
		Self {
			runtime: self.runtime.clone(),
			vcs: self.vcs.clone(),
			store: self.store.clone(),
			config: self.config.clone(),
			build_args: self.build_args.clone(),
			hooks: self.hooks.clone(),
			locks: self.locks.clone(),
		}
	}
}

#[derive(Default)]
struct Locks {
	/// Held while a namespace is created or removed, so that two namespaces
	/// are never allocated the same subnet
	creation: Mutex<()>,
	/// Held for every read-modify-write of a namespace document
	namespaces: KeyedLocks<String>,
	/// Held for the whole duration of a deployment of an app
	apps: KeyedLocks<(String, String)>,
}

/// A set of async locks created on demand, one per key
struct KeyedLocks<K>(SyncMutex<HashMap<K, Arc<Mutex<()>>>>);

impl<K> Default for KeyedLocks<K> {
	fn default() -> Self {
		Self(SyncMutex::new(HashMap::new()))
	}
}

impl<K> KeyedLocks<K>
where
	K: Eq + Hash,
{
	fn get(&self, key: K) -> Arc<Mutex<()>> {
		self.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(key)
			.or_default()
			.clone()
	}
}

impl<R, V, S> AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// Creates the state from its capability handles, with the default build
	/// argument resolver
	pub fn new(runtime: R, vcs: V, store: S, config: RunnerSettings) -> Self {
		Self {
			runtime,
			vcs,
			store,
			hooks: HookRegistrar::new(config.webhook.clone()),
			config: Arc::new(config),
			build_args: Arc::new(DefaultBuildArgs),
			locks: Default::default(),
		}
	}

	/// Replaces the build argument resolver
	pub fn with_build_args(mut self, build_args: impl BuildArgResolver + 'static) -> Self {
		self.build_args = Arc::new(build_args);
		self
	}

	/// Loads a namespace, failing if it does not exist
	pub async fn load_namespace(&self, name: &str) -> Result<Namespace, ErrorType> {
		self.store
			.load(name)
			.await?
			.ok_or_else(|| ErrorType::NamespaceNotFound(name.to_string()))
	}

	/// Applies a change to a namespace document and persists it. The
	/// namespace's lock is held only for the load, the change and the save.
	async fn update_namespace<T>(
		&self,
		name: &str,
		change: impl FnOnce(&mut Namespace) -> Result<T, ErrorType> + Send,
	) -> Result<T, ErrorType> {
		let lock = self.locks.namespaces.get(name.to_string());
		let _guard = lock.lock().await;

		let mut namespace = self.load_namespace(name).await?;
		let output = change(&mut namespace)?;
		self.store.save(&namespace).await?;

		Ok(output)
	}

	/// The working copy of an app's repository
	fn repo_dir(&self, namespace: &str, app: &str) -> PathBuf {
		self.config
			.data_dir
			.join("namespace")
			.join(namespace)
			.join("repo")
			.join(app)
	}

	/// Stops and removes a container if it exists
	async fn remove_container_if_exists(&self, name_or_id: &str) -> Result<(), ErrorType> {
		let Some(container) = self.runtime.inspect_container(name_or_id).await? else {
			return Ok(());
		};

		debug!("Removing container `{}`", container.name);
		self.runtime.stop_container(&container.id).await?;
		self.runtime.remove_container(&container.id, true).await
	}
}

/// Hands deployments requested by webhooks off to the deploy pipeline. The
/// webhook responds as soon as a deployment is dispatched.
pub trait DeployDispatcher: Send + Sync + 'static {
	fn dispatch(&self, namespace: String, app: String, selector: GitReferenceSelector);
}

/// Runs every dispatched deployment in its own task, logging failures
pub struct SpawnDeployDispatcher<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	state: AppState<R, V, S>,
}

impl<R, V, S> SpawnDeployDispatcher<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	pub fn new(state: AppState<R, V, S>) -> Self {
		Self { state }
	}
}

impl<R, V, S> DeployDispatcher for SpawnDeployDispatcher<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	fn dispatch(&self, namespace: String, app: String, selector: GitReferenceSelector) {
		let state = self.state.clone();
		tokio::spawn(async move {
			match state.deploy(&namespace, &app, &selector).await {
				Ok(record) => info!(
					"Deployed version `{}` of `{namespace}/{app}`",
					record.version
				),
				Err(err) => error!("Failed to deploy `{namespace}/{app}`: {err}"),
			}
		});
	}
}

/// Runs an operation under a deadline
async fn with_deadline<T>(
	deadline: Duration,
	operation: &str,
	future: impl Future<Output = Result<T, ErrorType>>,
) -> Result<T, ErrorType> {
	time::timeout(deadline, future).await.map_err(|_| {
		ErrorType::upstream(format!(
			"{operation} timed out after {}s",
			deadline.as_secs()
		))
	})?
}

/// Whether a name can be used for a namespace or an app. Names end up in
/// network, container and image names, so they are restricted to lowercase
/// letters, digits, `-` and `_`, starting with a letter or digit.
pub(crate) fn is_valid_name(name: &str) -> bool {
	name.chars()
		.next()
		.is_some_and(|first| first.is_ascii_lowercase() || first.is_ascii_digit()) &&
		name.chars().all(|c| {
			c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
		})
}
