use std::{collections::HashSet, pin::pin};

use futures::{future, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

/// Keeps the reverse proxy's routes in sync with the containers that are
/// running. Routes are derived only from the container's labels and the
/// persisted deploy log, so the reconciler holds no state between events.
pub struct Reconciler<R, S>
where
	R: ContainerRuntime,
	S: NamespaceStore,
{
	runtime: R,
	store: S,
	settings: ProxySettings,
	writer: ProxyConfigWriter,
}

impl<R, S> Reconciler<R, S>
where
	R: ContainerRuntime,
	S: NamespaceStore,
{
	pub fn new(runtime: R, store: S, settings: ProxySettings) -> Self {
		let writer = ProxyConfigWriter::new(&settings.config_dir);
		Self {
			runtime,
			store,
			settings,
			writer,
		}
	}

	/// Runs the reconciler until it is cancelled or the runtime closes its
	/// event stream. Events are handled one at a time, in order. A failure to
	/// handle an event is logged and the event dropped.
	pub async fn run(self, cancel: CancellationToken) {
		// Subscribe before the initial pass, so that nothing started during it
		// is missed
		let mut events = pin!(self.runtime.container_events());
		let mut cancelled = pin!(cancel.cancelled());

		info!("Reconciling running containers before listening for events");
		if future::select(&mut cancelled, pin!(self.reconcile_all()))
			.await
			.is_left()
		{
			info!("Reconciler cancelled");
			return;
		}

		loop {
			let Some(event) = future::select(&mut cancelled, events.next())
				.await
				.into_right()
			else {
				// Left branch is the cancellation
				info!("Reconciler cancelled");
				break;
			};

			match event {
				Some(Ok(event)) => {
					if let Err(err) = self.handle_event(&event).await {
						error!(
							"Failed to reconcile `{:?}` of container `{}`: {err}",
							event.action, event.container_id
						);
					}
				}
				Some(Err(err)) => {
					error!("Failed to read container event: {err}");
				}
				None => {
					warn!("Container event stream closed");
					break;
				}
			}
		}
	}

	/// Writes the routes of every running container, then removes every other
	/// route document. Run once on startup, so that containers that started or
	/// died while the engine was down are routed or unrouted.
	pub async fn reconcile_all(&self) {
		let containers = match self.runtime.list_containers().await {
			Ok(containers) => containers,
			Err(err) => {
				error!("Failed to list containers: {err}");
				return;
			}
		};

		let mut live = HashSet::new();
		for container in containers.into_iter().filter(|container| container.running) {
			let identity = RuntimeIdentity::from_labels(&container.labels);
			match self.container_started(&container).await {
				Ok(true) => live.extend(identity),
				Ok(false) => (),
				Err(err) => {
					// Whatever was routed before is the best guess for a running container
					error!("Failed to reconcile container `{}`: {err}", container.name);
					live.extend(identity);
				}
			}
		}

		match self.writer.retain(&live).await {
			Ok(0) => (),
			Ok(removed) => info!("Removed {removed} stale route documents"),
			Err(err) => error!("Failed to remove stale route documents: {err}"),
		}
	}

	/// Handles a single container event
	#[instrument(skip(self, event), fields(container = %event.container_id))]
	pub async fn handle_event(&self, event: &RuntimeEvent) -> Result<(), ErrorType> {
		match &event.action {
			RuntimeEventAction::Start => {
				let Some(container) = self.runtime.inspect_container(&event.container_id).await?
				else {
					debug!("Started container no longer exists");
					return Ok(());
				};
				self.container_started(&container).await.map(|_| ())
			}
			RuntimeEventAction::Die => self.container_died(event).await,
			RuntimeEventAction::Other(action) => {
				trace!("Ignoring `{action}` event");
				Ok(())
			}
		}
	}

	/// Writes the routes of a running container. Returns whether it was routed.
	async fn container_started(&self, container: &ContainerDetails) -> Result<bool, ErrorType> {
		let Some(identity) = RuntimeIdentity::from_labels(&container.labels) else {
			trace!("Container `{}` is not managed", container.name);
			return Ok(false);
		};

		let Some(app) = self.find_deployed_app(&identity).await else {
			return Ok(false);
		};

		let Some(address) = container
			.network_addresses
			.get(&self.settings.ingress_network)
		else {
			warn!(
				"Container `{}` is not attached to the ingress network `{}`",
				container.name, self.settings.ingress_network
			);
			return Ok(false);
		};

		let routes = ProxyRouteBuilder::new(&self.settings).build(&identity, &app, address);
		if routes.is_empty() {
			debug!("App `{}` has no urls to route", app.name);
			return Ok(false);
		}

		self.writer.write(&identity, &routes).await?;
		info!(
			"Routed version `{}` of `{}/{}`",
			identity.version, identity.namespace, identity.app
		);

		Ok(true)
	}

	async fn container_died(&self, event: &RuntimeEvent) -> Result<(), ErrorType> {
		let identity = match RuntimeIdentity::from_labels(&event.attributes) {
			Some(identity) => Some(identity),
			None => self
				.runtime
				.inspect_container(&event.container_id)
				.await?
				.and_then(|container| RuntimeIdentity::from_labels(&container.labels)),
		};
		let Some(identity) = identity else {
			trace!("Stopped container is not managed");
			return Ok(());
		};

		if self.writer.remove(&identity).await? {
			info!(
				"Removed the routes of version `{}` of `{}/{}`",
				identity.version, identity.namespace, identity.app
			);
		}

		Ok(())
	}

	/// Finds the app a container belongs to, as long as the deploy log has a
	/// record of the container's version. Anything that cannot be found means
	/// the container is not managed.
	async fn find_deployed_app(&self, identity: &RuntimeIdentity) -> Option<AppSpec> {
		let namespace = match self.store.load(&identity.namespace).await {
			Ok(Some(namespace)) => namespace,
			Ok(None) => {
				debug!("Namespace `{}` does not exist", identity.namespace);
				return None;
			}
			Err(err) => {
				warn!("Failed to load namespace `{}`: {err}", identity.namespace);
				return None;
			}
		};

		let app = namespace.find_app(&identity.app).or_else(|| {
			debug!("App `{}/{}` does not exist", identity.namespace, identity.app);
			None
		})?;

		if app.find_deployment(&identity.version).is_none() {
			debug!(
				"No deployment of `{}/{}` is recorded for version `{}`",
				identity.namespace, identity.app, identity.version
			);
			return None;
		}

		Some(app.clone())
	}
}
