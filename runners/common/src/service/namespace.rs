use time::OffsetDateTime;

use super::{is_valid_name, AppState};
use crate::prelude::*;

impl<R, V, S> AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// Creates a namespace: allocates it a subnet, creates the network backing
	/// it and persists it.
	#[instrument(skip(self))]
	pub async fn create_namespace(&self, name: &str) -> Result<Namespace, ErrorType> {
		if !is_valid_name(name) {
			return Err(ErrorType::WrongParameters(format!(
				"`{name}` is not a valid namespace name"
			)));
		}

		let _guard = self.locks.creation.lock().await;

		if self.store.load(name).await?.is_some() {
			return Err(ErrorType::NamespaceAlreadyExists(name.to_string()));
		}

		let existing = self.store.list().await?;
		let SubnetAllocation { subnet, gateway } = allocate_subnet(
			&self.config.network.base,
			existing.iter().map(|namespace| namespace.subnet.as_str()),
		)?;
		info!("Allocated subnet {subnet} to namespace `{name}`");

		let network = models::utils::namespace_network_name(name);
		let network_id = self
			.runtime
			.create_network(&network, Some(&subnet), Some(&gateway))
			.await?;

		let namespace = Namespace {
			name: name.to_string(),
			network,
			network_id,
			subnet,
			gateway,
			created_at: OffsetDateTime::now_utc(),
			apps: vec![],
			databases: vec![],
			redis: vec![],
		};

		if let Err(err) = self.store.save(&namespace).await {
			error!("Failed to persist namespace `{name}`: {err}");
			if let Err(cleanup_err) = self.runtime.remove_network(&namespace.network).await {
				warn!(
					"Failed to remove network `{}` after a failed create: {cleanup_err}",
					namespace.network
				);
			}
			return Err(err);
		}

		Ok(namespace)
	}

	/// Lists every namespace
	pub async fn list_namespaces(&self) -> Result<Vec<Namespace>, ErrorType> {
		self.store.list().await
	}

	/// Inspects a namespace
	pub async fn inspect_namespace(&self, name: &str) -> Result<Namespace, ErrorType> {
		self.load_namespace(name).await
	}

	/// Removes a namespace. Every container deployed in it is removed first,
	/// then the network backing it, then its state.
	///
	/// Waits for the deployments of its apps to finish, and blocks new ones
	/// and new apps until the namespace is gone.
	#[instrument(skip(self))]
	pub async fn remove_namespace(&self, name: &str) -> Result<(), ErrorType> {
		let _creation = self.locks.creation.lock().await;

		loop {
			let apps = app_names(&self.load_namespace(name).await?);

			// Same order as a deployment: app locks first, then the namespace lock
			let mut app_guards = Vec::with_capacity(apps.len());
			for app in &apps {
				let lock = self.locks.apps.get((name.to_string(), app.clone()));
				app_guards.push(lock.lock_owned().await);
			}
			let lock = self.locks.namespaces.get(name.to_string());
			let _guard = lock.lock().await;

			let namespace = self.load_namespace(name).await?;
			if app_names(&namespace) != apps {
				debug!("Apps of namespace `{name}` changed while waiting, retrying");
				continue;
			}

			for record in namespace.apps.iter().flat_map(|app| app.deploy.iter()) {
				self.remove_container_if_exists(&record.container_id).await?;
			}

			if self
				.runtime
				.inspect_network(&namespace.network)
				.await?
				.is_some()
			{
				self.runtime.remove_network(&namespace.network).await?;
			}

			self.store.remove(name).await?;
			info!("Namespace `{name}` removed");

			return Ok(());
		}
	}
}

fn app_names(namespace: &Namespace) -> Vec<String> {
	let mut names = namespace
		.apps
		.iter()
		.map(|app| app.name.clone())
		.collect::<Vec<_>>();
	names.sort();
	names
}

#[cfg(test)]
mod tests {
	use crate::{
		prelude::*,
		testing::{self, FakeRuntime, FakeVcs},
	};

	fn state(dir: &std::path::Path) -> AppState<FakeRuntime, FakeVcs> {
		let settings = testing::settings(dir);
		let store = FileNamespaceStore::new(&settings.data_dir);
		AppState::new(FakeRuntime::default(), FakeVcs::default(), store, settings)
	}

	#[tokio::test]
	async fn namespaces_get_distinct_subnets_and_networks() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path());

		let team_a = state.create_namespace("team-a").await.unwrap();
		let team_b = state.create_namespace("team-b").await.unwrap();

		assert_eq!(team_a.subnet, "172.30.1.0/24");
		assert_eq!(team_a.gateway, "172.30.1.1");
		assert_eq!(team_a.network, "berth_team-a");
		assert_eq!(team_b.subnet, "172.30.2.0/24");
		assert!(state.runtime.has_network("berth_team-a"));
		assert_eq!(state.inspect_namespace("team-b").await.unwrap(), team_b);
	}

	#[tokio::test]
	async fn concurrent_creation_never_shares_a_subnet() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path());

		let (a, b, c) = tokio::join!(
			state.create_namespace("a"),
			state.create_namespace("b"),
			state.create_namespace("c")
		);
		let mut subnets = vec![a.unwrap().subnet, b.unwrap().subnet, c.unwrap().subnet];
		subnets.sort();
		subnets.dedup();
		assert_eq!(subnets.len(), 3);
	}

	#[tokio::test]
	async fn duplicate_and_invalid_names_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path());
		state.create_namespace("team-a").await.unwrap();

		assert_eq!(
			state.create_namespace("team-a").await.unwrap_err().kind(),
			ErrorKind::Conflict
		);
		assert_eq!(
			state.create_namespace("Team A").await.unwrap_err().kind(),
			ErrorKind::InvalidInput
		);
	}

	#[tokio::test]
	async fn removed_namespace_frees_its_subnet() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path());
		state.create_namespace("team-a").await.unwrap();

		state.remove_namespace("team-a").await.unwrap();

		assert!(!state.runtime.has_network("berth_team-a"));
		assert_eq!(
			state.inspect_namespace("team-a").await.unwrap_err(),
			ErrorType::NamespaceNotFound(String::new())
		);
		let again = state.create_namespace("team-b").await.unwrap();
		assert_eq!(again.subnet, "172.30.1.0/24");
	}
}
