use std::path::Path;

use tokio::fs;

use super::{with_deadline, AppState};
use crate::{
	prelude::*,
	vcs::{credentials_for, GitCredentials},
};

impl<R, V, S> AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// Deploys an app at the commit the selector resolves to: brings the
	/// working copy to that commit, builds the image, and (re)deploys both the
	/// commit's version and the `latest` alias from it.
	///
	/// Returns the record of the commit's version. Nothing is rolled back when a
	/// step fails. Only one deployment of an app runs at a time.
	#[instrument(skip(self))]
	pub async fn deploy(
		&self,
		namespace: &str,
		app: &str,
		selector: &GitReferenceSelector,
	) -> Result<DeployRecord, ErrorType> {
		let lock = self
			.locks
			.apps
			.get((namespace.to_string(), app.to_string()));
		let _guard = lock.lock().await;

		let namespace = self.load_namespace(namespace).await?;
		let app = namespace
			.find_app(app)
			.cloned()
			.ok_or_else(|| ErrorType::AppNotFound(app.to_string()))?;

		let credentials = credentials_for(&app, &self.config.git.credentials)?;
		let commit = with_deadline(
			self.config.timeouts.git(),
			"resolving the git reference",
			resolve_reference(&self.vcs, &app.repo, credentials.as_ref(), selector),
		)
		.await?;
		let version = short_version(&commit);
		info!("Resolved version `{version}` ({commit})");

		let working_copy = self.repo_dir(&namespace.name, &app.name);
		self.sync_working_copy(&app, &working_copy, credentials.as_ref(), &commit)
			.await?;

		let image = app.image_tag(&version);
		self.build(&app, &working_copy, &image).await?;

		let record = self
			.deploy_version(&namespace, &app, &version, &image, &commit)
			.await?;
		self.deploy_version(
			&namespace,
			&app,
			constants::LATEST_VERSION,
			&image,
			&commit,
		)
		.await?;

		Ok(record)
	}

	/// Clones the repository if there is no working copy yet, or fetches into
	/// it otherwise, then checks out the commit. A working copy without a `.git`
	/// directory is discarded.
	async fn sync_working_copy(
		&self,
		app: &AppSpec,
		working_copy: &Path,
		credentials: Option<&GitCredentials>,
		commit: &str,
	) -> Result<(), ErrorType> {
		let deadline = self.config.timeouts.git();

		if fs::try_exists(working_copy.join(".git")).await? {
			debug!("Fetching into {}", working_copy.display());
			with_deadline(
				deadline,
				"git fetch",
				self.vcs.fetch(working_copy, credentials),
			)
			.await?;
		} else {
			if fs::try_exists(working_copy).await? {
				warn!(
					"{} is not a git repository, cloning it again",
					working_copy.display()
				);
				fs::remove_dir_all(working_copy).await?;
			}
			if let Some(parent) = working_copy.parent() {
				fs::create_dir_all(parent).await?;
			}
			debug!("Cloning {} into {}", app.repo, working_copy.display());
			with_deadline(
				deadline,
				"git clone",
				self.vcs.clone_repo(&app.repo, working_copy, credentials),
			)
			.await?;
		}

		with_deadline(
			deadline,
			"git checkout",
			self.vcs.checkout(working_copy, commit),
		)
		.await
	}

	/// Builds the app's image from the working copy
	async fn build(&self, app: &AppSpec, working_copy: &Path, image: &str) -> Result<(), ErrorType> {
		let build_args = self.build_args.resolve(app, working_copy)?;
		let dockerfile = self.prepare_dockerfile(app, working_copy).await?;

		info!("Building image `{image}` with {dockerfile}");
		with_deadline(
			self.config.timeouts.build(),
			"image build",
			self.runtime.build_image(
				working_copy,
				BuildOptions::builder()
					.tag(image)
					.dockerfile(dockerfile)
					.build_args(build_args)
					.build(),
			),
		)
		.await
	}

	/// Copies the build template of the app's platform into the working copy,
	/// returning the Dockerfile to build with. Without a template, the
	/// repository's own `Dockerfile` is used.
	async fn prepare_dockerfile(
		&self,
		app: &AppSpec,
		working_copy: &Path,
	) -> Result<String, ErrorType> {
		if app.platform.is_empty() {
			return Ok("Dockerfile".to_string());
		}

		let dockerfile = format!("Dockerfile.{}", app.platform);
		let template = self.config.build.templates_dir.join(&dockerfile);
		if !fs::try_exists(&template).await? {
			warn!(
				"No build template for platform `{}`, using the repository's Dockerfile",
				app.platform
			);
			return Ok("Dockerfile".to_string());
		}

		fs::copy(&template, working_copy.join(&dockerfile)).await?;
		Ok(dockerfile)
	}

	/// Deploys one version of an app from an already built image. Any existing
	/// container of that version is replaced. The deploy record is persisted
	/// before the new container starts, so it is always there by the time the
	/// container's start event is reconciled.
	#[instrument(skip(self, namespace, app, image, commit), fields(app = %app.name))]
	async fn deploy_version(
		&self,
		namespace: &Namespace,
		app: &AppSpec,
		version: &str,
		image: &str,
		commit: &str,
	) -> Result<DeployRecord, ErrorType> {
		let container_name = app.container_name(version);
		self.remove_container_if_exists(&container_name).await?;

		let identity = RuntimeIdentity {
			namespace: namespace.name.clone(),
			app: app.name.clone(),
			version: version.to_string(),
		};
		let container_id = self
			.runtime
			.create_container(
				ContainerRunOptions::builder()
					.name(container_name)
					.image(image)
					.cpu(app.cpu)
					.memory_gb(app.memory)
					.env(
						app.envs
							.iter()
							.map(|EnvVar { key, value }| format!("{key}={value}"))
							.collect(),
					)
					.networks(vec![
						self.config.proxy.ingress_network.clone(),
						namespace.network.clone(),
					])
					.labels(identity.to_labels())
					.build(),
			)
			.await?;

		let record = DeployRecord {
			container_id: container_id.clone(),
			version: version.to_string(),
			commit: commit.to_string(),
			url: format!("/{version}"),
		};
		let app_name = app.name.clone();
		let recorded = record.clone();
		self.update_namespace(&namespace.name, move |namespace| {
			namespace
				.find_app_mut(&app_name)
				.ok_or_else(|| ErrorType::AppNotFound(app_name.clone()))?
				.record_deployment(recorded);
			Ok(())
		})
		.await?;

		self.runtime.start_container(&container_id).await?;
		info!("Version `{version}` is running as {container_id}");

		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use crate::{
		build_args::APP_PORT_ARG,
		prelude::*,
		testing::{self, FakeRuntime, FakeVcs, COMMIT_MAIN, COMMIT_V1},
	};

	async fn state(dir: &std::path::Path) -> AppState<FakeRuntime, FakeVcs> {
		let settings = testing::settings(dir);
		let store = FileNamespaceStore::new(&settings.data_dir);
		let state = AppState::new(FakeRuntime::default(), FakeVcs::default(), store, settings);
		let mut namespace = state.create_namespace("team-a").await.unwrap();
		namespace.apps.push(testing::app("team-a", "web"));
		state.store.save(&namespace).await.unwrap();
		state
	}

	#[tokio::test]
	async fn deploys_the_version_and_latest() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;

		let record = state
			.deploy("team-a", "web", &GitReferenceSelector::branch("main", ""))
			.await
			.unwrap();

		assert_eq!(record.version, "deadbee");
		assert_eq!(record.commit, COMMIT_MAIN);
		assert_eq!(record.url, "/deadbee");

		let app = state.inspect_app("team-a", "web").await.unwrap();
		let versions = app
			.deploy
			.iter()
			.map(|record| record.version.as_str())
			.collect::<Vec<_>>();
		assert_eq!(versions, ["deadbee", "latest"]);

		let containers = state.runtime.containers();
		let names = containers
			.iter()
			.map(|container| container.name.as_str())
			.collect::<HashSet<_>>();
		assert_eq!(names, HashSet::from(["web_deadbee", "web_latest"]));
		for container in &containers {
			assert!(container.running);
			assert!(container.network_addresses.contains_key(testing::INGRESS_NETWORK));
			assert!(container.network_addresses.contains_key("berth_team-a"));
			let identity = RuntimeIdentity::from_labels(&container.labels).unwrap();
			assert_eq!(identity.namespace, "team-a");
			assert_eq!(
				app.find_deployment(&identity.version).unwrap().container_id,
				container.id
			);
		}

		for options in state.runtime.created() {
			assert_eq!(options.cpu, Some(1.0));
			assert_eq!(options.memory_gb, Some(1));
			assert!(options.ports.is_empty());
		}

		let builds = state.runtime.builds();
		assert_eq!(builds.len(), 1);
		assert_eq!(builds[0].tag, "web:deadbee");
		assert_eq!(builds[0].dockerfile, "Dockerfile");
		assert_eq!(builds[0].build_args[APP_PORT_ARG], "8080");
		assert_eq!(state.vcs.checkouts(), [COMMIT_MAIN]);
	}

	#[tokio::test]
	async fn redeploying_keeps_one_live_container_per_version() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;
		let selector = GitReferenceSelector::default();

		state.deploy("team-a", "web", &selector).await.unwrap();
		state.deploy("team-a", "web", &selector).await.unwrap();

		let app = state.inspect_app("team-a", "web").await.unwrap();
		assert_eq!(app.deploy.len(), 2);
		let live = state
			.runtime
			.containers()
			.into_iter()
			.map(|container| container.id)
			.collect::<HashSet<_>>();
		assert_eq!(live.len(), 2);
		for record in &app.deploy {
			assert!(live.contains(&record.container_id));
		}

		// One clone, then fetches into the existing working copy
		assert_eq!(state.vcs.clones().len(), 1);
		assert_eq!(state.vcs.fetches().len(), 1);
		assert!(state.runtime.calls().contains(&"stop c1".to_string()));
		assert!(state.runtime.calls().contains(&"remove c1".to_string()));
	}

	#[tokio::test]
	async fn concurrent_deploys_of_one_app_leave_consistent_records() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;
		let selector = GitReferenceSelector::default();

		let (first, second) = tokio::join!(
			state.deploy("team-a", "web", &selector),
			state.deploy("team-a", "web", &selector)
		);
		assert_eq!(first.unwrap().version, "deadbee");
		assert_eq!(second.unwrap().version, "deadbee");

		let app = state.inspect_app("team-a", "web").await.unwrap();
		assert_eq!(app.deploy.len(), 2);
		let containers = state.runtime.containers();
		assert_eq!(containers.len(), 2);
		for record in &app.deploy {
			let container = containers
				.iter()
				.find(|container| container.id == record.container_id)
				.unwrap();
			assert!(container.running);
		}
	}

	#[tokio::test]
	async fn removing_the_namespace_during_a_deploy_leaves_nothing_behind() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;

		let selector = GitReferenceSelector::default();
		let (deployed, removed) = tokio::join!(
			state.deploy("team-a", "web", &selector),
			state.remove_namespace("team-a")
		);
		removed.unwrap();
		if let Err(err) = deployed {
			assert_eq!(err, ErrorType::NamespaceNotFound(String::new()));
		}

		assert!(state.runtime.containers().is_empty());
		assert!(!state.runtime.has_network("berth_team-a"));
		assert!(state.store.load("team-a").await.unwrap().is_none());
		assert!(!dir.path().join("data/namespace/team-a").exists());
	}

	#[tokio::test]
	async fn a_new_version_keeps_older_versions_running() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;

		state
			.deploy("team-a", "web", &GitReferenceSelector::default())
			.await
			.unwrap();
		let tagged = state
			.deploy("team-a", "web", &GitReferenceSelector::tag("v1.0.0"))
			.await
			.unwrap();

		assert_eq!(tagged.commit, COMMIT_V1);
		let app = state.inspect_app("team-a", "web").await.unwrap();
		let mut versions = app
			.deploy
			.iter()
			.map(|record| record.version.clone())
			.collect::<Vec<_>>();
		versions.sort();
		assert_eq!(versions, ["1111111", "deadbee", "latest"]);
		assert_eq!(state.runtime.containers().len(), 3);
		assert_eq!(
			app.find_deployment("latest").unwrap().commit,
			COMMIT_V1
		);
	}

	#[tokio::test]
	async fn working_copy_without_git_dir_is_recloned() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;
		let working_copy = dir.path().join("data/namespace/team-a/repo/web");
		std::fs::create_dir_all(&working_copy).unwrap();
		std::fs::write(working_copy.join("stale"), "").unwrap();

		state
			.deploy("team-a", "web", &GitReferenceSelector::default())
			.await
			.unwrap();

		assert_eq!(state.vcs.clones(), [working_copy.clone()]);
		assert!(!working_copy.join("stale").exists());
	}

	#[tokio::test]
	async fn build_template_is_copied_into_the_working_copy() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;
		std::fs::create_dir_all(dir.path().join("templates")).unwrap();
		std::fs::write(dir.path().join("templates/Dockerfile.node"), "FROM node\n").unwrap();
		let mut namespace = state.inspect_namespace("team-a").await.unwrap();
		namespace.find_app_mut("web").unwrap().platform = "node".into();
		state.store.save(&namespace).await.unwrap();

		state
			.deploy("team-a", "web", &GitReferenceSelector::default())
			.await
			.unwrap();

		assert_eq!(state.runtime.builds()[0].dockerfile, "Dockerfile.node");
		assert!(dir
			.path()
			.join("data/namespace/team-a/repo/web/Dockerfile.node")
			.exists());
	}

	#[tokio::test]
	async fn unresolvable_reference_touches_no_container() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;

		let err = state
			.deploy("team-a", "web", &GitReferenceSelector::tag("v9"))
			.await
			.unwrap_err();

		assert_eq!(err, ErrorType::TagNotFound(String::new()));
		assert!(state.runtime.containers().is_empty());
		assert!(state.vcs.clones().is_empty());
	}

	#[tokio::test]
	async fn unknown_app_and_namespace_are_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let state = state(dir.path()).await;
		let selector = GitReferenceSelector::default();

		assert_eq!(
			state.deploy("team-b", "web", &selector).await.unwrap_err(),
			ErrorType::NamespaceNotFound(String::new())
		);
		assert_eq!(
			state.deploy("team-a", "api", &selector).await.unwrap_err(),
			ErrorType::AppNotFound(String::new())
		);
	}
}
