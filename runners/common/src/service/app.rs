use std::collections::HashSet;

use rand::{seq::SliceRandom, thread_rng};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{is_valid_name, with_deadline, AppState};
use crate::{
	prelude::*,
	vcs::{credentials_for, GitUrl},
};

/// The characters a generated webhook secret is made of
const SECRET_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// The length of a generated webhook secret
const SECRET_LENGTH: usize = 32;

/// Everything needed to register an app. The webhook secret is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppRequest {
	pub namespace: String,
	pub name: String,
	pub cpu: f64,
	pub memory: u32,
	pub repo: String,
	#[serde(default)]
	pub token: Option<String>,
	#[serde(default)]
	pub platform: String,
	pub trigger: Trigger,
	#[serde(default)]
	pub envs: Vec<EnvVar>,
	pub urls: Vec<AppUrl>,
}

impl CreateAppRequest {
	/// Checks every field, returning what is wrong with the first invalid one
	fn validate(&self) -> Result<(), ErrorType> {
		let invalid = |reason: String| Err(ErrorType::WrongParameters(reason));

		if !is_valid_name(&self.name) {
			return invalid(format!("`{}` is not a valid app name", self.name));
		}
		GitUrl::parse(&self.repo)?;
		if self.cpu.is_nan() || self.cpu <= 0.0 {
			return invalid("cpu must be greater than zero".to_string());
		}
		if self.memory == 0 {
			return invalid("memory must be at least 1 GB".to_string());
		}
		if self.trigger.rule.trim().is_empty() {
			return invalid("trigger rule must not be empty".to_string());
		}

		let mut keys = HashSet::new();
		for EnvVar { key, .. } in &self.envs {
			if key.is_empty() {
				return invalid("environment variable keys must not be empty".to_string());
			}
			if !keys.insert(key.as_str()) {
				return invalid(format!("environment variable `{key}` is set twice"));
			}
		}

		if self.urls.is_empty() {
			return invalid("at least one url is required".to_string());
		}
		if let Some(url) = self
			.urls
			.iter()
			.find(|url| url.host.trim_matches('/').is_empty() || url.port == 0)
		{
			return invalid(format!("url `{}:{}` needs a host and a port", url.host, url.port));
		}

		Ok(())
	}
}

impl<R, V, S> AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// Registers an app in a namespace. Nothing is deployed until a matching
	/// push arrives or [`deploy`](Self::deploy) is called.
	///
	/// When the engine has a public URL, a push webhook is registered on the
	/// app's repository first, and the app is not created if that fails.
	#[instrument(skip(self, request), fields(namespace = %request.namespace, app = %request.name))]
	pub async fn create_app(&self, request: CreateAppRequest) -> Result<AppSpec, ErrorType> {
		request.validate()?;

		let app = AppSpec {
			namespace: request.namespace,
			name: request.name,
			cpu: request.cpu,
			memory: request.memory,
			repo: request.repo,
			token: request.token.filter(|token| !token.is_empty()),
			platform: request.platform,
			trigger: request.trigger,
			envs: request.envs,
			urls: request.urls,
			secret: generate_secret(),
			deploy: vec![],
		};

		if self
			.load_namespace(&app.namespace)
			.await?
			.find_app(&app.name)
			.is_some()
		{
			return Err(ErrorType::AppAlreadyExists(app.name));
		}
		self.register_webhook(&app).await?;

		let created = app.clone();
		self.update_namespace(&created.namespace, move |namespace| {
			if namespace.find_app(&app.name).is_some() {
				return Err(ErrorType::AppAlreadyExists(app.name));
			}
			namespace.apps.push(app);
			Ok(())
		})
		.await?;
		info!("App created");

		Ok(created)
	}

	/// Registers the push webhook of an app on its repository, unless the
	/// engine has no public URL
	async fn register_webhook(&self, app: &AppSpec) -> Result<(), ErrorType> {
		let Some(callback_url) = self.hooks.callback_url(&app.namespace, &app.name) else {
			debug!("No public url, the webhook of `{}` is not registered", app.name);
			return Ok(());
		};

		let credentials = credentials_for(app, &self.config.git.credentials)?.ok_or_else(|| {
			ErrorType::WrongParameters(format!(
				"a token for `{}` is needed to register its webhook",
				app.repo
			))
		})?;
		with_deadline(
			self.config.timeouts.git(),
			"registering the webhook",
			self.hooks
				.ensure(app, &credentials.password, &callback_url),
		)
		.await?;

		Ok(())
	}

	/// Lists the apps of a namespace
	pub async fn list_apps(&self, namespace: &str) -> Result<Vec<AppSpec>, ErrorType> {
		Ok(self.load_namespace(namespace).await?.apps)
	}

	/// Inspects an app, including its deploy log
	pub async fn inspect_app(&self, namespace: &str, app: &str) -> Result<AppSpec, ErrorType> {
		self.load_namespace(namespace)
			.await?
			.find_app(app)
			.cloned()
			.ok_or_else(|| ErrorType::AppNotFound(app.to_string()))
	}

	/// Removes an app: every container it has deployed, its working copy and
	/// its state. Waits for a running deployment of the app to finish first.
	#[instrument(skip(self))]
	pub async fn remove_app(&self, namespace: &str, app: &str) -> Result<(), ErrorType> {
		let lock = self
			.locks
			.apps
			.get((namespace.to_string(), app.to_string()));
		let _guard = lock.lock().await;

		let spec = self.inspect_app(namespace, app).await?;
		for record in &spec.deploy {
			self.remove_container_if_exists(&record.container_id).await?;
		}

		self.update_namespace(namespace, |namespace| {
			namespace
				.remove_app(app)
				.map(|_| ())
				.ok_or_else(|| ErrorType::AppNotFound(app.to_string()))
		})
		.await?;

		let repo_dir = self.repo_dir(namespace, app);
		if fs::try_exists(&repo_dir).await? {
			fs::remove_dir_all(&repo_dir).await?;
		}
		info!("App removed");

		Ok(())
	}
}

fn generate_secret() -> String {
	let mut rng = thread_rng();
	(0..SECRET_LENGTH)
		.filter_map(|_| SECRET_ALPHABET.choose(&mut rng))
		.map(|byte| char::from(*byte))
		.collect()
}
