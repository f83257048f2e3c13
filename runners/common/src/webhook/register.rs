use reqwest::{
	header::{AUTHORIZATION, USER_AGENT},
	Client,
	RequestBuilder,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{prelude::*, vcs::GitUrl};

/// GitHub rejects API requests without a user agent
const BERTH_USER_AGENT: &str = concat!("berth/", env!("CARGO_PKG_VERSION"));
/// The header GitLab reads access tokens from
const GITLAB_ACCESS_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// What [`HookRegistrar::ensure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookRegistration {
	/// The repository had no hook for the callback URL, so one was created
	Created,
	/// A hook for the callback URL existed and was updated with the app's
	/// secret
	Updated,
}

/// A hook as listed by a provider. GitHub nests the callback URL in the
/// hook's config, the others do not.
#[derive(Debug, Deserialize)]
struct ListedHook {
	id: u64,
	#[serde(default)]
	url: Option<String>,
	#[serde(default)]
	config: Option<ListedHookConfig>,
}

#[derive(Debug, Deserialize)]
struct ListedHookConfig {
	#[serde(default)]
	url: Option<String>,
}

impl ListedHook {
	fn callback_url(&self) -> Option<&str> {
		self.config
			.as_ref()
			.and_then(|config| config.url.as_deref())
			.or(self.url.as_deref())
	}
}

/// Registers push webhooks on app repositories through the API of the
/// provider hosting each of them
#[derive(Debug, Clone)]
pub struct HookRegistrar {
	client: Client,
	settings: WebhookSettings,
}

impl HookRegistrar {
	pub fn new(settings: WebhookSettings) -> Self {
		Self {
			client: Client::new(),
			settings,
		}
	}

	/// The URL pushes to an app are delivered to. [`None`] when the engine has
	/// no public URL, in which case webhooks are not registered.
	pub fn callback_url(&self, namespace: &str, app: &str) -> Option<String> {
		self.settings.public_url.as_deref().map(|public_url| {
			format!(
				"{}/webhook/git/{namespace}/{app}",
				public_url.trim_end_matches('/')
			)
		})
	}

	/// Makes sure the app's repository delivers pushes to `callback_url`,
	/// signed with the app's secret. A hook for the URL is created if the
	/// repository has none, and updated otherwise.
	#[instrument(skip(self, app, token), fields(repo = %app.repo))]
	pub async fn ensure(
		&self,
		app: &AppSpec,
		token: &str,
		callback_url: &str,
	) -> Result<HookRegistration, ErrorType> {
		let repo = GitUrl::parse(&app.repo)?;
		let provider = provider_for_host(&repo.host);
		let hooks_url = self.hooks_url(provider, &repo);

		let hooks = self
			.authorize(provider, self.client.get(&hooks_url), token)
			.send()
			.await?
			.error_for_status()?
			.json::<Vec<ListedHook>>()
			.await?;
		let existing = hooks
			.iter()
			.find(|hook| hook.callback_url() == Some(callback_url));

		let body = hook_body(provider, token, callback_url, &app.secret);
		let registration = match existing {
			Some(hook) => {
				let hook_url = format!("{hooks_url}/{}", hook.id);
				let request = match provider {
					GitProvider::GitLab => self.client.put(hook_url),
					GitProvider::GitHub | GitProvider::Gitee => self.client.patch(hook_url),
				};
				self.authorize(provider, request, token)
					.json(&body)
					.send()
					.await?
					.error_for_status()?;
				HookRegistration::Updated
			}
			None => {
				self.authorize(provider, self.client.post(&hooks_url), token)
					.json(&body)
					.send()
					.await?
					.error_for_status()?;
				HookRegistration::Created
			}
		};
		info!("{registration:?} the {provider} webhook delivering pushes to {callback_url}");

		Ok(registration)
	}

	/// The hooks collection of a repository
	fn hooks_url(&self, provider: GitProvider, repo: &GitUrl) -> String {
		match provider {
			GitProvider::GitHub => format!(
				"{}/repos/{}/{}/hooks",
				self.settings.github_api.trim_end_matches('/'),
				repo.owner,
				repo.repo
			),
			GitProvider::Gitee => format!(
				"{}/repos/{}/{}/hooks",
				self.settings.gitee_api.trim_end_matches('/'),
				repo.owner,
				repo.repo
			),
			GitProvider::GitLab => {
				let api = self
					.settings
					.gitlab_api
					.clone()
					.unwrap_or_else(|| format!("https://{}/api/v4", repo.host));
				// Projects are addressed by their url-encoded full path
				format!(
					"{}/projects/{}%2F{}/hooks",
					api.trim_end_matches('/'),
					repo.owner.replace('/', "%2F"),
					repo.repo
				)
			}
		}
	}

	fn authorize(
		&self,
		provider: GitProvider,
		request: RequestBuilder,
		token: &str,
	) -> RequestBuilder {
		let request = request.header(USER_AGENT, BERTH_USER_AGENT);
		match provider {
			GitProvider::GitHub => request.header(AUTHORIZATION, format!("token {token}")),
			GitProvider::GitLab => request.header(GITLAB_ACCESS_TOKEN_HEADER, token),
			GitProvider::Gitee => request.query(&[("access_token", token)]),
		}
	}
}

/// Repositories on hosts other than GitHub and Gitee are assumed to be on a
/// GitLab instance
fn provider_for_host(host: &str) -> GitProvider {
	match host.trim_start_matches("www.") {
		"github.com" => GitProvider::GitHub,
		"gitee.com" => GitProvider::Gitee,
		_ => GitProvider::GitLab,
	}
}

/// The body creating or updating a push hook. Each provider carries the
/// secret in the field it later sends back or signs with.
fn hook_body(provider: GitProvider, token: &str, callback_url: &str, secret: &str) -> Value {
	match provider {
		GitProvider::GitHub => json!({
			"name": "web",
			"active": true,
			"events": ["push"],
			"config": {
				"url": callback_url,
				"content_type": "json",
				"secret": secret,
			},
		}),
		GitProvider::GitLab => json!({
			"url": callback_url,
			"token": secret,
			"push_events": true,
			"tag_push_events": true,
		}),
		GitProvider::Gitee => json!({
			"access_token": token,
			"url": callback_url,
			"password": secret,
			"push_events": true,
			"tag_push_events": true,
		}),
	}
}
