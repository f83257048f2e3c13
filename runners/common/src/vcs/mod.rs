use std::{future::Future, path::Path};

use url::Url;

use crate::prelude::*;

/// The `git2` implementation of [`VersionControl`]
mod git;

pub use self::git::GitClient;

/// The version control operations the deploy pipeline needs. All paths are
/// the app's working copy.
pub trait VersionControl: Clone + Send + Sync + 'static {
	/// Lists the references of a remote repository without cloning it
	fn list_remote_refs(
		&self,
		url: &str,
		credentials: Option<&GitCredentials>,
	) -> impl Future<Output = Result<RemoteRefs, ErrorType>> + Send;

	/// Clones a repository into a directory that does not exist yet
	fn clone_repo(
		&self,
		url: &str,
		path: &Path,
		credentials: Option<&GitCredentials>,
	) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Force-fetches every branch and tag of `origin`
	fn fetch(
		&self,
		path: &Path,
		credentials: Option<&GitCredentials>,
	) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Checks out the given commit, discarding any local changes
	fn checkout(&self, path: &Path, commit: &str)
		-> impl Future<Output = Result<(), ErrorType>> + Send;
}

/// The references advertised by a remote repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRefs {
	/// Every advertised reference, as `(name, commit)`, in the order the remote
	/// advertised them
	pub refs: Vec<(String, String)>,
	/// The target of the remote's symbolic `HEAD`, if it advertised one
	pub head: Option<String>,
}

impl RemoteRefs {
	/// Finds the commit of a fully qualified reference
	pub fn find(&self, name: &str) -> Option<&str> {
		self.refs
			.iter()
			.find(|(ref_name, _)| ref_name == name)
			.map(|(_, commit)| commit.as_str())
	}
}

/// Basic-auth credentials for a git remote
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredentials {
	pub username: String,
	pub password: String,
}

impl std::fmt::Debug for GitCredentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GitCredentials")
			.field("username", &self.username)
			.field("password", &"********")
			.finish()
	}
}

/// The parts of a repository URL credentials are looked up by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
	/// The host of the repository, e.g. `github.com`
	pub host: String,
	/// The user or group owning the repository
	pub owner: String,
	/// The name of the repository, without any `.git` suffix
	pub repo: String,
}

impl GitUrl {
	/// Parses an `https://host/owner/repo(.git)` or `git@host:owner/repo(.git)`
	/// URL
	pub fn parse(repo_url: &str) -> Result<Self, ErrorType> {
		let (host, path) = if let Some(ssh) = repo_url.strip_prefix("git@") {
			let (host, path) = ssh.split_once(':').ok_or_else(|| {
				ErrorType::WrongParameters(format!("invalid ssh repository url `{repo_url}`"))
			})?;
			(host.to_string(), path.to_string())
		} else {
			let url = Url::parse(repo_url).map_err(|err| {
				ErrorType::WrongParameters(format!("invalid repository url `{repo_url}`: {err}"))
			})?;
			let host = url.host_str().ok_or_else(|| {
				ErrorType::WrongParameters(format!("repository url `{repo_url}` has no host"))
			})?;
			(host.to_string(), url.path().to_string())
		};

		let path = path.trim_matches('/');
		let path = path.strip_suffix(".git").unwrap_or(path);
		let (owner, repo) = path
			.rsplit_once('/')
			.filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
			.ok_or_else(|| {
				ErrorType::WrongParameters(format!(
					"repository url `{repo_url}` is not of the form host/owner/repo"
				))
			})?;

		Ok(Self {
			host,
			owner: owner.to_string(),
			repo: repo.to_string(),
		})
	}
}

/// Picks the credentials to use for an app's repository. The app's own token
/// wins; otherwise the first configured token matching the repository's host
/// (and owner, when the entry names one) is used.
pub fn credentials_for(
	app: &AppSpec,
	configured: &[GitCredentialConfig],
) -> Result<Option<GitCredentials>, ErrorType> {
	let url = GitUrl::parse(&app.repo)?;

	let token = app
		.token
		.clone()
		.filter(|token| !token.is_empty())
		.or_else(|| {
			configured
				.iter()
				.find(|config| {
					config.host == url.host &&
						config
							.owner
							.as_deref()
							.map_or(true, |owner| owner == url.owner)
				})
				.map(|config| config.token.clone())
		});

	Ok(token.map(|password| GitCredentials {
		username: url.owner,
		password,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_https_urls() {
		let url = GitUrl::parse("https://github.com/acme/web.git").unwrap();
		assert_eq!(url.host, "github.com");
		assert_eq!(url.owner, "acme");
		assert_eq!(url.repo, "web");
	}

	#[test]
	fn parses_ssh_urls() {
		let url = GitUrl::parse("git@gitlab.example.com:group/sub/api.git").unwrap();
		assert_eq!(url.host, "gitlab.example.com");
		assert_eq!(url.owner, "group/sub");
		assert_eq!(url.repo, "api");
	}

	#[test]
	fn rejects_urls_without_owner() {
		assert_eq!(
			GitUrl::parse("https://github.com/web").unwrap_err().kind(),
			ErrorKind::InvalidInput
		);
	}

	#[test]
	fn configured_token_is_used_when_app_has_none() {
		let mut app = crate::testing::app("team-a", "web");
		let configured = vec![
			GitCredentialConfig {
				host: "github.com".into(),
				owner: Some("someone-else".into()),
				token: "wrong".into(),
			},
			GitCredentialConfig {
				host: "github.com".into(),
				owner: None,
				token: "right".into(),
			},
		];

		let credentials = credentials_for(&app, &configured).unwrap().unwrap();
		assert_eq!(credentials.username, "acme");
		assert_eq!(credentials.password, "right");

		app.token = Some("own".into());
		let credentials = credentials_for(&app, &configured).unwrap().unwrap();
		assert_eq!(credentials.password, "own");
	}
}
