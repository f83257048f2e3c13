use std::path::Path;

use git2::{
	build::{CheckoutBuilder, RepoBuilder},
	Cred,
	Direction,
	FetchOptions,
	Remote,
	RemoteCallbacks,
	Repository,
};
use tokio::task;

use super::{GitCredentials, RemoteRefs, VersionControl};
use crate::prelude::*;

/// The refspecs fetched into an existing working copy. Both are forced, so
/// rewritten branches and moved tags are picked up.
const FETCH_REFSPECS: [&str; 2] = [
	"+refs/heads/*:refs/remotes/origin/*",
	"+refs/tags/*:refs/tags/*",
];

/// A [`VersionControl`] backed by libgit2. Every operation runs on the
/// blocking thread pool, since libgit2 does blocking network and disk IO.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitClient;

impl VersionControl for GitClient {
	#[instrument(skip(self, credentials))]
	async fn list_remote_refs(
		&self,
		url: &str,
		credentials: Option<&GitCredentials>,
	) -> Result<RemoteRefs, ErrorType> {
		let url = url.to_string();
		let credentials = credentials.cloned();

		task::spawn_blocking(move || -> Result<_, ErrorType> {
			let mut remote = Remote::create_detached(url.as_str())?;
			let connection =
				remote.connect_auth(Direction::Fetch, Some(callbacks(credentials.as_ref())), None)?;

			let heads = connection.list()?;
			let head = heads
				.iter()
				.find(|head| head.name() == "HEAD")
				.and_then(|head| head.symref_target())
				.map(str::to_string);
			let refs = heads
				.iter()
				.filter(|head| head.name() != "HEAD")
				.map(|head| (head.name().to_string(), head.oid().to_string()))
				.collect();

			Ok(RemoteRefs { refs, head })
		})
		.await?
	}

	#[instrument(skip(self, credentials))]
	async fn clone_repo(
		&self,
		url: &str,
		path: &Path,
		credentials: Option<&GitCredentials>,
	) -> Result<(), ErrorType> {
		let url = url.to_string();
		let path = path.to_path_buf();
		let credentials = credentials.cloned();

		task::spawn_blocking(move || -> Result<_, ErrorType> {
			RepoBuilder::new()
				.fetch_options(fetch_options(credentials.as_ref()))
				.clone(&url, &path)?;
			Ok(())
		})
		.await?
	}

	#[instrument(skip(self, credentials))]
	async fn fetch(
		&self,
		path: &Path,
		credentials: Option<&GitCredentials>,
	) -> Result<(), ErrorType> {
		let path = path.to_path_buf();
		let credentials = credentials.cloned();

		task::spawn_blocking(move || -> Result<_, ErrorType> {
			let repository = Repository::open(&path)?;
			let mut remote = repository.find_remote("origin")?;
			remote.fetch(
				&FETCH_REFSPECS,
				Some(&mut fetch_options(credentials.as_ref())),
				None,
			)?;
			Ok(())
		})
		.await?
	}

	#[instrument(skip(self))]
	async fn checkout(&self, path: &Path, commit: &str) -> Result<(), ErrorType> {
		let path = path.to_path_buf();
		let commit = commit.to_string();

		task::spawn_blocking(move || -> Result<_, ErrorType> {
			let repository = Repository::open(&path)?;
			let target = repository.revparse_single(&commit)?.peel_to_commit()?;
			repository.checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))?;
			repository.set_head_detached(target.id())?;
			Ok(())
		})
		.await?
	}
}

/// Builds the callbacks that answer credential requests with the given
/// credentials, if any
fn callbacks(credentials: Option<&GitCredentials>) -> RemoteCallbacks<'static> {
	let mut callbacks = RemoteCallbacks::new();
	if let Some(GitCredentials { username, password }) = credentials.cloned() {
		callbacks.credentials(move |_, _, _| Cred::userpass_plaintext(&username, &password));
	}
	callbacks
}

fn fetch_options(credentials: Option<&GitCredentials>) -> FetchOptions<'static> {
	let mut options = FetchOptions::new();
	options.remote_callbacks(callbacks(credentials));
	options
}
