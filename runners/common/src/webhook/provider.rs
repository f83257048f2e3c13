use http::HeaderMap;
use serde::Deserialize;

use crate::prelude::*;

/// The header GitHub names its event in
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
/// The header GitLab names its event in
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
/// The header Gitee names its event in
pub const GITEE_EVENT_HEADER: &str = "x-gitee-event";

/// Detects which provider sent a webhook from its event header
pub fn detect_provider(headers: &HeaderMap) -> Option<GitProvider> {
	[
		(GITHUB_EVENT_HEADER, GitProvider::GitHub),
		(GITLAB_EVENT_HEADER, GitProvider::GitLab),
		(GITEE_EVENT_HEADER, GitProvider::Gitee),
	]
	.into_iter()
	.find(|(header, _)| {
		headers
			.get(*header)
			.is_some_and(|value| !value.is_empty())
	})
	.map(|(_, provider)| provider)
}

/// Whether the webhook is GitHub's `ping`, sent once when a hook is set up
pub fn is_ping(provider: GitProvider, headers: &HeaderMap) -> bool {
	provider == GitProvider::GitHub &&
		headers
			.get(GITHUB_EVENT_HEADER)
			.is_some_and(|value| value == "ping")
}

/// The fields of a GitHub or Gitee push payload the engine uses. Both
/// providers use the same shape.
#[derive(Debug, Deserialize)]
struct RepositoryPushPayload {
	#[serde(rename = "ref")]
	reference: String,
	#[serde(default)]
	after: Option<String>,
	repository: Repository,
	#[serde(default)]
	head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
struct Repository {
	full_name: String,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
	id: String,
}

/// The fields of a GitLab push payload the engine uses
#[derive(Debug, Deserialize)]
struct GitLabPushPayload {
	#[serde(rename = "ref")]
	reference: String,
	#[serde(default)]
	after: Option<String>,
	#[serde(default)]
	checkout_sha: Option<String>,
	project: GitLabProject,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
	path_with_namespace: String,
}

/// Normalizes a push payload into a [`GitPushEvent`]. Returns [`None`] for a
/// push that deleted its reference, which has nothing to deploy.
pub fn normalize(provider: GitProvider, body: &[u8]) -> Result<Option<GitPushEvent>, ErrorType> {
	let (repo, reference, commit, after) = match provider {
		GitProvider::GitHub | GitProvider::Gitee => {
			let payload: RepositoryPushPayload = serde_json::from_slice(body)?;
			let commit = payload
				.head_commit
				.map(|commit| commit.id)
				.or_else(|| payload.after.clone())
				.unwrap_or_default();
			(
				payload.repository.full_name,
				payload.reference,
				commit,
				payload.after,
			)
		}
		GitProvider::GitLab => {
			let payload: GitLabPushPayload = serde_json::from_slice(body)?;
			let commit = payload
				.checkout_sha
				.or_else(|| payload.after.clone())
				.unwrap_or_default();
			(
				payload.project.path_with_namespace,
				payload.reference,
				commit,
				payload.after,
			)
		}
	};

	if after.as_deref() == Some(constants::ZERO_COMMIT) {
		debug!("Ignoring deletion of `{reference}` in {repo}");
		return Ok(None);
	}

	Ok(Some(GitPushEvent::new(provider, repo, &reference, commit)))
}

#[cfg(test)]
mod tests {
	use http::HeaderValue;

	use super::*;

	#[test]
	fn provider_comes_from_the_event_header() {
		let mut headers = HeaderMap::new();
		assert_eq!(detect_provider(&headers), None);

		headers.insert("X-Gitlab-Event", HeaderValue::from_static("Push Hook"));
		assert_eq!(detect_provider(&headers), Some(GitProvider::GitLab));

		headers.insert("X-GitHub-Event", HeaderValue::from_static("push"));
		assert_eq!(detect_provider(&headers), Some(GitProvider::GitHub));
		assert!(!is_ping(GitProvider::GitHub, &headers));

		headers.insert("X-GitHub-Event", HeaderValue::from_static("ping"));
		assert!(is_ping(GitProvider::GitHub, &headers));
	}

	#[test]
	fn github_push_is_normalized() {
		let body = br#"{
			"ref": "refs/heads/main",
			"before": "0000000000000000000000000000000000000001",
			"after": "deadbeefcafebabe0000000000000000000000aa",
			"repository": { "full_name": "acme/web", "private": true },
			"head_commit": { "id": "deadbeefcafebabe0000000000000000000000aa" }
		}"#;

		let event = normalize(GitProvider::GitHub, body).unwrap().unwrap();
		assert_eq!(event.repo, "acme/web");
		assert_eq!(event.ref_type, Some(GitRefType::Branch));
		assert_eq!(event.ref_name, "main");
		assert_eq!(event.commit, "deadbeefcafebabe0000000000000000000000aa");
	}

	#[test]
	fn gitlab_tag_push_is_normalized() {
		let body = br#"{
			"object_kind": "tag_push",
			"ref": "refs/tags/v1.2.0",
			"after": "82b3d5ae55f7080f1e6022629cdb57bfae7cccc7",
			"checkout_sha": "82b3d5ae55f7080f1e6022629cdb57bfae7cccc7",
			"project": { "path_with_namespace": "group/api" }
		}"#;

		let event = normalize(GitProvider::GitLab, body).unwrap().unwrap();
		assert_eq!(event.repo, "group/api");
		assert_eq!(event.ref_type, Some(GitRefType::Tag));
		assert_eq!(event.ref_name, "v1.2.0");
	}

	#[test]
	fn gitee_push_without_head_commit_uses_after() {
		let body = br#"{
			"ref": "refs/heads/dev",
			"after": "0badc0de00000000000000000000000000000bb",
			"repository": { "full_name": "acme/web" }
		}"#;

		let event = normalize(GitProvider::Gitee, body).unwrap().unwrap();
		assert_eq!(event.commit, "0badc0de00000000000000000000000000000bb");
	}

	#[test]
	fn branch_deletion_is_ignored() {
		let body = br#"{
			"ref": "refs/heads/feature",
			"after": "0000000000000000000000000000000000000000",
			"repository": { "full_name": "acme/web" },
			"head_commit": null
		}"#;

		assert_eq!(normalize(GitProvider::GitHub, body).unwrap(), None);
	}

	#[test]
	fn malformed_payload_is_an_error() {
		assert!(normalize(GitProvider::GitHub, b"{not json").is_err());
	}
}
