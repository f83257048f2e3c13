use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The prefix of a fully qualified branch reference
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";
/// The prefix of a fully qualified tag reference
pub const TAG_REF_PREFIX: &str = "refs/tags/";

/// The type of a git reference. Also used as the type of an app's trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GitRefType {
	/// A branch, `refs/heads/<name>`
	Branch,
	/// A tag, `refs/tags/<name>`
	Tag,
}

impl GitRefType {
	/// Splits a fully qualified reference into its type and short name.
	/// Returns [`None`] for anything that is neither a branch nor a tag.
	///
	/// ```
	/// # use models::GitRefType;
	/// assert_eq!(
	/// 	GitRefType::split_ref("refs/tags/v1.2.3"),
	/// 	Some((GitRefType::Tag, "v1.2.3"))
	/// );
	/// assert_eq!(GitRefType::split_ref("refs/pull/1/head"), None);
	/// ```
	pub fn split_ref(reference: &str) -> Option<(Self, &str)> {
		if let Some(branch) = reference.strip_prefix(BRANCH_REF_PREFIX) {
			Some((Self::Branch, branch))
		} else {
			reference
				.strip_prefix(TAG_REF_PREFIX)
				.map(|tag| (Self::Tag, tag))
		}
	}
}

impl Display for GitRefType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Branch => write!(f, "branch"),
			Self::Tag => write!(f, "tag"),
		}
	}
}

/// Selects which commit of a repository to deploy. When more than one field is
/// set, the commit wins over the tag, and the tag wins over the branch. When
/// nothing is set, the head of the remote's default branch is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitReferenceSelector {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tag: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub branch: Option<String>,
}

impl GitReferenceSelector {
	/// Selects the head of the given branch, pinned to a commit when one is
	/// known. Empty strings are treated as absent.
	pub fn branch(branch: impl Into<String>, commit: impl Into<String>) -> Self {
		Self {
			commit: Some(commit.into()).filter(|commit| !commit.is_empty()),
			tag: None,
			branch: Some(branch.into()).filter(|branch| !branch.is_empty()),
		}
	}

	/// Selects the given tag
	pub fn tag(tag: impl Into<String>) -> Self {
		Self {
			commit: None,
			tag: Some(tag.into()).filter(|tag| !tag.is_empty()),
			branch: None,
		}
	}
}

/// The git hosting providers webhooks are accepted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GitProvider {
	GitHub,
	GitLab,
	Gitee,
}

impl Display for GitProvider {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::GitHub => write!(f, "github"),
			Self::GitLab => write!(f, "gitlab"),
			Self::Gitee => write!(f, "gitee"),
		}
	}
}

/// A push event, normalized from any provider's webhook payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitPushEvent {
	/// The provider the event came from
	pub provider: GitProvider,
	/// The full name of the repository, e.g. `acme/web`
	pub repo: String,
	/// The type of the pushed reference. [`None`] when the reference is
	/// neither a branch nor a tag, in which case the event never matches a
	/// trigger
	pub ref_type: Option<GitRefType>,
	/// The short name of the pushed reference, e.g. `main` or `v1.2.3`
	pub ref_name: String,
	/// The commit the reference points to after the push
	pub commit: String,
}

impl GitPushEvent {
	/// Creates an event from a fully qualified reference
	pub fn new(
		provider: GitProvider,
		repo: impl Into<String>,
		reference: &str,
		commit: impl Into<String>,
	) -> Self {
		let (ref_type, ref_name) = match GitRefType::split_ref(reference) {
			Some((ref_type, name)) => (Some(ref_type), name.to_string()),
			None => (None, String::new()),
		};
		Self {
			provider,
			repo: repo.into(),
			ref_type,
			ref_name,
			commit: commit.into(),
		}
	}
}
