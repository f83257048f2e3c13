use models::{BRANCH_REF_PREFIX, TAG_REF_PREFIX};

use crate::{prelude::*, vcs::GitCredentials};

/// The prefix of remote-tracking references some servers advertise as the
/// target of their symbolic `HEAD`
const REMOTE_TRACKING_PREFIX: &str = "refs/remotes/origin/";

/// The branches tried, in order, when the remote does not say which branch is
/// its default
const FALLBACK_BRANCHES: [&str; 2] = ["main", "master"];

/// Resolves a reference selector to a single, full commit hash.
///
/// An explicit commit is returned as is, without contacting the remote.
/// Everything else is resolved against a listing of the remote's references.
#[instrument(skip(vcs, credentials))]
pub async fn resolve_reference<V>(
	vcs: &V,
	repo: &str,
	credentials: Option<&GitCredentials>,
	selector: &GitReferenceSelector,
) -> Result<String, ErrorType>
where
	V: VersionControl,
{
	if let Some(commit) = non_empty(&selector.commit) {
		return Ok(commit.to_string());
	}

	let refs = vcs.list_remote_refs(repo, credentials).await?;
	resolve_from_refs(selector, &refs)
}

/// Resolves a reference selector against an already fetched listing of the
/// remote's references. Priority is commit, then tag, then branch, then the
/// head of the default branch.
pub fn resolve_from_refs(
	selector: &GitReferenceSelector,
	refs: &RemoteRefs,
) -> Result<String, ErrorType> {
	if let Some(commit) = non_empty(&selector.commit) {
		return Ok(commit.to_string());
	}

	if let Some(tag) = non_empty(&selector.tag) {
		let name = format!("{TAG_REF_PREFIX}{tag}");
		// Annotated tags are advertised twice. The peeled entry points at the
		// commit, the plain one at the tag object.
		return refs
			.find(&format!("{name}^{{}}"))
			.or_else(|| refs.find(&name))
			.map(str::to_string)
			.ok_or_else(|| ErrorType::TagNotFound(tag.to_string()));
	}

	if let Some(branch) = non_empty(&selector.branch) {
		return refs
			.find(&format!("{BRANCH_REF_PREFIX}{branch}"))
			.map(str::to_string)
			.ok_or_else(|| ErrorType::BranchNotFound(branch.to_string()));
	}

	default_branch_head(refs)
		.map(str::to_string)
		.ok_or(ErrorType::NoResolvableRef)
}

/// Shortens a commit hash to the version tag used for images, containers and
/// routes
pub fn short_version(commit: &str) -> String {
	commit.chars().take(constants::SHORT_VERSION_LEN).collect()
}

fn default_branch_head(refs: &RemoteRefs) -> Option<&str> {
	let from_symref = refs.head.as_deref().and_then(|head| {
		let head = match head.strip_prefix(REMOTE_TRACKING_PREFIX) {
			Some(branch) => format!("{BRANCH_REF_PREFIX}{branch}"),
			None => head.to_string(),
		};
		refs.find(&head)
	});

	from_symref
		.or_else(|| {
			FALLBACK_BRANCHES
				.iter()
				.find_map(|branch| refs.find(&format!("{BRANCH_REF_PREFIX}{branch}")))
		})
		.or_else(|| {
			refs.refs
				.iter()
				.find(|(name, _)| name.starts_with(BRANCH_REF_PREFIX))
				.map(|(_, commit)| commit.as_str())
		})
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|value| !value.is_empty())
}
