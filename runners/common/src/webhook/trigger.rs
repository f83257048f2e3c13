use wildmatch::WildMatch;

use crate::prelude::*;

/// Whether a push should deploy an app with the given trigger.
///
/// A branch trigger's rule is the exact branch name. A tag trigger's rule is a
/// glob, where `*` matches any tag. An empty rule never matches.
pub fn matches(trigger: &Trigger, event: &GitPushEvent) -> bool {
	if event.ref_type != Some(trigger.trigger_type) {
		return false;
	}

	let rule = trigger.rule.as_str();
	if rule.trim().is_empty() {
		return false;
	}

	match trigger.trigger_type {
		GitRefType::Branch => rule == event.ref_name,
		GitRefType::Tag => rule == "*" || WildMatch::new(rule).matches(&event.ref_name),
	}
}

/// The reference a matched push deploys. A branch push pins the pushed commit,
/// so a later push to the branch does not change what this one deploys.
pub fn selector_for(event: &GitPushEvent) -> GitReferenceSelector {
	match event.ref_type {
		Some(GitRefType::Tag) => GitReferenceSelector::tag(&event.ref_name),
		_ => GitReferenceSelector::branch(&event.ref_name, &event.commit),
	}
}
