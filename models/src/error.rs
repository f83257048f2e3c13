use std::{
	error::Error as StdError,
	fmt::{Display, Formatter},
	mem,
};

use http::StatusCode;

/// The broad category an [`ErrorType`] falls under. Callers use this to decide
/// how an error is surfaced (an HTTP status, a log line, a CLI exit message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// A namespace, app, git reference or deploy record does not exist
	NotFound,
	/// The resource being created already exists
	Conflict,
	/// A webhook signature or token did not verify
	AuthFailure,
	/// A git, build or container runtime call failed
	UpstreamFailure,
	/// The system reached a state it cannot make progress from
	InvariantViolation,
	/// The caller supplied an invalid value
	InvalidInput,
}

/// A list of all the possible errors that can be returned by the engine
#[derive(Debug)]
pub enum ErrorType {
	/// The namespace does not exist
	NamespaceNotFound(String),
	/// The app does not exist in the namespace
	AppNotFound(String),
	/// The requested tag does not exist on the remote repository
	TagNotFound(String),
	/// The requested branch does not exist on the remote repository
	BranchNotFound(String),
	/// A namespace with the same name already exists
	NamespaceAlreadyExists(String),
	/// An app with the same name already exists in the namespace
	AppAlreadyExists(String),
	/// The webhook signature or token did not match the app's secret
	InvalidSignature,
	/// The parameters supplied are invalid. The string describes what is wrong
	WrongParameters(String),
	/// Every /24 of the namespace subnet pool is already in use
	SubnetPoolExhausted,
	/// The remote repository has no reference that a default could be picked
	/// from
	NoResolvableRef,
	/// A git, build, filesystem or container runtime operation failed
	Upstream(anyhow::Error),
}

impl ErrorType {
	/// Returns the category of this error
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::NamespaceNotFound(_) |
			Self::AppNotFound(_) |
			Self::TagNotFound(_) |
			Self::BranchNotFound(_) => ErrorKind::NotFound,
			Self::NamespaceAlreadyExists(_) | Self::AppAlreadyExists(_) => ErrorKind::Conflict,
			Self::InvalidSignature => ErrorKind::AuthFailure,
			Self::WrongParameters(_) => ErrorKind::InvalidInput,
			Self::SubnetPoolExhausted | Self::NoResolvableRef => ErrorKind::InvariantViolation,
			Self::Upstream(_) => ErrorKind::UpstreamFailure,
		}
	}

	/// Returns the status code that should be used for this error when it is
	/// surfaced over HTTP
	pub fn default_status_code(&self) -> StatusCode {
		match self.kind() {
			ErrorKind::NotFound => StatusCode::NOT_FOUND,
			ErrorKind::Conflict => StatusCode::CONFLICT,
			ErrorKind::AuthFailure => StatusCode::UNAUTHORIZED,
			ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
			ErrorKind::UpstreamFailure | ErrorKind::InvariantViolation => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}

	/// Returns a one-line, user-friendly description of the error
	pub fn message(&self) -> String {
		match self {
			Self::NamespaceNotFound(name) => format!("namespace `{name}` not found"),
			Self::AppNotFound(name) => format!("app `{name}` not found"),
			Self::TagNotFound(tag) => format!("tag `{tag}` not found on remote"),
			Self::BranchNotFound(branch) => format!("branch `{branch}` not found on remote"),
			Self::NamespaceAlreadyExists(name) => format!("namespace `{name}` already exists"),
			Self::AppAlreadyExists(name) => format!("app `{name}` already exists"),
			Self::InvalidSignature => "webhook signature verification failed".to_string(),
			Self::WrongParameters(reason) => format!("invalid parameters: {reason}"),
			Self::SubnetPoolExhausted => "no available subnet left in the pool".to_string(),
			Self::NoResolvableRef => "remote repository has no resolvable reference".to_string(),
			Self::Upstream(err) => format!("{err:#}"),
		}
	}

	/// Creates an [`ErrorType::Upstream`] with the given message
	pub fn upstream(message: impl Display) -> Self {
		Self::Upstream(anyhow::anyhow!(message.to_string()))
	}
}

impl PartialEq for ErrorType {
	fn eq(&self, other: &Self) -> bool {
		mem::discriminant(self) == mem::discriminant(other)
	}
}

impl Eq for ErrorType {}

impl<Error> From<Error> for ErrorType
where
	Error: StdError + Send + Sync + 'static,
{
	fn from(error: Error) -> Self {
		Self::Upstream(error.into())
	}
}

impl Display for ErrorType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_map_to_status_codes() {
		assert_eq!(
			ErrorType::NamespaceNotFound("a".into()).default_status_code(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			ErrorType::AppAlreadyExists("web".into()).default_status_code(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			ErrorType::InvalidSignature.default_status_code(),
			StatusCode::UNAUTHORIZED
		);
		assert_eq!(
			ErrorType::NoResolvableRef.kind(),
			ErrorKind::InvariantViolation
		);
	}

	#[test]
	fn std_errors_become_upstream_failures() {
		let err: ErrorType = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into();
		assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
		assert_eq!(err.to_string(), "disk on fire");
	}
}
