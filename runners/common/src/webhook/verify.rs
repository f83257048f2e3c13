use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::prelude::*;

type HmacSha256 = Hmac<Sha256>;

/// The header GitHub sends the payload's HMAC in
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
/// The header GitLab sends the hook's secret token in
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";
/// The header Gitee sends the hook's secret token in
pub const GITEE_TOKEN_HEADER: &str = "x-gitee-token";

/// Verifies that a webhook was sent by someone knowing the app's secret. An
/// empty secret never verifies.
pub fn verify_webhook(
	provider: GitProvider,
	headers: &HeaderMap,
	body: &[u8],
	secret: &str,
) -> Result<(), ErrorType> {
	if secret.is_empty() {
		return Err(ErrorType::InvalidSignature);
	}

	let header = |name: &str| {
		headers
			.get(name)
			.and_then(|value| value.to_str().ok())
			.unwrap_or_default()
	};

	match provider {
		GitProvider::GitHub => {
			verify_github_signature(header(GITHUB_SIGNATURE_HEADER), body, secret.as_bytes())
		}
		GitProvider::GitLab => verify_token(header(GITLAB_TOKEN_HEADER), secret),
		GitProvider::Gitee => verify_token(header(GITEE_TOKEN_HEADER), secret),
	}
}

/// Verifies a `sha256=<hex>` HMAC-SHA256 signature of the payload, keyed by
/// the configured secret
pub fn verify_github_signature(
	signature_from_header: &str,
	payload: &[u8],
	configured_secret: &[u8],
) -> Result<(), ErrorType> {
	let signature = signature_from_header
		.strip_prefix("sha256=")
		.and_then(|signature| hex::decode(signature).ok())
		.ok_or(ErrorType::InvalidSignature)?;

	let mut payload_signature =
		HmacSha256::new_from_slice(configured_secret).map_err(|_| ErrorType::InvalidSignature)?;
	payload_signature.update(payload);

	// constant time
	payload_signature
		.verify_slice(&signature)
		.map_err(|_| ErrorType::InvalidSignature)
}

/// Compares a plain token in constant time
pub fn verify_token(token: &str, expected: &str) -> Result<(), ErrorType> {
	if token.is_empty() || expected.is_empty() {
		return Err(ErrorType::InvalidSignature);
	}

	if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
		Ok(())
	} else {
		Err(ErrorType::InvalidSignature)
	}
}
