use futures::future::Either;

/// Shorthands for the output of [`futures::future::select`], which wraps the
/// winning value and the still pending loser in an [`Either`]. The loser is
/// dropped by every method here.
pub trait EitherExt<L, R> {
	/// The value of the right future, if it finished first
	fn into_right(self) -> Option<R>;
	/// Whether the left future finished first
	fn is_left(&self) -> bool;
}

impl<L, PendingRight, R, PendingLeft> EitherExt<L, R>
	for Either<(L, PendingRight), (R, PendingLeft)>
{
	fn into_right(self) -> Option<R> {
		match self {
			Either::Left(_) => None,
			Either::Right((value, _)) => Some(value),
		}
	}

	fn is_left(&self) -> bool {
		matches!(self, Either::Left(_))
	}
}
