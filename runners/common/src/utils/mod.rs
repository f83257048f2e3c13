/// The configuration for the runner.
pub mod config;
/// Extensions traits for the `Either` type.
pub mod ext_traits;
