//! Registry trait for self-registering implementations.
//!
//! Every pluggable backend (storage, verifier) exposes a `Registry` struct that
//! names its configuration table and hands out its factory function.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// Name of the implementation's table in the configuration file, e.g.
	/// `"file"` for `[storage.implementations.file]`.
	const NAME: &'static str;

	/// Factory function type for this implementation family.
	type Factory;

	/// Returns the factory that builds this implementation from its TOML table.
	fn factory() -> Self::Factory;
}
