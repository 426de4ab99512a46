use std::fmt::Write as _;
use std::sync::Arc;

use crate::ident::Ident;
use crate::ledger::ScopeId;

/// Boxed error raised by a fixture body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by declaration, resolution and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// No definition exists at the identifier.
	#[error("fixture `{0}` is not defined")]
	FixtureNotDefined(Ident),

	/// A fixture transitively requested itself while being evaluated.
	///
	/// `chain` lists the in-flight identifiers in evaluation order, ending with
	/// the identifier that closed the loop.
	#[error("cyclic fixture dependency: {}", format_chain(.chain))]
	CyclicDependency { chain: Vec<Ident> },

	/// A name was declared twice in the same namespace.
	#[error("`{name}` is already declared in {}", namespace_label(.namespace))]
	DuplicateDefinition {
		namespace: Option<Ident>,
		name: Arc<str>,
	},

	/// Declaration attempted after the schema was frozen.
	#[error("schema is frozen; cannot declare `{0}`")]
	SchemaFrozen(Arc<str>),

	/// A relative reference names nothing under its context namespace.
	#[error("cannot resolve `{reference}` from {}", namespace_label(.context))]
	ReferenceResolution {
		reference: Arc<str>,
		context: Option<Ident>,
	},

	/// A path or name is empty or contains an empty segment.
	#[error("invalid fixture path `{path}`: {reason}")]
	InvalidPath { path: Arc<str>, reason: &'static str },

	/// A fixture that takes a lookup handle was invoked without one.
	#[error("fixture `{0}` depends on other fixtures and needs a store to evaluate")]
	StoreRequired(Arc<str>),

	/// The cached value is not of the requested type.
	#[error("fixture `{id}` does not hold a value of type `{expected}`")]
	TypeMismatch { id: Ident, expected: &'static str },

	/// A body asked for a host object the evaluation context does not carry.
	#[error("evaluation context has no host of type `{0}`")]
	HostUnavailable(&'static str),

	#[error("scope `{0}` is not registered")]
	UnknownScope(ScopeId),

	#[error("scope `{0}` is already declared")]
	DuplicateScope(ScopeId),

	#[error("scope `{scope}` has no accessor named `{name}`")]
	UnknownAccessor { scope: ScopeId, name: Arc<str> },

	/// Scoped access was requested from a store built without a ledger.
	#[error("store was built without a dependency ledger")]
	LedgerMissing,

	/// Error raised by a fixture body, passed through unchanged.
	#[error(transparent)]
	Fixture(BoxError),
}

impl Error {
	/// Wraps an error raised inside a fixture body.
	pub fn fixture(err: impl Into<BoxError>) -> Self {
		Self::Fixture(err.into())
	}

	/// Returns true for errors that fail only the requesting test rather than
	/// the whole suite configuration.
	pub fn is_evaluation(&self) -> bool {
		matches!(
			self,
			Self::FixtureNotDefined(_)
				| Self::CyclicDependency { .. }
				| Self::ReferenceResolution { .. }
				| Self::TypeMismatch { .. }
				| Self::HostUnavailable(_)
				| Self::Fixture(_)
		)
	}
}

fn format_chain(chain: &[Ident]) -> String {
	let mut out = String::new();
	for (i, id) in chain.iter().enumerate() {
		if i > 0 {
			out.push_str(" -> ");
		}
		let _ = write!(out, "{id}");
	}
	out
}

fn namespace_label(ns: &Option<Ident>) -> String {
	match ns {
		Some(ns) => format!("namespace `{ns}`"),
		None => "the root namespace".to_string(),
	}
}
