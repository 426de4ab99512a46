//! Per-scope dependency ledger.
//!
//! A consuming scope (usually a test type) declares which shared fixtures it
//! uses and may define private fixtures of its own. The ledger records both,
//! plus every identifier touched while that scope's requests are evaluated,
//! so setup and teardown can see the full closure of what a scope depends on.
//!
//! # Invariants
//!
//! - Registering a reference never checks that its target exists. Undefined
//!   targets are recorded as pending and fail only when requested.
//! - [`Ledger::dependencies_of`] lists reference targets in registration order,
//!   then touched identifiers in first-touch order. The scope's own locals
//!   never appear there, even when referenced by name.
//! - The ledger never calls into a store, so stores may record into it while
//!   evaluating.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::definition::Body;
use crate::error::{Error, Result};
use crate::ident::{Ident, IntoReference, Reference};
use crate::resolve;
use crate::schema::{Schema, SchemaBuilder};

#[cfg(test)]
mod tests;

/// Opaque identity of a consuming scope.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(Arc<str>);

impl ScopeId {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	/// Scope named after a Rust type path, e.g. `my_crate::tests::LoginTest`.
	pub fn of<T: ?Sized>() -> Self {
		Self::new(type_name::<T>())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Private namespace derived from the scope name.
	///
	/// Generic arguments are dropped and each `::` segment is snake-cased:
	/// `fixtures::hooks::SomeTestCase` becomes `fixtures/hooks/some_test_case`.
	pub fn default_namespace(&self) -> Result<Ident> {
		let path = match self.0.split_once('<') {
			Some((head, _)) => head,
			None => &self.0,
		};
		let segments: Vec<String> = path
			.split("::")
			.filter(|s| !s.is_empty())
			.map(|s| s.to_snake_case())
			.collect();
		Ident::from_segments(segments)
	}
}

impl fmt::Display for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ScopeId({:?})", &*self.0)
	}
}

/// Whether, and under which name, a registration is exposed as an accessor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AccessorPolicy {
	/// Exposed under the last segment of the reference or the local name.
	#[default]
	Default,
	/// Exposed under an explicit name.
	Named(Arc<str>),
	Disabled,
}

impl AccessorPolicy {
	fn exposed_name<'a>(&'a self, fallback: &'a str) -> Option<&'a str> {
		match self {
			Self::Default => Some(fallback),
			Self::Named(name) => Some(&**name),
			Self::Disabled => None,
		}
	}
}

impl From<bool> for AccessorPolicy {
	fn from(enabled: bool) -> Self {
		if enabled { Self::Default } else { Self::Disabled }
	}
}

impl From<&str> for AccessorPolicy {
	fn from(name: &str) -> Self {
		Self::Named(name.into())
	}
}

/// An external reference recorded for a scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
	pub reference: Reference,
	/// Identifier the reference denoted when it was registered.
	pub target: Ident,
	/// True if nothing was defined at `target` at registration time.
	pub pending: bool,
}

impl Dependency {
	/// Re-checks pendency against a (usually frozen) schema.
	pub fn is_pending_in(&self, schema: &Schema) -> bool {
		!schema.contains(&self.target)
	}
}

#[derive(Debug)]
struct ScopeEntry {
	namespace: Ident,
	references: Vec<Dependency>,
	locals: IndexSet<Ident, FxBuildHasher>,
	touched: IndexSet<Ident, FxBuildHasher>,
	accessors: IndexMap<Arc<str>, Reference>,
}

impl ScopeEntry {
	fn new(namespace: Ident) -> Self {
		Self {
			namespace,
			references: Vec::new(),
			locals: IndexSet::default(),
			touched: IndexSet::default(),
			accessors: IndexMap::new(),
		}
	}

	fn expose(&mut self, scope: &ScopeId, policy: &AccessorPolicy, fallback: &str, target: Reference) {
		let Some(name) = policy.exposed_name(fallback) else {
			return;
		};
		if let Some(previous) = self.accessors.insert(name.into(), target) {
			tracing::warn!(
				scope = %scope,
				accessor = name,
				previous = %previous,
				"accessor name reused; later registration wins",
			);
		}
	}
}

/// Registry of consuming scopes and the fixtures they depend on.
#[derive(Debug, Default)]
pub struct Ledger {
	scopes: RwLock<Scopes>,
}

impl Ledger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares a scope, optionally overriding its private namespace.
	///
	/// Scopes are otherwise created on first registration with
	/// [`ScopeId::default_namespace`].
	pub fn declare_scope(&self, scope: ScopeId, namespace: Option<Ident>) -> Result<Ident> {
		let mut scopes = self.scopes.write();
		if scopes.contains_key(&scope) {
			return Err(Error::DuplicateScope(scope));
		}
		let namespace = match namespace {
			Some(ns) => ns,
			None => scope.default_namespace()?,
		};
		tracing::debug!(scope = %scope, namespace = %namespace, "declared scope");
		scopes.insert(scope, ScopeEntry::new(namespace.clone()));
		Ok(namespace)
	}

	/// Records that `scope` uses `reference`.
	///
	/// The reference is located from the scope namespace; a missing target is
	/// recorded as pending instead of failing.
	pub fn register_reference(
		&self,
		schema: &SchemaBuilder,
		scope: &ScopeId,
		reference: impl IntoReference,
		accessor: impl Into<AccessorPolicy>,
	) -> Result<Ident> {
		let reference = reference.into_reference()?;
		let accessor = accessor.into();
		let mut scopes = self.scopes.write();
		let entry = ensure_entry(&mut scopes, scope)?;

		let target = resolve::locate(schema.root(), &reference, Some(&entry.namespace));
		let pending = !schema.contains(&target);
		tracing::debug!(
			scope = %scope,
			reference = %reference,
			target = %target,
			pending,
			"registered fixture reference",
		);

		entry.expose(scope, &accessor, reference.name(), reference.clone());
		if !entry.references.iter().any(|d| d.target == target) {
			entry.references.push(Dependency {
				reference,
				target: target.clone(),
				pending,
			});
		}
		Ok(target)
	}

	/// Defines a fixture private to `scope` and records it as a local
	/// dependency.
	pub fn register_local_definition(
		&self,
		schema: &mut SchemaBuilder,
		scope: &ScopeId,
		name: &str,
		body: Body,
		accessor: impl Into<AccessorPolicy>,
	) -> Result<Ident> {
		let accessor = accessor.into();
		let namespace = {
			let mut scopes = self.scopes.write();
			ensure_entry(&mut scopes, scope)?.namespace.clone()
		};

		let id = schema.declare_fixture_at(&namespace, name, body)?;
		tracing::debug!(scope = %scope, fixture = %id, "registered local fixture");

		let mut scopes = self.scopes.write();
		let entry = entry_mut(&mut scopes, scope)?;
		entry.expose(scope, &accessor, name, Reference::from(&id));
		entry.locals.insert(id.clone());
		Ok(id)
	}

	/// External references and transitively touched fixtures of `scope`.
	pub fn dependencies_of(&self, scope: &ScopeId) -> Result<IndexSet<Ident>> {
		let scopes = self.scopes.read();
		let entry = entry_ref(&scopes, scope)?;
		Ok(entry
			.references
			.iter()
			.map(|d| &d.target)
			.chain(&entry.touched)
			.filter(|id| !entry.locals.contains(*id))
			.cloned()
			.collect())
	}

	/// Fixtures defined privately by `scope`, fully qualified.
	pub fn local_dependencies_of(&self, scope: &ScopeId) -> Result<IndexSet<Ident>> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.locals.iter().cloned().collect())
	}

	/// Registered references with their pendency at registration time.
	pub fn references_of(&self, scope: &ScopeId) -> Result<Vec<Dependency>> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.references.clone())
	}

	/// Every identifier requested on behalf of `scope`, in first-touch order.
	pub fn touched_by(&self, scope: &ScopeId) -> Result<IndexSet<Ident>> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.touched.iter().cloned().collect())
	}

	pub fn namespace_of(&self, scope: &ScopeId) -> Result<Ident> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.namespace.clone())
	}

	/// Accessor table of `scope`: exposed name to reference.
	pub fn accessors_of(&self, scope: &ScopeId) -> Result<IndexMap<Arc<str>, Reference>> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.accessors.clone())
	}

	pub fn accessor(&self, scope: &ScopeId, name: &str) -> Result<Option<Reference>> {
		let scopes = self.scopes.read();
		Ok(entry_ref(&scopes, scope)?.accessors.get(name).cloned())
	}

	/// True if `scope` registered exactly this reference.
	pub fn is_registered(&self, scope: &ScopeId, reference: &Reference) -> bool {
		let scopes = self.scopes.read();
		scopes
			.get(scope)
			.is_some_and(|entry| entry.references.iter().any(|d| d.reference == *reference))
	}

	/// Scopes in declaration order.
	pub fn scopes(&self) -> Vec<ScopeId> {
		self.scopes.read().keys().cloned().collect()
	}

	pub(crate) fn touch(&self, scope: &ScopeId, id: &Ident) {
		let mut scopes = self.scopes.write();
		match scopes.get_mut(scope) {
			Some(entry) => {
				entry.touched.insert(id.clone());
			}
			None => tracing::trace!(scope = %scope, fixture = %id, "touch for unknown scope ignored"),
		}
	}
}

type Scopes = IndexMap<ScopeId, ScopeEntry, FxBuildHasher>;

fn ensure_entry<'a>(scopes: &'a mut Scopes, scope: &ScopeId) -> Result<&'a mut ScopeEntry> {
	match scopes.entry(scope.clone()) {
		Entry::Occupied(e) => Ok(e.into_mut()),
		Entry::Vacant(e) => {
			let namespace = scope.default_namespace()?;
			tracing::debug!(scope = %scope, namespace = %namespace, "declared scope");
			Ok(e.insert(ScopeEntry::new(namespace)))
		}
	}
}

fn entry_ref<'a>(scopes: &'a Scopes, scope: &ScopeId) -> Result<&'a ScopeEntry> {
	scopes
		.get(scope)
		.ok_or_else(|| Error::UnknownScope(scope.clone()))
}

fn entry_mut<'a>(scopes: &'a mut Scopes, scope: &ScopeId) -> Result<&'a mut ScopeEntry> {
	scopes
		.get_mut(scope)
		.ok_or_else(|| Error::UnknownScope(scope.clone()))
}
