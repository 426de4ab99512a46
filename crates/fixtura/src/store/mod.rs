//! Per-run fixture cache and evaluator.
//!
//! # Purpose
//!
//! A [`Store`] turns definitions from a frozen [`Schema`] into memoized
//! values. Each definition body runs at most once per store; later requests
//! return the cached [`Value`] (the same `Arc`).
//!
//! # Evaluation
//!
//! 1. Cache hit: return the cached value.
//! 2. Identifier already in flight: [`Error::CyclicDependency`] carrying the
//!    in-flight chain in evaluation order.
//! 3. Otherwise look up the definition, push it in flight, run the body with
//!    a [`Lookup`] bound to the fixture's own namespace, pop it, cache the
//!    value on success.
//!
//! Failed evaluations are not cached, so a later request runs the body again.
//!
//! # Concurrency
//!
//! All requests take one re-entrant lock per store for the full evaluation.
//! Nested requests from a running body re-enter on the same thread; first
//! requests from other threads wait, which keeps evaluation at most once when
//! a store is shared between workers. A body must not block on another thread
//! that requests from the same store.
//!
//! # Dependency recording
//!
//! Requests made through a [`ScopedStore`] (and every nested request made by
//! the bodies they trigger) are recorded as touched in the store's
//! [`Ledger`]. The store remembers the direct dependencies of every fixture it
//! evaluated, so a scoped cache hit records the fixture's whole closure, as if
//! the asking scope had triggered the evaluation itself.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::ReentrantMutex;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::definition::{Context, Value};
use crate::error::{Error, Result};
use crate::ident::{Ident, IntoReference, Reference};
use crate::ledger::{Ledger, ScopeId};
use crate::resolve;
use crate::schema::Schema;


type Edges = IndexSet<Ident, FxBuildHasher>;

#[derive(Default)]
struct State {
	cache: FxHashMap<Ident, Value>,
	in_flight: IndexSet<Ident, FxBuildHasher>,
	/// Direct dependencies of each evaluated fixture, in request order.
	deps: FxHashMap<Ident, Edges>,
}

impl State {
	/// Records `id` as a dependency of the innermost fixture being evaluated.
	fn link(&mut self, id: &Ident) {
		if let Some(parent) = self.in_flight.last() {
			self.deps.entry(parent.clone()).or_default().insert(id.clone());
		}
	}

	/// `id` followed by everything it transitively depended on, depth-first.
	fn closure(&self, id: &Ident) -> Vec<Ident> {
		let mut seen = Edges::default();
		let mut stack = vec![id.clone()];
		while let Some(next) = stack.pop() {
			if !seen.insert(next.clone()) {
				continue;
			}
			if let Some(edges) = self.deps.get(&next) {
				stack.extend(edges.iter().rev().cloned());
			}
		}
		seen.into_iter().collect()
	}
}

/// Pops the in-flight entry pushed for one evaluation, also on unwind.
struct Frame<'g> {
	state: &'g RefCell<State>,
}

impl Drop for Frame<'_> {
	fn drop(&mut self) {
		self.state.borrow_mut().in_flight.pop();
	}
}

/// Memoizing evaluator over a frozen schema.
pub struct Store {
	schema: Arc<Schema>,
	ledger: Option<Arc<Ledger>>,
	state: ReentrantMutex<RefCell<State>>,
}

impl Store {
	/// Creates a store without dependency recording.
	pub fn new(schema: Arc<Schema>) -> Self {
		Self {
			schema,
			ledger: None,
			state: ReentrantMutex::new(RefCell::new(State::default())),
		}
	}

	/// Creates a store that records scoped requests into `ledger`.
	pub fn with_ledger(schema: Arc<Schema>, ledger: Arc<Ledger>) -> Self {
		Self {
			ledger: Some(ledger),
			..Self::new(schema)
		}
	}

	pub fn schema(&self) -> &Arc<Schema> {
		&self.schema
	}

	pub fn ledger(&self) -> Option<&Arc<Ledger>> {
		self.ledger.as_ref()
	}

	/// Resolves `reference` from `context` and returns its value.
	pub fn get(&self, reference: impl IntoReference, context: Option<&Ident>) -> Result<Value> {
		self.get_with(reference, context, Context::empty())
	}

	/// Like [`Store::get`], threading an ambient context into the bodies run.
	pub fn get_with(
		&self,
		reference: impl IntoReference,
		context: Option<&Ident>,
		cx: Context<'_>,
	) -> Result<Value> {
		let id = self.schema.resolve(reference, context)?;
		self.evaluate(&id, None, cx)
	}

	/// Typed variant of [`Store::get`].
	pub fn get_as<T: Any + Send + Sync>(
		&self,
		reference: impl IntoReference,
		context: Option<&Ident>,
	) -> Result<Arc<T>> {
		let id = self.schema.resolve(reference, context)?;
		let value = self.evaluate(&id, None, Context::empty())?;
		downcast(id, value)
	}

	/// Returns the value of the fixture at a canonical identifier.
	pub fn fetch(&self, id: &Ident) -> Result<Value> {
		self.evaluate(id, None, Context::empty())
	}

	/// Runs `f` with a lookup handle bound to the root namespace.
	pub fn with_lookup<R>(&self, cx: Context<'_>, f: impl FnOnce(&Lookup<'_>) -> R) -> R {
		f(&Lookup {
			store: self,
			namespace: None,
			scope: None,
			cx,
		})
	}

	/// Opens a scoped view that resolves from the scope's namespace and
	/// records every request into the ledger.
	pub fn scope(&self, scope: &ScopeId) -> Result<ScopedStore<'_>> {
		let ledger = self.ledger.as_deref().ok_or(Error::LedgerMissing)?;
		let namespace = ledger.namespace_of(scope)?;
		Ok(ScopedStore {
			store: self,
			ledger,
			scope: scope.clone(),
			namespace,
		})
	}

	/// Drops the cached value of `id`. Returns true if one was cached.
	pub fn invalidate(&self, id: &Ident) -> bool {
		let guard = self.state.lock();
		let mut state = guard.borrow_mut();
		state.deps.remove(id);
		let removed = state.cache.remove(id).is_some();
		if removed {
			tracing::debug!(fixture = %id, "fixture invalidated");
		}
		removed
	}

	/// Drops every cached value.
	pub fn clear(&self) {
		let guard = self.state.lock();
		let mut state = guard.borrow_mut();
		tracing::debug!(cached = state.cache.len(), "fixture cache cleared");
		state.cache.clear();
		state.deps.clear();
	}

	pub fn is_cached(&self, id: &Ident) -> bool {
		self.state.lock().borrow().cache.contains_key(id)
	}

	/// Number of cached values.
	pub fn len(&self) -> usize {
		self.state.lock().borrow().cache.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Identifiers currently being evaluated, outermost first.
	pub fn in_flight(&self) -> Vec<Ident> {
		self.state.lock().borrow().in_flight.iter().cloned().collect()
	}

	fn evaluate(&self, id: &Ident, scope: Option<&ScopeId>, cx: Context<'_>) -> Result<Value> {
		let guard = self.state.lock();

		let cached = {
			let mut state = guard.borrow_mut();
			match state.cache.get(id) {
				Some(value) => {
					let value = value.clone();
					state.link(id);
					let touched = match (&self.ledger, scope) {
						(Some(_), Some(_)) => state.closure(id),
						_ => Vec::new(),
					};
					Some((value, touched))
				}
				None if state.in_flight.contains(id) => {
					let chain = state
						.in_flight
						.iter()
						.cloned()
						.chain(std::iter::once(id.clone()))
						.collect();
					return Err(Error::CyclicDependency { chain });
				}
				None => None,
			}
		};
		if let Some((value, touched)) = cached {
			tracing::trace!(fixture = %id, closure = touched.len(), "fixture cache hit");
			for dep in &touched {
				self.touch(scope, dep);
			}
			return Ok(value);
		}

		let def = self.schema.lookup(id)?.clone();
		self.touch(scope, id);

		{
			let mut state = guard.borrow_mut();
			state.deps.remove(id);
			state.in_flight.insert(id.clone());
		}
		let frame = Frame { state: &*guard };
		tracing::debug!(fixture = %id, arity = ?def.arity(), "evaluating fixture");

		let namespace = id.parent();
		let lookup = Lookup {
			store: self,
			namespace: namespace.as_ref(),
			scope,
			cx,
		};
		let result = def.call(&cx, Some(&lookup));
		drop(frame);

		match result {
			Ok(value) => {
				let mut state = guard.borrow_mut();
				state.cache.insert(id.clone(), value.clone());
				state.link(id);
				drop(state);
				tracing::debug!(fixture = %id, "fixture evaluated");
				Ok(value)
			}
			Err(err) => {
				tracing::debug!(fixture = %id, error = %err, "fixture evaluation failed");
				Err(err)
			}
		}
	}

	fn touch(&self, scope: Option<&ScopeId>, id: &Ident) {
		if let (Some(ledger), Some(scope)) = (&self.ledger, scope) {
			ledger.touch(scope, id);
		}
	}
}

impl fmt::Debug for Store {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Store")
			.field("fixtures", &self.schema.len())
			.field("cached", &self.len())
			.field("ledger", &self.ledger.is_some())
			.finish()
	}
}

/// Handle passed to unary fixture bodies.
///
/// Requests resolve relative to the namespace of the fixture being evaluated
/// and go through the same store, scope and ambient context.
pub struct Lookup<'a> {
	store: &'a Store,
	namespace: Option<&'a Ident>,
	scope: Option<&'a ScopeId>,
	cx: Context<'a>,
}

impl<'a> Lookup<'a> {
	pub fn get(&self, reference: impl IntoReference) -> Result<Value> {
		let id = self.store.schema.resolve(reference, self.namespace)?;
		self.store.evaluate(&id, self.scope, self.cx)
	}

	pub fn get_as<T: Any + Send + Sync>(&self, reference: impl IntoReference) -> Result<Arc<T>> {
		let id = self.store.schema.resolve(reference, self.namespace)?;
		let value = self.store.evaluate(&id, self.scope, self.cx)?;
		downcast(id, value)
	}

	/// Namespace references resolve from; `None` is the root.
	pub fn namespace(&self) -> Option<&'a Ident> {
		self.namespace
	}

	/// Scope the current evaluation is recorded under, if any.
	pub fn scope(&self) -> Option<&'a ScopeId> {
		self.scope
	}

	pub fn context(&self) -> &Context<'a> {
		&self.cx
	}

	/// Borrows the host object of the ambient context.
	pub fn host<T: Any>(&self) -> Result<&'a T> {
		self.cx.host()
	}

	pub fn store(&self) -> &'a Store {
		self.store
	}
}

impl fmt::Debug for Lookup<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lookup")
			.field("namespace", &self.namespace)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

/// View of a store on behalf of one consuming scope.
///
/// References resolve from the scope's private namespace first (after the
/// root tier), and every request is recorded in the ledger.
pub struct ScopedStore<'s> {
	store: &'s Store,
	ledger: &'s Ledger,
	scope: ScopeId,
	namespace: Ident,
}

impl<'s> ScopedStore<'s> {
	pub fn scope(&self) -> &ScopeId {
		&self.scope
	}

	pub fn namespace(&self) -> &Ident {
		&self.namespace
	}

	pub fn store(&self) -> &'s Store {
		self.store
	}

	/// Resolves a reference from the scope's namespace.
	///
	/// A reference registered by the scope that still names nothing fails
	/// with [`Error::FixtureNotDefined`] rather than a resolution error.
	pub fn resolve(&self, reference: impl IntoReference) -> Result<Ident> {
		let reference = reference.into_reference()?;
		let root = self.store.schema.root();
		match resolve::resolve(root, &reference, Some(&self.namespace)) {
			Err(Error::ReferenceResolution { .. }) if self.ledger.is_registered(&self.scope, &reference) => {
				Err(Error::FixtureNotDefined(resolve::locate(
					root,
					&reference,
					Some(&self.namespace),
				)))
			}
			other => other,
		}
	}

	pub fn get(&self, reference: impl IntoReference) -> Result<Value> {
		self.get_with(reference, Context::empty())
	}

	/// Requests a fixture with an ambient context (usually the test case).
	pub fn get_with(&self, reference: impl IntoReference, cx: Context<'_>) -> Result<Value> {
		let id = self.resolve(reference)?;
		self.store.evaluate(&id, Some(&self.scope), cx)
	}

	pub fn get_as<T: Any + Send + Sync>(&self, reference: impl IntoReference) -> Result<Arc<T>> {
		let id = self.resolve(reference)?;
		let value = self.store.evaluate(&id, Some(&self.scope), Context::empty())?;
		downcast(id, value)
	}

	/// Dispatches through the scope's accessor table.
	pub fn accessor(&self, name: &str) -> Result<Value> {
		self.accessor_with(name, Context::empty())
	}

	pub fn accessor_with(&self, name: &str, cx: Context<'_>) -> Result<Value> {
		let reference = self.accessor_target(name)?;
		self.get_with(reference, cx)
	}

	pub fn accessor_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
		let reference = self.accessor_target(name)?;
		self.get_as(reference)
	}

	/// Accessor names exposed by this scope, in registration order.
	pub fn accessors(&self) -> Result<IndexMap<Arc<str>, Reference>> {
		self.ledger.accessors_of(&self.scope)
	}

	pub fn dependencies(&self) -> Result<IndexSet<Ident>> {
		self.ledger.dependencies_of(&self.scope)
	}

	pub fn local_dependencies(&self) -> Result<IndexSet<Ident>> {
		self.ledger.local_dependencies_of(&self.scope)
	}

	fn accessor_target(&self, name: &str) -> Result<Reference> {
		self.ledger
			.accessor(&self.scope, name)?
			.ok_or_else(|| Error::UnknownAccessor {
				scope: self.scope.clone(),
				name: name.into(),
			})
	}
}

impl fmt::Debug for ScopedStore<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopedStore")
			.field("scope", &self.scope)
			.field("namespace", &self.namespace)
			.finish_non_exhaustive()
	}
}

fn downcast<T: Any + Send + Sync>(id: Ident, value: Value) -> Result<Arc<T>> {
	value.downcast::<T>().map_err(|_| Error::TypeMismatch {
		id,
		expected: type_name::<T>(),
	})
}
