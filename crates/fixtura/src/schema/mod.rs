//! Namespace tree and its declaration phase.
//!
//! # Mental Model
//!
//! 1. **Declaration:** [`SchemaBuilder`] nests namespaces lexically through
//!    [`SchemaBuilder::declare_namespace`] and installs fixtures into the
//!    namespace currently open. Scope-local fixtures are installed at an
//!    explicit path with [`SchemaBuilder::declare_fixture_at`].
//! 2. **Freeze:** [`SchemaBuilder::freeze`] moves the tree into an immutable
//!    [`Schema`] behind an `Arc`. Every later declaration fails with
//!    [`Error::SchemaFrozen`].
//! 3. **Consumption:** stores share the frozen schema read-only and resolve
//!    references against it.
//!
//! # Invariants
//!
//! - A name is unique within one namespace, whether it names a fixture or a
//!   child namespace ([`Error::DuplicateDefinition`]).
//! - Entry order is declaration order; [`Schema::identifiers`] is depth-first
//!   in that order.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::definition::{Body, Definition};
use crate::error::{Error, Result};
use crate::ident::{Ident, IntoReference, segment_from};
use crate::resolve;


type Entries = IndexMap<Arc<str>, Entry, FxBuildHasher>;

/// A named child of a namespace.
#[derive(Clone, Debug)]
pub enum Entry {
	Fixture(Arc<Definition>),
	Namespace(Namespace),
}

/// One node of the namespace tree.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
	entries: Entries,
}

impl Namespace {
	pub fn get(&self, name: &str) -> Option<&Entry> {
		self.entries.get(name)
	}

	pub fn fixture(&self, name: &str) -> Option<&Arc<Definition>> {
		match self.entries.get(name)? {
			Entry::Fixture(def) => Some(def),
			Entry::Namespace(_) => None,
		}
	}

	pub fn namespace(&self, name: &str) -> Option<&Namespace> {
		match self.entries.get(name)? {
			Entry::Namespace(ns) => Some(ns),
			Entry::Fixture(_) => None,
		}
	}

	/// Iterates entries in declaration order.
	pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> + '_ {
		self.entries.iter().map(|(k, v)| (&**k, v))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Walks down a chain of child namespaces.
	pub(crate) fn descend(&self, path: &[Arc<str>]) -> Option<&Namespace> {
		path.iter().try_fold(self, |ns, segment| ns.namespace(segment))
	}

	/// Returns the entry at a non-empty path.
	pub(crate) fn entry_at(&self, path: &[Arc<str>]) -> Option<&Entry> {
		let (last, parents) = path.split_last()?;
		self.descend(parents)?.get(last)
	}

	pub(crate) fn fixture_at(&self, id: &Ident) -> Option<&Arc<Definition>> {
		match self.entry_at(id.raw_segments())? {
			Entry::Fixture(def) => Some(def),
			Entry::Namespace(_) => None,
		}
	}

	fn collect_identifiers(&self, prefix: &mut Vec<Arc<str>>, out: &mut Vec<Ident>) {
		for (name, entry) in &self.entries {
			prefix.push(name.clone());
			match entry {
				Entry::Fixture(_) => out.push(Ident::from_arcs(prefix.clone())),
				Entry::Namespace(child) => child.collect_identifiers(prefix, out),
			}
			prefix.pop();
		}
	}
}

/// Frozen namespace tree shared by every store resolving against it.
#[derive(Debug, Default)]
pub struct Schema {
	root: Namespace,
	len: usize,
}

impl Schema {
	pub fn root(&self) -> &Namespace {
		&self.root
	}

	pub fn get(&self, id: &Ident) -> Option<&Arc<Definition>> {
		self.root.fixture_at(id)
	}

	/// Looks up the definition at `id`.
	pub fn lookup(&self, id: &Ident) -> Result<&Arc<Definition>> {
		self.get(id)
			.ok_or_else(|| Error::FixtureNotDefined(id.clone()))
	}

	pub fn contains(&self, id: &Ident) -> bool {
		self.get(id).is_some()
	}

	pub fn has_namespace(&self, id: &Ident) -> bool {
		self.root.descend(id.raw_segments()).is_some()
	}

	/// Resolves a reference against this schema; see [`crate::resolve`].
	pub fn resolve(&self, reference: impl IntoReference, context: Option<&Ident>) -> Result<Ident> {
		resolve::resolve(&self.root, &reference.into_reference()?, context)
	}

	/// All fixture identifiers, depth-first in declaration order.
	pub fn identifiers(&self) -> Vec<Ident> {
		let mut out = Vec::with_capacity(self.len);
		self.root.collect_identifiers(&mut Vec::new(), &mut out);
		out
	}

	/// Number of fixtures.
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

/// Declaration phase of a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
	root: Namespace,
	cursor: Vec<Arc<str>>,
	len: usize,
	frozen: Option<Arc<Schema>>,
}

impl SchemaBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_frozen(&self) -> bool {
		self.frozen.is_some()
	}

	/// The tree declared so far (or the frozen one).
	pub fn root(&self) -> &Namespace {
		match &self.frozen {
			Some(schema) => &schema.root,
			None => &self.root,
		}
	}

	/// The namespace new declarations land in; `None` is the root.
	pub fn current_namespace(&self) -> Option<Ident> {
		(!self.cursor.is_empty()).then(|| Ident::from_arcs(self.cursor.clone()))
	}

	/// Declares a child namespace and runs `body` with it open.
	pub fn declare_namespace<F>(&mut self, name: &str, body: F) -> Result<Ident>
	where
		F: FnOnce(&mut Self) -> Result<()>,
	{
		self.ensure_open(name)?;
		let segment = segment_from(name)?;
		let namespace = self.current_namespace();
		let node = namespace_mut(&mut self.root, &self.cursor)?;
		if node.entries.contains_key(&segment) {
			return Err(Error::DuplicateDefinition {
				namespace,
				name: segment,
			});
		}
		node.entries
			.insert(segment.clone(), Entry::Namespace(Namespace::default()));

		self.cursor.push(segment);
		let id = Ident::from_arcs(self.cursor.clone());
		let result = body(self);
		self.cursor.pop();
		result.map(|()| id)
	}

	/// Declares a fixture in the currently open namespace.
	pub fn declare_fixture(&mut self, name: &str, body: Body) -> Result<Ident> {
		self.ensure_open(name)?;
		let def = Definition::new(name, body)?;
		self.declare(def)
	}

	/// Installs an already built definition in the currently open namespace.
	pub fn declare(&mut self, def: Definition) -> Result<Ident> {
		self.ensure_open(def.name())?;
		let namespace = self.current_namespace();
		let node = namespace_mut(&mut self.root, &self.cursor)?;
		let id = insert_fixture(node, namespace, def)?;
		self.len += 1;
		tracing::trace!(fixture = %id, "declared fixture");
		Ok(id)
	}

	/// Declares a fixture under an explicit namespace path.
	///
	/// Missing namespaces along the path are created and existing ones are
	/// reopened. Fails if a segment of the path is already a fixture.
	pub fn declare_fixture_at(&mut self, namespace: &Ident, name: &str, body: Body) -> Result<Ident> {
		self.ensure_open(name)?;
		let def = Definition::new(name, body)?;
		let node = namespace_mut(&mut self.root, namespace.raw_segments())?;
		let id = insert_fixture(node, Some(namespace.clone()), def)?;
		self.len += 1;
		tracing::trace!(fixture = %id, "declared fixture");
		Ok(id)
	}

	/// Returns true if a fixture is declared at `id`.
	pub fn contains(&self, id: &Ident) -> bool {
		self.root().fixture_at(id).is_some()
	}

	/// Resolves a reference against the tree declared so far.
	pub fn resolve(&self, reference: impl IntoReference, context: Option<&Ident>) -> Result<Ident> {
		resolve::resolve(self.root(), &reference.into_reference()?, context)
	}

	/// Freezes the tree. Repeated calls return the same schema.
	pub fn freeze(&mut self) -> Arc<Schema> {
		if let Some(schema) = &self.frozen {
			return schema.clone();
		}
		let schema = Arc::new(Schema {
			root: std::mem::take(&mut self.root),
			len: self.len,
		});
		tracing::debug!(fixtures = schema.len, "schema frozen");
		self.frozen = Some(schema.clone());
		schema
	}

	fn ensure_open(&self, name: &str) -> Result<()> {
		match self.frozen {
			Some(_) => Err(Error::SchemaFrozen(name.into())),
			None => Ok(()),
		}
	}
}

/// Walks `path` below `root`, creating missing namespaces and reopening
/// existing ones. A fixture on the path is a name collision.
fn namespace_mut<'a>(root: &'a mut Namespace, path: &[Arc<str>]) -> Result<&'a mut Namespace> {
	let mut node = root;
	for (depth, segment) in path.iter().enumerate() {
		let slot = node
			.entries
			.entry(segment.clone())
			.or_insert_with(|| Entry::Namespace(Namespace::default()));
		node = match slot {
			Entry::Namespace(child) => child,
			Entry::Fixture(_) => {
				return Err(Error::DuplicateDefinition {
					namespace: (depth > 0).then(|| Ident::from_arcs(path[..depth].to_vec())),
					name: segment.clone(),
				});
			}
		};
	}
	Ok(node)
}

fn insert_fixture(node: &mut Namespace, namespace: Option<Ident>, def: Definition) -> Result<Ident> {
	let name: Arc<str> = def.name().into();
	if node.entries.contains_key(&name) {
		return Err(Error::DuplicateDefinition { namespace, name });
	}
	let id = match &namespace {
		Some(ns) => Ident::under(Some(ns), std::slice::from_ref(&name)),
		None => Ident::from_arcs(vec![name.clone()]),
	};
	node.entries.insert(name, Entry::Fixture(Arc::new(def)));
	Ok(id)
}
