//! Namespaced, lazily evaluated fixtures for test suites.
//!
//! # Mental Model
//!
//! 1. **Declare:** build a namespace tree of fixture [`Definition`]s with a
//!    [`SchemaBuilder`], then [`SchemaBuilder::freeze`] it into a [`Schema`].
//! 2. **Register scopes:** consuming scopes (test types) record the shared
//!    fixtures they reference and define private ones through a [`Ledger`].
//! 3. **Evaluate:** a [`Store`] per run resolves references against the
//!    schema, evaluates each fixture at most once, and records what every
//!    scope touched.
//!
//! ```
//! use std::sync::Arc;
//!
//! use fixtura::{Body, SchemaBuilder, Store};
//!
//! let mut schema = SchemaBuilder::new();
//! schema
//! 	.declare_namespace("global", |ns| {
//! 		ns.declare_fixture("foo", Body::constant(String::from("foo")))?;
//! 		ns.declare_fixture(
//! 			"reverse_foo",
//! 			Body::unary(|store| {
//! 				let foo = store.get_as::<String>("foo")?;
//! 				Ok(foo.chars().rev().collect::<String>())
//! 			}),
//! 		)?;
//! 		Ok(())
//! 	})
//! 	.unwrap();
//!
//! let store = Store::new(schema.freeze());
//! let reversed: Arc<String> = store.get_as("global/reverse_foo", None).unwrap();
//! assert_eq!(*reversed, "oof");
//! ```

pub mod definition;
pub mod error;
pub mod ident;
pub mod ledger;
pub mod resolve;
pub mod schema;
pub mod store;

pub use definition::{Arity, Body, Context, Definition, Value};
pub use error::{BoxError, Error, Result};
pub use ident::{Ident, IntoReference, Reference, SEPARATOR};
pub use ledger::{AccessorPolicy, Dependency, Ledger, ScopeId};
pub use schema::{Entry, Namespace, Schema, SchemaBuilder};
pub use store::{Lookup, ScopedStore, Store};
