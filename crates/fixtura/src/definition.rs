//! Fixture definitions: a name plus a deferred computation.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ident::segment_from;
use crate::store::Lookup;

/// Computed fixture value, shared between every consumer of a store.
pub type Value = Arc<dyn Any + Send + Sync>;

type NullaryFn = dyn Fn(&Context<'_>) -> Result<Value> + Send + Sync;
type UnaryFn = dyn Fn(&Lookup<'_>) -> Result<Value> + Send + Sync;

/// Number of inputs a fixture body declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arity {
	/// Takes no lookup handle; may still read the ambient [`Context`].
	Zero,
	/// Receives a [`Lookup`] handle for requesting other fixtures.
	One,
}

/// Ambient execution context threaded into fixture bodies.
///
/// Carries an optional host object (typically the running test case) so a
/// body can call helpers on it without implicit receivers.
#[derive(Clone, Copy, Default)]
pub struct Context<'a> {
	host: Option<&'a (dyn Any + 'static)>,
}

impl<'a> Context<'a> {
	/// Context without a host.
	pub const fn empty() -> Self {
		Self { host: None }
	}

	pub fn with_host(host: &'a (dyn Any + 'static)) -> Self {
		Self { host: Some(host) }
	}

	pub fn has_host(&self) -> bool {
		self.host.is_some()
	}

	/// Borrows the host as `T`.
	pub fn host<T: Any>(&self) -> Result<&'a T> {
		self.host
			.and_then(|h| h.downcast_ref::<T>())
			.ok_or(Error::HostUnavailable(type_name::<T>()))
	}
}

impl fmt::Debug for Context<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Context")
			.field("host", &self.host.is_some())
			.finish()
	}
}

/// The deferred computation backing a fixture.
#[derive(Clone)]
pub enum Body {
	Nullary(Arc<NullaryFn>),
	Unary(Arc<UnaryFn>),
}

impl Body {
	/// Body with no inputs.
	///
	/// A body returning a [`Value`] (for example one forwarded from another
	/// fixture) is stored as is rather than wrapped again.
	pub fn nullary<T, F>(f: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(&Context<'_>) -> Result<T> + Send + Sync + 'static,
	{
		Self::Nullary(nullary_fn(move |cx| f(cx).map(into_value)))
	}

	/// Body that receives a lookup handle for its own dependencies.
	pub fn unary<T, F>(f: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(&Lookup<'_>) -> Result<T> + Send + Sync + 'static,
	{
		Self::Unary(unary_fn(move |lookup| f(lookup).map(into_value)))
	}

	/// Body that always yields a clone of `value`.
	pub fn constant<T>(value: T) -> Self
	where
		T: Any + Clone + Send + Sync,
	{
		Self::nullary(move |_| Ok(value.clone()))
	}

	pub fn arity(&self) -> Arity {
		match self {
			Self::Nullary(_) => Arity::Zero,
			Self::Unary(_) => Arity::One,
		}
	}
}

fn into_value<T: Any + Send + Sync>(value: T) -> Value {
	let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
	match boxed.downcast::<Value>() {
		Ok(shared) => *shared,
		Err(other) => Arc::from(other),
	}
}

fn nullary_fn<F>(f: F) -> Arc<NullaryFn>
where
	F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
{
	Arc::new(f)
}

fn unary_fn<F>(f: F) -> Arc<UnaryFn>
where
	F: Fn(&Lookup<'_>) -> Result<Value> + Send + Sync + 'static,
{
	Arc::new(f)
}

impl fmt::Debug for Body {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Nullary(_) => f.write_str("Body::Nullary(..)"),
			Self::Unary(_) => f.write_str("Body::Unary(..)"),
		}
	}
}

/// A named fixture computation. Its canonical path is assigned by the schema.
#[derive(Clone, Debug)]
pub struct Definition {
	name: Arc<str>,
	body: Body,
}

impl Definition {
	pub fn new(name: &str, body: Body) -> Result<Self> {
		Ok(Self {
			name: segment_from(name)?,
			body,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn arity(&self) -> Arity {
		self.body.arity()
	}

	pub fn body(&self) -> &Body {
		&self.body
	}

	/// Runs the body once, without caching.
	///
	/// Nullary bodies ignore `lookup`. Unary bodies fail with
	/// [`Error::StoreRequired`] when no lookup handle is supplied.
	pub fn call(&self, cx: &Context<'_>, lookup: Option<&Lookup<'_>>) -> Result<Value> {
		match (&self.body, lookup) {
			(Body::Nullary(f), _) => f(cx),
			(Body::Unary(f), Some(lookup)) => f(lookup),
			(Body::Unary(_), None) => Err(Error::StoreRequired(self.name.clone())),
		}
	}
}
