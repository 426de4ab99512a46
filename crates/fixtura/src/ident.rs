//! Canonical fixture paths and user-facing references.
//!
//! An [`Ident`] is the canonical, non-empty path of a fixture or namespace
//! below the schema root, for example `global/foo`. A [`Reference`] is what a
//! caller writes: the same segment syntax, optionally rooted with a leading
//! `/`, which the resolver turns into an [`Ident`] relative to a context
//! namespace.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Path segment separator.
pub const SEPARATOR: char = '/';

/// Canonical path naming a location in the namespace tree.
///
/// Never empty; segments are never empty and never contain [`SEPARATOR`].
/// Clones share segment storage.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
	segments: Arc<[Arc<str>]>,
}

impl Ident {
	/// Parses `a/b/c`, accepting one optional leading separator.
	pub fn parse(path: &str) -> Result<Self> {
		let trimmed = path.strip_prefix(SEPARATOR).unwrap_or(path);
		let segments = split_segments(path, trimmed)?;
		Ok(Self {
			segments: segments.into(),
		})
	}

	/// Builds an identifier from individual segments.
	pub fn from_segments<I, S>(segments: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut out = Vec::new();
		for segment in segments {
			out.push(segment_from(segment.as_ref())?);
		}
		if out.is_empty() {
			return Err(invalid("", "path has no segments"));
		}
		Ok(Self {
			segments: out.into(),
		})
	}

	pub(crate) fn from_arcs(segments: Vec<Arc<str>>) -> Self {
		debug_assert!(!segments.is_empty());
		Self {
			segments: segments.into(),
		}
	}

	/// Returns the last segment.
	pub fn name(&self) -> &str {
		&self.segments[self.segments.len() - 1]
	}

	/// Returns the first segment.
	pub fn first(&self) -> &str {
		&self.segments[0]
	}

	/// Returns the number of segments.
	pub fn len(&self) -> usize {
		self.segments.len()
	}

	/// Always false; present for API symmetry with collections.
	pub fn is_empty(&self) -> bool {
		false
	}

	pub fn segments(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
		self.segments.iter().map(|s| &**s)
	}

	pub(crate) fn raw_segments(&self) -> &[Arc<str>] {
		&self.segments
	}

	/// Returns the enclosing namespace, or `None` for a root-level entry.
	pub fn parent(&self) -> Option<Ident> {
		match self.segments.len() {
			1 => None,
			n => Some(Self::from_arcs(self.segments[..n - 1].to_vec())),
		}
	}

	/// Returns `self/name`.
	pub fn child(&self, name: &str) -> Result<Ident> {
		let segment = segment_from(name)?;
		let mut segments = self.segments.to_vec();
		segments.push(segment);
		Ok(Self::from_arcs(segments))
	}

	/// Returns true if `prefix` is an ancestor of (or equal to) this path.
	pub fn starts_with(&self, prefix: &Ident) -> bool {
		self.segments.starts_with(&prefix.segments)
	}

	/// Appends the segments of `rel` to an optional base namespace.
	pub(crate) fn under(base: Option<&Ident>, rel: &[Arc<str>]) -> Ident {
		let mut segments = base.map(|b| b.segments.to_vec()).unwrap_or_default();
		segments.extend(rel.iter().cloned());
		Self::from_arcs(segments)
	}
}

impl fmt::Display for Ident {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, segment) in self.segments.iter().enumerate() {
			if i > 0 {
				f.write_str("/")?;
			}
			f.write_str(segment)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Ident {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Ident({self})")
	}
}

impl std::str::FromStr for Ident {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

/// A possibly relative path as written by a caller.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Reference {
	raw: Arc<str>,
	absolute: bool,
	segments: Arc<[Arc<str>]>,
}

impl Reference {
	/// Parses a reference. A leading separator marks it absolute.
	pub fn parse(raw: &str) -> Result<Self> {
		let (absolute, body) = match raw.strip_prefix(SEPARATOR) {
			Some(rest) => (true, rest),
			None => (false, raw),
		};
		let segments = split_segments(raw, body)?;
		Ok(Self {
			raw: raw.into(),
			absolute,
			segments: segments.into(),
		})
	}

	/// The text this reference was parsed from.
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// True if the reference started with a separator.
	pub fn is_absolute(&self) -> bool {
		self.absolute
	}

	pub fn first(&self) -> &str {
		&self.segments[0]
	}

	/// The last segment, used as the default accessor name.
	pub fn name(&self) -> &str {
		&self.segments[self.segments.len() - 1]
	}

	pub(crate) fn raw_segments(&self) -> &[Arc<str>] {
		&self.segments
	}
}

impl From<&Ident> for Reference {
	fn from(id: &Ident) -> Self {
		Self {
			raw: format!("{SEPARATOR}{id}").into(),
			absolute: true,
			segments: id.segments.clone(),
		}
	}
}

impl From<Ident> for Reference {
	fn from(id: Ident) -> Self {
		Self::from(&id)
	}
}

impl fmt::Display for Reference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

impl fmt::Debug for Reference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Reference({:?})", &*self.raw)
	}
}

/// Conversion accepted wherever a fixture can be requested.
pub trait IntoReference {
	fn into_reference(self) -> Result<Reference>;
}

impl IntoReference for Reference {
	fn into_reference(self) -> Result<Reference> {
		Ok(self)
	}
}

impl IntoReference for &Reference {
	fn into_reference(self) -> Result<Reference> {
		Ok(self.clone())
	}
}

impl IntoReference for &Ident {
	fn into_reference(self) -> Result<Reference> {
		Ok(self.into())
	}
}

impl IntoReference for Ident {
	fn into_reference(self) -> Result<Reference> {
		Ok(self.into())
	}
}

impl IntoReference for &str {
	fn into_reference(self) -> Result<Reference> {
		Reference::parse(self)
	}
}

impl IntoReference for &String {
	fn into_reference(self) -> Result<Reference> {
		Reference::parse(self)
	}
}

impl IntoReference for String {
	fn into_reference(self) -> Result<Reference> {
		Reference::parse(&self)
	}
}

/// Validates a single segment.
pub(crate) fn segment_from(name: &str) -> Result<Arc<str>> {
	if name.is_empty() {
		return Err(invalid(name, "name is empty"));
	}
	if name.contains(SEPARATOR) {
		return Err(invalid(name, "name contains a path separator"));
	}
	Ok(name.into())
}

fn split_segments(raw: &str, body: &str) -> Result<Vec<Arc<str>>> {
	if body.is_empty() {
		return Err(invalid(raw, "path has no segments"));
	}
	body.split(SEPARATOR)
		.map(|s| {
			if s.is_empty() {
				Err(invalid(raw, "path contains an empty segment"))
			} else {
				Ok(Arc::<str>::from(s))
			}
		})
		.collect()
}

fn invalid(path: &str, reason: &'static str) -> Error {
	Error::InvalidPath {
		path: path.into(),
		reason,
	}
}
