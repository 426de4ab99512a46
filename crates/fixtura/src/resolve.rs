//! Reference resolution.
//!
//! # Resolution Order
//!
//! 1. An absolute reference (`/a/b`) names `a/b` from the root.
//! 2. A reference whose first segment is a namespace directly under the root
//!    is root-relative. The rest of the path is not checked, so shared
//!    fixtures resolve identically from every context even before they exist.
//! 3. Anything else is appended to the context namespace and must name an
//!    existing fixture or namespace there. Ancestors are never searched.
//!
//! Tier 2 wins over a same-named child of the context namespace.

use crate::error::{Error, Result};
use crate::ident::{Ident, Reference};
use crate::schema::Namespace;

/// Resolves `reference` from `context` (`None` is the root namespace).
pub fn resolve(root: &Namespace, reference: &Reference, context: Option<&Ident>) -> Result<Ident> {
	if let Some(id) = rooted(root, reference) {
		return Ok(id);
	}
	let id = Ident::under(context, reference.raw_segments());
	match root.entry_at(id.raw_segments()) {
		Some(_) => Ok(id),
		None => Err(Error::ReferenceResolution {
			reference: reference.as_str().into(),
			context: context.cloned(),
		}),
	}
}

/// Like [`resolve`] but without the existence check of the context tier.
///
/// Yields the identifier the reference would denote once declared; used to
/// record references that are still pending.
pub fn locate(root: &Namespace, reference: &Reference, context: Option<&Ident>) -> Ident {
	rooted(root, reference).unwrap_or_else(|| Ident::under(context, reference.raw_segments()))
}

fn rooted(root: &Namespace, reference: &Reference) -> Option<Ident> {
	if reference.is_absolute() || root.namespace(reference.first()).is_some() {
		Some(Ident::under(None, reference.raw_segments()))
	} else {
		None
	}
}
