use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::definition::Context;
use crate::store::Store;

fn ident(s: &str) -> Ident {
	Ident::parse(s).unwrap()
}

fn ids(set: &IndexSet<Ident>) -> Vec<String> {
	set.iter().map(ToString::to_string).collect()
}

fn shared_schema() -> SchemaBuilder {
	let mut b = SchemaBuilder::new();
	b.declare_namespace("global", |b| {
		b.declare_fixture("foo", Body::constant(String::from("foo")))?;
		b.declare_fixture(
			"reverse_foo",
			Body::unary(|s| Ok(s.get_as::<String>("foo")?.chars().rev().collect::<String>())),
		)?;
		b.declare_fixture("bar", Body::constant(String::from("bar")))?;
		Ok(())
	})
	.unwrap();
	b
}

struct SomeTestCase;

impl SomeTestCase {
	fn some_helper_method(&self) -> &'static str {
		"bux"
	}
}

/// Registers the usual mix: plain, renamed, pending and local fixtures.
fn register_some_test_case(ledger: &Ledger, schema: &mut SchemaBuilder) -> ScopeId {
	let scope = ScopeId::new("suite::hooks::SomeTestCase");
	ledger
		.register_reference(schema, &scope, "global/foo", false)
		.unwrap();
	ledger
		.register_reference(schema, &scope, "global/bar", "barrr")
		.unwrap();
	ledger
		.register_reference(schema, &scope, "global/baz", true)
		.unwrap();
	ledger
		.register_local_definition(
			schema,
			&scope,
			"qux",
			Body::unary(|s| Ok(format!("qux:{}", s.get_as::<String>("global/bar")?))),
			false,
		)
		.unwrap();
	ledger
		.register_local_definition(
			schema,
			&scope,
			"bux",
			Body::nullary(|cx| Ok(cx.host::<SomeTestCase>()?.some_helper_method())),
			true,
		)
		.unwrap();
	scope
}

#[rstest]
#[case("suite::hooks::SomeTestCase", "suite/hooks/some_test_case")]
#[case("app::HTTPServerTest", "app/http_server_test")]
#[case("app::Suite<alloc::string::String>", "app/suite")]
#[case("Plain", "plain")]
fn test_default_namespace_from_type_path(#[case] scope: &str, #[case] expected: &str) {
	assert_eq!(
		ScopeId::new(scope).default_namespace().unwrap(),
		ident(expected)
	);
}

#[test]
fn test_scope_of_type_uses_snake_cased_type_name() {
	let ns = ScopeId::of::<SomeTestCase>().default_namespace().unwrap();
	assert_eq!(ns.name(), "some_test_case");
	assert!(ScopeId::new("").default_namespace().is_err());
}

#[test]
fn test_scope_created_on_first_registration() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = register_some_test_case(&ledger, &mut schema);

	assert_eq!(ledger.scopes(), vec![scope.clone()]);
	assert_eq!(
		ledger.namespace_of(&scope).unwrap(),
		ident("suite/hooks/some_test_case")
	);
	assert!(matches!(
		ledger.declare_scope(scope, None),
		Err(Error::DuplicateScope(_))
	));
}

/// Registration order is kept and locals are fully qualified.
#[test]
fn test_registered_dependencies() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = register_some_test_case(&ledger, &mut schema);

	assert_eq!(
		ids(&ledger.dependencies_of(&scope).unwrap()),
		["global/foo", "global/bar", "global/baz"]
	);
	assert_eq!(
		ids(&ledger.local_dependencies_of(&scope).unwrap()),
		[
			"suite/hooks/some_test_case/qux",
			"suite/hooks/some_test_case/bux",
		]
	);

	let refs = ledger.references_of(&scope).unwrap();
	let pending: Vec<bool> = refs.iter().map(|d| d.pending).collect();
	assert_eq!(pending, [false, false, true]);
}

/// A pending reference becomes satisfiable once something is declared there.
#[test]
fn test_pending_reference_resolves_after_later_declaration() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::Late");

	let target = ledger
		.register_reference(&schema, &scope, "global/later", true)
		.unwrap();
	assert_eq!(target, ident("global/later"));
	assert!(ledger.references_of(&scope).unwrap()[0].pending);

	schema
		.declare_fixture_at(&ident("global"), "later", Body::constant(5u8))
		.unwrap();
	let schema = schema.freeze();
	assert!(!ledger.references_of(&scope).unwrap()[0].is_pending_in(&schema));

	let store = Store::with_ledger(schema, Arc::new(ledger));
	let scoped = store.scope(&scope).unwrap();
	assert_eq!(*scoped.accessor_as::<u8>("later").unwrap(), 5);
}

/// Requesting a still-undefined registered reference fails as not defined.
#[rstest]
#[case::shared_namespace("global/baz", "global/baz")]
#[case::scope_namespace("missing", "suite/hooks/some_test_case/missing")]
fn test_scoped_get_of_pending_reference(#[case] reference: &str, #[case] expected: &str) {
	let ledger = Arc::new(Ledger::new());
	let mut schema = shared_schema();
	let scope = register_some_test_case(&ledger, &mut schema);
	ledger
		.register_reference(&schema, &scope, "missing", false)
		.unwrap();

	let store = Store::with_ledger(schema.freeze(), Arc::clone(&ledger));
	let scoped = store.scope(&scope).unwrap();
	match scoped.get(reference) {
		Err(Error::FixtureNotDefined(id)) => assert_eq!(id, ident(expected)),
		other => panic!("expected FixtureNotDefined, got {other:?}"),
	}
	assert!(matches!(
		scoped.get("never_registered"),
		Err(Error::ReferenceResolution { .. })
	));
}

/// Touched fixtures join the closure; the scope's own locals do not.
#[test]
fn test_dependency_closure_includes_touched_fixtures() {
	let ledger = Arc::new(Ledger::new());
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::Closure");
	ledger
		.register_reference(&schema, &scope, "global/reverse_foo", true)
		.unwrap();
	ledger
		.register_local_definition(
			&mut schema,
			&scope,
			"bux",
			Body::unary(|s| Ok(format!("{}!", s.get_as::<String>("global/bar")?))),
			true,
		)
		.unwrap();

	let store = Store::with_ledger(schema.freeze(), Arc::clone(&ledger));
	let scoped = store.scope(&scope).unwrap();
	assert_eq!(ids(&scoped.dependencies().unwrap()), ["global/reverse_foo"]);

	assert_eq!(*scoped.get_as::<String>("bux").unwrap(), "bar!");
	assert_eq!(*scoped.accessor_as::<String>("reverse_foo").unwrap(), "oof");

	assert_eq!(
		ids(&ledger.touched_by(&scope).unwrap()),
		[
			"suite/closure/bux",
			"global/bar",
			"global/reverse_foo",
			"global/foo",
		]
	);
	assert_eq!(
		ids(&scoped.dependencies().unwrap()),
		["global/reverse_foo", "global/bar", "global/foo"]
	);
	assert_eq!(ids(&scoped.local_dependencies().unwrap()), ["suite/closure/bux"]);
}

/// Cache hits are still recorded for the scope that asked.
#[test]
fn test_touches_are_recorded_per_scope() {
	let ledger = Arc::new(Ledger::new());
	let first = ScopeId::new("suite::First");
	let second = ScopeId::new("suite::Second");
	ledger.declare_scope(first.clone(), None).unwrap();
	ledger.declare_scope(second.clone(), None).unwrap();

	let store = Store::with_ledger(shared_schema().freeze(), Arc::clone(&ledger));
	store.get("global/foo", None).unwrap();
	assert!(ledger.touched_by(&first).unwrap().is_empty());

	store.scope(&first).unwrap().get("global/reverse_foo").unwrap();
	store.scope(&second).unwrap().get("global/foo").unwrap();

	assert_eq!(
		ids(&ledger.touched_by(&first).unwrap()),
		["global/reverse_foo", "global/foo"]
	);
	assert_eq!(ids(&ledger.touched_by(&second).unwrap()), ["global/foo"]);
}

#[test]
fn test_accessor_table() {
	let ledger = Arc::new(Ledger::new());
	let mut schema = shared_schema();
	let scope = register_some_test_case(&ledger, &mut schema);

	let names: Vec<String> = ledger
		.accessors_of(&scope)
		.unwrap()
		.keys()
		.map(ToString::to_string)
		.collect();
	assert_eq!(names, ["barrr", "baz", "bux"]);

	let store = Store::with_ledger(schema.freeze(), Arc::clone(&ledger));
	let scoped = store.scope(&scope).unwrap();
	assert_eq!(*scoped.accessor_as::<String>("barrr").unwrap(), "bar");

	let case = SomeTestCase;
	let bux = scoped
		.accessor_with("bux", Context::with_host(&case))
		.unwrap();
	assert_eq!(bux.downcast_ref::<&str>(), Some(&"bux"));

	for hidden in ["foo", "bar", "qux"] {
		assert!(matches!(
			scoped.accessor(hidden),
			Err(Error::UnknownAccessor { .. })
		));
	}
	assert!(matches!(
		scoped.accessor("baz"),
		Err(Error::FixtureNotDefined(_))
	));

	// Hidden locals stay reachable by name.
	assert_eq!(*scoped.get_as::<String>("qux").unwrap(), "qux:bar");
}

#[test]
fn test_accessor_collision_later_registration_wins() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::Collide");
	ledger
		.register_reference(&schema, &scope, "global/foo", true)
		.unwrap();
	let local = ledger
		.register_local_definition(&mut schema, &scope, "foo", Body::constant(1u8), true)
		.unwrap();

	let accessors = ledger.accessors_of(&scope).unwrap();
	assert_eq!(accessors.len(), 1);
	assert_eq!(accessors["foo"], Reference::from(&local));
}

#[test]
fn test_references_are_deduplicated_by_target() {
	let ledger = Ledger::new();
	let schema = shared_schema();
	let scope = ScopeId::new("suite::Twice");
	for reference in ["global/foo", "/global/foo", "global/foo"] {
		ledger
			.register_reference(&schema, &scope, reference, false)
			.unwrap();
	}
	assert_eq!(ledger.references_of(&scope).unwrap().len(), 1);
	assert!(ledger.is_registered(&scope, &Reference::parse("global/foo").unwrap()));
}

/// An explicit namespace replaces the type-derived one.
#[test]
fn test_declared_scope_namespace() {
	let ledger = Arc::new(Ledger::new());
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::CustomNamespace");

	let ns = ledger
		.declare_scope(scope.clone(), Some(ident("totally_some_test/foo/bar")))
		.unwrap();
	assert_eq!(ns, ident("totally_some_test/foo/bar"));
	let baz = ledger
		.register_local_definition(&mut schema, &scope, "baz", Body::constant("baz"), true)
		.unwrap();
	assert_eq!(baz, ident("totally_some_test/foo/bar/baz"));

	let store = Store::with_ledger(schema.freeze(), Arc::clone(&ledger));
	let scoped = store.scope(&scope).unwrap();
	assert_eq!(scoped.namespace(), &ns);
	assert_eq!(*scoped.get_as::<&str>("baz").unwrap(), "baz");
	assert_eq!(*scoped.accessor_as::<&str>("baz").unwrap(), "baz");
}

#[test]
fn test_unknown_scope() {
	let ledger = Arc::new(Ledger::new());
	let unknown = ScopeId::new("suite::Unknown");
	assert!(matches!(
		ledger.dependencies_of(&unknown),
		Err(Error::UnknownScope(_))
	));
	assert!(ledger.accessor(&unknown, "foo").is_err());
	assert!(!ledger.is_registered(&unknown, &Reference::parse("foo").unwrap()));

	let store = Store::with_ledger(shared_schema().freeze(), ledger);
	assert!(matches!(store.scope(&unknown), Err(Error::UnknownScope(_))));
}

/// Local definitions still go through the schema's duplicate and freeze checks.
#[test]
fn test_local_definitions_follow_schema_rules() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::Rules");
	ledger
		.register_local_definition(&mut schema, &scope, "x", Body::constant(1), true)
		.unwrap();
	assert!(matches!(
		ledger.register_local_definition(&mut schema, &scope, "x", Body::constant(2), true),
		Err(Error::DuplicateDefinition { .. })
	));

	schema.freeze();
	assert!(matches!(
		ledger.register_local_definition(&mut schema, &scope, "y", Body::constant(3), true),
		Err(Error::SchemaFrozen(_))
	));
	assert_eq!(ids(&ledger.local_dependencies_of(&scope).unwrap()), ["suite/rules/x"]);
}

/// A scope served from cache still records what the cached fixture pulled in.
#[test]
fn test_cache_hit_records_transitive_closure() {
	let ledger = Arc::new(Ledger::new());
	let first = ScopeId::new("suite::First");
	let second = ScopeId::new("suite::Second");
	ledger.declare_scope(first.clone(), None).unwrap();
	ledger.declare_scope(second.clone(), None).unwrap();

	let store = Store::with_ledger(shared_schema().freeze(), Arc::clone(&ledger));
	store.scope(&first).unwrap().get("global/reverse_foo").unwrap();
	store.scope(&second).unwrap().get("global/reverse_foo").unwrap();

	for scope in [&first, &second] {
		assert_eq!(
			ids(&ledger.dependencies_of(scope).unwrap()),
			["global/reverse_foo", "global/foo"],
			"closure for {scope}"
		);
	}
}

/// Unscoped evaluation still feeds the closure later scoped hits report.
#[test]
fn test_closure_after_unscoped_evaluation() {
	let ledger = Arc::new(Ledger::new());
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::Late");
	ledger
		.register_local_definition(
			&mut schema,
			&scope,
			"wrapped",
			Body::unary(|s| Ok(format!("[{}]", s.get_as::<String>("global/reverse_foo")?))),
			true,
		)
		.unwrap();

	let store = Store::with_ledger(schema.freeze(), Arc::clone(&ledger));
	store.get("suite/late/wrapped", None).unwrap();
	assert!(ledger.touched_by(&scope).unwrap().is_empty());

	assert_eq!(*store.scope(&scope).unwrap().get_as::<String>("wrapped").unwrap(), "[oof]");
	assert_eq!(
		ids(&ledger.touched_by(&scope).unwrap()),
		["suite/late/wrapped", "global/reverse_foo", "global/foo"]
	);
	assert_eq!(
		ids(&ledger.dependencies_of(&scope).unwrap()),
		["global/reverse_foo", "global/foo"]
	);
}

#[test]
fn test_reference_to_own_local_is_not_an_external_dependency() {
	let ledger = Ledger::new();
	let mut schema = shared_schema();
	let scope = ScopeId::new("suite::SelfRef");
	let local = ledger
		.register_local_definition(&mut schema, &scope, "qux", Body::constant(1u8), false)
		.unwrap();
	let target = ledger
		.register_reference(&schema, &scope, "qux", true)
		.unwrap();
	ledger
		.register_reference(&schema, &scope, "global/foo", false)
		.unwrap();

	assert_eq!(target, local);
	assert_eq!(ids(&ledger.dependencies_of(&scope).unwrap()), ["global/foo"]);
	assert_eq!(ids(&ledger.local_dependencies_of(&scope).unwrap()), ["suite/self_ref/qux"]);
}
