//! Resolution tests against a service backed by an in-memory store.

use std::sync::Arc;

use crate::bake::applicable_entries;
use crate::config::PexConfig;
use crate::data::store::MemoryStore;
use crate::data::SubjectData;
use crate::error::PexError;
use crate::service::PermissionService;
use crate::subject::Subject;
use crate::types::{ContextSet, SubjectRef, Tristate};

// ============================================================================
// Helpers
// ============================================================================

fn service() -> PermissionService {
    service_with(PexConfig::default())
}

fn service_with(config: PexConfig) -> PermissionService {
    PermissionService::new(config, Arc::new(MemoryStore::new())).unwrap()
}

fn global() -> ContextSet {
    ContextSet::global()
}

fn group_ref(id: &str) -> SubjectRef {
    SubjectRef::new("group", id).unwrap()
}

fn group(svc: &PermissionService, id: &str) -> Arc<Subject> {
    svc.group_subjects().get(id).unwrap()
}

fn user(svc: &PermissionService, id: &str) -> Arc<Subject> {
    svc.user_subjects().get(id).unwrap()
}

fn allow(subject: &Subject, ctx: &ContextSet, node: &str) -> Tristate {
    subject.permission(ctx, node).unwrap()
}

// ============================================================================
// Permissions
// ============================================================================

#[test]
fn own_node_overrides_inherited_node() {
    let svc = service();
    let a = group(&svc, "a");
    let b = group(&svc, "b");
    b.data().set_permission(&global(), "x.y", -1).unwrap();
    b.data().set_permission(&global(), "z", 1).unwrap();
    a.data().set_permission(&global(), "x.y", 1).unwrap();
    a.data().add_parent(&global(), group_ref("b")).unwrap();

    assert!(a.has_permission(&global(), "x.y").unwrap());
    assert!(a.has_permission(&global(), "z").unwrap());
}

#[test]
fn wildcard_denies_everything_under_prefix() {
    let svc = service();
    let a = group(&svc, "a");
    a.data().set_permission(&global(), "foo.*", -1).unwrap();

    assert!(!a.has_permission(&global(), "foo.bar").unwrap());
    assert!(!a.has_permission(&global(), "foo").unwrap());
    assert_eq!(allow(&a, &global(), "foo.bar"), Tristate::Deny);
    assert_eq!(allow(&a, &global(), "other"), Tristate::Undefined);
}

#[test]
fn most_specific_node_wins_within_subject() {
    let svc = service();
    let a = group(&svc, "a");
    a.data()
        .set_permissions(&global(), [("a", -1), ("a.b", 1)])
        .unwrap();

    assert_eq!(allow(&a, &global(), "a.b.c"), Tristate::Allow);
    assert_eq!(allow(&a, &global(), "a.x"), Tristate::Deny);
}

#[test]
fn deeper_inherited_node_governs_its_subtree() {
    let svc = service();
    let a = group(&svc, "a");
    let b = group(&svc, "b");
    b.data().set_permission(&global(), "a.b", -1).unwrap();
    a.data().set_permission(&global(), "a", 1).unwrap();
    a.data().add_parent(&global(), group_ref("b")).unwrap();

    assert_eq!(allow(&a, &global(), "a.c"), Tristate::Allow);
    assert_eq!(allow(&a, &global(), "a.b.c"), Tristate::Deny);
}

#[test]
fn most_recently_added_parent_wins() {
    let svc = service();
    let a = group(&svc, "a");
    group(&svc, "first")
        .data()
        .set_permission(&global(), "n", 1)
        .unwrap();
    group(&svc, "second")
        .data()
        .set_permission(&global(), "n", -1)
        .unwrap();

    a.data().add_parent(&global(), group_ref("first")).unwrap();
    a.data().add_parent(&global(), group_ref("second")).unwrap();
    assert_eq!(allow(&a, &global(), "n"), Tristate::Deny);
}

// ============================================================================
// Default values
// ============================================================================

#[test]
fn default_value_decides_unmatched_nodes() {
    let svc = service();
    let a = group(&svc, "a");
    assert_eq!(allow(&a, &global(), "anything"), Tristate::Undefined);

    a.data().set_default_value(&global(), -1).unwrap();
    assert_eq!(allow(&a, &global(), "anything"), Tristate::Deny);

    a.data().set_permission(&global(), "listed", 1).unwrap();
    assert_eq!(allow(&a, &global(), "listed"), Tristate::Allow);
    assert_eq!(allow(&a, &global(), "unlisted"), Tristate::Deny);
}

#[test]
fn default_value_inherited_when_unset() {
    let svc = service();
    let a = group(&svc, "a");
    group(&svc, "b")
        .data()
        .set_default_value(&global(), 1)
        .unwrap();
    a.data().add_parent(&global(), group_ref("b")).unwrap();
    assert_eq!(allow(&a, &global(), "x"), Tristate::Allow);

    a.data().set_default_value(&global(), -1).unwrap();
    assert_eq!(allow(&a, &global(), "x"), Tristate::Deny);
}

#[test]
fn transient_default_overrides_persistent() {
    let svc = service();
    let a = group(&svc, "a");
    a.data().set_default_value(&global(), -1).unwrap();
    a.transient_data().set_default_value(&global(), 1).unwrap();
    assert_eq!(allow(&a, &global(), "x"), Tristate::Allow);
}

// ============================================================================
// Precedence between layers and ancestors
// ============================================================================

#[test]
fn transient_overrides_persistent() {
    let svc = service();
    let a = group(&svc, "a");
    a.data().set_permission(&global(), "p", 1).unwrap();
    a.data()
        .set_option(&global(), "prefix", Some("[persistent]"))
        .unwrap();
    a.transient_data().set_permission(&global(), "p", -1).unwrap();
    a.transient_data()
        .set_option(&global(), "prefix", Some("[transient]"))
        .unwrap();

    assert_eq!(allow(&a, &global(), "p"), Tristate::Deny);
    assert_eq!(
        a.option(&global(), "prefix").unwrap().as_deref(),
        Some("[transient]")
    );
}

#[test]
fn nearer_ancestor_option_wins() {
    let svc = service();
    let a = user(&svc, "alice");
    let mid = group(&svc, "mid");
    let top = group(&svc, "top");
    top.data().set_option(&global(), "prefix", Some("top")).unwrap();
    top.data().set_option(&global(), "suffix", Some("top")).unwrap();
    top.data().set_option(&global(), "rank", Some("top")).unwrap();
    mid.data().set_option(&global(), "prefix", Some("mid")).unwrap();
    mid.data().set_option(&global(), "suffix", Some("mid")).unwrap();
    mid.data().add_parent(&global(), group_ref("top")).unwrap();
    a.data().set_option(&global(), "prefix", Some("own")).unwrap();
    a.data().add_parent(&global(), group_ref("mid")).unwrap();

    let options = a.options(&global()).unwrap();
    assert_eq!(options.get("prefix").map(String::as_str), Some("own"));
    assert_eq!(options.get("suffix").map(String::as_str), Some("mid"));
    assert_eq!(options.get("rank").map(String::as_str), Some("top"));
}

#[test]
fn transient_parents_come_first() {
    let svc = service();
    let a = user(&svc, "alice");
    group(&svc, "persistent")
        .data()
        .set_permission(&global(), "n", 1)
        .unwrap();
    group(&svc, "temporary")
        .data()
        .set_permission(&global(), "n", -1)
        .unwrap();
    a.data().add_parent(&global(), group_ref("persistent")).unwrap();
    a.transient_data()
        .add_parent(&global(), group_ref("temporary"))
        .unwrap();

    assert_eq!(
        a.parents(&global()).unwrap(),
        vec![group_ref("temporary"), group_ref("persistent")]
    );
    assert_eq!(allow(&a, &global(), "n"), Tristate::Deny);
}

// ============================================================================
// Parent graph shape
// ============================================================================

#[test]
fn parents_flatten_depth_first_without_duplicates() {
    let svc = service();
    let a = user(&svc, "alice");
    let b = group(&svc, "b");
    let c = group(&svc, "c");
    group(&svc, "d")
        .data()
        .set_permission(&global(), "d.only", 1)
        .unwrap();
    b.data().add_parent(&global(), group_ref("d")).unwrap();
    c.data().add_parent(&global(), group_ref("d")).unwrap();
    a.data().add_parent(&global(), group_ref("c")).unwrap();
    a.data().add_parent(&global(), group_ref("b")).unwrap();

    assert_eq!(
        a.parents(&global()).unwrap(),
        vec![group_ref("b"), group_ref("d"), group_ref("c")]
    );
    assert!(a.is_child_of(&global(), &group_ref("d")).unwrap());
    assert!(a.has_permission(&global(), "d.only").unwrap());
}

#[test]
fn cyclic_inheritance_terminates() {
    let svc = service();
    let a = group(&svc, "a");
    let b = group(&svc, "b");
    a.data().set_permission(&global(), "from.a", 1).unwrap();
    b.data().set_permission(&global(), "from.b", 1).unwrap();
    a.data().add_parent(&global(), group_ref("b")).unwrap();
    b.data().add_parent(&global(), group_ref("a")).unwrap();

    let baked = a.baked(&global()).unwrap();
    assert_eq!(baked.parents(), &[group_ref("b")]);
    assert_eq!(
        baked.permissions().to_map().into_iter().collect::<Vec<_>>(),
        vec![("from.a".to_string(), 1), ("from.b".to_string(), 1)]
    );

    let baked_b = b.baked(&global()).unwrap();
    assert_eq!(baked_b.parents(), &[group_ref("a")]);
}

#[test]
fn self_parent_is_ignored() {
    let svc = service();
    let a = group(&svc, "a");
    a.data().add_parent(&global(), group_ref("a")).unwrap();
    assert!(a.parents(&global()).unwrap().is_empty());
}

#[test]
fn missing_parent_contributes_nothing() {
    let svc = service();
    let a = user(&svc, "alice");
    a.data().set_permission(&global(), "own", 1).unwrap();
    a.data().add_parent(&global(), group_ref("ghost")).unwrap();

    assert!(a.has_permission(&global(), "own").unwrap());
    assert!(a.parents(&global()).unwrap().is_empty());
    assert!(a.depends_on(&group_ref("ghost")));
}

#[test]
fn missing_parent_appearing_later_is_picked_up() {
    let svc = service();
    let a = user(&svc, "alice");
    a.data().add_parent(&global(), group_ref("late")).unwrap();
    assert_eq!(allow(&a, &global(), "late.node"), Tristate::Undefined);

    group(&svc, "late")
        .data()
        .set_permission(&global(), "late.node", 1)
        .unwrap();
    assert_eq!(a.cached_context_count(), 0);
    assert_eq!(allow(&a, &global(), "late.node"), Tristate::Allow);
}

#[test]
fn parent_of_another_type_resolves() {
    let svc = service();
    let a = user(&svc, "alice");
    let template = svc.collection("template").unwrap().get("base").unwrap();
    template
        .data()
        .set_permission(&global(), "from.template", 1)
        .unwrap();
    a.data()
        .add_parent(&global(), SubjectRef::parse("template:base").unwrap())
        .unwrap();
    assert!(a.has_permission(&global(), "from.template").unwrap());
}

#[test]
fn too_deep_inheritance_is_reported_and_not_cached() {
    let svc = service_with(PexConfig {
        max_inheritance_depth: 3,
        ..PexConfig::default()
    });
    for i in 0..5 {
        group(&svc, &format!("g{i}"))
            .data()
            .add_parent(&global(), group_ref(&format!("g{}", i + 1)))
            .unwrap();
    }
    group(&svc, "g5")
        .data()
        .set_permission(&global(), "bottom", 1)
        .unwrap();

    let top = group(&svc, "g0");
    let err = top.has_permission(&global(), "bottom").unwrap_err();
    assert!(matches!(err, PexError::InheritanceTooDeep { limit: 3, .. }));
    assert_eq!(top.cached_context_count(), 0);

    // Within the limit the chain resolves.
    assert!(group(&svc, "g2").has_permission(&global(), "bottom").unwrap());
}

#[test]
fn malformed_query_node_is_an_error() {
    let svc = service();
    let a = group(&svc, "a");
    assert!(matches!(
        a.has_permission(&global(), "bad..node"),
        Err(PexError::InvalidPermission { .. })
    ));
}

// ============================================================================
// Contexts
// ============================================================================

#[test]
fn subset_context_entries_apply() {
    let svc = service();
    let a = user(&svc, "alice");
    let nether = ContextSet::single("world", "nether").unwrap();
    let nether_hub = ContextSet::from_pairs([("world", "nether"), ("server", "hub")]).unwrap();

    a.data().set_permission(&global(), "build", 1).unwrap();
    a.data().set_permission(&global(), "fly", 1).unwrap();
    a.data().set_permission(&nether, "fly", -1).unwrap();

    assert_eq!(allow(&a, &nether_hub, "build"), Tristate::Allow);
    assert_eq!(allow(&a, &nether_hub, "fly"), Tristate::Deny);
    assert_eq!(allow(&a, &global(), "fly"), Tristate::Allow);
}

#[test]
fn unrelated_context_entries_do_not_apply() {
    let svc = service();
    let a = user(&svc, "alice");
    let end = ContextSet::single("world", "end").unwrap();
    let nether = ContextSet::single("world", "nether").unwrap();
    a.data().set_permission(&end, "fly", 1).unwrap();

    assert_eq!(allow(&a, &nether, "fly"), Tristate::Undefined);
    assert_eq!(allow(&a, &end, "fly"), Tristate::Allow);
}

#[test]
fn context_scoped_parent() {
    let svc = service();
    let a = user(&svc, "alice");
    let nether = ContextSet::single("world", "nether").unwrap();
    group(&svc, "miners")
        .data()
        .set_permission(&global(), "mine", 1)
        .unwrap();
    a.data().add_parent(&nether, group_ref("miners")).unwrap();

    assert!(a.has_permission(&nether, "mine").unwrap());
    assert!(!a.has_permission(&global(), "mine").unwrap());
}

#[test]
fn applicable_entries_order_most_specific_first() {
    let nether = ContextSet::single("world", "nether").unwrap();
    let hub = ContextSet::single("server", "hub").unwrap();
    let both = nether.union(&hub);
    let data = SubjectData::new()
        .set_default_value(&global(), 1)
        .set_default_value(&nether, 2)
        .set_default_value(&hub, 3)
        .set_default_value(&both, 4)
        .set_default_value(&ContextSet::single("world", "end").unwrap(), 5);

    let order: Vec<i32> = applicable_entries(&data, &both)
        .into_iter()
        .map(|(_, e)| e.default_value)
        .collect();
    // hub sorts before nether ("server" < "world").
    assert_eq!(order, vec![4, 3, 2, 1]);
}
