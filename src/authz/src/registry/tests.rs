/// Test suite for the role registry
///
/// Tests cover:
/// - Builder and JSON construction
/// - Validation failures surfaced at build time
/// - Role resolution
/// - Scope tree queries
/// - Delegation rules

use super::*;
use std::sync::Arc;
use std::thread;

fn sample_registry() -> RoleRegistry {
    RoleRegistry::builder()
        .define_scope("organization")
        .role("super_admin")
        .permissions(["*"])
        .can_assign(["*"])
        .role("org_admin")
        .permissions(["organization.*", "project.*"])
        .can_assign(["project_admin", "viewer"])
        .role("viewer")
        .permissions(["project.read", "team.read", "task.read"])
        .define_scope("project")
        .within("organization")
        .role("project_admin")
        .permissions(["project.*", "task.*"])
        .can_assign(["contributor"])
        .role("contributor")
        .permissions(["task.create", "task.update"])
        .define_scope("team")
        .within("project")
        .role("lead")
        .permissions(["team.*"])
        .build()
        .unwrap()
}

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_builder_registers_scopes_and_roles() {
    let registry = sample_registry();

    assert_eq!(registry.scopes(), &["organization", "project", "team"]);
    assert_eq!(registry.roles_in("organization").len(), 3);
    assert_eq!(registry.roles_in("project").len(), 2);
    assert!(registry.roles_in("missing").is_empty());
}

#[test]
fn test_repeated_role_definitions_union_patterns() {
    let registry = RoleRegistry::builder()
        .define_scope("organization")
        .role("auditor")
        .permissions(["audit.read"])
        .role("auditor")
        .permissions(["audit.export", "audit.read"])
        .build()
        .unwrap();

    let auditor = registry.resolve("auditor", "organization").unwrap();
    let patterns: Vec<_> = auditor.permissions.iter().map(|p| p.as_str()).collect();
    assert_eq!(patterns, vec!["audit.read", "audit.export"]);
}

#[test]
fn test_scopes_may_be_declared_child_first() {
    let config = RegistryConfig {
        scopes: vec![
            ScopeConfig {
                name: "project".into(),
                parent: Some("organization".into()),
                roles: vec![],
            },
            ScopeConfig::new("organization"),
        ],
    };

    let registry = RoleRegistry::from_config(config).unwrap();
    assert_eq!(registry.scopes(), &["organization", "project"]);
    assert_eq!(registry.children_of("organization"), &["project"]);
}

#[test]
fn test_duplicate_scope_entries_merge() {
    let config = RegistryConfig {
        scopes: vec![
            ScopeConfig {
                name: "organization".into(),
                parent: None,
                roles: vec![RoleConfig {
                    name: "viewer".into(),
                    permissions: vec!["project.read".into()],
                    can_assign: vec![],
                }],
            },
            ScopeConfig {
                name: "organization".into(),
                parent: None,
                roles: vec![RoleConfig {
                    name: "viewer".into(),
                    permissions: vec!["team.read".into()],
                    can_assign: vec![],
                }],
            },
        ],
    };

    let registry = RoleRegistry::from_config(config).unwrap();
    assert_eq!(registry.scopes().len(), 1);
    let viewer = registry.resolve("viewer", "organization").unwrap();
    assert_eq!(viewer.permissions.len(), 2);
}

#[test]
fn test_registry_from_json() {
    let registry = RegistryConfig::from_json(
        r#"{"scopes": [
            {"name": "organization", "roles": [
                {"name": "owner", "permissions": ["*"], "can_assign": ["*"]}
            ]},
            {"name": "project", "parent": "organization", "roles": [
                {"name": "member", "permissions": ["project.read"]}
            ]}
        ]}"#,
    )
    .unwrap()
    .build()
    .unwrap();

    let owner = registry.resolve("owner", "organization").unwrap();
    let member = registry.resolve("member", "project").unwrap();
    assert!(registry.may_assign(owner, member));
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_unknown_parent_scope_fails_at_build() {
    let result = RoleRegistry::builder()
        .define_scope("project")
        .within("organization")
        .role("member")
        .permissions(["project.read"])
        .build();

    assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
}

#[test]
fn test_circular_nesting_fails_at_build() {
    let result = RoleRegistry::builder()
        .define_scope("a")
        .within("b")
        .define_scope("b")
        .within("a")
        .build();

    assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
}

#[test]
fn test_invalid_permission_pattern_fails_at_build() {
    let result = RoleRegistry::builder()
        .define_scope("organization")
        .role("broken")
        .permissions(["project.cre*"])
        .build();

    match result {
        Err(AuthzError::InvalidConfig(msg)) => assert!(msg.contains("broken")),
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}

#[test]
fn test_wildcard_role_name_rejected() {
    let result = RoleRegistry::builder()
        .define_scope("organization")
        .role("*")
        .permissions(["*"])
        .build();

    assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
}

#[test]
fn test_can_assign_upward_rejected() {
    let result = RoleRegistry::builder()
        .define_scope("organization")
        .role("owner")
        .permissions(["*"])
        .define_scope("project")
        .within("organization")
        .role("maintainer")
        .permissions(["project.*"])
        .can_assign(["owner"])
        .build();

    assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
}

#[test]
fn test_can_assign_unknown_role_rejected() {
    let result = RoleRegistry::builder()
        .define_scope("organization")
        .role("owner")
        .permissions(["*"])
        .can_assign(["ghost"])
        .build();

    assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
}

// ============================================================================
// Resolution Tests
// ============================================================================

#[test]
fn test_resolve_and_require() {
    let registry = sample_registry();

    assert!(registry.resolve("viewer", "organization").is_some());
    assert!(registry.resolve("viewer", "project").is_none());

    assert!(matches!(
        registry.require("viewer", "galaxy"),
        Err(AuthzError::UnknownScope(_))
    ));
    assert!(matches!(
        registry.require("ghost", "organization"),
        Err(AuthzError::UnknownRole { .. })
    ));
}

#[test]
fn test_role_grants() {
    let registry = sample_registry();
    let viewer = registry.resolve("viewer", "organization").unwrap();

    assert!(viewer.grants("task.read"));
    assert!(!viewer.grants("task.create"));
}

// ============================================================================
// Scope Tree Tests
// ============================================================================

#[test]
fn test_scope_tree_queries() {
    let registry = sample_registry();

    assert_eq!(registry.parent_of("team"), Some("project"));
    assert_eq!(registry.parent_of("organization"), None);
    assert!(registry.is_descendant("team", "organization"));
    assert!(!registry.is_descendant("organization", "team"));
    assert!(!registry.is_descendant("project", "project"));
    assert!(registry.is_within("project", "project"));
    assert_eq!(
        registry.scope_and_descendants("project"),
        vec!["project".to_string(), "team".to_string()]
    );
}

// ============================================================================
// Delegation Tests
// ============================================================================

#[test]
fn test_wildcard_delegation_covers_scope_and_below() {
    let registry = sample_registry();
    let super_admin = registry.resolve("super_admin", "organization").unwrap();

    for scope in registry.scopes() {
        for role in registry.roles_in(scope) {
            assert!(registry.may_assign(super_admin, role), "{}", role.name);
        }
    }
}

#[test]
fn test_named_delegation() {
    let registry = sample_registry();
    let org_admin = registry.resolve("org_admin", "organization").unwrap();
    let project_admin = registry.resolve("project_admin", "project").unwrap();
    let contributor = registry.resolve("contributor", "project").unwrap();
    let super_admin = registry.resolve("super_admin", "organization").unwrap();

    assert!(registry.may_assign(org_admin, project_admin));
    assert!(!registry.may_assign(org_admin, contributor));
    assert!(!registry.may_assign(org_admin, super_admin));
}

#[test]
fn test_no_delegation_without_can_assign() {
    let registry = sample_registry();
    let viewer = registry.resolve("viewer", "organization").unwrap();
    let lead = registry.resolve("lead", "team").unwrap();

    assert_eq!(viewer.can_assign, Assignable::Nothing);
    assert!(!registry.may_assign(viewer, viewer));
    assert!(!registry.may_assign(viewer, lead));
}

#[test]
fn test_delegation_never_flows_upward() {
    let registry = RoleRegistry::builder()
        .define_scope("organization")
        .role("owner")
        .permissions(["*"])
        .define_scope("project")
        .within("organization")
        .role("maintainer")
        .permissions(["project.*"])
        .can_assign(["*"])
        .build()
        .unwrap();

    let maintainer = registry.resolve("maintainer", "project").unwrap();
    let owner = registry.resolve("owner", "organization").unwrap();
    assert!(registry.may_assign(maintainer, maintainer));
    assert!(!registry.may_assign(maintainer, owner));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_reads() {
    let registry = Arc::new(sample_registry());
    let mut handles = vec![];

    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            let viewer = registry.resolve("viewer", "organization").unwrap();
            viewer.grants("project.read")
        }));
    }

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
