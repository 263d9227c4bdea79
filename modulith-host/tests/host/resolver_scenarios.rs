// Dependency resolution scenarios, driven through the registry.
use std::sync::Arc;

use modulith_host::host_error::HostError;

use crate::helpers::{new_registry, TestExtension};

fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).unwrap()
}

#[tokio::test]
async fn topological_load_order_over_a_realistic_graph() {
    let registry = new_registry();
    let graph: &[(&str, &[&str])] = &[
        ("core", &[]),
        ("logging", &["core"]),
        ("db", &["core", "logging"]),
        ("auth", &["db"]),
        ("api", &["auth", "logging"]),
        ("ws", &["api"]),
        ("ui", &["api", "ws"]),
        ("admin", &["ui", "auth"]),
    ];
    for (name, deps) in graph {
        registry
            .register(Arc::new(TestExtension::named(name).with_dependencies(deps)))
            .await
            .unwrap();
    }

    let order = registry.resolve_order().await.unwrap();
    assert_eq!(order.len(), 8);
    for (name, deps) in graph {
        for dep in *deps {
            assert!(
                position(&order, dep) < position(&order, name),
                "{dep} must load before {name}, got {order:?}"
            );
        }
    }

    // Determinism: resolving again yields the identical order.
    assert_eq!(order, registry.resolve_order().await.unwrap());
}

#[tokio::test]
async fn cycle_detection_names_a_node_in_the_cycle() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("a").with_dependencies(&["b"])))
        .await
        .unwrap();
    registry
        .register(Arc::new(TestExtension::named("b").with_dependencies(&["c"])))
        .await
        .unwrap();

    // Registering "c" closes the cycle a -> b -> c -> a and is rejected
    // outright.
    let err = registry
        .register(Arc::new(TestExtension::named("c").with_dependencies(&["a"])))
        .await
        .unwrap_err();
    match &err {
        HostError::CycleDetected(node) => {
            assert!(["a", "b", "c"].contains(&node.as_str()));
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
    assert!(["a", "b", "c"].iter().any(|n| err.to_string().contains(n)));
}

#[tokio::test]
async fn out_of_order_registration_with_forward_edges_succeeds() {
    let registry = new_registry();
    // "app" arrives first, depending on two extensions that do not exist yet.
    registry
        .register(Arc::new(
            TestExtension::named("app").with_dependencies(&["store", "cache"]),
        ))
        .await
        .unwrap();

    // Registering the dependencies later must not trip over app's still
    // partially unresolved edges.
    registry
        .register(Arc::new(TestExtension::named("store")))
        .await
        .unwrap();
    registry
        .register(Arc::new(TestExtension::named("cache")))
        .await
        .unwrap();

    // Once everything is present the graph resolves normally.
    let order = registry.resolve_order().await.unwrap();
    assert!(position(&order, "store") < position(&order, "app"));
    assert!(position(&order, "cache") < position(&order, "app"));

    for name in &order {
        registry.enable(name).await.unwrap();
    }
}

#[tokio::test]
async fn missing_dependency_fails_resolution() {
    let registry = new_registry();
    registry
        .register(Arc::new(
            TestExtension::named("needy").with_dependencies(&["ghost"]),
        ))
        .await
        .unwrap();

    let err = registry.resolve_order().await.unwrap_err();
    match err {
        HostError::MissingDependency { from, to } => {
            assert_eq!(from, "needy");
            assert_eq!(to, "ghost");
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }
}

#[tokio::test]
async fn disable_safety_blocks_and_unblocks() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("base")))
        .await
        .unwrap();
    registry
        .register(Arc::new(
            TestExtension::named("auth").with_dependencies(&["base"]),
        ))
        .await
        .unwrap();
    registry
        .register(Arc::new(
            TestExtension::named("api").with_dependencies(&["base", "auth"]),
        ))
        .await
        .unwrap();

    for name in ["base", "auth", "api"] {
        registry.enable(name).await.unwrap();
    }

    // auth is required by the enabled api: the disable request is refused,
    // not silently overridden.
    let err = registry.disable("auth").await.unwrap_err();
    match err {
        HostError::RequiredByDependents { name, dependents } => {
            assert_eq!(name, "auth");
            assert_eq!(dependents, vec!["api"]);
        }
        other => panic!("expected RequiredByDependents, got {other:?}"),
    }
    assert_eq!(
        registry.status("auth").await.unwrap().state,
        modulith_host::registry::LifecycleState::Enabled
    );

    // After api goes away, auth may be disabled.
    registry.disable("api").await.unwrap();
    registry.disable("auth").await.unwrap();
}

#[tokio::test]
async fn boot_order_follows_the_resolver_not_the_advisory_hint() {
    let registry = new_registry();
    registry
        .register(Arc::new(
            TestExtension::named("consumer").with_dependencies(&["provider"]),
        ))
        .await
        .unwrap();
    registry
        .register(Arc::new(TestExtension::named("provider")))
        .await
        .unwrap();

    let mut config = modulith_host::config::HostConfig::default();
    config.enabled.insert("consumer".into(), true);
    config.enabled.insert("provider".into(), true);
    // The advisory hint is wrong on purpose; the resolver wins.
    config.load_order = vec!["consumer".into(), "provider".into()];

    let enabled = registry.enable_from_config(&config).await.unwrap();
    assert_eq!(enabled, vec!["provider", "consumer"]);
}
