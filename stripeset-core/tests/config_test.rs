// Configuration loading and validation

use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use stripeset_core::{
    backend::Backends,
    config::{StripesetConfig, StripesetConfigBuilder},
    set::ErasureSet,
    sim::SimCluster,
    NodeMask, StripesetError,
};

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stripeset.toml");
    std::fs::write(
        &path,
        r#"
[set]
name = "disperse-7"
nodes = 5
fragments = 3
members = [0, 1, 2, 4]
auto_heal = false

[locks]
pool_capacity = 32
"#,
    )
    .unwrap();

    let config = StripesetConfig::load(&path).unwrap();

    assert_eq!(config.set.name, "disperse-7");
    assert_eq!(config.set.nodes, 5);
    assert_eq!(config.set.fragments, 3);
    assert!(!config.set.auto_heal);
    assert_eq!(config.set.node_mask(), NodeMask::from_nodes([0, 1, 2, 4]));
    assert_eq!(config.locks.pool_capacity, 32);
    // Sections left out keep their defaults
    assert_eq!(config.logging, Default::default());
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = StripesetConfig::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(StripesetError::Io { .. })));
}

#[test]
fn test_toml_round_trip_preserves_config() {
    let config = StripesetConfigBuilder::new()
        .name("rt")
        .nodes(8)
        .fragments(6)
        .members(vec![0, 1, 2, 3, 4, 5, 7])
        .build()
        .unwrap();

    let text = config.to_toml().unwrap();
    assert_eq!(StripesetConfig::from_toml(&text).unwrap(), config);
}

#[rstest]
#[case::no_nodes(0, 1, None)]
#[case::too_many_nodes(65, 4, None)]
#[case::no_fragments(4, 0, None)]
#[case::fragments_above_nodes(3, 4, None)]
#[case::member_out_of_range(4, 2, Some(vec![0, 4]))]
#[case::too_few_members(4, 3, Some(vec![0, 1]))]
fn test_invalid_geometry_is_rejected(
    #[case] nodes: usize,
    #[case] fragments: usize,
    #[case] members: Option<Vec<usize>>,
) {
    let mut builder = StripesetConfigBuilder::new().nodes(nodes).fragments(fragments);
    if let Some(members) = members {
        builder = builder.members(members);
    }
    assert!(matches!(
        builder.build(),
        Err(StripesetError::Configuration { .. })
    ));
}

#[test]
fn test_invalid_toml_is_rejected() {
    assert!(StripesetConfig::from_toml("[set]\nnodes = \"six\"").is_err());
    assert!(StripesetConfig::from_toml("[locks]\npool_capacity = 0").is_err());
}

#[tokio::test]
async fn test_set_uses_configured_members_only() {
    let config = StripesetConfigBuilder::new()
        .nodes(4)
        .fragments(2)
        .members(vec![1, 3])
        .build()
        .unwrap();
    let sim = Arc::new(SimCluster::new(4));
    let set = ErasureSet::new(&config, Backends::shared(sim)).unwrap();

    assert_eq!(set.nodes(), 4);
    assert_eq!(set.fragments(), 2);
    assert_eq!(set.node_mask(), NodeMask::from_nodes([1, 3]));
}

#[test]
fn test_set_needs_a_runtime() {
    let config = StripesetConfig::default();
    let sim = Arc::new(SimCluster::new(config.set.nodes));
    let result = ErasureSet::new(&config, Backends::shared(sim));
    assert!(matches!(result, Err(StripesetError::NotInitialized { .. })));
}
