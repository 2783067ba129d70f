//! Repositories built from configuration files

use super::test_utils::*;
use graft::config::{ConfigLoader, FanOutFailurePolicy};
use graft::connector::{InMemorySource, RepositorySource};
use graft::{ConfigError, FederatedRepository};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FEDERATION: &str = r#"
[federation]
name = "library"
default_cache_ttl_ms = 60000

[federation.cache]
source = "cache"

[[federation.projections]]
source = "a"
rules = ["/a => /"]

[[federation.projections]]
source = "b"
rules = ["/b => /docs $ private"]
read_only = true

[sources.b]
retry_limit = 1

[sources.b.pool]
core_size = 2
max_size = 3
"#;

fn sources() -> (InMemorySource, InMemorySource, InMemorySource) {
    (
        InMemorySource::new("a"),
        InMemorySource::new("b"),
        InMemorySource::new("cache"),
    )
}

#[test]
fn test_repository_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("graft.toml");
    std::fs::write(&file, FEDERATION).unwrap();
    let config = ConfigLoader::load_from_file(&file).unwrap();
    assert_eq!(config.federation.fan_out_failure, FanOutFailurePolicy::Omit);

    let (a, b, cache) = sources();
    seed(&b, "/docs/public", &[("title", "open")]);
    seed(&b, "/docs/private", &[]);
    let fx = Federated::with_sources(config, a, b, cache);

    assert_eq!(fx.repository.federation().name(), "library");
    let public = read_node(&fx.repository, "/b/public").unwrap();
    assert_eq!(string_property(&public, "title").as_deref(), Some("open"));
    assert!(read_node(&fx.repository, "/b/private")
        .unwrap_err()
        .is_path_not_found());

    let pool = fx.repository.pool("b").unwrap();
    assert_eq!(pool.retry_limit(), 1);
    assert_eq!(pool.options().core_size, 2);
    assert_eq!(pool.options().max_size, 3);
}

#[test]
fn test_invalid_config_lists_every_problem() {
    let config = ConfigLoader::load_from_str(
        r#"
[federation]
name = ""

[[federation.projections]]
source = "a"
rules = ["/a -> /"]

[[federation.projections]]
source = "b"
rules = ["/b => /"]
"#,
    )
    .unwrap();
    let (a, b, cache) = sources();
    let sources: Vec<Arc<dyn RepositorySource>> = vec![Arc::new(a), Arc::new(b), Arc::new(cache)];

    match FederatedRepository::new(config, sources) {
        Err(ConfigError::Invalid(message)) => {
            assert!(message.contains("name"), "{}", message);
            assert!(message.contains("cache"), "{}", message);
            assert!(message.contains("/a -> /"), "{}", message);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("configuration should not validate"),
    }
}

#[test]
fn test_missing_source_is_reported() {
    let config = federated_config(vec![projection("a", &["/ => /"]), projection("d", &["/d => /"])]);
    let (a, _, cache) = sources();
    let sources: Vec<Arc<dyn RepositorySource>> = vec![Arc::new(a), Arc::new(cache)];

    match FederatedRepository::new(config, sources) {
        Err(ConfigError::MissingField(field)) => assert!(field.contains("'d'"), "{}", field),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("repository should need source 'd'"),
    }
}

#[test]
fn test_written_config_loads_back_into_an_equivalent_repository() {
    let config = with_retry_limit(
        federated_config(vec![projection("a", &["/a => /"]), projection("b", &["/b => /"])]),
        "a",
        3,
    );
    let text = ConfigLoader::to_toml(&config).unwrap();
    let loaded = ConfigLoader::load_from_str(&text).unwrap();

    let (a, b, cache) = sources();
    seed(&a, "/x", &[]);
    let fx = Federated::with_sources(loaded, a, b, cache);
    assert_eq!(child_names(&fx.repository, "/"), vec!["a", "b"]);
    assert_eq!(child_names(&fx.repository, "/a"), vec!["x"]);
    assert_eq!(fx.repository.pool("a").unwrap().retry_limit(), 3);

    fx.repository.shutdown();
    assert!(fx.repository.await_termination(Duration::from_secs(1)));
}
