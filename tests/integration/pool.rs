//! Pooled connections, retries and shutdown seen through a federated repository

use super::test_utils::*;
use graft::config::{FanOutFailurePolicy, GraftConfig, PoolConfig, SourceConfig};
use graft::connector::PoolState;
use graft::request::{Operation, ReadNodeRequest, Request};
use graft::GraphError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn overlaid() -> GraftConfig {
    federated_config(vec![projection("a", &["/ => /"]), projection("b", &["/ => /"])])
}

#[test]
fn test_connections_return_to_their_pools() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[]);
    read_node(&fx.repository, "/docs").unwrap();

    let metrics = fx.repository.pool_metrics();
    let names: Vec<&str> = metrics.iter().map(|m| m.source_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "cache"]);
    for pool in &metrics {
        assert_eq!(pool.state, PoolState::Running);
        assert_eq!(pool.in_use, 0, "{} kept a connection", pool.source_name);
        assert!(pool.available <= 1);
        assert!(pool.total_used >= 1);
    }
    // every connection the pools kept is still open in the source
    assert_eq!(fx.a.open_connections(), metrics[0].available);
}

#[test]
fn test_unavailable_source_is_retried_up_to_its_limit() {
    let mut config = with_retry_limit(overlaid(), "b", 2);
    config.federation.fan_out_failure = FanOutFailurePolicy::Fail;
    let fx = Federated::new(config);
    seed(&fx.a, "/docs", &[]);
    fx.b.set_available(false);

    assert!(read_node(&fx.repository, "/docs").is_err());
    assert_eq!(fx.b.connect_attempts(), 3);
    assert_eq!(fx.repository.pool("b").unwrap().retry_limit(), 2);
}

#[test]
fn test_source_recovering_within_retries() {
    let fx = Federated::new(with_retry_limit(overlaid(), "b", 50));
    seed(&fx.a, "/docs", &[]);
    seed(&fx.b, "/docs", &[("title", "from b")]);
    fx.b.set_available(false);

    let b = fx.b.clone();
    let recover = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        b.set_available(true);
    });
    let docs = read_node(&fx.repository, "/docs").unwrap();
    recover.join().unwrap();

    assert_eq!(string_property(&docs, "title").as_deref(), Some("from b"));
    assert!(fx.b.connect_attempts() > 1);
}

#[test]
fn test_concurrent_units_of_work() {
    let fx = Federated::new(overlaid());
    for i in 0..8 {
        seed(&fx.a, &format!("/docs/n{}", i), &[]);
    }
    read_node(&fx.repository, "/docs").unwrap();

    let repository = &fx.repository;
    thread::scope(|scope| {
        for i in 0..8 {
            scope.spawn(move || {
                let at = format!("/docs/n{}", i);
                let node = read_node(repository, &at).unwrap();
                assert_eq!(node.location.path(), Some(&path(&at)));
            });
        }
    });

    for pool in fx.repository.pool_metrics() {
        assert_eq!(pool.in_use, 0);
        assert!(pool.pool_size <= 10);
    }
}

#[test]
fn test_shutdown_refuses_work_and_terminates() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[]);
    read_node(&fx.repository, "/docs").unwrap();

    fx.repository.shutdown();
    assert!(fx.repository.await_termination(Duration::from_secs(1)));
    assert!(fx.repository.bus().is_shutdown());
    assert_eq!(fx.a.open_connections(), 0);
    assert_eq!(fx.cache.open_connections(), 0);

    let err = read_node(&fx.repository, "/docs").unwrap_err();
    assert!(!err.is_path_not_found());
    for pool in fx.repository.pool_metrics() {
        assert_eq!(pool.state, PoolState::Terminated);
    }
}

#[test]
fn test_cancel_interrupts_read_waiting_for_a_connection() {
    let mut config = overlaid();
    config.sources.insert(
        "a".to_string(),
        SourceConfig {
            pool: PoolConfig {
                core_size: 0,
                max_size: 1,
                ..PoolConfig::default()
            },
            ..SourceConfig::default()
        },
    );
    let fx = Federated::new(config);
    seed(&fx.a, "/docs", &[]);
    let held = fx.repository.pool("a").unwrap().get_connection().unwrap();

    let read = ReadNodeRequest::new(loc("/docs"));
    let cancel = read.cancel_flag().clone();
    let (tx, rx) = mpsc::channel();
    let repository = &fx.repository;
    thread::scope(|scope| {
        scope.spawn(move || {
            let _ = tx.send(execute(repository, read));
        });
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();

        let finished = rx.recv_timeout(Duration::from_secs(3));
        // release the pool so a still-blocked reader can finish
        drop(held);
        match finished.expect("cancelled read stayed blocked on the pool") {
            Request::ReadNode(read) => assert!(
                matches!(read.error(), Some(GraphError::Interrupted(_))),
                "unexpected outcome {:?}",
                read.error()
            ),
            other => panic!("read changed kind: {:?}", other.kind()),
        }
    });

    let a = fx.repository.pool("a").unwrap().metrics();
    assert_eq!(a.in_use, 0);
}
