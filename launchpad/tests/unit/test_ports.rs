//! Port allocator unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use launchpad::config::global::PortRangeSettings;
use launchpad::errors::LaunchpadError;
use launchpad::filesys::file::File;
use launchpad::ports::allocator::{NoPinnedPorts, PinnedPorts, PortAllocator};

struct Pinned(BTreeSet<u16>);

#[async_trait]
impl PinnedPorts for Pinned {
    async fn pinned_ports(&self) -> Result<BTreeSet<u16>, LaunchpadError> {
        Ok(self.0.clone())
    }
}

/// Descriptor store that cannot be read
struct Unreadable;

#[async_trait]
impl PinnedPorts for Unreadable {
    async fn pinned_ports(&self) -> Result<BTreeSet<u16>, LaunchpadError> {
        Err(LaunchpadError::ConfigError("config/apps is not readable".to_string()))
    }
}

fn ranges(start: u16, end: u16) -> BTreeMap<String, PortRangeSettings> {
    BTreeMap::from([("standard".to_string(), PortRangeSettings { start, end })])
}

fn allocator(dir: &tempfile::TempDir, start: u16, end: u16) -> PortAllocator {
    PortAllocator::new(
        File::new(dir.path().join("ports.json")),
        ranges(start, end),
        Arc::new(NoPinnedPorts),
    )
}

#[tokio::test]
async fn test_allocation_is_sticky() {
    let dir = tempfile::tempdir().unwrap();
    let ports = allocator(&dir, 3001, 3999);

    let first = ports.allocate("api", "standard").await.unwrap();
    let second = ports.allocate("api", "standard").await.unwrap();
    assert_eq!(first, 3001);
    assert_eq!(first, second);

    // Survives a fresh allocator over the same document
    let reopened = allocator(&dir, 3001, 3999);
    assert_eq!(reopened.allocate("api", "standard").await.unwrap(), 3001);
    assert_eq!(reopened.allocate("web", "standard").await.unwrap(), 3002);
}

#[tokio::test]
async fn test_concurrent_allocations_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Arc::new(allocator(&dir, 3001, 3999));

    let mut handles = Vec::new();
    for i in 0..10 {
        let ports = ports.clone();
        handles.push(tokio::spawn(async move {
            ports.allocate(&format!("app-{}", i), "standard").await.unwrap()
        }));
    }

    let mut allocated = BTreeSet::new();
    for handle in handles {
        allocated.insert(handle.await.unwrap());
    }
    assert_eq!(allocated.len(), 10);
    assert!(allocated.iter().all(|p| (3001..=3010).contains(p)));

    let state = ports.state().await.unwrap();
    assert_eq!(state.allocations.len(), 10);
}

#[tokio::test]
async fn test_exhausted_range_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let ports = allocator(&dir, 5000, 5001);

    ports.allocate("a", "standard").await.unwrap();
    ports.allocate("b", "standard").await.unwrap();
    let before = ports.state().await.unwrap();

    let err = ports.allocate("c", "standard").await.unwrap_err();
    assert!(matches!(
        err,
        LaunchpadError::RangeExhausted { start: 5000, end: 5001, .. }
    ));
    assert_eq!(ports.state().await.unwrap(), before);
    assert_eq!(ports.get("c").await.unwrap(), None);
}

#[tokio::test]
async fn test_skips_reserved_engine_and_pinned_ports() {
    let dir = tempfile::tempdir().unwrap();
    let ports = PortAllocator::new(
        File::new(dir.path().join("ports.json")),
        ranges(3001, 3010),
        Arc::new(Pinned(BTreeSet::from([3003]))),
    );

    ports.reserve(3001).await.unwrap();
    ports.register_engine("arcade", &[3002]).await.unwrap();

    assert_eq!(ports.allocate("api", "standard").await.unwrap(), 3004);
}

#[tokio::test]
async fn test_release_keeps_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let ports = allocator(&dir, 3001, 3999);

    assert_eq!(ports.allocate("api", "standard").await.unwrap(), 3001);
    assert_eq!(ports.release("api").await.unwrap(), Some(3001));
    assert_eq!(ports.release("api").await.unwrap(), None);

    // The freed port is not handed out again right away
    assert_eq!(ports.allocate("web", "standard").await.unwrap(), 3002);
    assert_eq!(ports.state().await.unwrap().ranges["standard"].next, 3003);
}

#[tokio::test]
async fn test_unknown_range() {
    let dir = tempfile::tempdir().unwrap();
    let ports = allocator(&dir, 3001, 3999);

    let err = ports.allocate("api", "nope").await.unwrap_err();
    assert!(matches!(err, LaunchpadError::UnknownRange(range) if range == "nope"));
}

#[tokio::test]
async fn test_unreadable_descriptors_fall_back_to_state() {
    let dir = tempfile::tempdir().unwrap();
    let ports = PortAllocator::new(File::new(dir.path().join("ports.json")), ranges(3001, 3999), Arc::new(Unreadable));
    ports.reserve(3001).await.unwrap();
    ports.register_engine("arcade", &[3002]).await.unwrap();

    assert_eq!(ports.allocate("api", "standard").await.unwrap(), 3003);
    assert_eq!(ports.allocate("web", "standard").await.unwrap(), 3004);
    assert_eq!(ports.allocate("api", "standard").await.unwrap(), 3003);
}
