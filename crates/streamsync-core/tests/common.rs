use streamsync_core::{Config, SyncManager, SyncedBundle, WithSequence};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub seq: u64,
    pub data: String,
}

impl TestMessage {
    pub fn new(seq: u64, data: &str) -> Self {
        Self {
            seq,
            data: data.to_string(),
        }
    }
}

impl WithSequence for TestMessage {
    type Seq = u64;

    fn sequence(&self) -> u64 {
        self.seq
    }
}

pub type Bundle = SyncedBundle<&'static str, TestMessage>;

#[allow(dead_code)]
pub fn create_message(seq: u64) -> TestMessage {
    TestMessage::new(seq, &format!("msg_{}", seq))
}

/// Build a manager over static stream names.
#[allow(dead_code)]
pub fn manager(
    keys: &[&'static str],
    config: Config,
) -> SyncManager<&'static str, TestMessage> {
    SyncManager::new(keys.iter().copied(), config).unwrap()
}

/// Poll until the queue reports empty and return everything delivered.
#[allow(dead_code)]
pub fn poll_all(manager: &SyncManager<&'static str, TestMessage>) -> Vec<Bundle> {
    let mut bundles = Vec::new();
    while manager.poll(&mut |bundle: Bundle| bundles.push(bundle)) {}
    bundles
}

/// Assert that every bundle holds exactly one message per registered
/// stream, in registration order.
#[allow(dead_code)]
pub fn assert_bundles_complete(bundles: &[Bundle], keys: &[&'static str]) {
    for bundle in bundles {
        let bundle_keys: Vec<&str> = bundle.keys().copied().collect();
        assert_eq!(bundle_keys, keys, "Bundle is missing or reorders streams");

        for (key, msg) in bundle.iter() {
            assert_eq!(msg.stream(), key, "Message filed under the wrong stream");
        }
    }
}

/// Assert that bundles come out in the order they were formed.
#[allow(dead_code)]
pub fn assert_emission_order(bundles: &[Bundle]) {
    let mut prev_max: Option<u64> = None;

    for bundle in bundles {
        let max_order = bundle
            .iter()
            .map(|(_, msg)| msg.arrival_order())
            .max()
            .unwrap();

        if let Some(prev) = prev_max {
            assert!(
                max_order > prev,
                "Bundles out of order: prev={}, current={}",
                prev,
                max_order
            );
        }

        prev_max = Some(max_order);
    }
}
