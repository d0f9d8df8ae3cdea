mod common;

use common::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use streamsync_core::{Config, DropPolicy, OverflowPolicy, SyncError};

#[test]
fn test_concurrent_producers_single_consumer() {
    // One thread per stream, each at its own pace, and a consumer thread
    // polling in a loop like a render tick.
    let keys = ["color", "depth", "nn", "imu"];
    let messages_per_stream = 500u64;

    let config = Config::no_sync().with_overflow(OverflowPolicy::Block {
        timeout: Duration::from_secs(10),
    });
    let manager = manager(&keys, config);
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let manager = manager.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut bundles = Vec::new();
            loop {
                let finished = done.load(Ordering::SeqCst);
                while manager.poll(&mut |bundle: Bundle| bundles.push(bundle)) {}
                if finished {
                    break bundles;
                }
                thread::yield_now();
            }
        })
    };

    let producers: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(index, &key)| {
            let sender = manager.stream(key).unwrap();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(index as u64);
                for seq in 0..messages_per_stream {
                    sender.send(create_message(seq)).unwrap();
                    if rng.random_range(0..10) == 0 {
                        thread::sleep(Duration::from_micros(rng.random_range(1..200)));
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);

    let bundles = consumer.join().unwrap();
    assert!(!bundles.is_empty());
    assert_bundles_complete(&bundles, &keys);
    assert_emission_order(&bundles);

    // Within a stream, later bundles carry later messages, and no
    // message is delivered twice.
    for key in keys {
        let seqs: Vec<u64> = bundles
            .iter()
            .map(|bundle| bundle[key].payload().seq)
            .collect();
        assert!(
            seqs.windows(2).all(|pair| pair[0] < pair[1]),
            "Stream {} delivered out of order",
            key
        );
        let unique: HashSet<u64> = seqs.iter().copied().collect();
        assert_eq!(unique.len(), seqs.len());
    }

    let stats = manager.stats();
    assert_eq!(stats.messages_received, messages_per_stream * keys.len() as u64);
    assert_eq!(stats.bundles_emitted, bundles.len() as u64);
    assert_eq!(stats.bundles_dropped, 0);

    let pending: u64 = keys
        .iter()
        .map(|key| manager.pending(key).unwrap() as u64)
        .sum();
    assert_eq!(
        stats.messages_received,
        stats.messages_pruned + pending + stats.bundles_emitted * keys.len() as u64
    );
}

#[test]
fn test_concurrent_seq_sync_producers() {
    let keys = ["left", "right", "nn"];
    let count = 300u64;

    let config = Config::seq_sync().with_overflow(OverflowPolicy::Block {
        timeout: Duration::from_secs(10),
    });
    let manager = manager(&keys, config);

    let producers: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(index, &key)| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + index as u64);
                for seq in 0..count {
                    // Late keys are expected once another stream ran
                    // ahead and a newer key was emitted.
                    let _ = manager.new_msg(key, create_message(seq));
                    if rng.random_bool(0.05) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut bundles = Vec::new();
    let mut remaining = producers;
    while !remaining.is_empty() {
        while manager.poll(&mut |bundle: Bundle| bundles.push(bundle)) {}
        remaining.retain(|handle| !handle.is_finished());
        thread::yield_now();
    }
    manager.close();
    manager.drain(&mut |bundle: Bundle| bundles.push(bundle));

    assert!(!bundles.is_empty());
    assert_bundles_complete(&bundles, &keys);
    assert_emission_order(&bundles);

    let mut prev: Option<u64> = None;
    for bundle in &bundles {
        let seq = bundle["left"].payload().seq;
        assert!(bundle.iter().all(|(_, msg)| *msg.sequence() == seq));
        if let Some(prev) = prev {
            assert!(seq > prev, "Sequence keys must increase across bundles");
        }
        prev = Some(seq);
    }
}

#[test]
fn test_producers_are_not_blocked_by_slow_consumer() {
    // With a non-blocking overflow policy, producers finish no matter how
    // slowly the consumer drains.
    let keys = ["a", "b"];
    let config = Config::no_sync()
        .with_queue_capacity(2)
        .with_overflow(OverflowPolicy::DropOldest);
    let manager = manager(&keys, config);

    let producers: Vec<_> = keys
        .iter()
        .map(|&key| {
            let manager = manager.clone();
            thread::spawn(move || {
                for seq in 0..1000 {
                    manager.new_msg(key, create_message(seq)).unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let stats = manager.stats();
    assert!(manager.queue_len() <= 2);
    assert_eq!(
        stats.bundles_emitted,
        stats.bundles_evicted + manager.queue_len() as u64
    );

    let bundles = poll_all(&manager);
    assert_bundles_complete(&bundles, &keys);
    assert_emission_order(&bundles);
}

#[test]
fn test_close_during_concurrent_sends() {
    // Only color sends, so no bundle ever forms.
    let config = Config::no_sync().with_buffer_capacity(64, DropPolicy::DropOldest);
    let manager = manager(&["color", "depth", "nn"], config);

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut seq = 0;
                loop {
                    match manager.new_msg("color", create_message(seq)) {
                        Ok(emitted) => assert!(!emitted),
                        Err(err) => break err,
                    }
                    seq += 1;
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    manager.close();
    let received_at_close = manager.stats().messages_received;
    let pending_at_close = manager.pending(&"color");

    for producer in producers {
        assert_eq!(producer.join().unwrap(), SyncError::Closed);
    }

    // Nothing was accepted once close() returned.
    assert_eq!(manager.stats().messages_received, received_at_close);
    assert_eq!(manager.pending(&"color"), pending_at_close);
    assert!(poll_all(&manager).is_empty());
}
