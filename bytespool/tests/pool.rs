use bytes::Buf;
use commonware_bytespool::{
    class::{BASE_SIZE, MAX_SIZE, NUM_CLASSES},
    default_pool,
    recycler::Freelist,
    Config, Freed, NZUsize, Origin, ScopedBuffer, SizedPool,
};
use std::{
    io::Read,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

/// Smallest `BASE_SIZE * 2^k` that is at least `size`.
fn expected_capacity(size: usize) -> usize {
    let mut capacity = BASE_SIZE;
    while capacity < size {
        capacity *= 2;
    }
    capacity
}

#[test]
fn alloc_views_match_requested_size() {
    let pool = SizedPool::new(Config {
        max_per_class: NZUsize!(1),
        ..Config::default()
    });
    let mut sizes = vec![0, 1, BASE_SIZE - 1, BASE_SIZE, BASE_SIZE + 1];
    for k in 1..NUM_CLASSES {
        let class = BASE_SIZE << k;
        sizes.extend([class - 1, class]);
        if class < MAX_SIZE {
            sizes.push(class + 1);
        }
    }

    for size in sizes {
        let origin = pool.alloc(size);
        assert_eq!(origin.view().len(), size);
        assert_eq!(origin.capacity(), expected_capacity(size), "size {size}");
        let freed = pool.free(origin);
        assert_eq!(
            freed.index().map(|index| BASE_SIZE << index),
            Some(expected_capacity(size))
        );
    }
}

#[test]
fn oversized_allocations_are_unmanaged() {
    let pool = SizedPool::new(Config {
        num_classes: NZUsize!(4),
        ..Config::default()
    });
    let max = pool.config().max_size();
    assert_eq!(max, 8 * 1024);

    for size in [max + 1, max * 2, max * 3 + 7] {
        let origin = pool.alloc(size);
        assert_eq!(origin.len(), size);
        assert_eq!(origin.capacity(), size);
        assert!(pool.try_alloc(size).is_err());
        assert_eq!(pool.free(origin), Freed::NotPooled);
    }
    for index in 0..4 {
        assert_eq!(pool.available(index), 0);
    }
}

#[test]
fn freeing_foreign_buffers() {
    let pool = SizedPool::default();

    // Any valid class length is accepted, whatever its provenance
    assert_eq!(pool.free(Origin::from(vec![0u8; 4096])), Freed::Pooled(2));

    for len in [0, 1, 1000, 1536, 3 * 4096, MAX_SIZE * 2] {
        assert_eq!(pool.free(Origin::from(vec![0u8; len])), Freed::NotPooled);
    }
    assert_eq!(pool.available(2), 1);
}

#[test]
fn custom_recycler_sees_every_class() {
    let classes = Arc::new(AtomicUsize::new(0));
    let counter = classes.clone();
    let pool = SizedPool::with_recycler(Config::default(), move |factory| {
        counter.fetch_add(1, Ordering::Relaxed);
        Freelist::new(NZUsize!(2), factory)
    });
    assert_eq!(classes.load(Ordering::Relaxed), NUM_CLASSES);

    let origin = pool.alloc(10);
    assert!(pool.free(origin).is_pooled());
    assert_eq!(pool.available(0), 1);
}

#[test]
fn scoped_buffer_with_default_pool() {
    let pool = default_pool();
    let payload: Vec<u8> = (0..200u8).collect();

    let mut origin = pool.alloc(payload.len());
    origin.view_mut().copy_from_slice(&payload);
    let mut scoped = ScopedBuffer::from_origin(pool.clone(), origin);

    assert_eq!(scoped.shared_bytes(), &payload[..]);
    assert_eq!(scoped.get_u8(), 0);

    let mut rest = Vec::new();
    scoped.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &payload[1..]);

    let mut buf = [0u8; 16];
    assert_eq!(scoped.read(&mut buf).unwrap(), 0);
    assert_eq!(scoped.read(&mut buf).unwrap(), 0);

    scoped.close();
    scoped.close();
    assert!(scoped.is_closed());
}

#[test]
fn framed_reads() {
    let pool = SizedPool::default();

    // Length-prefixed frames read into pooled buffers
    let mut stream: Vec<u8> = Vec::new();
    for frame in [&b"first"[..], &[0xFF; 2000][..], &b""[..]] {
        stream.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        stream.extend_from_slice(frame);
    }

    let mut reader = &stream[..];
    let mut frames = Vec::new();
    while !reader.is_empty() {
        let len = reader.get_u32() as usize;
        let mut scoped = pool.read_exact(&mut reader, len).unwrap();
        let mut frame = Vec::new();
        scoped.read_to_end(&mut frame).unwrap();
        frames.push(frame);
    }

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], b"first");
    assert_eq!(frames[1], vec![0xFF; 2000]);
    assert!(frames[2].is_empty());

    // Every frame buffer went back to its class
    assert_eq!(pool.available(0), 1);
    assert_eq!(pool.available(1), 1);
}

#[test]
fn scoped_buffers_move_between_threads() {
    let pool = SizedPool::default();
    let mut handles = Vec::new();
    for i in 0..4u8 {
        let mut origin = pool.alloc(1500);
        origin.view_mut().fill(i);
        let scoped = ScopedBuffer::from_origin(pool.clone(), origin);
        handles.push(thread::spawn(move || {
            let mut scoped = scoped;
            assert!(scoped.shared_bytes().iter().all(|&b| b == i));
            scoped.close();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.available(1), 4);
}
