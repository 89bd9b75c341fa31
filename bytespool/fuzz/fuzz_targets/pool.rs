#![no_main]

use arbitrary::Arbitrary;
use bytes::Buf;
use commonware_bytespool::{Config, Freed, NZUsize, Origin, ScopedBuffer, SizedPool};
use libfuzzer_sys::fuzz_target;
use std::io::Read;

const MIN_SIZE: usize = 64;
const NUM_CLASSES: usize = 8;
const MAX_HELD: usize = 16;

#[derive(Arbitrary, Debug)]
enum PoolOperation {
    Alloc { size: u16 },
    Free { index: u8 },
    FreeForeign { len: u16 },
    Truncate { index: u8, len: u16 },
    Scoped { index: u8, start: u16, end: u16 },
    Read { len: u8 },
    Advance { cnt: u8 },
    Close,
}

fn capacity_for(size: usize) -> usize {
    let mut capacity = MIN_SIZE;
    while capacity < size {
        capacity *= 2;
    }
    capacity
}

fn fuzz(input: Vec<PoolOperation>) {
    let pool = SizedPool::new(Config {
        min_size: NZUsize!(MIN_SIZE),
        num_classes: NZUsize!(NUM_CLASSES),
        max_per_class: NZUsize!(4),
        prefill: false,
    });
    let max_size = pool.config().max_size();

    let mut held: Vec<Origin> = Vec::new();
    let mut scoped: Option<ScopedBuffer> = None;

    for op in input {
        match op {
            PoolOperation::Alloc { size } => {
                let size = size as usize;
                let mut origin = pool.alloc(size);
                assert_eq!(origin.len(), size);
                if size > max_size {
                    assert_eq!(origin.capacity(), size);
                } else {
                    assert_eq!(origin.capacity(), capacity_for(size));
                }
                origin.view_mut().fill(size as u8);
                if held.len() < MAX_HELD {
                    held.push(origin);
                } else {
                    pool.free(origin);
                }
            }

            PoolOperation::Free { index } => {
                if held.is_empty() {
                    continue;
                }
                let origin = held.swap_remove(index as usize % held.len());
                let capacity = origin.capacity();
                let managed = capacity <= max_size;
                match pool.free(origin) {
                    Freed::Pooled(class) => {
                        assert!(managed);
                        assert_eq!(MIN_SIZE << class, capacity);
                    }
                    Freed::NotPooled => assert!(!managed),
                }
            }

            PoolOperation::FreeForeign { len } => {
                let len = len as usize;
                let valid = len >= MIN_SIZE && len <= max_size && len.is_power_of_two();
                let freed = pool.free(Origin::from(vec![0u8; len]));
                assert_eq!(freed.is_pooled(), valid);
            }

            PoolOperation::Truncate { index, len } => {
                if held.is_empty() {
                    continue;
                }
                let i = index as usize % held.len();
                let before = held[i].len();
                held[i].truncate(len as usize);
                assert_eq!(held[i].len(), before.min(len as usize));
            }

            PoolOperation::Scoped { index, start, end } => {
                if held.is_empty() {
                    continue;
                }
                let origin = held.swap_remove(index as usize % held.len());
                let capacity = origin.capacity();
                let (start, end) = (start as usize, end as usize);
                if start > end || end > capacity {
                    pool.free(origin);
                    continue;
                }
                let buffer = ScopedBuffer::new(pool.clone(), origin, start..end);
                assert_eq!(buffer.remaining(), end - start);
                // Replacing drops (and closes) any previous buffer
                scoped = Some(buffer);
            }

            PoolOperation::Read { len } => {
                if let Some(buffer) = scoped.as_mut() {
                    let before = buffer.remaining();
                    let mut out = vec![0u8; len as usize];
                    let n = buffer.read(&mut out).unwrap();
                    assert_eq!(n, before.min(len as usize));
                    assert_eq!(buffer.remaining(), before - n);
                }
            }

            PoolOperation::Advance { cnt } => {
                if let Some(buffer) = scoped.as_mut() {
                    let cnt = (cnt as usize).min(buffer.remaining());
                    buffer.advance(cnt);
                }
            }

            PoolOperation::Close => {
                if let Some(buffer) = scoped.as_mut() {
                    buffer.close();
                    buffer.close();
                    assert!(buffer.is_closed());
                    assert!(buffer.shared_bytes().is_empty());
                }
            }
        }
    }

    for class in 0..NUM_CLASSES {
        assert!(pool.available(class) <= 4);
    }
}

fuzz_target!(|input: Vec<PoolOperation>| {
    fuzz(input);
});
