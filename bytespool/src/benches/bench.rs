use criterion::criterion_main;


criterion_main!(alloc_free::benches, scoped_read::benches);
