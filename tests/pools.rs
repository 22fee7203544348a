// Run:
//   cargo test --test pools -- --nocapture

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use compute_context::{
    BufferDescriptor,
    BufferUsage,
    CommandPool,
    ContextConfig,
    DescriptorPool,
    GpuError,
    Handle,
    ResourcePool,
    ShaderCache,
    WorkGroup,
};

#[test]
fn descriptor_pool_allocates_after_purge() {
    let device = MockDevice::new();
    let shaders = ShaderCache::new(Arc::clone(&device));
    let layout = shaders.layout.retrieve(&unary_signature()).unwrap();
    let mut pool = DescriptorPool::new(Arc::clone(&device), 64);

    let purged: Vec<_> = (0..100).map(|_| pool.allocate(&layout).unwrap()).collect();
    assert_eq!(pool.allocated(), 100);
    assert_eq!(pool.native_pools(), 2);

    pool.purge().unwrap();
    assert!(pool.is_empty());
    assert!(purged.iter().all(|set| !set.is_valid()));

    let fresh = pool.allocate(&layout).unwrap();
    assert!(fresh.is_valid());
    assert_eq!(pool.allocated(), 1);
    assert_eq!(fresh.epoch(), 1);
    assert!(purged.iter().all(|set| set.epoch() == 0));
    assert!(fresh.bindings().iter().all(Option::is_none));
}

#[test]
fn descriptor_pool_reuses_native_pools_after_purge() {
    let device = MockDevice::new();
    let shaders = ShaderCache::new(Arc::clone(&device));
    let layout = shaders.layout.retrieve(&binary_signature()).unwrap();
    let mut pool = DescriptorPool::new(Arc::clone(&device), 4);

    for _ in 0..10 {
        pool.allocate(&layout).unwrap();
    }
    assert_eq!(pool.native_pools(), 3);

    pool.purge().unwrap();
    assert_eq!(MockDevice::count(&device.counters.pool_resets), 3);

    for _ in 0..10 {
        pool.allocate(&layout).unwrap();
    }
    assert_eq!(pool.native_pools(), 3);
    assert_eq!(MockDevice::count(&device.counters.descriptor_pools), 3);
}

#[test]
fn failed_native_reset_still_purges_the_pool() {
    let device = MockDevice::new();
    let shaders = ShaderCache::new(Arc::clone(&device));
    let layout = shaders.layout.retrieve(&unary_signature()).unwrap();
    let mut pool = DescriptorPool::new(Arc::clone(&device), 2);

    let sets: Vec<_> = (0..5).map(|_| pool.allocate(&layout).unwrap()).collect();
    assert_eq!(pool.native_pools(), 3);

    device.fail_reset_at.store(2, Ordering::SeqCst);
    let err = pool.purge().unwrap_err();
    assert!(matches!(err, GpuError::Native { operation: "reset_descriptor_pool", .. }));

    // Every native pool was visited; only the failed one is dropped.
    assert_eq!(MockDevice::count(&device.counters.pool_resets), 3);
    assert_eq!(pool.native_pools(), 2);
    assert!(pool.is_empty());
    assert_eq!(pool.epoch(), 1);
    assert!(sets.iter().all(|set| !set.is_valid()));

    for _ in 0..5 {
        pool.allocate(&layout).unwrap();
    }
    assert_eq!(pool.native_pools(), 3);
}

#[test]
fn zero_capacity_is_clamped() {
    let device = MockDevice::new();
    let pool: DescriptorPool<MockDevice> = DescriptorPool::new(device, 0);
    assert_eq!(pool.capacity(), 1);
}

#[test]
fn resource_pool_purge_releases_every_buffer() {
    let device = MockDevice::new();
    let mut pool = ResourcePool::new(Arc::clone(&device));

    let scratch = pool
        .allocate(&BufferDescriptor::new(256, BufferUsage::STORAGE).label("scratch"))
        .unwrap();
    let params = pool
        .allocate_init(None, BufferUsage::UNIFORM, &[WorkGroup::new(4, 2, 1)])
        .unwrap();

    assert_eq!(pool.len(), 2);
    assert_eq!(scratch.size, 256);
    assert_eq!(params.size, 12);
    assert_eq!(params.contents, bytemuck::bytes_of(&WorkGroup::new(4, 2, 1)).to_vec());

    // The pool holds one reference, the test another.
    assert_eq!(Handle::ref_count(&scratch), 2);
    pool.purge();
    assert!(pool.is_empty());
    assert_eq!(pool.purges(), 1);
    assert_eq!(Handle::ref_count(&scratch), 1);
}

#[test]
fn command_pool_opens_fresh_stream_after_submit() {
    let fx = fixture();
    let mut pool = CommandPool::new(Arc::clone(&fx.device));

    assert!(!pool.submit(fx.context.queue()).unwrap());
    assert!(!pool.is_recording());

    pool.stream().dispatch(WorkGroup::linear(4));
    assert!(pool.is_recording());
    assert!(pool.submit(fx.context.queue()).unwrap());

    assert_eq!(pool.in_flight(), 1);
    assert!(pool.stream().is_empty());
    assert_eq!(fx.device.submissions(), 1);

    pool.stream().dispatch(WorkGroup::linear(8));
    assert_eq!(pool.purge(), 1);
    assert_eq!(pool.in_flight(), 0);
    assert!(pool.is_empty());
    assert_eq!(pool.submissions(), 1);
}

#[test]
fn failed_submission_drops_the_stream() {
    let fx = fixture();
    let mut pool = CommandPool::new(Arc::clone(&fx.device));

    pool.stream().dispatch(WorkGroup::linear(4));
    fx.device.fail_submit.store(true, Ordering::SeqCst);

    assert!(pool.submit(fx.context.queue()).is_err());
    assert!(!pool.is_recording());
    assert_eq!(pool.in_flight(), 0);
}

#[test]
fn purging_one_thread_leaves_other_threads_intact() {
    let fx = fixture();
    let context = &fx.context;
    let layout = context.shader().layout.retrieve(&unary_signature()).unwrap();
    let barrier = Barrier::new(2);

    let (a_set, a_buffer) = thread::scope(|s| {
        let a = s.spawn(|| {
            let set = context.descriptor().allocate(&layout).unwrap();
            let buffer = storage_buffer(context, 64);
            barrier.wait(); // B purges its own pools here
            barrier.wait();
            (set, buffer, context.resource().len())
        });

        s.spawn(|| {
            barrier.wait();
            context.descriptor().allocate(&layout).unwrap();
            context.descriptor().purge().unwrap();
            context.resource().purge();
            barrier.wait();
        });

        let (set, buffer, resources) = a.join().unwrap();
        assert_eq!(resources, 1);
        (set, buffer)
    });

    assert!(a_set.is_valid());
    assert_eq!(a_buffer.size, 64);
}

#[test]
fn each_thread_gets_its_own_pools() {
    let fx = fixture_with(ContextConfig::new().descriptor_pool_capacity(8));
    let context = &fx.context;

    let main_pools = context.threads().current();
    assert!(Arc::ptr_eq(&main_pools, &context.threads().current()));

    let other = thread::scope(|s| {
        s.spawn(|| {
            let pools = context.threads().current();
            assert_eq!(pools.thread(), thread::current().id());
            assert_eq!(pools.descriptor().capacity(), 8);
            pools.thread()
        })
        .join()
        .unwrap()
    });

    assert_ne!(main_pools.thread(), other);
    // The scoped thread exited and took its pools with it.
    assert_eq!(context.threads().len(), 1);
}
