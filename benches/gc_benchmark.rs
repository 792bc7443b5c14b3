//! Allocator and collector benchmarks.
//!
//! Runs against the in-process runtime: allocation throughput with the
//! threshold trigger live, and full collections over rooted object graphs.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::ffi::c_char;
use std::os::raw::c_void;
use std::ptr;

use niflheim::runtime::alloc::rt_alloc_obj;
use niflheim::runtime::gc::{rt_gc_collect, rt_gc_reset_state};
use niflheim::runtime::object::{RT_TYPE_FLAG_LEAF, RtType};
use niflheim::runtime::roots::{
    RtRootFrame, rt_pop_roots, rt_push_roots, rt_root_frame_init, rt_root_slot_store,
};
use niflheim::runtime::vec::{rt_vec_new, rt_vec_push};
use niflheim::runtime::{rt_init, rt_thread_state};

static LEAF_TYPE: RtType = RtType {
    type_id: 21,
    flags: RT_TYPE_FLAG_LEAF,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: 32,
    debug_name: b"BenchLeaf\0".as_ptr() as *const c_char,
    trace_fn: None,
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

fn bench_allocation(c: &mut Criterion) {
    rt_init();

    c.bench_function("alloc_leaf_unrooted", |b| {
        rt_gc_reset_state();
        b.iter(|| {
            let obj = unsafe { rt_alloc_obj(rt_thread_state(), &LEAF_TYPE, 8) };
            black_box(obj);
        });
        rt_gc_reset_state();
    });
}

fn bench_collection(c: &mut Criterion) {
    rt_init();

    c.bench_function("collect_rooted_vec_of_1000", |b| {
        rt_gc_reset_state();

        let mut slots: [*mut c_void; 2] = [ptr::null_mut(); 2];
        let mut frame = RtRootFrame {
            prev: ptr::null_mut(),
            slot_count: 0,
            reserved: 0,
            slots: ptr::null_mut(),
        };
        unsafe {
            rt_root_frame_init(&mut frame, slots.as_mut_ptr(), 2);
            rt_push_roots(rt_thread_state(), &mut frame);

            let vec = rt_vec_new();
            rt_root_slot_store(&mut frame, 0, vec);
            for _ in 0..1000 {
                let leaf = rt_alloc_obj(rt_thread_state(), &LEAF_TYPE, 8);
                rt_root_slot_store(&mut frame, 1, leaf);
                rt_vec_push(vec, leaf);
            }
            rt_root_slot_store(&mut frame, 1, ptr::null_mut());

            b.iter(|| {
                rt_gc_collect(rt_thread_state());
            });

            rt_pop_roots(rt_thread_state());
        }
        rt_gc_reset_state();
    });
}

criterion_group!(benches, bench_allocation, bench_collection);
criterion_main!(benches);
