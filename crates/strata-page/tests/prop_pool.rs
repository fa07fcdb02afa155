use std::collections::HashSet;

use proptest::prelude::*;
use strata_page::{AtlasLayout, PhysicalPageId, PhysicalPagePool};

fn pool(pages: u32) -> PhysicalPagePool {
    PhysicalPagePool::new(AtlasLayout::linear(pages).unwrap())
}

#[derive(Clone, Debug)]
enum Op {
    Allocate,
    Free(usize),
    Touch(usize),
    Pin(usize),
    Unpin(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        1 => any::<usize>().prop_map(Op::Free),
        2 => any::<usize>().prop_map(Op::Touch),
        1 => any::<usize>().prop_map(Op::Pin),
        1 => any::<usize>().prop_map(Op::Unpin),
    ]
}

proptest! {
    // Random churn never hands out an id twice and the eviction candidate is the
    // oldest unpinned page of a reference recency list.
    #[test]
    fn pool_matches_reference_model(cap in 1u32..12, ops in prop::collection::vec(op(), 0..200)) {
        let mut p = pool(cap);
        let mut order: Vec<PhysicalPageId> = Vec::new(); // oldest first
        let mut pinned: HashSet<PhysicalPageId> = HashSet::new();
        for op in ops {
            match op {
                Op::Allocate => match p.try_allocate() {
                    Some(id) => {
                        prop_assert!(!order.contains(&id));
                        prop_assert!(id.get() <= cap);
                        order.push(id);
                    }
                    None => prop_assert_eq!(order.len(), cap as usize),
                },
                Op::Free(i) if !order.is_empty() => {
                    let id = order.remove(i % order.len());
                    pinned.remove(&id);
                    prop_assert!(p.free(id));
                    prop_assert!(!p.free(id));
                }
                Op::Touch(i) if !order.is_empty() => {
                    let id = order.remove(i % order.len());
                    order.push(id);
                    prop_assert!(p.touch(id));
                }
                Op::Pin(i) if !order.is_empty() => {
                    let id = order[i % order.len()];
                    pinned.insert(id);
                    prop_assert!(p.pin(id));
                }
                Op::Unpin(i) if !order.is_empty() => {
                    let id = order[i % order.len()];
                    prop_assert_eq!(p.unpin(id), pinned.remove(&id));
                }
                _ => {}
            }
            prop_assert_eq!(p.allocated_count(), order.len());
            prop_assert_eq!(p.free_count(), cap as usize - order.len());
            prop_assert_eq!(p.pinned_count(), pinned.len());
            let expected = order.iter().copied().find(|id| !pinned.contains(id));
            prop_assert_eq!(p.try_get_eviction_candidate(), expected);
            let mru: Vec<PhysicalPageId> = p.iter_mru().collect();
            let mut rev = order.clone();
            rev.reverse();
            prop_assert_eq!(mru, rev);
        }
    }
}

#[test]
fn fresh_pool_allocates_ascending_and_stops_at_capacity() {
    let mut p = pool(4);
    let ids: Vec<u32> = (0..4).map(|_| p.try_allocate().unwrap().get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert!(p.try_allocate().is_none());
    assert_eq!(p.allocated_count(), 4);
}

#[test]
fn eviction_candidate_is_least_recently_touched() {
    let mut p = pool(3);
    let a = p.try_allocate().unwrap();
    let b = p.try_allocate().unwrap();
    let c = p.try_allocate().unwrap();
    assert_eq!(p.try_get_eviction_candidate(), Some(a));
    p.touch(a);
    assert_eq!(p.try_get_eviction_candidate(), Some(b));
    p.touch(b);
    assert_eq!(p.try_get_eviction_candidate(), Some(c));
}

#[test]
fn pinned_pages_are_skipped_and_all_pinned_yields_none() {
    let mut p = pool(2);
    let a = p.try_allocate().unwrap();
    let b = p.try_allocate().unwrap();
    assert!(p.pin(a));
    assert_eq!(p.try_get_eviction_candidate(), Some(b));
    assert!(p.pin(b));
    assert_eq!(p.try_get_eviction_candidate(), None);
    assert!(p.unpin(a));
    assert_eq!(p.try_get_eviction_candidate(), Some(a));
}

#[test]
fn empty_pool_has_no_candidate() {
    let p = pool(4);
    assert_eq!(p.try_get_eviction_candidate(), None);
}

#[test]
fn pin_is_conditional_on_capacity() {
    let mut p = pool(4);
    let a = p.try_allocate().unwrap();
    assert!(!p.pin_if_guaranteed(a, 5));
    assert!(!p.is_pinned(a));
    assert_eq!(p.try_get_eviction_candidate(), Some(a));
    assert!(p.pin_if_guaranteed(a, 4));
    assert!(p.is_pinned(a));
}

#[test]
fn copy_most_recently_used_respects_buffer_len() {
    let mut p = pool(5);
    let ids: Vec<PhysicalPageId> = (0..5).map(|_| p.try_allocate().unwrap()).collect();
    p.touch(ids[1]);
    let mut buf = [ids[0]; 3];
    let n = p.copy_most_recently_used(&mut buf);
    assert_eq!(n, 3);
    assert_eq!(buf, [ids[1], ids[4], ids[3]]);

    let mut big = vec![ids[0]; 10];
    assert_eq!(p.copy_most_recently_used(&mut big), 5);
}

#[test]
fn reset_returns_every_page() {
    let mut p = pool(3);
    let a = p.try_allocate().unwrap();
    p.pin(a);
    p.try_allocate();
    p.reset();
    assert_eq!(p.allocated_count(), 0);
    assert_eq!(p.pinned_count(), 0);
    assert_eq!(p.try_allocate().map(|x| x.get()), Some(1));
}
