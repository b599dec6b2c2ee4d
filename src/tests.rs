extern crate std;

use std::{ops::Range, prelude::v1::*};

use proptest::prelude::*;

use crate::model::{self, cmp_key, cmp_node, TestNode};

use super::*;

fn tree_of(keys: &[u32]) -> AvlTree<TestNode> {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for &key in keys {
        assert!(tree.try_add(&key, cmp_key, TestNode::new(key)).is_ok());
        tree.assert_invariants();
    }

    tree
}

fn keys_of(tree: &AvlTree<TestNode>) -> Vec<u32> {
    tree.iter().map(|node| node.key).collect()
}

fn root_key(tree: &AvlTree<TestNode>) -> Option<u32> {
    tree.root().map(|node| node.key)
}

fn insert_find_all(keys: &[u32]) {
    let tree = tree_of(keys);

    for key in keys {
        let node = tree.get_raw(key, cmp_key).expect("item not found");
        assert_eq!(unsafe { node.as_ref().key() }, key);
    }

    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    assert_eq!(keys_of(&tree), sorted);
}

#[test]
fn zero_elems_find() {
    insert_find_all(&[]);
}

#[test]
fn single_elem_find() {
    insert_find_all(&[0]);
}

#[test]
fn two_elems_find() {
    insert_find_all(&[0, 1]);
    insert_find_all(&[1, 0]);
}

#[test]
fn three_elems_find() {
    insert_find_all(&[0, 1, 2]);
    insert_find_all(&[0, 2, 1]);
    insert_find_all(&[1, 0, 2]);
    insert_find_all(&[1, 2, 0]);
    insert_find_all(&[2, 0, 1]);
    insert_find_all(&[2, 1, 0]);
}

// Calls `f` with every permutation of `items`.
fn for_each_permutation(items: &mut Vec<u32>, k: usize, f: &mut dyn FnMut(&[u32])) {
    if k == items.len() {
        f(items);
        return;
    }

    for i in k..items.len() {
        items.swap(k, i);
        for_each_permutation(items, k + 1, f);
        items.swap(k, i);
    }
}

#[test]
fn five_elems_find() {
    for_each_permutation(&mut vec![0, 1, 2, 3, 4], 0, &mut |keys: &[u32]| {
        insert_find_all(keys)
    });
}

fn insert_remove_all(keys: &[u32]) {
    let mut tree = tree_of(keys);

    for key in keys {
        let node = tree.remove(key, cmp_key).expect("item not found");
        assert_eq!(node.key, *key);
        assert!(node.links.is_clear());
        tree.assert_invariants();
    }

    assert!(tree.is_empty());

    for &key in keys {
        tree.force_add(&key, cmp_key, TestNode::new(key));
        tree.assert_invariants();
    }

    for key in keys.iter().rev() {
        let node = tree.get_raw(key, cmp_key).expect("item not found");
        let node = unsafe { tree.remove_node(node) };
        assert!(node.links.is_clear());
        tree.assert_invariants();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.root, None);
}

#[test]
fn remove_one() {
    insert_remove_all(&[0]);
}

#[test]
fn remove_two() {
    insert_remove_all(&[0, 1]);
    insert_remove_all(&[1, 0]);
}

#[test]
fn remove_three() {
    insert_remove_all(&[0, 1, 2]);
    insert_remove_all(&[0, 2, 1]);
    insert_remove_all(&[1, 0, 2]);
    insert_remove_all(&[1, 2, 0]);
    insert_remove_all(&[2, 0, 1]);
    insert_remove_all(&[2, 1, 0]);
}

#[test]
fn remove_six() {
    for_each_permutation(&mut vec![0, 1, 2, 3, 4, 5], 0, &mut |keys: &[u32]| {
        insert_remove_all(keys)
    });
}

#[test]
fn remove_from_large_tree() {
    let keys: Vec<u32> = (0..200).map(|i| (i * 37) % 200).collect();

    let mut tree = tree_of(&keys);
    for key in (0..200).rev().step_by(3) {
        assert_eq!(tree.remove(&key, cmp_key).map(|node| node.key), Some(key));
        tree.assert_invariants();
    }

    while let Some(root) = root_key(&tree) {
        assert!(tree.remove(&root, cmp_key).is_some());
        tree.assert_invariants();
    }

    assert!(tree.is_empty());
}

#[test]
fn ascending_inserts_build_complete_tree() {
    let tree = tree_of(&[1, 2, 3, 4, 5, 6, 7]);

    assert_eq!(root_key(&tree), Some(4));
    assert_eq!(tree.height(), 3);
    assert_eq!(keys_of(&tree), [1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn ascending_inserts_rotate() {
    let mut tree = tree_of(&[10, 20]);
    assert_eq!(root_key(&tree), Some(10));

    // The third same-direction insert rotates 20 to the root.
    tree.try_add(&30, cmp_key, TestNode::new(30)).unwrap();
    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(tree.height(), 2);

    tree.try_add(&40, cmp_key, TestNode::new(40)).unwrap();
    tree.try_add(&50, cmp_key, TestNode::new(50)).unwrap();
    tree.assert_invariants();

    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(tree.height(), 3);

    let right = tree.root().and_then(|root| unsafe { tree.next(&root) });
    assert_eq!(right.map(|node| node.key), Some(30));
}

#[test]
fn zig_zag_insert_double_rotates() {
    let tree = tree_of(&[30, 10, 20]);

    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(tree.height(), 2);
}

#[test]
fn remove_root_of_three() {
    let mut tree = tree_of(&[2, 1, 3]);

    assert_eq!(tree.remove(&2, cmp_key).map(|node| node.key), Some(2));
    tree.assert_invariants();

    assert_eq!(tree.len(), 2);
    assert_eq!(tree.height(), 2);
    assert_eq!(keys_of(&tree), [1, 3]);
}

#[test]
fn remove_missing_key() {
    let mut tree = tree_of(&[2, 1, 3]);

    assert!(tree.remove(&4, cmp_key).is_none());
    assert!(tree.get(&0, cmp_key).is_none());
    assert_eq!(tree.len(), 3);

    let mut empty: AvlTree<TestNode> = AvlTree::new();
    assert!(empty.remove(&4, cmp_key).is_none());
    assert!(empty.first().is_none());
    assert!(empty.last().is_none());
}

#[test]
fn try_add_keeps_existing() {
    let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
    let shape: Vec<_> = tree.iter().map(|node| NonNull::from(node)).collect();

    let err = tree
        .try_add(&3, cmp_key, TestNode::with_id(3, 99))
        .expect_err("duplicate key accepted");
    assert_eq!(err.existing.key, 3);
    assert_eq!(err.existing.id, 0);
    assert_eq!(err.item.id, 99);
    assert!(err.item.links.is_clear());
    drop(err);

    tree.assert_invariants();
    assert_eq!(
        tree.iter().map(|node| NonNull::from(node)).collect::<Vec<_>>(),
        shape
    );
}

#[test]
fn add_without_replace_reports_existing() {
    let mut tree = tree_of(&[1, 2]);

    assert!(matches!(
        tree.add(&3, cmp_key, TestNode::new(3), false),
        Ok(None)
    ));

    let err = tree
        .add(&2, cmp_key, TestNode::with_id(2, 7), false)
        .expect_err("duplicate key accepted");
    assert_eq!((err.existing.key, err.existing.id), (2, 0));
    drop(err);

    let old = tree
        .add(&2, cmp_key, TestNode::with_id(2, 7), true)
        .expect("replacing add failed")
        .expect("nothing replaced");
    assert_eq!((old.key, old.id), (2, 0));
    assert_eq!(tree.get(&2, cmp_key).map(|node| node.id), Some(7));
}

#[test]
fn force_add_replaces_in_place() {
    let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
    let root_before = tree.root.map(|root| unsafe { AvlTree::<TestNode>::links(root).skew() });

    let old = tree
        .force_add(&4, cmp_key, TestNode::with_id(4, 1))
        .expect("nothing replaced");
    assert_eq!((old.key, old.id), (4, 0));
    assert!(old.links.is_clear());

    tree.assert_invariants();
    assert_eq!(tree.root().map(|root| (root.key, root.id)), Some((4, 1)));
    assert_eq!(
        tree.root.map(|root| unsafe { AvlTree::<TestNode>::links(root).skew() }),
        root_before
    );
    assert_eq!(keys_of(&tree), [1, 2, 3, 4, 5, 6, 7]);

    let old = tree
        .force_add(&1, cmp_key, TestNode::with_id(1, 1))
        .expect("nothing replaced");
    assert_eq!((old.key, old.id), (1, 0));
    assert!(tree.force_add(&8, cmp_key, TestNode::new(8)).is_none());

    tree.assert_invariants();
    assert_eq!(keys_of(&tree), [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn self_keyed_insert() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for key in [5, 3, 8, 1] {
        assert!(tree.insert(TestNode::new(key), cmp_node).is_none());
    }

    assert!(tree.try_insert(TestNode::with_id(3, 1), cmp_node).is_err());

    let old = tree
        .insert(TestNode::with_id(3, 2), cmp_node)
        .expect("nothing replaced");
    assert_eq!(old.id, 0);

    tree.assert_invariants();
    assert_eq!(tree.get(&3, cmp_key).map(|node| node.id), Some(2));
    assert_eq!(keys_of(&tree), [1, 3, 5, 8]);
}

#[test]
fn next_and_prev_walk_in_order() {
    let keys: Vec<u32> = (0..100).map(|i| (i * 7919) % 100).collect();
    let tree = tree_of(&keys);

    let mut forward = Vec::new();
    let mut cur = tree.first();
    while let Some(node) = cur {
        forward.push(node.key);
        cur = unsafe { tree.next(&node) };
    }

    let mut backward = Vec::new();
    let mut cur = tree.last();
    while let Some(node) = cur {
        backward.push(node.key);
        cur = unsafe { tree.prev(&node) };
    }

    assert_eq!(forward, (0..100).collect::<Vec<_>>());
    backward.reverse();
    assert_eq!(forward, backward);
}

#[test]
fn iter_is_double_ended() {
    let tree = tree_of(&[3, 1, 4, 5, 9, 2, 6]);

    let mut iter = tree.iter();
    assert_eq!(iter.len(), 7);
    assert_eq!(iter.next().map(|node| node.key), Some(1));
    assert_eq!(iter.next_back().map(|node| node.key), Some(9));
    assert_eq!(iter.len(), 5);

    let middle: Vec<_> = iter.map(|node| node.key).collect();
    assert_eq!(middle, [2, 3, 4, 5, 6]);

    let reversed: Vec<_> = tree.iter().rev().map(|node| node.key).collect();
    assert_eq!(reversed, [9, 6, 5, 4, 3, 2, 1]);
}

#[test]
fn tie_break_alternates() {
    let mut tree = tree_of(&[1, 2, 3, 4, 5, 6, 7]);

    // Both removals hit a root whose subtrees are equally deep.
    tree.remove(&4, cmp_key).unwrap();
    tree.assert_invariants();
    assert_eq!(root_key(&tree), Some(3));

    tree.remove(&3, cmp_key).unwrap();
    tree.assert_invariants();
    assert_eq!(root_key(&tree), Some(5));

    assert_eq!(keys_of(&tree), [1, 2, 5, 6, 7]);
}

#[test]
fn tie_break_is_per_tree() {
    let mut a = tree_of(&[1, 2, 3, 4, 5, 6, 7]);
    let mut b = tree_of(&[1, 2, 3, 4, 5, 6, 7]);

    a.remove(&4, cmp_key).unwrap();
    a.remove(&3, cmp_key).unwrap();
    assert_eq!(root_key(&a), Some(5));

    // `b` has seen no ties yet, so its first one still takes the predecessor.
    b.remove(&4, cmp_key).unwrap();
    assert_eq!(root_key(&b), Some(3));
}

#[test]
fn deeper_side_supplies_replacement() {
    // 4 is left-heavy: its left subtree holds 1, 2 and 3.
    let mut tree = tree_of(&[4, 2, 6, 1, 3]);

    tree.remove(&4, cmp_key).unwrap();
    tree.assert_invariants();
    assert_eq!(root_key(&tree), Some(3));

    // Removing the left-heavy 3 takes 2 from the deeper side without consuming a tie, so the
    // next tie still takes the predecessor.
    tree.remove(&3, cmp_key).unwrap();
    tree.assert_invariants();
    assert_eq!(root_key(&tree), Some(2));

    tree.remove(&2, cmp_key).unwrap();
    tree.assert_invariants();
    assert_eq!(root_key(&tree), Some(1));
    assert_eq!(keys_of(&tree), [1, 6]);
}

#[test]
fn ties_alternate_across_many_root_removals() {
    let mut tree = tree_of(&(1..=63).collect::<Vec<_>>());

    let mut sides = Vec::new();
    while let Some(root) = tree.root {
        let links = unsafe { AvlTree::<TestNode>::links(root) };
        let tied = links.skew() == 0 && links.left().is_some() && links.right().is_some();

        unsafe { tree.remove_node(root) };
        tree.assert_invariants();

        if tied {
            sides.push(tree.tie_break);
        }
    }

    assert!(sides.len() >= 2, "too few ties: {sides:?}");
    assert_eq!(sides[0], Dir::Left);
    for pair in sides.windows(2) {
        assert_ne!(pair[0], pair[1], "ties did not alternate: {sides:?}");
    }
}

#[test]
fn free_all_visits_every_node_once() {
    let mut tree = tree_of(&[5, 2, 8, 1, 3, 7, 9, 4, 6]);

    let mut freed = Vec::new();
    tree.free_all(|node| {
        assert!(node.links.is_clear());
        freed.push(node.key);
    });

    assert!(tree.is_empty());
    assert_eq!(tree.root, None);

    // Children are always freed before their parents, so the root comes last.
    assert_eq!(freed.last(), Some(&5));
    freed.sort_unstable();
    assert_eq!(freed, (1..=9).collect::<Vec<_>>());
}

#[test]
fn free_all_on_empty_tree_is_a_no_op() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    let mut calls = 0;
    tree.free_all(|_| calls += 1);

    assert_eq!(calls, 0);
    assert!(tree.is_empty());
}

#[test]
fn pop_first_and_last() {
    let mut tree = tree_of(&[3, 1, 2, 5, 4]);

    assert_eq!(tree.pop_first().map(|node| node.key), Some(1));
    assert_eq!(tree.pop_last().map(|node| node.key), Some(5));
    tree.assert_invariants();

    assert_eq!(tree.first().map(|node| node.key), Some(2));
    assert_eq!(tree.last().map(|node| node.key), Some(4));
}

#[test]
fn cursor_walks_through_ghost() {
    let mut tree = tree_of(&[2, 1, 3]);

    let mut curs = tree.cursor_first();
    assert_eq!(curs.get().map(TestNode::key), Some(&1));
    assert_eq!(curs.peek_prev().map(TestNode::key), None);

    curs.move_prev();
    assert!(curs.get().is_none());
    assert_eq!(curs.peek_next().map(TestNode::key), Some(&1));
    assert_eq!(curs.peek_prev().map(TestNode::key), Some(&3));

    let mut curs = tree.cursor_last_mut();
    assert_eq!(curs.remove_current().map(|node| node.key), Some(3));
    assert!(curs.get().is_none());

    curs.move_next();
    assert_eq!(curs.remove_current_and_move_prev().map(|node| node.key), Some(1));
    assert!(curs.get().is_none());

    drop(curs);
    tree.assert_invariants();
    assert_eq!(keys_of(&tree), [2]);
}

#[test]
fn tagged_links_index_one_record_twice() {
    enum ByKey {}
    enum ById {}

    struct Record {
        by_key: Links<Record, ByKey>,
        by_id: Links<Record, ById>,
        key: u32,
        id: u32,
    }

    unsafe impl Linked<Links<Record, ByKey>> for Record {
        type Handle = Box<Record>;

        fn into_ptr(r: Self::Handle) -> NonNull<Self> {
            NonNull::from(Box::leak(r))
        }

        unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
            unsafe { Box::from_raw(ptr.as_ptr()) }
        }

        unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Record, ByKey>> {
            unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).by_key)) }
        }
    }

    unsafe impl Linked<Links<Record, ById>> for Record {
        type Handle = NonNull<Record>;

        fn into_ptr(r: Self::Handle) -> NonNull<Self> {
            r
        }

        unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
            ptr
        }

        unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Record, ById>> {
            unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).by_id)) }
        }
    }

    let mut by_key: AvlTree<Record, ByKey> = AvlTree::new();
    let mut by_id: AvlTree<Record, ById> = AvlTree::new();

    for (key, id) in [(10, 3), (20, 1), (30, 2)] {
        let record = Box::new(Record {
            by_key: Links::new(),
            by_id: Links::new(),
            key,
            id,
        });
        by_key
            .try_add(&key, |k: &u32, r: &Record| k.cmp(&r.key), record)
            .unwrap();

        let ptr = by_key
            .get_mut(&key, |k: &u32, r: &Record| k.cmp(&r.key))
            .map(|r| NonNull::from(unsafe { r.get_unchecked_mut() }))
            .unwrap();
        by_id
            .try_add(&id, |i: &u32, r: &Record| i.cmp(&r.id), ptr)
            .unwrap();
    }

    by_key.assert_invariants();
    by_id.assert_invariants();

    assert_eq!(by_key.iter().map(|r| r.id).collect::<Vec<_>>(), [3, 1, 2]);
    assert_eq!(by_id.iter().map(|r| r.key).collect::<Vec<_>>(), [20, 30, 10]);
    assert_eq!(by_id.cursor_last().get().map(|r| r.key), Some(10));
    assert_eq!(by_key.cursor_first().peek_next().map(|r| r.id), Some(1));

    let ptr = by_id.remove(&1, |i: &u32, r: &Record| i.cmp(&r.id)).unwrap();
    let record = unsafe { by_key.remove_node(ptr) };
    assert_eq!(record.key, 20);

    by_id.clear();
    by_key.clear();
}

#[test]
fn map_basics() {
    let mut map: map::AvlMap<u32, &str> = map::AvlMap::new();

    assert!(map.is_empty());
    assert_eq!(map.insert(2, "two"), None);
    assert_eq!(map.insert(1, "one"), None);
    assert_eq!(map.insert(3, "three"), None);
    assert_eq!(map.insert(2, "deux"), Some("two"));

    assert_eq!(map.len(), 3);
    assert!(map.contains_key(&1));
    assert_eq!(map.get(&2), Some(&"deux"));

    if let Some(value) = map.get_mut(&3) {
        *value = "trois";
    }

    assert_eq!(
        map.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
        [(1, "one"), (2, "deux"), (3, "trois")]
    );
    assert_eq!(map.first_key_value(), Some((&1, &"one")));
    assert_eq!(map.last_key_value(), Some((&3, &"trois")));

    assert_eq!(map.pop_first(), Some((1, "one")));
    assert_eq!(map.pop_last(), Some((3, "trois")));
    assert_eq!(map.remove(&2), Some("deux"));
    assert_eq!(map.remove(&2), None);
    assert!(map.is_empty());
}

#[test]
fn map_drops_values() {
    use std::rc::Rc;

    let value = Rc::new(());
    let mut map: map::AvlMap<u32, Rc<()>> = (0..10).map(|k| (k, Rc::clone(&value))).collect();
    assert_eq!(Rc::strong_count(&value), 11);

    map.remove(&3);
    assert_eq!(Rc::strong_count(&value), 10);

    drop(map);
    assert_eq!(Rc::strong_count(&value), 1);
}

#[test]
fn dotgraph_labels_nodes() {
    let tree = tree_of(&[2, 1, 3, 4]);

    let mut out = String::new();
    tree.dotgraph("t", &mut out, |node| node.key).unwrap();

    assert!(out.starts_with("digraph \"graph-t\""));
    assert!(out.contains("[label=\"2:1\"]"));
    assert!(out.contains("[label=\"4:0\"]"));

    let mut empty = String::new();
    AvlTree::<TestNode>::new()
        .dotgraph("e", &mut empty, |node| node.key)
        .unwrap();
    assert_eq!(empty, "digraph \"graph-e\" {}");
}

#[cfg(miri)]
const FUZZ_RANGE: Range<usize> = 0..10;

#[cfg(not(miri))]
const FUZZ_RANGE: Range<usize> = 0..1000;

proptest::proptest! {
    #![proptest_config(ProptestConfig {
        max_shrink_iters: 65536,
        .. ProptestConfig::default()
    })]

    #[test]
    fn btree_equivalence(ops in proptest::collection::vec(model::op_strategy(), FUZZ_RANGE)) {
        model::run_btree_equivalence(ops);
    }

    #[test]
    fn random_add_remove_stays_balanced(
        ops in proptest::collection::vec((any::<bool>(), 0u32..512), FUZZ_RANGE),
    ) {
        let mut tree: AvlTree<TestNode> = AvlTree::new();
        let mut keys = std::collections::BTreeSet::new();

        for (add, key) in ops {
            if add {
                let added = tree.try_add(&key, cmp_key, TestNode::new(key)).is_ok();
                prop_assert_eq!(added, keys.insert(key));
            } else {
                let removed = tree.remove(&key, cmp_key).map(|node| node.key);
                prop_assert_eq!(removed, keys.take(&key));
            }

            tree.assert_invariants();

            // An AVL tree of n nodes is at most about 1.44 * log2(n + 2) tall.
            let bound = 1.4405 * ((tree.len() + 2) as f64).log2();
            prop_assert!(tree.height() as f64 <= bound, "height {} over {}", tree.height(), bound);
        }

        prop_assert!(tree.iter().map(|node| node.key).eq(keys.iter().copied()));
    }

    #[test]
    fn cursor_equivalence(
        values in proptest::collection::vec(0u32..1000, 0..100),
        ops in proptest::collection::vec(model::cursor_op_strategy(), FUZZ_RANGE),
    ) {
        model::run_cursor_equivalence(values, ops);
    }
}
