extern crate std;

use std::{ops::Range, prelude::v1::*};

use proptest::prelude::*;

use crate::model::{self, TestNode};

use super::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tree_of(keys: &[u32]) -> AvlTree<TestNode> {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for &key in keys {
        assert!(tree.insert(TestNode::new(key, key)).is_none());
        model::assert_well_formed(&tree);
    }

    tree
}

fn node(tree: &AvlTree<TestNode>, key: u32) -> NonNull<TestNode> {
    tree.get_raw(&key).expect("item not found")
}

fn key_of(link: Link<TestNode>) -> Option<u32> {
    link.map(|n| unsafe { n.as_ref().key })
}

fn root_key(tree: &AvlTree<TestNode>) -> Option<u32> {
    key_of(tree.root)
}

fn children(tree: &AvlTree<TestNode>, key: u32) -> (Option<u32>, Option<u32>) {
    children_of(tree, node(tree, key))
}

// Lookups by key are unreliable while the tree is out of order.
fn children_of(tree: &AvlTree<TestNode>, n: NonNull<TestNode>) -> (Option<u32>, Option<u32>) {
    unsafe {
        (
            key_of(tree.child(n, Dir::Left)),
            key_of(tree.child(n, Dir::Right)),
        )
    }
}

fn balance_of(tree: &AvlTree<TestNode>, key: u32) -> i8 {
    unsafe { tree.balance(node(tree, key)) }
}

// (key, parent key, balance) for every node, in order.
fn shape(tree: &AvlTree<TestNode>) -> Vec<(u32, Option<u32>, i8)> {
    tree.iter()
        .map(|n| (n.key, key_of(n.links.parent()), n.links.balance()))
        .collect()
}

fn for_each_permutation(keys: &mut [u32], k: usize, f: &mut impl FnMut(&[u32])) {
    if k == keys.len() {
        f(keys);
        return;
    }

    for i in k..keys.len() {
        keys.swap(k, i);
        for_each_permutation(keys, k + 1, f);
        keys.swap(k, i);
    }
}

fn insert_find_all(keys: &[u32]) {
    let tree = tree_of(keys);

    assert_eq!(tree.len(), keys.len());
    for key in keys {
        let node = tree.get(key).expect("item not found");
        assert_eq!(node.key(), key);
    }
}

fn insert_remove_all(keys: &[u32], removal_order: &[u32]) {
    let mut tree = tree_of(keys);

    for key in removal_order {
        let node = tree.remove(key).expect("item not found");
        assert_eq!(node.key, *key);
        model::assert_well_formed(&tree);
    }

    assert!(tree.is_empty());
    assert!(tree.root.is_none());
    assert!(tree.iter().next().is_none());
}

#[test]
fn insert_find_permutations() {
    for n in 0..=6 {
        let mut keys = (0..n).collect::<Vec<u32>>();
        for_each_permutation(&mut keys, 0, &mut |perm| insert_find_all(perm));
    }
}

#[test]
fn insert_remove_permutations() {
    #[cfg(miri)]
    const MAX: u32 = 3;
    #[cfg(not(miri))]
    const MAX: u32 = 5;

    for n in 0..=MAX {
        let mut keys = (0..n).collect::<Vec<u32>>();
        for_each_permutation(&mut keys, 0, &mut |insertion| {
            let mut removal = (0..n).collect::<Vec<u32>>();
            for_each_permutation(&mut removal, 0, &mut |removal| {
                insert_remove_all(insertion, removal)
            });
        });
    }
}

#[test]
fn ascending_inserts_rotate_to_balanced_root() {
    init_logging();

    let tree = tree_of(&[10, 20, 30]);

    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(children(&tree, 20), (Some(10), Some(30)));
    for key in [10, 20, 30] {
        assert_eq!(balance_of(&tree, key), 0);
    }
}

#[test]
fn zig_zag_inserts_double_rotate() {
    init_logging();

    let tree = tree_of(&[30, 10, 20]);
    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(children(&tree, 20), (Some(10), Some(30)));

    let tree = tree_of(&[10, 30, 20]);
    assert_eq!(root_key(&tree), Some(20));
    assert_eq!(children(&tree, 20), (Some(10), Some(30)));
}

#[test]
fn remove_inner_node_with_two_children() {
    init_logging();

    let mut tree = tree_of(&[30, 20, 10, 40, 50]);
    assert_eq!(root_key(&tree), Some(20));

    let removed = tree.remove(&20).expect("item not found");
    assert_eq!(removed.key, 20);
    model::assert_well_formed(&tree);

    assert_eq!(
        tree.iter().map(|n| n.key).collect::<Vec<_>>(),
        [10, 30, 40, 50]
    );

    // The predecessor took the root's place, and the rotation that followed kept the height.
    assert_eq!(root_key(&tree), Some(40));
    assert_eq!(balance_of(&tree, 40), -1);
    assert_eq!(balance_of(&tree, 10), 1);
}

#[test]
fn remove_only_node() {
    let mut tree = tree_of(&[7]);

    let removed = tree.remove(&7).expect("item not found");
    assert_eq!(removed.key, 7);
    assert!(removed.links.parent().is_none());

    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.remove(&7).map(|n| n.key), None);
    tree.assert_invariants();
}

#[test]
fn remove_absent_key() {
    let mut tree = tree_of(&[1, 2, 3]);
    let before = shape(&tree);

    assert!(tree.remove(&4).is_none());
    assert_eq!(shape(&tree), before);
    assert_eq!(tree.len(), 3);
}

#[test]
fn insert_duplicate_keeps_shape() {
    let mut tree = tree_of(&(0..20).collect::<Vec<_>>());
    let before = shape(&tree);

    let displaced = tree.insert(TestNode::new(7, 99)).expect("key was present");
    assert_eq!((displaced.key, displaced.value), (7, 7));
    assert!(displaced.links.parent().is_none());

    assert_eq!(shape(&tree), before);
    assert_eq!(tree.len(), 20);
    assert_eq!(tree.get(&7).map(|n| n.value), Some(99));
    tree.assert_invariants();
}

#[test]
fn sequential_inserts_fill_perfect_tree() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();
    for key in 0..1023 {
        tree.insert(TestNode::new(key, key));
    }

    model::assert_well_formed(&tree);
    assert_eq!(tree.height(), 10);
    assert!(tree.iter().all(|n| n.links.balance() == 0));
}

#[test]
fn rotations_relink_without_rebalancing() {
    let mut tree = tree_of(&[2, 1, 3]);
    let two = node(&tree, 2);

    tree.rotate_left(two);
    assert_eq!(root_key(&tree), Some(3));
    assert_eq!(children(&tree, 3), (Some(2), None));
    assert_eq!(children(&tree, 2), (Some(1), None));
    assert_eq!(key_of(unsafe { tree.parent(two) }), Some(3));

    // Balance factors are left for the caller to assign.
    assert!(matches!(
        tree.validate(),
        Err(InvariantViolation::BalanceMismatch { .. })
    ));

    let three = node(&tree, 3);
    tree.rotate_right(three);
    assert_eq!(root_key(&tree), Some(2));
    assert_eq!(children(&tree, 2), (Some(1), Some(3)));
    tree.assert_invariants();
}

#[test]
#[should_panic(expected = "rotate_left requires a right child")]
fn rotate_left_without_right_child() {
    let mut tree = tree_of(&[2, 1]);
    let two = node(&tree, 2);
    tree.rotate_left(two);
}

#[test]
fn node_swap_distant() {
    let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
    let (four, three) = (node(&tree, 4), node(&tree, 3));

    unsafe { tree.node_swap(four, three) };
    assert_eq!(root_key(&tree), Some(3));
    assert_eq!(children(&tree, 3), (Some(2), Some(6)));
    assert_eq!(children(&tree, 2), (Some(1), Some(4)));
    assert_eq!(children_of(&tree, four), (None, None));
    assert_eq!(key_of(unsafe { tree.parent(four) }), Some(2));
    assert!(matches!(
        tree.validate(),
        Err(InvariantViolation::OutOfOrder { .. })
    ));

    unsafe { tree.node_swap(four, three) };
    tree.assert_invariants();
}

#[test]
fn node_swap_adjacent() {
    // 3 and 2 are both left-heavy.
    let mut tree = tree_of(&[3, 2, 4, 1]);
    assert_eq!(balance_of(&tree, 3), -1);
    assert_eq!(balance_of(&tree, 2), -1);
    assert_eq!(balance_of(&tree, 4), 0);

    let (three, two) = (node(&tree, 3), node(&tree, 2));
    unsafe { tree.node_swap(three, two) };

    assert_eq!(root_key(&tree), Some(2));
    assert_eq!(children(&tree, 2), (Some(3), Some(4)));
    assert_eq!(children_of(&tree, three), (Some(1), None));
    assert_eq!(key_of(unsafe { tree.parent(node(&tree, 1)) }), Some(3));
    assert_eq!(key_of(unsafe { tree.parent(node(&tree, 4)) }), Some(2));
    assert_eq!(balance_of(&tree, 2), -1);
    assert_eq!(unsafe { tree.balance(three) }, -1);

    // Swapping in the other order restores the tree.
    unsafe { tree.node_swap(two, three) };
    assert_eq!(root_key(&tree), Some(3));
    tree.assert_invariants();
}

#[test]
fn node_swap_siblings() {
    let mut tree = tree_of(&[2, 1, 3]);
    let (one, three) = (node(&tree, 1), node(&tree, 3));

    unsafe { tree.node_swap(one, three) };
    assert_eq!(children(&tree, 2), (Some(3), Some(1)));
    assert_eq!(key_of(unsafe { tree.parent(one) }), Some(2));
    assert_eq!(key_of(unsafe { tree.parent(three) }), Some(2));

    unsafe { tree.node_swap(one, three) };
    tree.assert_invariants();
}

#[test]
fn node_swap_cousins() {
    // Both nodes keep a parent outside the swapped pair.
    let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
    let (one, seven) = (node(&tree, 1), node(&tree, 7));

    unsafe { tree.node_swap(one, seven) };
    assert_eq!(root_key(&tree), Some(4));
    assert_eq!(children(&tree, 2), (Some(7), Some(3)));
    assert_eq!(children(&tree, 6), (Some(5), Some(1)));
    assert_eq!(key_of(unsafe { tree.parent(one) }), Some(6));
    assert_eq!(key_of(unsafe { tree.parent(seven) }), Some(2));

    unsafe { tree.node_swap(seven, one) };
    tree.assert_invariants();
}

#[test]
fn node_swap_with_itself() {
    let mut tree = tree_of(&[3, 2, 4, 1]);
    let before = shape(&tree);

    let two = node(&tree, 2);
    unsafe { tree.node_swap(two, two) };

    assert_eq!(shape(&tree), before);
    tree.assert_invariants();
}

#[test]
fn validate_detects_corruption() {
    let mut tree = tree_of(&[2, 1, 3, 4]);
    assert_eq!(tree.validate(), Ok(()));

    let one = node(&tree, 1);
    unsafe { tree.set_balance(one, 1) };
    assert_eq!(
        tree.validate(),
        Err(InvariantViolation::BalanceMismatch {
            key: "1".into(),
            stored: 1,
            actual: 0,
        })
    );
    unsafe { tree.set_balance(one, 0) };

    unsafe { tree.set_parent(one, None) };
    assert_eq!(
        tree.validate(),
        Err(InvariantViolation::ParentMismatch {
            parent: "2".into(),
            child: "1".into(),
        })
    );
    let two = node(&tree, 2);
    unsafe { tree.set_parent(one, Some(two)) };

    tree.len += 1;
    assert_eq!(
        tree.validate(),
        Err(InvariantViolation::LenMismatch {
            expected: 5,
            found: 4,
        })
    );
    tree.len -= 1;

    tree.assert_invariants();
}

#[test]
#[should_panic(expected = "AVL tree invariant violated")]
fn assert_invariants_panics() {
    let mut tree = tree_of(&[1, 2]);
    let two = node(&tree, 2);
    unsafe { tree.set_balance(two, -1) };
    tree.assert_invariants();
}

#[test]
fn iter_both_ends() {
    let tree = tree_of(&[5, 3, 8, 1, 4, 7, 9, 2, 6]);

    assert_eq!(tree.iter().len(), 9);
    assert_eq!(
        tree.iter().map(|n| n.key).collect::<Vec<_>>(),
        (1..=9).collect::<Vec<_>>()
    );
    assert_eq!(
        tree.iter().rev().map(|n| n.key).collect::<Vec<_>>(),
        (1..=9).rev().collect::<Vec<_>>()
    );

    let mut iter = tree.iter();
    assert_eq!(iter.next().map(|n| n.key), Some(1));
    assert_eq!(iter.next_back().map(|n| n.key), Some(9));
    assert_eq!(iter.len(), 7);
    let middle = iter.by_ref().map(|n| n.key).collect::<Vec<_>>();
    assert_eq!(middle, (2..=8).collect::<Vec<_>>());
    assert!(iter.next().is_none());
    assert!(iter.next_back().is_none());
}

#[test]
fn cursor_walk() {
    let tree = tree_of(&[2, 4, 6, 8]);

    let mut cursor = tree.cursor_at(&4);
    assert_eq!(cursor.get().map(|n| n.key), Some(4));
    assert_eq!(cursor.peek_prev().map(|n| n.key), Some(2));
    assert_eq!(cursor.peek_next().map(|n| n.key), Some(6));

    cursor.move_next();
    cursor.move_next();
    assert_eq!(cursor.get().map(|n| n.key), Some(8));

    // Past the end lies the ghost, then the front again.
    cursor.move_next();
    assert!(cursor.get().is_none());
    assert_eq!(cursor.peek_next().map(|n| n.key), Some(2));
    assert_eq!(cursor.peek_prev().map(|n| n.key), Some(8));
    cursor.move_next();
    assert_eq!(cursor.get().map(|n| n.key), Some(2));

    assert!(tree.cursor_at(&5).get().is_none());
    assert_eq!(tree.cursor_last().get().map(|n| n.key), Some(8));
}

#[test]
fn cursor_remove() {
    init_logging();

    let mut tree = tree_of(&(0..10).collect::<Vec<_>>());

    let mut cursor = tree.cursor_first_mut();
    while let Some(n) = cursor.get().map(|n| n.key) {
        if n % 2 == 0 {
            assert_eq!(cursor.remove_current().map(|n| n.key), Some(n));
        } else {
            cursor.move_next();
        }
        cursor.as_cursor().tree().assert_invariants();
    }

    assert_eq!(
        tree.iter().map(|n| n.key).collect::<Vec<_>>(),
        [1, 3, 5, 7, 9]
    );

    let mut cursor = tree.cursor_last_mut();
    assert_eq!(cursor.remove_current_and_move_prev().map(|n| n.key), Some(9));
    assert_eq!(cursor.get().map(|n| n.key), Some(7));
    model::assert_well_formed(&tree);
}

#[test]
fn clear_and_reuse() {
    let mut tree = tree_of(&(0..100).collect::<Vec<_>>());

    tree.clear();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    assert!(tree.first().is_none());
    tree.assert_invariants();

    tree.insert(TestNode::new(1, 1));
    assert_eq!(tree.len(), 1);
    tree.assert_invariants();
}

#[test]
fn dotgraph_output() {
    let tree = tree_of(&[2, 1, 3]);

    let mut out = String::new();
    tree.dotgraph("t", &mut out).unwrap();

    assert!(out.starts_with("digraph \"graph-t\" {"));
    assert!(out.contains("\"grapht-2\" [label=\"2:0\"];"));
    assert!(out.contains("\"grapht-2\" -> \"grapht-1\";"));
    assert!(out.contains("\"grapht-2\" -> \"grapht-3\";"));
    assert_eq!(out.matches("[shape=point]").count(), 4);
    assert!(out.ends_with(" }\n}"));

    let mut out = String::new();
    AvlTree::<TestNode>::new()
        .dotgraph("empty", &mut out)
        .unwrap();
    assert_eq!(out, "digraph \"graph-empty\" {}");
}

// The same set of unique keys in two independent random orders.
fn two_orders() -> impl Strategy<Value = (Vec<u32>, Vec<u32>)> {
    proptest::collection::btree_set(any::<u32>(), 0..500).prop_flat_map(|set| {
        let keys = set.into_iter().collect::<Vec<_>>();
        (Just(keys.clone()).prop_shuffle(), Just(keys).prop_shuffle())
    })
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
    fn cursor_equivalence(
        values in proptest::collection::vec(0u32..1000, 0..100),
        ops in proptest::collection::vec(model::cursor_op_strategy(), FUZZ_RANGE),
    ) {
        model::run_cursor_equivalence(values, ops);
    }

    /// Inserting any set of keys and then removing all of them keeps the tree within the AVL
    /// height bound throughout and leaves it empty.
    #[test]
    fn insert_then_remove_all(keys in proptest::collection::vec(any::<u32>(), FUZZ_RANGE)) {
        let mut tree: AvlTree<TestNode> = AvlTree::new();
        for &key in &keys {
            tree.insert(TestNode::new(key, key));
        }
        model::assert_well_formed(&tree);

        let mut unique = keys.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(tree.len(), unique.len());

        for key in keys.iter().rev() {
            tree.remove(key);
            model::assert_well_formed(&tree);
        }

        prop_assert_eq!(tree.len(), 0);
        prop_assert!(tree.iter().next().is_none());
    }

    #[test]
    fn unique_keys_round_trip((insertion, removal) in two_orders()) {
        let mut tree: AvlTree<TestNode> = AvlTree::new();
        for &key in &insertion {
            prop_assert!(tree.insert(TestNode::new(key, key)).is_none());
        }
        model::assert_well_formed(&tree);
        prop_assert_eq!(tree.len(), insertion.len());

        for key in &removal {
            let node = tree.remove(key);
            prop_assert_eq!(node.map(|n| n.key), Some(*key));
        }

        model::assert_well_formed(&tree);
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.iter().count(), 0);
    }

    #[test]
    fn overwrite_keeps_shape(
        keys in proptest::collection::vec(0u32..1000, 1..300),
        pick in any::<proptest::sample::Index>(),
        value in any::<u32>(),
    ) {
        let mut tree: AvlTree<TestNode> = AvlTree::new();
        for &key in &keys {
            tree.insert(TestNode::new(key, key));
        }
        let before = shape(&tree);

        let key = *pick.get(&keys);
        let displaced = tree.insert(TestNode::new(key, value));

        prop_assert_eq!(displaced.map(|n| n.key), Some(key));
        prop_assert_eq!(shape(&tree), before);
        prop_assert_eq!(tree.get(&key).map(|n| n.value), Some(value));
        tree.assert_invariants();
    }
}
