//! An intrusive AVL tree.
//!
//! Every element embeds a [`Links`] value holding its parent back-link, both child links and a
//! signed balance factor. The balance factor is maintained incrementally while inserting and
//! removing; subtree heights are never recomputed.
//!
//! [`AvlMap`] is an owning ordered map built on top of the intrusive tree.
//#![no_std]

// Conventions used in comments:
// - The height of the subtree rooted at `x` is denoted `h(x)`. An empty subtree has height 0.
// - The balance of a node `x` is `b(x) = h(right(x)) - h(left(x))`.
// - The parent of a node `x` is denoted `p(x)`.
// - For a direction `d`, a node is `d`-heavy if its `d` subtree is the taller one. Growing the
//   `d` subtree changes the balance by `d.sign()`.
//
// The invariants of an AVL tree, at rest, are:
// 1. `b(x) ∈ {-1, 0, 1}` for every node `x`.
// 2. The stored balance of `x` is equal to `h(right(x)) - h(left(x))`.
// 3. Every child links back to its parent; only the root has no parent.
//
// During a fix-up a single node may transiently have a balance of ±2, and a rotation at that
// node restores (1).

extern crate alloc;

use core::{
    borrow::Borrow, cell::UnsafeCell, cmp::Ordering, fmt, marker::PhantomPinned, mem, ops::Not,
    pin::Pin, ptr::NonNull,
};

use cordyceps::Linked;
use log::{debug, trace};

mod cursor;
mod dot;
mod error;
mod iter;
pub mod map;

#[cfg(any(test, feature = "model"))]
pub mod model;

#[cfg(test)]
mod tests;

pub use cursor::{Cursor, CursorMut};
pub use error::InvariantViolation;
pub use iter::Iter;
pub use map::AvlMap;

pub trait TreeNode<L>: Linked<L> {
    type Key: Ord + fmt::Debug;

    fn key(&self) -> &Self::Key;
}

/// An intrusive AVL tree.
///
/// Each node stores its balance factor, `h(right) - h(left)`, in its [`Links`]. Insertion and
/// removal update the balance factors bottom-up from the point of modification and perform at most
/// one single or double rotation per level.
pub struct AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    root: Link<T>,
    len: usize,
}

pub struct Links<T: ?Sized> {
    inner: UnsafeCell<LinksInner<T>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Dir {
    Left = 0,
    Right = 1,
}

impl Dir {
    /// The change in a parent's balance when its subtree in this direction grows by one level.
    #[inline]
    fn sign(self) -> i8 {
        match self {
            Dir::Left => -1,
            Dir::Right => 1,
        }
    }
}

impl Not for Dir {
    type Output = Dir;

    fn not(self) -> Self::Output {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

#[repr(C)]
struct LinksInner<T: ?Sized> {
    parent: Link<T>,
    children: [Link<T>; 2],
    balance: i8,
    _unpin: PhantomPinned,
}

type Link<T> = Option<NonNull<T>>;

// Compares node addresses, ignoring any pointer metadata of unsized `T`.
#[inline]
fn same_node<T: ?Sized>(a: NonNull<T>, b: NonNull<T>) -> bool {
    core::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}

impl<T> AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    /// Returns a new empty tree.
    pub const fn new() -> AvlTree<T> {
        AvlTree { root: None, len: 0 }
    }

    /// Returns `true` if the tree contains no elements.
    pub const fn is_empty(&self) -> bool {
        let empty = self.len() == 0;

        if cfg!(debug_assertions) {
            // Can't use assert_eq!() in const fn.
            assert!(empty == self.root.is_none());
        }

        empty
    }

    /// Returns the number of elements in the tree.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns the number of levels in the tree, or zero if the tree is empty.
    ///
    /// This walks the entire tree and completes in _O(n)_ time.
    pub fn height(&self) -> usize {
        unsafe { self.height_at(self.root) }
    }

    unsafe fn height_at(&self, node: Link<T>) -> usize {
        let Some(node) = node else {
            return 0;
        };

        unsafe {
            let left = self.height_at(self.child(node, Dir::Left));
            let right = self.height_at(self.child(node, Dir::Right));
            1 + left.max(right)
        }
    }

    /// Checks the structural invariants of the tree.
    ///
    /// Verifies that parent links are consistent with child links, that keys are strictly
    /// ascending in order, that every stored balance factor equals the real height difference of
    /// the node's subtrees and lies within `-1..=1`, and that the element count is accurate.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let Some(root) = self.root else {
            return match self.len {
                0 => Ok(()),
                expected => Err(InvariantViolation::LenMismatch { expected, found: 0 }),
            };
        };

        unsafe {
            if self.parent(root).is_some() {
                return Err(InvariantViolation::RootHasParent {
                    key: self.key_string(root),
                });
            }

            let mut prev = None;
            let mut found = 0;
            self.validate_at(root, &mut prev, &mut found)?;

            if found != self.len {
                return Err(InvariantViolation::LenMismatch {
                    expected: self.len,
                    found,
                });
            }
        }

        Ok(())
    }

    /// Panics with a description of the first violated invariant, if any.
    ///
    /// See [`AvlTree::validate`].
    #[track_caller]
    pub fn assert_invariants(&self) {
        if let Err(violation) = self.validate() {
            panic!("AVL tree invariant violated: {violation}");
        }
    }

    // Validates the subtree rooted at `node` with an in-order walk, returning its height.
    unsafe fn validate_at(
        &self,
        node: NonNull<T>,
        prev: &mut Link<T>,
        found: &mut usize,
    ) -> Result<usize, InvariantViolation> {
        let mut heights = [0_usize; 2];

        unsafe {
            for dir in [Dir::Left, Dir::Right] {
                if let Some(child) = self.child(node, dir) {
                    if self.parent(child) != Some(node) {
                        return Err(InvariantViolation::ParentMismatch {
                            parent: self.key_string(node),
                            child: self.key_string(child),
                        });
                    }

                    heights[dir as usize] = self.validate_at(child, prev, found)?;
                }

                if dir == Dir::Left {
                    // The left subtree is exhausted; visit this node.
                    if let Some(p) = *prev {
                        if p.as_ref().key() >= node.as_ref().key() {
                            return Err(InvariantViolation::OutOfOrder {
                                prev: self.key_string(p),
                                next: self.key_string(node),
                            });
                        }
                    }

                    *prev = Some(node);
                    *found += 1;
                }
            }

            let stored = self.balance(node);
            let actual = heights[Dir::Right as usize] as isize - heights[Dir::Left as usize] as isize;

            if stored as isize != actual {
                return Err(InvariantViolation::BalanceMismatch {
                    key: self.key_string(node),
                    stored,
                    actual,
                });
            }

            if !(-1..=1).contains(&stored) {
                return Err(InvariantViolation::Unbalanced {
                    key: self.key_string(node),
                    balance: stored,
                });
            }
        }

        Ok(1 + heights[0].max(heights[1]))
    }

    /// Returns a reference to the node corresponding to `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Pin<&T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_ref())) }
    }

    /// Returns a pinned mutable reference to the node corresponding to `key`.
    ///
    /// The key of the returned node must not be modified in a way that changes its ordering.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<Pin<&mut T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let mut ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_mut())) }
    }

    /// Returns `true` if the tree contains a node corresponding to `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get_raw(key).is_some()
    }

    fn get_raw<Q>(&self, key: &Q) -> Link<T>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let mut opt_cur = self.root;

        loop {
            let cur = opt_cur?;

            unsafe {
                match key.cmp(cur.as_ref().key().borrow()) {
                    Ordering::Less => opt_cur = self.child(cur, Dir::Left),
                    Ordering::Equal => return Some(cur),
                    Ordering::Greater => opt_cur = self.child(cur, Dir::Right),
                }
            }
        }
    }

    /// Returns the minimum element of the tree.
    pub fn first(&self) -> Option<Pin<&T>> {
        self.first_raw()
            .map(|first| unsafe { Pin::new_unchecked(first.as_ref()) })
    }

    /// Returns the maximum element of the tree.
    pub fn last(&self) -> Option<Pin<&T>> {
        self.last_raw()
            .map(|last| unsafe { Pin::new_unchecked(last.as_ref()) })
    }

    pub(crate) fn first_raw(&self) -> Link<T> {
        Some(unsafe { self.extreme_in_subtree(self.root?, Dir::Left) })
    }

    pub(crate) fn last_raw(&self) -> Link<T> {
        Some(unsafe { self.extreme_in_subtree(self.root?, Dir::Right) })
    }

    // Returns the node reached by following `dir` links from `root` until there are none left.
    #[inline]
    unsafe fn extreme_in_subtree(&self, root: NonNull<T>, dir: Dir) -> NonNull<T> {
        let mut cur = root;

        while let Some(next) = unsafe { self.child(cur, dir) } {
            cur = next;
        }

        cur
    }

    /// Returns the in-order predecessor of `node`, if any.
    pub(crate) unsafe fn predecessor_raw(&self, node: NonNull<T>) -> Link<T> {
        unsafe { self.neighbor_raw(node, Dir::Left) }
    }

    /// Returns the in-order successor of `node`, if any.
    pub(crate) unsafe fn successor_raw(&self, node: NonNull<T>) -> Link<T> {
        unsafe { self.neighbor_raw(node, Dir::Right) }
    }

    // Returns the nearest node in direction `dir` in key order.
    unsafe fn neighbor_raw(&self, node: NonNull<T>, dir: Dir) -> Link<T> {
        unsafe {
            // If the subtree on that side is not empty, the neighbor is its innermost node.
            if let Some(subtree) = self.child(node, dir) {
                return Some(self.extreme_in_subtree(subtree, !dir));
            }

            // Otherwise, ascend until arriving from the opposite side.
            let mut cur = node;
            while let Some(parent) = self.parent(cur) {
                if self.which_child(parent, cur) == !dir {
                    return Some(parent);
                }

                cur = parent;
            }

            None
        }
    }

    /// Returns an in-order iterator over the elements of the tree.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self)
    }

    /// Returns a cursor pointing at the minimum element of the tree.
    pub fn cursor_first(&self) -> Cursor<'_, T> {
        Cursor::first(self)
    }

    /// Returns a cursor pointing at the maximum element of the tree.
    pub fn cursor_last(&self) -> Cursor<'_, T> {
        Cursor::last(self)
    }

    /// Returns a cursor pointing at the element corresponding to `key`.
    ///
    /// If there is no such element, the cursor points at the "ghost" non-element.
    pub fn cursor_at<Q>(&self, key: &Q) -> Cursor<'_, T>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        Cursor::at(self, self.get_raw(key))
    }

    /// Returns an editing cursor pointing at the minimum element of the tree.
    pub fn cursor_first_mut(&mut self) -> CursorMut<'_, T> {
        CursorMut::first(self)
    }

    /// Returns an editing cursor pointing at the maximum element of the tree.
    pub fn cursor_last_mut(&mut self) -> CursorMut<'_, T> {
        CursorMut::last(self)
    }

    /// Inserts an item into the tree.
    ///
    /// If the tree already contains an item with an equal key, `item` takes over its position and
    /// balance factor, and the displaced item is returned. The shape of the tree is unchanged in
    /// that case.
    ///
    /// This operation completes in _O(log(n))_ time.
    pub fn insert(&mut self, item: T::Handle) -> Option<T::Handle> {
        let ptr = T::into_ptr(item);

        unsafe {
            T::links(ptr).as_mut().clear();
        }

        let Some(root) = self.root else {
            // Tree is empty. Set `item` as the root and return.
            self.root = Some(ptr);
            self.len += 1;
            return None;
        };

        let mut parent = root;

        // Descend the tree, looking for an equal key or a vacant child slot.
        loop {
            let ordering = unsafe { ptr.as_ref().key().cmp(parent.as_ref().key()) };

            let dir = match ordering {
                Ordering::Less => Dir::Left,
                Ordering::Equal => return Some(unsafe { self.replace_node(parent, ptr) }),
                Ordering::Greater => Dir::Right,
            };

            match unsafe { self.child(parent, dir) } {
                Some(child) => parent = child,
                None => {
                    unsafe { self.insert_as_child(parent, dir, ptr) };
                    return None;
                }
            }
        }
    }

    // Links the detached `node` as the vacant `dir` child of `parent` and restores the balance
    // invariant.
    unsafe fn insert_as_child(&mut self, parent: NonNull<T>, dir: Dir, node: NonNull<T>) {
        unsafe {
            debug_assert!(self.child(parent, dir).is_none());

            self.set_child(parent, dir, Some(node));
            self.set_parent(node, Some(parent));
            self.set_balance(node, 0);
            self.len += 1;

            match self.balance(parent) {
                // `parent` was heavy on the side that was already occupied; the new leaf evens it
                // out and `h(parent)` is unchanged.
                -1 | 1 => self.set_balance(parent, 0),

                // `parent` was a leaf and has grown by one level.
                0 => {
                    self.set_balance(parent, dir.sign());
                    self.insert_fix(parent, node);
                }

                b => unreachable!("balance {b} at rest"),
            }
        }
    }

    // Propagates the growth of `parent`'s subtree towards the root, where `node` is the child of
    // `parent` on the path to the inserted leaf.
    //
    // Invariants on entry:
    // - `h(parent)` has increased by one.
    // - `b(parent) ∈ {-1, 1}`.
    unsafe fn insert_fix(&mut self, mut parent: NonNull<T>, mut node: NonNull<T>) {
        unsafe {
            // While `parent` is not the root, account for its growth in the grandparent.
            while let Some(grandparent) = self.parent(parent) {
                let dir = self.which_child(grandparent, parent);
                self.update_balance(grandparent, dir.sign());

                match self.balance(grandparent) {
                    // The shorter side caught up; `h(grandparent)` is unchanged.
                    0 => return,

                    // `grandparent` grew as well. Ascend one level.
                    -1 | 1 => (parent, node) = (grandparent, parent),

                    // A rotation restores the height `grandparent` had before the insertion, so
                    // nothing above it changes.
                    _ => {
                        self.rebalance_inserted(grandparent, parent, node);
                        return;
                    }
                }
            }
        }
    }

    // Rebalances `g`, which has become doubly heavy towards its child `p` after an insertion below
    // `n`, a child of `p`.
    unsafe fn rebalance_inserted(&mut self, g: NonNull<T>, p: NonNull<T>, n: NonNull<T>) {
        unsafe {
            let heavy = self.which_child(g, p);
            let s = heavy.sign();
            debug_assert_eq!(self.balance(g), 2 * s);

            if self.which_child(p, n) == heavy {
                // Zig-zig: a single rotation lifts `p` above `g`.
                trace!(
                    "insert: single rotation at {:?} towards {:?}",
                    g.as_ref().key(),
                    !heavy
                );

                self.rotate(g, !heavy);
                self.set_balance(p, 0);
                self.set_balance(g, 0);
            } else {
                // Zig-zag: a double rotation lifts `n` above both `p` and `g`.
                trace!(
                    "insert: double rotation at {:?} lifting {:?}",
                    g.as_ref().key(),
                    n.as_ref().key()
                );

                let n_balance = self.balance(n);
                self.rotate(p, heavy);
                self.rotate(g, !heavy);

                let (p_balance, g_balance) = if n_balance == s {
                    (0, -s)
                } else if n_balance == 0 {
                    (0, 0)
                } else {
                    debug_assert_eq!(n_balance, -s);
                    (s, 0)
                };

                self.set_balance(p, p_balance);
                self.set_balance(g, g_balance);
                self.set_balance(n, 0);
            }
        }
    }

    /// Removes the item corresponding to `key` from the tree, if any.
    ///
    /// This operation completes in _O(log(n))_ time.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<T::Handle>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let node = self.get_raw(key)?;
        Some(unsafe { self.remove_at(node) })
    }

    /// Removes and returns the minimum element of the tree.
    pub fn pop_first(&mut self) -> Option<T::Handle> {
        let first = self.first_raw()?;
        Some(unsafe { self.remove_at(first) })
    }

    /// Removes and returns the maximum element of the tree.
    pub fn pop_last(&mut self) -> Option<T::Handle> {
        let last = self.last_raw()?;
        Some(unsafe { self.remove_at(last) })
    }

    /// Removes an arbitrary node from the tree.
    ///
    /// # Safety
    ///
    /// It is the caller's responsibility to ensure that `node` is an element of `self`, and not any
    /// other tree.
    pub unsafe fn remove_at(&mut self, node: NonNull<T>) -> T::Handle {
        unsafe {
            // A node with two children trades places with its in-order predecessor, which has no
            // right child. `node` then has at most one child and can be spliced out directly.
            if self.child(node, Dir::Left).is_some() && self.child(node, Dir::Right).is_some() {
                let predecessor = self
                    .predecessor_raw(node)
                    .expect("a node with a left child has a predecessor");

                trace!(
                    "remove: swapping {:?} with predecessor {:?}",
                    node.as_ref().key(),
                    predecessor.as_ref().key()
                );

                self.node_swap(node, predecessor);
            }

            let child = self
                .child(node, Dir::Left)
                .or_else(|| self.child(node, Dir::Right));

            match self.parent(node) {
                Some(parent) => {
                    // Removing a left child shrinks the left subtree, raising `b(parent)`.
                    let dir = self.which_child(parent, node);
                    self.set_child(parent, dir, child);
                    self.maybe_set_parent(child, Some(parent));
                    self.remove_fix(Some(parent), -dir.sign());
                }

                None => {
                    // The root is removed and its only child (if any) is a balanced leaf, so no
                    // fix-up is necessary.
                    self.root = child;
                    self.maybe_set_parent(child, None);
                }
            }

            T::links(node).as_mut().clear();
            self.len -= 1;

            T::from_ptr(node)
        }
    }

    // Rebalances bottom-up after a subtree of `opt_node` lost one level of height.
    //
    // `diff` is the resulting change to `b(node)`: `1` if the left subtree shrank, `-1` if the
    // right subtree shrank.
    unsafe fn remove_fix(&mut self, mut opt_node: Link<T>, mut diff: i8) {
        unsafe {
            while let Some(node) = opt_node {
                // Note the parent and the change to its balance before any rotation at this level.
                let parent = self.parent(node);
                let next_diff = parent
                    .map(|p| -self.which_child(p, node).sign())
                    .unwrap_or(0);

                // The side that did not shrink.
                let heavy = if diff < 0 { Dir::Left } else { Dir::Right };
                let s = heavy.sign();
                let balance = self.balance(node) + diff;

                if balance == s {
                    // `node` was balanced; `h(node)` is unchanged.
                    self.set_balance(node, s);
                    return;
                }

                if balance == 0 {
                    // The taller side was shortened; `h(node)` decreased.
                    self.set_balance(node, 0);
                } else {
                    debug_assert_eq!(balance, 2 * s);

                    let c = self
                        .child(node, heavy)
                        .expect("the taller subtree of an unbalanced node is not empty");
                    let c_balance = self.balance(c);

                    if c_balance == s {
                        // Zig-zig: `h(node)` decreases after the rotation.
                        trace!(
                            "remove: single rotation at {:?} towards {:?}",
                            node.as_ref().key(),
                            !heavy
                        );

                        self.rotate(node, !heavy);
                        self.set_balance(node, 0);
                        self.set_balance(c, 0);
                    } else if c_balance == 0 {
                        // Zig-zig with an even child: `h(node)` is unchanged after the rotation.
                        trace!(
                            "remove: single rotation at {:?} towards {:?}, height kept",
                            node.as_ref().key(),
                            !heavy
                        );

                        self.rotate(node, !heavy);
                        self.set_balance(node, s);
                        self.set_balance(c, -s);
                        return;
                    } else {
                        // Zig-zag: `h(node)` decreases after the double rotation.
                        let g = self
                            .child(c, !heavy)
                            .expect("a child heavy on the inner side has an inner child");
                        let g_balance = self.balance(g);

                        trace!(
                            "remove: double rotation at {:?} lifting {:?}",
                            node.as_ref().key(),
                            g.as_ref().key()
                        );

                        self.rotate(c, heavy);
                        self.rotate(node, !heavy);

                        let (node_balance, c_balance) = if g_balance == -s {
                            (0, s)
                        } else if g_balance == 0 {
                            (0, 0)
                        } else {
                            debug_assert_eq!(g_balance, s);
                            (-s, 0)
                        };

                        self.set_balance(node, node_balance);
                        self.set_balance(c, c_balance);
                        self.set_balance(g, 0);
                    }
                }

                opt_node = parent;
                diff = next_diff;
            }
        }
    }

    /// Clears the tree, removing all elements.
    ///
    /// No rebalancing is performed; this completes in _O(n)_ time.
    pub fn clear(&mut self) {
        if self.len > 0 {
            debug!("clearing {} nodes", self.len);
        }

        let mut opt_cur = self.root;

        while let Some(cur) = opt_cur {
            unsafe {
                // Descend to the minimum node.
                let cur = self.extreme_in_subtree(cur, Dir::Left);
                let parent = self.parent(cur);
                let right = self.child(cur, Dir::Right);

                // Elevate the node's right child (which may be None).
                self.replace_child_or_set_root(parent, cur, right);
                self.maybe_set_parent(right, parent);

                // Drop the node.
                T::links(cur).as_mut().clear();
                drop(T::from_ptr(cur));
                self.len -= 1;

                // If the node had no right child, climb to the parent. If the node had no parent,
                // the tree is empty.
                opt_cur = right.or(parent);
            }
        }

        debug_assert!(self.root.is_none());
        debug_assert_eq!(self.len(), 0);
    }

    // Rotation primitives =====================================================
    //
    // Rotations only relink nodes. Balance factors are always assigned by the caller.

    /// Left rotate the subtree rooted at `x`, promoting its right child `P`.
    ///
    /// ```text
    ///
    ///      x
    ///     / \                               P
    ///    1   P         Rotate Left        /   \
    ///       / \      --------------->    x     y
    ///      2   y                        / \   / \
    ///         / \                      1   2 3   4
    ///        3   4
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `x` has no right child.
    fn rotate_left(&mut self, x: NonNull<T>) {
        let p = unsafe { self.child(x, Dir::Right) }.expect("rotate_left requires a right child");
        unsafe { self.rotate_at(x, p) };
    }

    /// Right rotate the subtree rooted at `y`, promoting its left child `P`.
    ///
    /// ```text
    ///          y
    ///         / \                           P
    ///        P   4     Rotate Right       /   \
    ///       / \      --------------->    x     y
    ///      x   3                        / \   / \
    ///     / \                          1   2 3   4
    ///    1   2
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `y` has no left child.
    fn rotate_right(&mut self, y: NonNull<T>) {
        let p = unsafe { self.child(y, Dir::Left) }.expect("rotate_right requires a left child");
        unsafe { self.rotate_at(y, p) };
    }

    #[inline]
    fn rotate(&mut self, node: NonNull<T>, dir: Dir) {
        match dir {
            Dir::Left => self.rotate_left(node),
            Dir::Right => self.rotate_right(node),
        }
    }

    // Performs a rotation, moving `up` up and its parent `down` down.
    unsafe fn rotate_at(&mut self, down: NonNull<T>, up: NonNull<T>) {
        unsafe {
            debug_assert_eq!(self.parent(up), Some(down));

            // - `down` becomes the `dir` child of `up`.
            // - `across` goes from the `dir` child of `up` to the `!dir` child of `down`.
            let dir = !self.which_child(down, up);

            let across = self.child(up, dir);
            self.set_child(down, !dir, across);
            self.maybe_set_parent(across, Some(down));

            self.set_child(up, dir, Some(down));
            let parent = self.set_parent(down, Some(up));
            self.set_parent(up, parent);

            self.replace_child_or_set_root(parent, down, Some(up));
        }
    }

    // Node replacement ========================================================

    // Exchanges the positions of `a` and `b` in the tree, along with their balance factors.
    //
    // The balance factor describes a position in the tree rather than the item occupying it, so it
    // stays with the position. `a` and `b` may be adjacent.
    unsafe fn node_swap(&mut self, a: NonNull<T>, b: NonNull<T>) {
        if same_node(a, b) {
            return;
        }

        // Maps a link to one of the swapped nodes onto the other one.
        let swapped = |link: Link<T>| match link {
            Some(n) if same_node(n, a) => Some(b),
            Some(n) if same_node(n, b) => Some(a),
            other => other,
        };

        unsafe {
            let a_parent = self.parent(a);
            let a_children = [self.child(a, Dir::Left), self.child(a, Dir::Right)];
            let a_balance = self.balance(a);

            let b_parent = self.parent(b);
            let b_children = [self.child(b, Dir::Left), self.child(b, Dir::Right)];
            let b_balance = self.balance(b);

            // Resolve the outer parents' child slots before anything is relinked; `a` and `b`
            // might be siblings.
            let a_slot = a_parent
                .filter(|&p| !same_node(p, b))
                .map(|p| (p, self.which_child(p, a)));
            let b_slot = b_parent
                .filter(|&p| !same_node(p, a))
                .map(|p| (p, self.which_child(p, b)));

            self.set_parent(a, swapped(b_parent));
            self.set_parent(b, swapped(a_parent));
            for dir in [Dir::Left, Dir::Right] {
                self.set_child(a, dir, swapped(b_children[dir as usize]));
                self.set_child(b, dir, swapped(a_children[dir as usize]));
            }
            self.set_balance(a, b_balance);
            self.set_balance(b, a_balance);

            // Point the outer children back at their new parents.
            for dir in [Dir::Left, Dir::Right] {
                for node in [a, b] {
                    let outer = self
                        .child(node, dir)
                        .filter(|&c| !same_node(c, a) && !same_node(c, b));

                    if let Some(child) = outer {
                        self.set_parent(child, Some(node));
                    }
                }
            }

            // Point the outer parents (or the root) at the swapped nodes.
            match a_slot {
                Some((p, dir)) => {
                    self.set_child(p, dir, Some(b));
                }
                None if a_parent.is_none() => self.root = Some(b),
                None => {}
            }

            match b_slot {
                Some((p, dir)) => {
                    self.set_child(p, dir, Some(a));
                }
                None if b_parent.is_none() => self.root = Some(a),
                None => {}
            }
        }
    }

    // Puts the detached `new` in the place of `old`, taking over its links and balance.
    unsafe fn replace_node(&mut self, old: NonNull<T>, new: NonNull<T>) -> T::Handle {
        unsafe {
            let parent = self.parent(old);
            let left = self.child(old, Dir::Left);
            let right = self.child(old, Dir::Right);
            let balance = self.balance(old);

            self.replace_child_or_set_root(parent, old, Some(new));
            self.maybe_set_parent(left, Some(new));
            self.maybe_set_parent(right, Some(new));

            self.set_parent(new, parent);
            self.set_child(new, Dir::Left, left);
            self.set_child(new, Dir::Right, right);
            self.set_balance(new, balance);

            T::links(old).as_mut().clear();

            T::from_ptr(old)
        }
    }

    #[inline]
    unsafe fn replace_child_or_set_root(
        &mut self,
        parent: Link<T>,
        old_child: NonNull<T>,
        new_child: Link<T>,
    ) {
        match parent {
            Some(parent) => unsafe { self.replace_child(parent, old_child, new_child) },
            None => self.root = new_child,
        }
    }

    // Replaces the child pointer of `parent` pointing at `old_child` with `new_child`.
    //
    // `new_child`'s parent pointer is not updated.
    //
    // # Safety
    //
    // The caller must ensure that `old_child` is a child node of `parent`.
    #[inline]
    unsafe fn replace_child(
        &mut self,
        parent: NonNull<T>,
        old_child: NonNull<T>,
        new_child: Link<T>,
    ) {
        unsafe {
            let dir = self.which_child(parent, old_child);
            self.set_child(parent, dir, new_child);
        }
    }

    // Support methods =========================================================

    #[inline]
    unsafe fn parent(&self, node: NonNull<T>) -> Link<T> {
        unsafe { T::links(node).as_ref().parent() }
    }

    #[inline]
    unsafe fn child(&self, node: NonNull<T>, dir: Dir) -> Link<T> {
        unsafe { T::links(node).as_ref().child(dir) }
    }

    #[inline]
    unsafe fn balance(&self, node: NonNull<T>) -> i8 {
        unsafe { T::links(node).as_ref().balance() }
    }

    #[inline]
    unsafe fn set_parent(&mut self, node: NonNull<T>, parent: Link<T>) -> Link<T> {
        unsafe { T::links(node).as_mut().set_parent(parent) }
    }

    #[inline]
    unsafe fn maybe_set_parent(&mut self, opt_node: Link<T>, parent: Link<T>) {
        let Some(node) = opt_node else {
            return;
        };

        unsafe { self.set_parent(node, parent) };
    }

    #[inline]
    unsafe fn set_child(&mut self, node: NonNull<T>, dir: Dir, child: Link<T>) -> Link<T> {
        unsafe { T::links(node).as_mut().set_child(dir, child) }
    }

    #[inline]
    unsafe fn set_balance(&mut self, node: NonNull<T>, balance: i8) {
        unsafe { T::links(node).as_mut().set_balance(balance) }
    }

    #[inline]
    unsafe fn update_balance(&mut self, node: NonNull<T>, diff: i8) {
        unsafe {
            let balance = self.balance(node);
            self.set_balance(node, balance + diff);
        }
    }

    // Returns the side of `parent` on which `child` hangs.
    #[inline]
    unsafe fn which_child(&self, parent: NonNull<T>, child: NonNull<T>) -> Dir {
        unsafe {
            if self.child(parent, Dir::Left) == Some(child) {
                Dir::Left
            } else {
                debug_assert_eq!(
                    self.child(parent, Dir::Right),
                    Some(child),
                    "`child` must be a child of `parent`"
                );
                Dir::Right
            }
        }
    }

    unsafe fn key_string(&self, node: NonNull<T>) -> String {
        unsafe { format!("{:?}", node.as_ref().key()) }
    }
}

impl<T> Default for AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AvlTree<T>
where
    T: TreeNode<Links<T>> + fmt::Debug + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Drop for AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: ?Sized> Links<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                parent: None,
                children: [None; 2],
                balance: 0,
                _unpin: PhantomPinned,
            }),
        }
    }

    #[inline]
    fn balance(&self) -> i8 {
        unsafe { (*self.inner.get()).balance }
    }

    #[inline]
    fn parent(&self) -> Link<T> {
        unsafe { (*self.inner.get()).parent }
    }

    #[inline]
    fn child(&self, dir: Dir) -> Link<T> {
        unsafe { (*self.inner.get()).children[dir as usize] }
    }

    #[inline]
    fn left(&self) -> Link<T> {
        self.child(Dir::Left)
    }

    #[inline]
    fn right(&self) -> Link<T> {
        self.child(Dir::Right)
    }

    #[inline]
    fn set_parent(&mut self, parent: Link<T>) -> Link<T> {
        mem::replace(&mut self.inner.get_mut().parent, parent)
    }

    #[inline]
    fn set_child(&mut self, dir: Dir, child: Link<T>) -> Link<T> {
        mem::replace(&mut self.inner.get_mut().children[dir as usize], child)
    }

    #[inline]
    fn set_balance(&mut self, balance: i8) {
        debug_assert!((-2..=2).contains(&balance), "balance {balance} out of range");
        self.inner.get_mut().balance = balance;
    }

    #[inline]
    fn clear(&mut self) {
        let inner = self.inner.get_mut();
        inner.parent = None;
        inner.children = [None; 2];
        inner.balance = 0;
    }
}

impl<T: ?Sized> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("parent", &self.parent())
            .field("left", &self.left())
            .field("right", &self.right())
            .field("balance", &self.balance())
            .finish()
    }
}
