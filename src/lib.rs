//! An intrusive AVL tree.
//!
//! Nodes are caller-owned records embedding a [`Links`] value. The tree never allocates: it takes
//! ownership of a node through its [`Linked::Handle`] on insertion and hands the same handle back
//! on removal. A record may embed several `Links` values, distinguished by a marker `Tag` type, and
//! so be a member of one tree per key dimension at the same time.
//!
//! Keys are never stored by the tree. Every lookup and insertion takes a key and a comparator
//! `Fn(&Q, &T) -> Ordering` describing how that key orders against a node.
//!
//! ```
//! use core::{cmp::Ordering, ptr::{self, NonNull}};
//! use cordyceps_avl::{AvlTree, Linked, Links};
//!
//! struct Item {
//!     links: Links<Item>,
//!     key: u32,
//! }
//!
//! unsafe impl Linked<Links<Item>> for Item {
//!     type Handle = Box<Item>;
//!
//!     fn into_ptr(item: Box<Item>) -> NonNull<Item> {
//!         NonNull::from(Box::leak(item))
//!     }
//!
//!     unsafe fn from_ptr(ptr: NonNull<Item>) -> Box<Item> {
//!         unsafe { Box::from_raw(ptr.as_ptr()) }
//!     }
//!
//!     unsafe fn links(ptr: NonNull<Item>) -> NonNull<Links<Item>> {
//!         unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*ptr.as_ptr()).links)) }
//!     }
//! }
//!
//! fn by_key(key: &u32, item: &Item) -> Ordering {
//!     key.cmp(&item.key)
//! }
//!
//! let mut tree: AvlTree<Item> = AvlTree::new();
//!
//! for key in [3, 1, 2] {
//!     let item = Box::new(Item { links: Links::new(), key });
//!     assert!(tree.try_add(&key, by_key, item).is_ok());
//! }
//!
//! assert_eq!(tree.get(&2, by_key).map(|item| item.key), Some(2));
//! assert_eq!(tree.iter().map(|item| item.key).collect::<Vec<_>>(), [1, 2, 3]);
//!
//! let removed = tree.remove(&1, by_key).unwrap();
//! assert_eq!(removed.key, 1);
//! assert_eq!(tree.len(), 2);
//! ```

// Conventions used in comments:
// - The depth of an empty subtree is 0 and the depth of a leaf is 1.
// - The skew of a node is `depth(right) - depth(left)`.
// - The lean of a node towards a direction `d` is `depth(d child) - depth(!d child)`, i.e. the skew
//   seen from side `d`. Writing the rebalancing code in terms of leans lets each case be written
//   once for both mirror images.
//
// The invariants of the tree are:
// 1. In-order traversal is strictly increasing under the comparator used to build the tree.
// 2. Every node's skew is -1, 0 or 1.
// 3. Every non-root node is a child of its parent, and the root has no parent.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

#[macro_use]
mod trace;

pub mod cursor;
#[cfg(any(test, feature = "alloc"))]
mod debug;
pub mod iter;
#[cfg(any(test, feature = "alloc"))]
pub mod map;
#[cfg(any(test, feature = "model"))]
pub mod model;

#[cfg(test)]
mod tests;

use core::{
    cell::UnsafeCell,
    cmp::Ordering,
    fmt,
    marker::{PhantomData, PhantomPinned},
    mem,
    ops::Not,
    pin::Pin,
    ptr::{self, NonNull},
};

pub use cordyceps::Linked;

use crate::{
    cursor::{Cursor, CursorMut},
    iter::Iter,
};

/// An intrusive AVL tree.
///
/// Besides the root, the tree owns one piece of state: the side from which the most recent
/// two-child removal with equally deep subtrees took its replacement. Successive ties alternate
/// between the in-order predecessor and successor, and each tree tracks its own sequence.
pub struct AvlTree<T, Tag = ()>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    root: Link<T>,
    len: usize,
    tie_break: Dir,
    _tag: PhantomData<fn() -> Tag>,
}

/// The links embedded in each node of an [`AvlTree`].
///
/// `Tag` distinguishes the links of different trees embedded in the same record.
pub struct Links<T: ?Sized, Tag = ()> {
    inner: UnsafeCell<LinksInner<T>>,
    _tag: PhantomData<fn() -> Tag>,
}

#[repr(C)]
struct LinksInner<T: ?Sized> {
    parent: Link<T>,
    children: [Link<T>; 2],
    skew: i8,
    _unpin: PhantomPinned,
}

type Link<T> = Option<NonNull<T>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Dir {
    Left = 0,
    Right = 1,
}

impl Dir {
    /// The skew contributed by growth on this side.
    #[inline]
    const fn sign(self) -> i8 {
        match self {
            Dir::Left => -1,
            Dir::Right => 1,
        }
    }

    /// The deeper side of a node with a nonzero skew.
    #[inline]
    fn heavy(skew: i8) -> Dir {
        debug_assert_ne!(skew, 0);

        if skew < 0 {
            Dir::Left
        } else {
            Dir::Right
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

/// Where a key falls in the tree.
enum Search<T: ?Sized> {
    Empty,
    Found(NonNull<T>),
    Vacant { parent: NonNull<T>, dir: Dir },
}

enum Added<T: ?Sized> {
    Inserted,
    Replaced(NonNull<T>),
    Occupied(NonNull<T>),
}

/// The error returned when adding a node whose key is already present.
///
/// The rejected handle is returned to the caller together with the node that blocked it.
#[derive(thiserror::Error)]
#[error("a node with an equal key is already in the tree")]
pub struct OccupiedError<'tree, T, Tag = ()>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    /// The node already in the tree.
    pub existing: Pin<&'tree T>,
    /// The node that was not added.
    pub item: T::Handle,
}

impl<T, Tag> fmt::Debug for OccupiedError<'_, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OccupiedError")
            .field("existing", &NonNull::from(&*self.existing))
            .finish_non_exhaustive()
    }
}

impl<T, Tag> AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    /// Returns a new empty tree.
    pub const fn new() -> AvlTree<T, Tag> {
        AvlTree {
            root: None,
            len: 0,
            tie_break: Dir::Right,
            _tag: PhantomData,
        }
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

    /// Returns the number of nodes on the longest path from the root to a leaf.
    ///
    /// This follows the skews down the deeper side and completes in _O(log(n))_ time.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut opt_cur = self.root;

        while let Some(cur) = opt_cur {
            height += 1;

            unsafe {
                let links = Self::links(cur);
                opt_cur = if links.skew() > 0 {
                    links.right()
                } else {
                    links.left()
                };
            }
        }

        height
    }

    /// Returns the root node of the tree.
    pub fn root(&self) -> Option<Pin<&T>> {
        self.root
            .map(|root| unsafe { Pin::new_unchecked(root.as_ref()) })
    }

    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.len, 0);
            return;
        };

        unsafe {
            assert_eq!(Self::links(root).parent(), None, "root has a parent");

            let mut count = 0;
            self.assert_invariants_at(root, &mut count);
            assert_eq!(count, self.len);
        }
    }

    // Checks the subtree rooted at `node`, returning its depth.
    #[allow(clippy::only_used_in_recursion)]
    unsafe fn assert_invariants_at(&self, node: NonNull<T>, count: &mut usize) -> i8 {
        *count += 1;

        unsafe {
            let mut depths = [0; 2];

            for dir in [Dir::Left, Dir::Right] {
                if let Some(child) = Self::links(node).child(dir) {
                    // Ensure child's parent link points to this node.
                    let parent = Self::links(child)
                        .parent()
                        .expect("child parent pointer not set");
                    assert!(is_same(Some(parent), node), "child parent pointer is wrong");

                    depths[dir as usize] = self.assert_invariants_at(child, count);
                }
            }

            // Ensure the stored skew matches the actual subtree depths.
            let skew = Self::links(node).skew();
            assert_eq!(skew, depths[1] - depths[0]);
            assert!((-1..=1).contains(&skew), "node is doubly skewed");

            depths[0].max(depths[1]) + 1
        }
    }

    // Search =================================================================

    // Descends from the root towards `key`.
    fn search<Q, F>(&self, key: &Q, cmp: F) -> Search<T>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let Some(mut cur) = self.root else {
            return Search::Empty;
        };

        loop {
            let dir = match cmp(key, unsafe { cur.as_ref() }) {
                Ordering::Less => Dir::Left,
                Ordering::Equal => return Search::Found(cur),
                Ordering::Greater => Dir::Right,
            };

            match unsafe { Self::links(cur).child(dir) } {
                Some(child) => cur = child,
                None => return Search::Vacant { parent: cur, dir },
            }
        }
    }

    fn get_raw<Q, F>(&self, key: &Q, cmp: F) -> Link<T>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        match self.search(key, cmp) {
            Search::Found(node) => Some(node),
            Search::Empty | Search::Vacant { .. } => None,
        }
    }

    /// Returns a reference to the node matching `key`.
    ///
    /// This operation completes in _O(log(n))_ time.
    pub fn get<Q, F>(&self, key: &Q, cmp: F) -> Option<Pin<&T>>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let ptr = self.get_raw(key, cmp)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_ref())) }
    }

    /// Returns a pinned mutable reference to the node matching `key`.
    ///
    /// Modifying the node in a way that changes how it compares against other keys leaves the
    /// tree unordered; lookups may then fail to find nodes.
    pub fn get_mut<Q, F>(&mut self, key: &Q, cmp: F) -> Option<Pin<&mut T>>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let mut ptr = self.get_raw(key, cmp)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_mut())) }
    }

    /// Returns `true` if the tree contains a node matching `key`.
    pub fn contains<Q, F>(&self, key: &Q, cmp: F) -> bool
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        self.get_raw(key, cmp).is_some()
    }

    // Traversal ==============================================================

    #[inline]
    fn first_raw(&self) -> Link<T> {
        self.root.map(|root| unsafe { Self::extreme(root, Dir::Left) })
    }

    #[inline]
    fn last_raw(&self) -> Link<T> {
        self.root.map(|root| unsafe { Self::extreme(root, Dir::Right) })
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

    /// Returns the element following `node` in order.
    ///
    /// # Safety
    ///
    /// `node` must be an element of `self`.
    pub unsafe fn next(&self, node: &T) -> Option<Pin<&T>> {
        unsafe {
            Self::step(NonNull::from(node), Dir::Right).map(|next| Pin::new_unchecked(next.as_ref()))
        }
    }

    /// Returns the element preceding `node` in order.
    ///
    /// # Safety
    ///
    /// `node` must be an element of `self`.
    pub unsafe fn prev(&self, node: &T) -> Option<Pin<&T>> {
        unsafe {
            Self::step(NonNull::from(node), Dir::Left).map(|prev| Pin::new_unchecked(prev.as_ref()))
        }
    }

    // Returns the in-order neighbor of `node` in direction `dir`.
    //
    // Either the nearest node of the `dir` subtree, or the first ancestor reached from its `!dir`
    // side.
    unsafe fn step(node: NonNull<T>, dir: Dir) -> Link<T> {
        unsafe {
            if let Some(child) = Self::links(node).child(dir) {
                return Some(Self::extreme(child, !dir));
            }

            let mut cur = node;
            while let Some((parent, side)) = Self::position(cur) {
                if side == !dir {
                    return Some(parent);
                }

                cur = parent;
            }

            None
        }
    }

    // Returns the outermost node in direction `dir` of the subtree rooted at `root`.
    #[inline]
    unsafe fn extreme(root: NonNull<T>, dir: Dir) -> NonNull<T> {
        let mut cur = root;

        while let Some(child) = unsafe { Self::links(cur).child(dir) } {
            cur = child;
        }

        cur
    }

    /// Returns an iterator over the elements of the tree, in order.
    pub fn iter(&self) -> Iter<'_, T, Tag> {
        Iter::new(self)
    }

    /// Returns a cursor pointing at the first element of the tree.
    ///
    /// If the tree is empty, the cursor points at the "ghost" non-element.
    pub fn cursor_first(&self) -> Cursor<'_, T, Tag> {
        Cursor::first(self)
    }

    /// Returns a cursor pointing at the last element of the tree.
    ///
    /// If the tree is empty, the cursor points at the "ghost" non-element.
    pub fn cursor_last(&self) -> Cursor<'_, T, Tag> {
        Cursor::last(self)
    }

    /// Returns a mutable cursor pointing at the first element of the tree.
    ///
    /// If the tree is empty, the cursor points at the "ghost" non-element.
    pub fn cursor_first_mut(&mut self) -> CursorMut<'_, T, Tag> {
        CursorMut::first(self)
    }

    /// Returns a mutable cursor pointing at the last element of the tree.
    ///
    /// If the tree is empty, the cursor points at the "ghost" non-element.
    pub fn cursor_last_mut(&mut self) -> CursorMut<'_, T, Tag> {
        CursorMut::last(self)
    }

    // Insertion ==============================================================

    /// Adds `item` to the tree under `key`.
    ///
    /// If no node matches `key`, `item` is inserted and `Ok(None)` is returned. Otherwise, if
    /// `replace` is set, `item` takes the matching node's place and the displaced node is returned
    /// as `Ok(Some(_))`; if it is not, the tree is left unchanged and `item` is handed back in the
    /// error along with the matching node.
    ///
    /// `key` must compare equal to `item` under `cmp`. This operation completes in _O(log(n))_
    /// time.
    pub fn add<Q, F>(
        &mut self,
        key: &Q,
        cmp: F,
        item: T::Handle,
        replace: bool,
    ) -> Result<Option<T::Handle>, OccupiedError<'_, T, Tag>>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let search = self.search(key, cmp);
        let ptr = T::into_ptr(item);

        unsafe {
            match self.attach(search, ptr, replace) {
                Added::Inserted => Ok(None),
                Added::Replaced(old) => Ok(Some(T::from_ptr(old))),
                Added::Occupied(existing) => Err(OccupiedError {
                    existing: Pin::new_unchecked(existing.as_ref()),
                    item: T::from_ptr(ptr),
                }),
            }
        }
    }

    /// Adds `item` to the tree under `key` unless a matching node is already present.
    ///
    /// On conflict the tree is unchanged and the error holds the existing node and `item`.
    pub fn try_add<Q, F>(
        &mut self,
        key: &Q,
        cmp: F,
        item: T::Handle,
    ) -> Result<(), OccupiedError<'_, T, Tag>>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        self.add(key, cmp, item, false).map(|_| ())
    }

    /// Adds `item` to the tree under `key`, replacing and returning any matching node.
    pub fn force_add<Q, F>(&mut self, key: &Q, cmp: F, item: T::Handle) -> Option<T::Handle>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let search = self.search(key, cmp);
        let ptr = T::into_ptr(item);

        unsafe {
            match self.attach(search, ptr, true) {
                Added::Inserted => None,
                Added::Replaced(old) => Some(T::from_ptr(old)),
                Added::Occupied(_) => unreachable!("a forced add never keeps the existing node"),
            }
        }
    }

    /// Inserts `item`, using the item itself as the key, and returns any node it replaced.
    ///
    /// `cmp` compares the new item against nodes in the tree.
    pub fn insert<F>(&mut self, item: T::Handle, cmp: F) -> Option<T::Handle>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let ptr = T::into_ptr(item);
        let search = self.search(unsafe { ptr.as_ref() }, cmp);

        unsafe {
            match self.attach(search, ptr, true) {
                Added::Inserted => None,
                Added::Replaced(old) => Some(T::from_ptr(old)),
                Added::Occupied(_) => unreachable!("a forced add never keeps the existing node"),
            }
        }
    }

    /// Inserts `item`, using the item itself as the key, unless an equal node is present.
    pub fn try_insert<F>(&mut self, item: T::Handle, cmp: F) -> Result<(), OccupiedError<'_, T, Tag>>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let ptr = T::into_ptr(item);
        let search = self.search(unsafe { ptr.as_ref() }, cmp);

        unsafe {
            match self.attach(search, ptr, false) {
                Added::Inserted => Ok(()),
                Added::Occupied(existing) => Err(OccupiedError {
                    existing: Pin::new_unchecked(existing.as_ref()),
                    item: T::from_ptr(ptr),
                }),
                Added::Replaced(_) => unreachable!("an unforced add never replaces a node"),
            }
        }
    }

    // Links `ptr` into the position found by `search`.
    unsafe fn attach(&mut self, search: Search<T>, ptr: NonNull<T>, replace: bool) -> Added<T> {
        unsafe {
            Self::links_mut(ptr).clear();

            match search {
                Search::Empty => {
                    // Tree is empty. Set `ptr` as the root and return.
                    self.root = Some(ptr);
                    self.len += 1;
                    Added::Inserted
                }

                Search::Found(existing) if replace => {
                    self.transplant(existing, ptr);
                    Self::links_mut(existing).clear();
                    Added::Replaced(existing)
                }

                Search::Found(existing) => Added::Occupied(existing),

                Search::Vacant { parent, dir } => {
                    Self::links_mut(parent).set_child(dir, Some(ptr));
                    Self::links_mut(ptr).set_parent(Some(parent));

                    self.rebalance_inserted(parent, dir);
                    self.len += 1;
                    Added::Inserted
                }
            }
        }
    }

    // Performs a bottom-up rebalance of the tree after the `dir` subtree of `node` grew by one.
    unsafe fn rebalance_inserted(&mut self, mut node: NonNull<T>, mut dir: Dir) {
        unsafe {
            loop {
                let skew = Self::links(node).skew() + dir.sign();
                Self::links_mut(node).set_skew(skew);

                match skew {
                    // The shallower side caught up; the subtree depth is unchanged.
                    0 => return,

                    // The subtree grew by one. Ascend.
                    -1 | 1 => match Self::position(node) {
                        Some((parent, side)) => {
                            node = parent;
                            dir = side;
                        }
                        None => return,
                    },

                    // A rotation always restores the depth the subtree had before insertion.
                    _ => {
                        let growth = 1 + self.rotate_heavy(node, Dir::heavy(skew));
                        debug_assert_eq!(growth, 0);
                        return;
                    }
                }
            }
        }
    }

    // Removal ================================================================

    /// Removes the node matching `key` and returns it.
    ///
    /// This operation completes in _O(log(n))_ time.
    pub fn remove<Q, F>(&mut self, key: &Q, cmp: F) -> Option<T::Handle>
    where
        Q: ?Sized,
        F: Fn(&Q, &T) -> Ordering,
    {
        let node = self.get_raw(key, cmp)?;
        unsafe { Some(self.remove_node(node)) }
    }

    /// Removes and returns the minimum element of the tree.
    pub fn pop_first(&mut self) -> Option<T::Handle> {
        let first = self.first_raw()?;
        unsafe { Some(self.remove_node(first)) }
    }

    /// Removes and returns the maximum element of the tree.
    pub fn pop_last(&mut self) -> Option<T::Handle> {
        let last = self.last_raw()?;
        unsafe { Some(self.remove_node(last)) }
    }

    /// Removes an arbitrary node from the tree.
    ///
    /// The removed node's links are cleared before it is returned.
    ///
    /// # Safety
    ///
    /// It is the caller's responsibility to ensure that `node` is an element of `self`, and not any
    /// other tree.
    pub unsafe fn remove_node(&mut self, node: NonNull<T>) -> T::Handle {
        unsafe {
            let (left, right) = {
                let links = Self::links(node);
                (links.left(), links.right())
            };

            match (left, right) {
                (Some(_), Some(_)) => self.remove_complex(node),
                (left, right) => self.remove_simple(node, left.or(right)),
            }

            Self::links_mut(node).clear();
            self.len -= 1;

            T::from_ptr(node)
        }
    }

    // Removes `node`, which has at most one child, elevating that child into its place.
    unsafe fn remove_simple(&mut self, node: NonNull<T>, child: Link<T>) {
        unsafe {
            let position = Self::position(node);
            let parent = position.map(|(parent, _)| parent);

            Self::maybe_set_parent(child, parent);
            self.replace_child_or_set_root(parent, node, child);

            if let Some((parent, dir)) = position {
                self.rebalance_removed(parent, dir);
            }
        }
    }

    // Removes `node`, which has two children, substituting its in-order neighbor from the deeper
    // subtree.
    unsafe fn remove_complex(&mut self, node: NonNull<T>) {
        unsafe {
            let side = match Self::links(node).skew() {
                0 => {
                    self.tie_break = !self.tie_break;
                    self.tie_break
                }
                skew => Dir::heavy(skew),
            };

            trace_log!(side = ?side, "taking replacement for two-child removal");

            let Some(top) = Self::links(node).child(side) else {
                unreachable!("two-child node is missing a child");
            };

            // The replacement has no `!side` child. Its `side` child, if any, takes its place.
            let replacement = Self::extreme(top, !side);
            let Some((repl_parent, repl_dir)) = Self::position(replacement) else {
                unreachable!("replacement has no parent");
            };

            let orphan = Self::links(replacement).child(side);
            Self::links_mut(repl_parent).set_child(repl_dir, orphan);
            Self::maybe_set_parent(orphan, Some(repl_parent));

            // If the replacement was a child of `node`, the shrunken subtree hangs directly off the
            // replacement once it has taken `node`'s place.
            let (start, dir) = if is_same(Some(repl_parent), node) {
                (replacement, side)
            } else {
                (repl_parent, repl_dir)
            };

            self.transplant(node, replacement);
            self.rebalance_removed(start, dir);
        }
    }

    // Performs a bottom-up rebalance of the tree after the `dir` subtree of `node` shrank by one.
    unsafe fn rebalance_removed(&mut self, mut node: NonNull<T>, mut dir: Dir) {
        unsafe {
            loop {
                let skew = Self::links(node).skew() - dir.sign();
                Self::links_mut(node).set_skew(skew);

                // The deeper side was untouched; the subtree depth is unchanged.
                if skew == -1 || skew == 1 {
                    return;
                }

                let position = Self::position(node);

                // Unlike insertion, a rotation may leave the subtree shallower than before the
                // removal, in which case the shrinkage propagates.
                if skew != 0 && self.rotate_heavy(node, Dir::heavy(skew)) == 0 {
                    return;
                }

                match position {
                    Some((parent, side)) => {
                        node = parent;
                        dir = side;
                    }
                    None => return,
                }
            }
        }
    }

    // Rotations ==============================================================

    // Rebalances the doubly-skewed `node`, whose `heavy` subtree is two deeper than the other.
    //
    // Returns the change in depth of the subtree.
    unsafe fn rotate_heavy(&mut self, node: NonNull<T>, heavy: Dir) -> i8 {
        unsafe {
            let Some(child) = Self::links(node).child(heavy) else {
                unreachable!("doubly skewed node has no child on its heavy side");
            };

            if Self::links(child).lean(heavy) >= 0 {
                // Zig-zig: a single rotation.
                return self.promote(node, child, heavy);
            }

            // Zig-zag: lift the grandchild above the child, then above the node.
            let Some(grandchild) = Self::links(child).child(!heavy) else {
                unreachable!("child leaning away from its parent has no inner child");
            };

            let inner = self.promote(child, grandchild, !heavy);
            debug_assert_eq!(inner, 0);

            inner + self.promote(node, grandchild, heavy)
        }
    }

    // Rotates `up`, the `dir` child of `down`, into `down`'s position.
    //
    // `down` takes `up`'s `!dir` subtree as its `dir` subtree. Only the skews of `up` and `down`
    // change; they are derived from relative depths, measured from the subtree that changes hands.
    //
    // Returns the change in depth of the rotated subtree.
    unsafe fn promote(&mut self, down: NonNull<T>, up: NonNull<T>, dir: Dir) -> i8 {
        unsafe {
            let across = Self::links(up).child(!dir);

            let across_depth = 0;
            let up_depth = Self::links(up).depth_from_child(!dir, across_depth);
            let up_outer_depth = Self::links(up).depth_of_child(dir, up_depth);
            let down_depth = Self::links(down).depth_from_child(dir, up_depth);
            let down_outer_depth = Self::links(down).depth_of_child(!dir, down_depth);

            let parent = Self::links(down).parent();
            self.replace_child_or_set_root(parent, down, Some(up));
            Self::links_mut(up).set_parent(parent);
            Self::links_mut(up).set_child(!dir, Some(down));

            Self::links_mut(down).set_parent(Some(up));
            Self::links_mut(down).set_child(dir, across);
            Self::maybe_set_parent(across, Some(down));

            let down_links = Self::links_mut(down);
            down_links.set_lean(!dir, down_outer_depth - across_depth);
            let new_down_depth = down_links.depth_from_child(!dir, down_outer_depth);

            let up_links = Self::links_mut(up);
            up_links.set_lean(!dir, new_down_depth - up_outer_depth);
            let new_up_depth = up_links.depth_from_child(dir, up_outer_depth);

            trace_log!(
                dir = ?dir,
                delta = new_up_depth - down_depth,
                "promoted node"
            );

            new_up_depth - down_depth
        }
    }

    // Teardown ===============================================================

    /// Removes every element of the tree, passing each to `destroy`.
    ///
    /// Nodes are visited in post-order: each is unlinked and handed to `destroy` once both of its
    /// subtrees are gone. No auxiliary storage is used. `destroy` is not called if the tree is
    /// empty.
    pub fn free_all<F>(&mut self, mut destroy: F)
    where
        F: FnMut(T::Handle),
    {
        if self.root.is_some() {
            debug_log!(len = self.len, "freeing all nodes");
        }

        let mut opt_cur = self.root;

        while let Some(cur) = opt_cur {
            unsafe {
                let (left, right, parent) = {
                    let links = Self::links(cur);
                    (links.left(), links.right(), links.parent())
                };

                // Descend while there are children left to visit.
                if let Some(child) = left.or(right) {
                    opt_cur = Some(child);
                    continue;
                }

                self.replace_child_or_set_root(parent, cur, None);
                Self::links_mut(cur).clear();
                self.len -= 1;

                destroy(T::from_ptr(cur));

                opt_cur = parent;
            }
        }

        debug_assert!(self.root.is_none());
        debug_assert_eq!(self.len(), 0);
    }

    /// Clears the tree, dropping all elements.
    pub fn clear(&mut self) {
        self.free_all(drop);
    }

    // Support methods ========================================================

    #[inline]
    unsafe fn links<'a>(node: NonNull<T>) -> &'a Links<T, Tag> {
        unsafe { T::links(node).as_ref() }
    }

    #[inline]
    unsafe fn links_mut<'a>(node: NonNull<T>) -> &'a mut Links<T, Tag> {
        unsafe { T::links(node).as_mut() }
    }

    #[inline]
    unsafe fn maybe_set_parent(opt_node: Link<T>, parent: Link<T>) {
        let Some(node) = opt_node else {
            return;
        };

        unsafe { Self::links_mut(node).set_parent(parent) };
    }

    // Returns `node`'s parent and the side of the parent it hangs from, or `None` for the root.
    #[inline]
    unsafe fn position(node: NonNull<T>) -> Option<(NonNull<T>, Dir)> {
        unsafe {
            let parent = Self::links(node).parent()?;
            Some((parent, Self::which_child(parent, node)))
        }
    }

    unsafe fn which_child(parent: NonNull<T>, child: NonNull<T>) -> Dir {
        let links = unsafe { Self::links(parent) };

        if is_same(links.left(), child) {
            Dir::Left
        } else {
            assert!(
                is_same(links.right(), child),
                "node is not a child of its parent"
            );
            Dir::Right
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
            Some(parent) => unsafe {
                let dir = Self::which_child(parent, old_child);
                Self::links_mut(parent).set_child(dir, new_child);
            },
            None => self.root = new_child,
        }
    }

    // Moves `new` into `old`'s exact position, taking over its parent, children and skew.
    //
    // `old`'s own links are left untouched.
    unsafe fn transplant(&mut self, old: NonNull<T>, new: NonNull<T>) {
        unsafe {
            let (parent, left, right, skew) = {
                let links = Self::links(old);
                (links.parent(), links.left(), links.right(), links.skew())
            };

            self.replace_child_or_set_root(parent, old, Some(new));

            let new_links = Self::links_mut(new);
            new_links.set_parent(parent);
            new_links.set_left(left);
            new_links.set_right(right);
            new_links.set_skew(skew);

            Self::maybe_set_parent(left, Some(new));
            Self::maybe_set_parent(right, Some(new));
        }
    }
}

// Compares node addresses only, ignoring any pointer metadata of unsized nodes.
#[inline]
fn is_same<T: ?Sized>(link: Link<T>, node: NonNull<T>) -> bool {
    link.is_some_and(|link| ptr::addr_eq(link.as_ptr(), node.as_ptr()))
}

impl<T, Tag> Default for AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Tag> Drop for AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, Tag> fmt::Debug for AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvlTree")
            .field("root", &self.root)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<'tree, T, Tag> IntoIterator for &'tree AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    type Item = &'tree T;
    type IntoIter = Iter<'tree, T, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: ?Sized, Tag> Links<T, Tag> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                parent: None,
                children: [None; 2],
                skew: 0,
                _unpin: PhantomPinned,
            }),
            _tag: PhantomData,
        }
    }

    #[inline]
    fn skew(&self) -> i8 {
        unsafe { (*self.inner.get()).skew }
    }

    // The skew seen from side `dir`: positive when the `dir` subtree is the deeper one.
    #[inline]
    fn lean(&self, dir: Dir) -> i8 {
        self.skew() * dir.sign()
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

    // Depth of this node's subtree, given the depth of its `dir` subtree.
    #[inline]
    fn depth_from_child(&self, dir: Dir, child_depth: i8) -> i8 {
        child_depth + 1 + (-self.lean(dir)).max(0)
    }

    // Depth of this node's `dir` subtree, given the depth of this node's subtree.
    #[inline]
    fn depth_of_child(&self, dir: Dir, depth: i8) -> i8 {
        depth - 1 - (-self.lean(dir)).max(0)
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
    fn set_left(&mut self, left: Link<T>) -> Link<T> {
        self.set_child(Dir::Left, left)
    }

    #[inline]
    fn set_right(&mut self, right: Link<T>) -> Link<T> {
        self.set_child(Dir::Right, right)
    }

    #[inline]
    fn set_skew(&mut self, skew: i8) {
        self.inner.get_mut().skew = skew;
    }

    #[inline]
    fn set_lean(&mut self, dir: Dir, lean: i8) {
        self.set_skew(lean * dir.sign());
    }

    // Returns `true` if no link is set and the skew is neutral, as for a detached node.
    #[cfg(any(test, feature = "model"))]
    pub(crate) fn is_clear(&self) -> bool {
        self.parent().is_none() && self.left().is_none() && self.right().is_none() && self.skew() == 0
    }

    // Returns the links to the detached state.
    #[inline]
    fn clear(&mut self) {
        let inner = self.inner.get_mut();
        inner.parent = None;
        inner.children = [None; 2];
        inner.skew = 0;
    }
}

impl<T: ?Sized, Tag> Default for Links<T, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized, Tag> fmt::Debug for Links<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("parent", &self.parent())
            .field("left", &self.left())
            .field("right", &self.right())
            .field("skew", &self.skew())
            .finish()
    }
}
