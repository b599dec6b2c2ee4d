use core::{marker::PhantomData, pin::Pin, ptr::NonNull};

use crate::{AvlTree, Dir, Link, Linked, Links};

/// A read-only position in an [`AvlTree`].
///
/// Besides the elements themselves, a cursor can rest on a ghost position sitting after the
/// maximum and before the minimum. Stepping past either end lands on the ghost, and stepping off
/// the ghost wraps around to the opposite end.
pub struct Cursor<'tree, T, Tag = ()>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    curs: CursorRaw<T, Tag>,
    phantom: PhantomData<&'tree AvlTree<T, Tag>>,
}

impl<'tree, T, Tag> Cursor<'tree, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    pub(crate) fn first(tree: &'tree AvlTree<T, Tag>) -> Cursor<'tree, T, Tag> {
        Cursor {
            curs: CursorRaw::new(tree.into(), tree.first_raw()),
            phantom: PhantomData,
        }
    }

    pub(crate) fn last(tree: &'tree AvlTree<T, Tag>) -> Cursor<'tree, T, Tag> {
        Cursor {
            curs: CursorRaw::new(tree.into(), tree.last_raw()),
            phantom: PhantomData,
        }
    }

    /// Steps to the in-order successor, or onto the ghost from the maximum.
    pub fn move_next(&mut self) {
        unsafe { self.curs.advance(Dir::Right) }
    }

    /// Steps to the in-order predecessor, or onto the ghost from the minimum.
    pub fn move_prev(&mut self) {
        unsafe { self.curs.advance(Dir::Left) }
    }

    /// The element under the cursor, or `None` on the ghost.
    pub fn get(&self) -> Option<&'tree T> {
        unsafe { self.curs.get() }
    }

    /// The element [`move_next`](Self::move_next) would land on.
    pub fn peek_next(&self) -> Option<&'tree T> {
        unsafe { self.curs.peek(Dir::Right) }
    }

    /// The element [`move_prev`](Self::move_prev) would land on.
    pub fn peek_prev(&self) -> Option<&'tree T> {
        unsafe { self.curs.peek(Dir::Left) }
    }
}

/// A position in an [`AvlTree`] that can also unlink the element under it.
///
/// Movement follows the same rules as [`Cursor`], ghost position included.
pub struct CursorMut<'tree, T, Tag = ()>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    curs: CursorRaw<T, Tag>,
    phantom: PhantomData<&'tree mut AvlTree<T, Tag>>,
}

impl<'tree, T, Tag> CursorMut<'tree, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    pub(crate) fn first(tree: &'tree mut AvlTree<T, Tag>) -> CursorMut<'tree, T, Tag> {
        let first = tree.first_raw();

        CursorMut {
            curs: CursorRaw::new(tree.into(), first),
            phantom: PhantomData,
        }
    }

    pub(crate) fn last(tree: &'tree mut AvlTree<T, Tag>) -> CursorMut<'tree, T, Tag> {
        let last = tree.last_raw();

        CursorMut {
            curs: CursorRaw::new(tree.into(), last),
            phantom: PhantomData,
        }
    }

    /// Borrows a read-only cursor at the same position.
    pub fn as_cursor(&self) -> Cursor<'_, T, Tag> {
        Cursor {
            curs: CursorRaw::new(self.curs.tree, self.curs.ptr),
            phantom: PhantomData,
        }
    }

    pub fn move_next(&mut self) {
        unsafe { self.curs.advance(Dir::Right) }
    }

    pub fn move_prev(&mut self) {
        unsafe { self.curs.advance(Dir::Left) }
    }

    pub fn get(&self) -> Option<&T> {
        unsafe { self.curs.get() }
    }

    /// Pinned mutable access to the element under the cursor.
    ///
    /// Changing the fields the tree's comparators read leaves the tree out of order.
    pub fn get_mut(&mut self) -> Option<Pin<&mut T>> {
        unsafe { self.curs.get_mut() }
    }

    pub fn peek_next(&self) -> Option<&T> {
        unsafe { self.curs.peek(Dir::Right) }
    }

    pub fn peek_prev(&self) -> Option<&T> {
        unsafe { self.curs.peek(Dir::Left) }
    }

    /// Unlinks the element under the cursor and hands it back, leaving the cursor on its
    /// successor.
    ///
    /// On the ghost this returns `None` and changes nothing.
    pub fn remove_current(&mut self) -> Option<T::Handle> {
        unsafe { self.curs.remove_and_advance(Dir::Right) }
    }

    /// Like [`remove_current`](Self::remove_current), but leaves the cursor on the predecessor.
    pub fn remove_current_and_move_prev(&mut self) -> Option<T::Handle> {
        unsafe { self.curs.remove_and_advance(Dir::Left) }
    }
}

// A tree pointer plus a position, where `None` is the ghost.
struct CursorRaw<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    tree: NonNull<AvlTree<T, Tag>>,
    ptr: Link<T>,
}

impl<T, Tag> CursorRaw<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn new(tree: NonNull<AvlTree<T, Tag>>, ptr: Link<T>) -> CursorRaw<T, Tag> {
        CursorRaw { tree, ptr }
    }

    // From the ghost, the neighbor in `dir` is the tree's extreme element at the far end.
    unsafe fn neighbor(&self, dir: Dir) -> Link<T> {
        unsafe {
            match self.ptr {
                Some(p) => AvlTree::<T, Tag>::step(p, dir),
                None => {
                    let root = self.tree.as_ref().root?;
                    Some(AvlTree::<T, Tag>::extreme(root, !dir))
                }
            }
        }
    }

    unsafe fn advance(&mut self, dir: Dir) {
        self.ptr = unsafe { self.neighbor(dir) };
    }

    unsafe fn get<'a>(&self) -> Option<&'a T> {
        self.ptr.map(|p| unsafe { p.as_ref() })
    }

    unsafe fn get_mut<'a>(&mut self) -> Option<Pin<&'a mut T>> {
        self.ptr
            .map(|mut p| unsafe { Pin::new_unchecked(p.as_mut()) })
    }

    unsafe fn peek<'a>(&self, dir: Dir) -> Option<&'a T> {
        unsafe { self.neighbor(dir).map(|p| p.as_ref()) }
    }

    // Moves off the current element in `dir` before unlinking it, so the step still sees its
    // links.
    unsafe fn remove_and_advance(&mut self, dir: Dir) -> Option<T::Handle> {
        let current = self.ptr?;

        unsafe {
            self.advance(dir);
            Some(self.tree.as_mut().remove_node(current))
        }
    }
}
