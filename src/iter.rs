use core::{iter::FusedIterator, marker::PhantomData};

use crate::{AvlTree, Dir, Link, Linked, Links};

/// An in-order iterator over the elements of an [`AvlTree`].
///
/// Each step follows existing links only, so a full traversal takes _O(n)_ time and no extra
/// space.
pub struct Iter<'tree, T, Tag = ()>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    front: Link<T>,
    back: Link<T>,

    len: usize,
    phantom: PhantomData<&'tree AvlTree<T, Tag>>,
}

impl<'tree, T, Tag> Iter<'tree, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    pub(crate) fn new(tree: &'tree AvlTree<T, Tag>) -> Self {
        Iter {
            front: tree.first_raw(),
            back: tree.last_raw(),

            len: tree.len(),
            phantom: PhantomData,
        }
    }
}

impl<'tree, T, Tag> Iterator for Iter<'tree, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    type Item = &'tree T;

    fn next(&mut self) -> Option<Self::Item> {
        // The two ends meet once every element has been yielded.
        if self.len == 0 {
            return None;
        }

        let cur = self.front?;
        self.len -= 1;

        unsafe {
            self.front = AvlTree::<T, Tag>::step(cur, Dir::Right);
            Some(cur.as_ref())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<'tree, T, Tag> DoubleEndedIterator for Iter<'tree, T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }

        let cur = self.back?;
        self.len -= 1;

        unsafe {
            self.back = AvlTree::<T, Tag>::step(cur, Dir::Left);
            Some(cur.as_ref())
        }
    }
}

impl<T, Tag> ExactSizeIterator for Iter<'_, T, Tag> where T: Linked<Links<T, Tag>> + ?Sized {}

impl<T, Tag> FusedIterator for Iter<'_, T, Tag> where T: Linked<Links<T, Tag>> + ?Sized {}
