//! Intrusive doubly-linked circular list with a sentinel header node
//! (spec component B).
//!
//! Every list is a ring: the header's `next`/`prev` point at the first and
//! last real entries, and an empty list is a ring of one (the header
//! pointing at itself). Embedding the links inside the owning struct means
//! insertion, removal, and re-insertion anywhere in the ring are O(1) and
//! allocation-free -- the run queue, sleep queue, and per-task wait lists
//! are all built on this.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

/// Links embedded in a node. `Link::new` starts self-linked so a freshly
/// constructed node is a valid (if unlinked) one-element ring on its own.
pub struct Link {
    next: UnsafeCell<Option<NonNull<Link>>>,
    prev: UnsafeCell<Option<NonNull<Link>>>,
}

// SAFETY: all access to the raw pointers inside `Link` happens through
// `List`'s methods, which the caller is required to serialize externally
// (typically behind the same spinlock protecting the list as a whole, per
// spec component B's contract).
unsafe impl Send for Link {}
unsafe impl Sync for Link {}

impl Link {
    pub const fn new() -> Self {
        Link {
            next: UnsafeCell::new(None),
            prev: UnsafeCell::new(None),
        }
    }

    fn is_linked(&self) -> bool {
        // SAFETY: read-only peek; caller holds whatever lock protects the list.
        unsafe { (*self.next.get()).is_some() }
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// An intrusive circular list over nodes of type `T`, each of which embeds
/// a `Link` accessible via `link_of`. The list itself owns nothing -- it
/// only threads pointers through caller-owned nodes, so there is no heap
/// allocation anywhere in insert/remove.
pub struct List<T> {
    head: Link,
    link_of: fn(NonNull<T>) -> NonNull<Link>,
    node_of: unsafe fn(NonNull<Link>) -> NonNull<T>,
}

impl<T> List<T> {
    /// `link_of`/`node_of` convert between a node pointer and the `Link`
    /// embedded in it; callers typically provide these via
    /// `core::ptr::addr_of_mut!` field projection.
    pub const fn new(
        link_of: fn(NonNull<T>) -> NonNull<Link>,
        node_of: unsafe fn(NonNull<Link>) -> NonNull<T>,
    ) -> Self {
        List {
            head: Link::new(),
            link_of,
            node_of,
        }
    }

    fn init_head_if_needed(&self) {
        // SAFETY: the header's own links are only ever read/written through
        // this list's methods, serialized by the caller's lock.
        unsafe {
            if (*self.head.next.get()).is_none() {
                let h = NonNull::from(&self.head);
                *self.head.next.get() = Some(h);
                *self.head.prev.get() = Some(h);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.init_head_if_needed();
        // SAFETY: read-only, serialized by caller's lock.
        unsafe { (*self.head.next.get()) == Some(NonNull::from(&self.head)) }
    }

    /// Insert `node` at the tail (just before the header). O(1).
    pub fn push_back(&self, node: NonNull<T>) {
        self.init_head_if_needed();
        let link = (self.link_of)(node);
        debug_assert!(
            // SAFETY: reading the candidate node's own link state only.
            !unsafe { (*link.as_ptr()).is_linked() },
            "node already linked"
        );

        // SAFETY: header is initialized above; `tail` is therefore a valid
        // Link pointer (either the header itself or a linked node).
        unsafe {
            let head = NonNull::from(&self.head);
            let tail = (*head.as_ptr()).prev.get().read().unwrap_or(head);

            let link_ptr = link.as_ptr();
            *(*link_ptr).next.get() = Some(head);
            *(*link_ptr).prev.get() = Some(tail);
            *(*tail.as_ptr()).next.get() = Some(link);
            *(*head.as_ptr()).prev.get() = Some(link);
        }
    }

    /// Remove the head of the list (first real entry), if any. O(1).
    pub fn pop_front(&self) -> Option<NonNull<T>> {
        self.init_head_if_needed();
        // SAFETY: serialized by caller's lock; head/first are consistent.
        unsafe {
            let head = NonNull::from(&self.head);
            let first = (*head.as_ptr()).next.get().read()?;
            if first == head {
                return None;
            }
            self.unlink_link(first);
            Some((self.node_of)(first))
        }
    }

    /// Remove `node` from wherever it currently sits in the ring. O(1).
    /// No-op if the node is not linked.
    pub fn remove(&self, node: NonNull<T>) {
        let link = (self.link_of)(node);
        // SAFETY: caller guarantees `node` belongs to this list or is
        // unlinked; unlink_link is a no-op-safe pointer dance either way
        // as long as the link was produced by this list's insert methods.
        unsafe {
            if (*link.as_ptr()).is_linked() {
                self.unlink_link(link);
            }
        }
    }

    /// # Safety
    /// `link` must currently be linked into this ring.
    unsafe fn unlink_link(&self, link: NonNull<Link>) {
        // SAFETY: delegated to caller.
        unsafe {
            let prev = (*link.as_ptr()).prev.get().read().expect("linked node has prev");
            let next = (*link.as_ptr()).next.get().read().expect("linked node has next");
            *(*prev.as_ptr()).next.get() = Some(next);
            *(*next.as_ptr()).prev.get() = Some(prev);
            *(*link.as_ptr()).next.get() = None;
            *(*link.as_ptr()).prev.get() = None;
        }
    }

    /// Iterate the ring front to back. The caller must hold whatever lock
    /// serializes mutation of this list for the duration of the iterator.
    pub fn iter(&self) -> Iter<'_, T> {
        self.init_head_if_needed();
        Iter {
            list: self,
            // SAFETY: header just initialized above.
            cur: unsafe { (*self.head.next.get()).unwrap() },
            head: NonNull::from(&self.head),
        }
    }
}

pub struct Iter<'a, T> {
    list: &'a List<T>,
    cur: NonNull<Link>,
    head: NonNull<Link>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<NonNull<T>> {
        if self.cur == self.head {
            return None;
        }
        let node = (self.list.node_of)(self.cur);
        // SAFETY: `cur` is a linked node in this ring; its `next` is valid.
        self.cur = unsafe { (*self.cur.as_ptr()).next.get().read().unwrap() };
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::addr_of_mut;

    struct Entry {
        value: u32,
        link: Link,
    }

    fn link_of(mut p: NonNull<Entry>) -> NonNull<Link> {
        // SAFETY: `p` points at a valid Entry for the duration of this call.
        unsafe { NonNull::new(addr_of_mut!((*p.as_mut()).link)).unwrap() }
    }

    unsafe fn node_of(link: NonNull<Link>) -> NonNull<Entry> {
        let offset = core::mem::offset_of!(Entry, link);
        // SAFETY: `link` was produced by `link_of` above on a real Entry.
        unsafe { NonNull::new_unchecked(link.as_ptr().cast::<u8>().sub(offset).cast::<Entry>()) }
    }

    #[test]
    fn push_and_pop_preserves_order() {
        let list: List<Entry> = List::new(link_of, node_of);
        let mut a = Entry { value: 1, link: Link::new() };
        let mut b = Entry { value: 2, link: Link::new() };
        let mut c = Entry { value: 3, link: Link::new() };

        list.push_back(NonNull::from(&mut a));
        list.push_back(NonNull::from(&mut b));
        list.push_back(NonNull::from(&mut c));

        let values: alloc::vec::Vec<u32> = list.iter().map(|p| unsafe { p.as_ref().value }).collect();
        assert_eq!(values, alloc::vec![1, 2, 3]);

        let first = list.pop_front().unwrap();
        assert_eq!(unsafe { first.as_ref().value }, 1);
        assert!(!list.is_empty());
    }

    #[test]
    fn remove_from_middle() {
        let list: List<Entry> = List::new(link_of, node_of);
        let mut a = Entry { value: 1, link: Link::new() };
        let mut b = Entry { value: 2, link: Link::new() };
        let mut c = Entry { value: 3, link: Link::new() };
        list.push_back(NonNull::from(&mut a));
        list.push_back(NonNull::from(&mut b));
        list.push_back(NonNull::from(&mut c));

        list.remove(NonNull::from(&mut b));
        let values: alloc::vec::Vec<u32> = list.iter().map(|p| unsafe { p.as_ref().value }).collect();
        assert_eq!(values, alloc::vec![1, 3]);
    }

    #[test]
    fn empty_list_has_no_elements() {
        let list: List<Entry> = List::new(link_of, node_of);
        assert!(list.is_empty());
        assert!(list.pop_front().is_none());
    }
}
