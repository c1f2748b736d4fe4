use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Link node to be embedded inside a listable value.
///
/// The node stores raw neighbor pointers, so a value must stay pinned in
/// memory while it is linked into a list.
#[derive(Default)]
pub struct ListNode {
    next: Cell<*mut ListNode>,
    prev: Cell<*mut ListNode>,
}

impl ListNode {
    pub const fn new() -> Self {
        Self {
            next: Cell::new(std::ptr::null_mut()),
            prev: Cell::new(std::ptr::null_mut()),
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        !self.next.get().is_null() || !self.prev.get().is_null()
    }

    #[inline]
    fn unlink(&self) {
        self.next.set(std::ptr::null_mut());
        self.prev.set(std::ptr::null_mut());
    }
}

/// Types that embed a [`ListNode`] and can be linked into an [`IntrusiveList`].
///
/// # Safety
///
/// `node()` must always return the same embedded node for a given value, and
/// `from_node()` must recover the pointer to the containing value from a
/// pointer to that node.
pub unsafe trait Linked {
    fn node(&self) -> &ListNode;

    unsafe fn from_node(node: NonNull<ListNode>) -> NonNull<Self>;
}

/// Doubly-linked intrusive list.
///
/// The list never owns its items; it only threads pointers through the nodes
/// embedded in them. Whoever pushes an item is responsible for keeping it
/// alive until it is popped again.
pub struct IntrusiveList<T: Linked> {
    head: *mut ListNode,
    tail: *mut ListNode,
    len: usize,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Linked + Send> Send for IntrusiveList<T> {}

impl<T: Linked> Default for IntrusiveList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> IntrusiveList<T> {
    pub const fn new() -> Self {
        Self {
            head: std::ptr::null_mut(),
            tail: std::ptr::null_mut(),
            len: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_back(&mut self, item: NonNull<T>) {
        let node = unsafe { item.as_ref() }.node() as *const ListNode as *mut ListNode;
        assert!(!unsafe { &*node }.is_linked(), "Item is already linked into a list!");

        unsafe {
            if self.tail.is_null() {
                self.head = node;
                self.tail = node;
            } else {
                (*self.tail).next.set(node);
                (*node).prev.set(self.tail);
                self.tail = node;
            }
        }
        self.len += 1;
    }

    pub fn push_front(&mut self, item: NonNull<T>) {
        let node = unsafe { item.as_ref() }.node() as *const ListNode as *mut ListNode;
        assert!(!unsafe { &*node }.is_linked(), "Item is already linked into a list!");

        unsafe {
            if self.head.is_null() {
                self.head = node;
                self.tail = node;
            } else {
                (*self.head).prev.set(node);
                (*node).next.set(self.head);
                self.head = node;
            }
        }
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<NonNull<T>> {
        if self.head.is_null() {
            return None;
        }

        unsafe {
            let node = self.head;
            let next = (*node).next.get();

            self.head = next;
            if next.is_null() {
                self.tail = std::ptr::null_mut();
            } else {
                (*next).prev.set(std::ptr::null_mut());
            }

            (*node).unlink();
            self.len -= 1;

            Some(T::from_node(NonNull::new_unchecked(node)))
        }
    }

    /// Detach the whole chain and hand it back as a new list.
    pub fn take(&mut self) -> Self {
        let taken = Self {
            head: self.head,
            tail: self.tail,
            len: self.len,
            _marker: PhantomData,
        };

        self.head = std::ptr::null_mut();
        self.tail = std::ptr::null_mut();
        self.len = 0;

        taken
    }
}

/// Implement [`Linked`] for a type whose first field is a [`ListNode`].
///
/// The type must be `#[repr(C)]` so the node-to-value cast is sound.
#[macro_export]
macro_rules! impl_linked_first_field {
    ($ty:ty) => {
        unsafe impl $crate::Linked for $ty {
            #[inline]
            fn node(&self) -> &$crate::ListNode {
                &self.node
            }

            #[inline]
            unsafe fn from_node(
                node: std::ptr::NonNull<$crate::ListNode>,
            ) -> std::ptr::NonNull<Self> {
                node.cast()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct TestItem {
        node: ListNode,
        value: u32,
    }

    crate::impl_linked_first_field!(TestItem);

    #[test]
    fn push_pop_fifo() {
        let mut items = (0..8_u32)
            .map(|value| Box::new(TestItem { node: ListNode::new(), value }))
            .collect::<Vec<_>>();

        let mut list = IntrusiveList::<TestItem>::new();
        for item in items.iter_mut() {
            list.push_back(NonNull::from(item.as_ref()));
        }
        assert_eq!(list.len(), 8);

        let mut expected = 0;
        while let Some(item) = list.pop_front() {
            assert_eq!(unsafe { item.as_ref() }.value, expected);
            expected += 1;
        }
        assert_eq!(expected, 8);
        assert!(list.is_empty());
    }

    #[test]
    fn take_detaches_chain() {
        let items = (0..4_u32)
            .map(|value| Box::new(TestItem { node: ListNode::new(), value }))
            .collect::<Vec<_>>();

        let mut list = IntrusiveList::<TestItem>::new();
        for item in items.iter() {
            list.push_back(NonNull::from(item.as_ref()));
        }

        let mut taken = list.take();
        assert!(list.is_empty());
        assert_eq!(taken.len(), 4);

        let first = taken.pop_front().unwrap();
        assert_eq!(unsafe { first.as_ref() }.value, 0);
    }
}
