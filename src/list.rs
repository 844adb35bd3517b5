use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Intrusive doubly linked list whose nodes live inside memory the list
/// does not own. Pools use it to chain their frames: every frame starts
/// with its `Node<Frame>`.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

/// Iterator over the nodes of a [`List`], head to tail.
pub(crate) struct Nodes<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a Node<T>>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[cfg(test)]
    pub fn last(&self) -> Link<Node<T>> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a new node to the list.
    ///
    /// The list never allocates: it receives the `addr` where the node has
    /// to be written, so the node lands inside our own data structures in
    /// the exact place we want.
    ///
    /// **SAFETY**: Caller must guarantee that `addr` is valid for writes of
    /// a `Node<T>`, suitably aligned, and outlives its membership in the list.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Unlinks `node`. The memory behind it is left untouched.
    ///
    /// **SAFETY**: `node` must currently belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let next = (*node.as_ptr()).next;
            let prev = (*node.as_ptr()).prev;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn nodes(&self) -> Nodes<'_, T> {
        Nodes {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Nodes<'a, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn values(list: &List<u32>) -> Vec<u32> {
        list.nodes().map(|node| unsafe { node.as_ref().data }).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<u8> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(list.nodes().next().is_none());
        assert!(list.first().is_none());
        assert!(list.last().is_none());
    }

    #[test]
    fn append_and_remove_anywhere() {
        let mut storage: [MaybeUninit<Node<u32>>; 4] = [const { MaybeUninit::uninit() }; 4];
        let mut list = List::new();

        let nodes: Vec<_> = storage
            .iter_mut()
            .zip(0u32..)
            .map(|(slot, value)| unsafe {
                list.append(value, NonNull::from(slot).cast::<u8>())
            })
            .collect();
        assert_eq!(values(&list), vec![0, 1, 2, 3]);

        unsafe {
            // Middle, head, tail, then the last one standing.
            list.remove(nodes[2]);
            assert_eq!(values(&list), vec![0, 1, 3]);

            list.remove(nodes[0]);
            assert_eq!(values(&list), vec![1, 3]);
            assert_eq!(list.first(), Some(nodes[1]));

            list.remove(nodes[3]);
            assert_eq!(values(&list), vec![1]);
            assert_eq!(list.last(), Some(nodes[1]));

            list.remove(nodes[1]);
        }

        assert!(list.is_empty());
        assert!(list.first().is_none());
        assert!(list.last().is_none());
    }
}
