//! Index-based intrusive doubly-linked lists.
//!
//! The link fields ([`Hook`]) live inside the objects that are queued, and a
//! [`List`] only records head, tail and length. Objects are named by a small
//! copyable key (a resource id, a pool index) and the list reaches their
//! hooks through a [`Links`] implementation, so one object can sit on several
//! lists at once as long as each list uses a different hook.

use alloc::vec::Vec;

/// Link fields embedded in a queued object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hook<K> {
    prev: Option<K>,
    next: Option<K>,
    linked: bool,
}

impl<K> Default for Hook<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Hook<K> {
    /// Unlinked hook.
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    /// Whether the hook currently sits on a list.
    pub const fn is_linked(&self) -> bool {
        self.linked
    }

    fn reset(&mut self) {
        self.prev = None;
        self.next = None;
        self.linked = false;
    }
}

impl<K: Copy> Hook<K> {
    pub fn next(&self) -> Option<K> {
        self.next
    }

    pub fn prev(&self) -> Option<K> {
        self.prev
    }
}

/// Access to the hook of a keyed object.
///
/// Implementors pick which hook of the object a list threads through.
pub trait Links<K> {
    fn hook(&self, key: K) -> Option<&Hook<K>>;
    fn hook_mut(&mut self, key: K) -> Option<&mut Hook<K>>;
}

impl Links<usize> for Vec<Hook<usize>> {
    fn hook(&self, key: usize) -> Option<&Hook<usize>> {
        self.get(key)
    }

    fn hook_mut(&mut self, key: usize) -> Option<&mut Hook<usize>> {
        self.get_mut(key)
    }
}

/// Head of an intrusive list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List<K> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K> Default for List<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> List<K> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K: Copy + Eq> List<K> {
    pub fn front(&self) -> Option<K> {
        self.head
    }

    pub fn back(&self) -> Option<K> {
        self.tail
    }

    /// Appends `key`; returns `false` if its hook is missing or already linked.
    pub fn push_back<L: Links<K> + ?Sized>(&mut self, links: &mut L, key: K) -> bool {
        let tail = self.tail;
        match links.hook_mut(key) {
            Some(hook) if !hook.linked => {
                hook.prev = tail;
                hook.next = None;
                hook.linked = true;
            }
            _ => return false,
        }
        match tail.and_then(|tail| links.hook_mut(tail)) {
            Some(hook) => hook.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
        true
    }

    /// Prepends `key`; returns `false` if its hook is missing or already linked.
    pub fn push_front<L: Links<K> + ?Sized>(&mut self, links: &mut L, key: K) -> bool {
        match self.head {
            Some(head) => self.insert_before(links, head, key),
            None => self.push_back(links, key),
        }
    }

    /// Links `key` immediately in front of `at`, which must be on this list.
    pub fn insert_before<L: Links<K> + ?Sized>(&mut self, links: &mut L, at: K, key: K) -> bool {
        let prev = match links.hook(at) {
            Some(hook) if hook.linked => hook.prev,
            _ => return false,
        };
        if prev.is_none() && self.head != Some(at) {
            return false;
        }
        match links.hook_mut(key) {
            Some(hook) if !hook.linked => {
                hook.prev = prev;
                hook.next = Some(at);
                hook.linked = true;
            }
            _ => return false,
        }
        if let Some(hook) = links.hook_mut(at) {
            hook.prev = Some(key);
        }
        match prev.and_then(|prev| links.hook_mut(prev)) {
            Some(hook) => hook.next = Some(key),
            None => self.head = Some(key),
        }
        self.len += 1;
        true
    }

    /// Unlinks `key`; returns `false` if it is not on this list.
    ///
    /// Only the ends are checked against this list. Callers threading one
    /// hook through several lists must know which list holds a key that
    /// sits in the middle.
    pub fn remove<L: Links<K> + ?Sized>(&mut self, links: &mut L, key: K) -> bool {
        if self.len == 0 {
            return false;
        }
        let (prev, next) = match links.hook(key) {
            Some(hook) if hook.linked => (hook.prev, hook.next),
            _ => return false,
        };
        if (prev.is_none() && self.head != Some(key)) || (next.is_none() && self.tail != Some(key))
        {
            return false;
        }
        match prev.and_then(|prev| links.hook_mut(prev)) {
            Some(hook) => hook.next = next,
            None => self.head = next,
        }
        match next.and_then(|next| links.hook_mut(next)) {
            Some(hook) => hook.prev = prev,
            None => self.tail = prev,
        }
        if let Some(hook) = links.hook_mut(key) {
            hook.reset();
        }
        self.len -= 1;
        true
    }

    pub fn pop_front<L: Links<K> + ?Sized>(&mut self, links: &mut L) -> Option<K> {
        let head = self.head?;
        self.remove(links, head).then_some(head)
    }

    /// Successor of `key` on this list.
    pub fn next_of<L: Links<K> + ?Sized>(&self, links: &L, key: K) -> Option<K> {
        links.hook(key).and_then(|hook| hook.next)
    }

    /// Whether `key` is on this list (linear walk).
    pub fn contains<L: Links<K> + ?Sized>(&self, links: &L, key: K) -> bool {
        self.iter(links).any(|k| k == key)
    }

    pub fn iter<'a, L: Links<K> + ?Sized>(&self, links: &'a L) -> Iter<'a, K, L> {
        Iter {
            links,
            next: self.head,
            remaining: self.len,
        }
    }

    /// Snapshot of the keys in list order.
    pub fn keys<L: Links<K> + ?Sized>(&self, links: &L) -> Vec<K> {
        self.iter(links).collect()
    }
}

/// Front-to-back iterator over a [`List`].
pub struct Iter<'a, K, L: ?Sized> {
    links: &'a L,
    next: Option<K>,
    remaining: usize,
}

impl<K: Copy, L: Links<K> + ?Sized> Iterator for Iter<'_, K, L> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.next = self.links.hook(current).and_then(|hook| hook.next);
        self.remaining -= 1;
        Some(current)
    }
}
