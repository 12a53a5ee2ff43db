//! Address book of known peers, shared by every committee switch on the node.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::{address::NetAddress, identity::NodeId};

/// Known-peer registry consulted by switches before dialing.
pub trait AddrBook: Send + Sync {
    /// Register one of our own addresses so it is never dialed.
    fn add_our_address(&self, addr: &NetAddress);

    /// Whether `addr` is one of our own addresses.
    fn our_address(&self, addr: &NetAddress) -> bool;

    /// Register ids that must never be added to the book.
    fn add_private_ids(&self, ids: Vec<String>);

    /// Record a successful connection to `addr`, adding it if unknown. Our own
    /// addresses, private ids and, in strict mode, unroutable addresses are ignored.
    fn mark_good(&self, addr: &NetAddress);

    fn has_address(&self, addr: &NetAddress) -> bool;

    fn size(&self) -> usize;
}

#[derive(Default)]
struct Book {
    our_addrs: HashSet<NetAddress>,
    private_ids: HashSet<String>,
    /// Known peers and how many times each was successfully dialed
    addrs: HashMap<NodeId, (NetAddress, u32)>,
}

/// In-memory [`AddrBook`].
pub struct MemAddrBook {
    file_path: String,
    routability_strict: bool,
    book: RwLock<Book>,
}

impl MemAddrBook {
    pub fn new(file_path: impl Into<String>, routability_strict: bool) -> Self {
        Self {
            file_path: file_path.into(),
            routability_strict,
            book: RwLock::new(Book::default()),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn is_private(&self, id: &NodeId) -> bool {
        self.book.read().private_ids.contains(&id.to_string())
    }

    /// Number of successful connections recorded for `id`.
    pub fn good_count(&self, id: &NodeId) -> u32 {
        self.book
            .read()
            .addrs
            .get(id)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    fn is_addable(&self, book: &Book, addr: &NetAddress) -> bool {
        !book.our_addrs.contains(addr)
            && !book.private_ids.contains(&addr.id.to_string())
            && (!self.routability_strict || addr.is_routable())
    }
}

impl AddrBook for MemAddrBook {
    fn add_our_address(&self, addr: &NetAddress) {
        self.book.write().our_addrs.insert(addr.clone());
    }

    fn our_address(&self, addr: &NetAddress) -> bool {
        self.book.read().our_addrs.contains(addr)
    }

    fn add_private_ids(&self, ids: Vec<String>) {
        self.book.write().private_ids.extend(ids);
    }

    fn mark_good(&self, addr: &NetAddress) {
        let mut book = self.book.write();
        if !self.is_addable(&book, addr) {
            return;
        }
        let entry = book.addrs.entry(addr.id).or_insert_with(|| (addr.clone(), 0));
        entry.0 = addr.clone();
        entry.1 += 1;
    }

    fn has_address(&self, addr: &NetAddress) -> bool {
        self.book.read().addrs.contains_key(&addr.id)
    }

    fn size(&self) -> usize {
        self.book.read().addrs.len()
    }
}
