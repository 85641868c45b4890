use std::ptr::NonNull;

use cordyceps::Linked;
use cordyceps_avl::{AvlMap, AvlTree, Links, TreeNode};

#[derive(Debug)]
#[repr(C)]
struct Entry {
    links: Links<Entry>,
    key: u32,
}

impl Entry {
    fn new(key: u32) -> Box<Entry> {
        Box::new(Entry {
            links: Links::new(),
            key,
        })
    }
}

unsafe impl Linked<Links<Entry>> for Entry {
    type Handle = Box<Entry>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        NonNull::new(Box::into_raw(r)).unwrap()
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        unsafe { Box::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Entry>> {
        // SAFETY: Self is #[repr(C)] and `links` is first field
        ptr.cast()
    }
}

impl TreeNode<Links<Entry>> for Entry {
    type Key = u32;

    fn key(&self) -> &Self::Key {
        &self.key
    }
}

fn keys(tree: &AvlTree<Entry>) -> Vec<u32> {
    tree.iter().map(|entry| entry.key).collect()
}

fn main() {
    let mut tree: AvlTree<Entry> = AvlTree::new();

    for key in [30, 20, 10, 40, 50, 25, 5] {
        tree.insert(Entry::new(key));
        tree.assert_invariants();
        println!("insert {key:>2}: {:?} (height {})", keys(&tree), tree.height());
    }

    let mut dot = String::new();
    tree.dotgraph("demo", &mut dot).unwrap();
    println!("{dot}");

    let removed = tree.remove(&20).unwrap();
    assert_eq!(removed.key, 20);
    tree.assert_invariants();
    println!("remove 20: {:?} (height {})", keys(&tree), tree.height());

    let first = tree.pop_first().unwrap().key;
    assert_eq!(first, 5);
    tree.assert_invariants();

    drop(tree);

    let mut map: AvlMap<&str, usize> = AvlMap::new();
    for word in "the quick brown fox jumps over the lazy dog".split_whitespace() {
        match map.get_mut(word) {
            Some(count) => *count += 1,
            None => {
                map.insert(word, 1);
            }
        }
    }
    map.assert_invariants();
    println!("{map:?}");
}
