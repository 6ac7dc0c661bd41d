//! Tiger Tree Hash (TTH) algorithm implementation
//!
//! Leaves are 1024 byte segments hashed as `Tiger(0x00 || leaf)`, interior
//! nodes as `Tiger(0x01 || left || right)`. An unpaired node is promoted to
//! the next level unchanged. The tree is folded incrementally: only the roots
//! of completed perfect subtrees are kept, one per height, so memory stays
//! logarithmic in the file size.

use crate::hashing::to_hex;
use crate::hashing::traits::StreamingHasher;
use tiger::{Digest, Tiger};

/// Leaf segment size in bytes
pub const TTH_LEAF_SIZE: usize = 1024;

type Node = [u8; 24];

pub(crate) struct TthHasher {
    leaf: Vec<u8>,
    // (height, root) of completed subtrees, heights strictly decreasing
    subtrees: Vec<(u32, Node)>,
    leaf_count: u64,
}

impl TthHasher {
    pub(crate) fn new() -> Self {
        Self {
            leaf: Vec::with_capacity(TTH_LEAF_SIZE),
            subtrees: Vec::new(),
            leaf_count: 0,
        }
    }

    fn close_leaf(&mut self) {
        let mut node = (0u32, hash_leaf(&self.leaf));
        self.leaf.clear();
        self.leaf_count += 1;

        while let Some(&(height, left)) = self.subtrees.last() {
            if height != node.0 {
                break;
            }
            self.subtrees.pop();
            node = (height + 1, hash_node(&left, &node.1));
        }
        self.subtrees.push(node);
    }
}

fn hash_leaf(data: &[u8]) -> Node {
    let mut hasher = Tiger::new();
    Digest::update(&mut hasher, [0x00]);
    Digest::update(&mut hasher, data);
    let mut out = [0u8; 24];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn hash_node(left: &Node, right: &Node) -> Node {
    let mut hasher = Tiger::new();
    Digest::update(&mut hasher, [0x01]);
    Digest::update(&mut hasher, left);
    Digest::update(&mut hasher, right);
    let mut out = [0u8; 24];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl StreamingHasher for TthHasher {
    fn update(&mut self, data: &[u8]) {
        let mut remaining = data;

        while !remaining.is_empty() {
            let room = TTH_LEAF_SIZE - self.leaf.len();
            let take = remaining.len().min(room);

            self.leaf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.leaf.len() == TTH_LEAF_SIZE {
                self.close_leaf();
            }
        }
    }

    fn finalize(mut self: Box<Self>) -> String {
        // Empty input still produces one (empty) leaf
        if !self.leaf.is_empty() || self.leaf_count == 0 {
            self.close_leaf();
        }

        let mut root = match self.subtrees.pop() {
            Some((_, node)) => node,
            None => hash_leaf(&[]),
        };
        while let Some((_, left)) = self.subtrees.pop() {
            root = hash_node(&left, &root);
        }

        to_hex(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tth(data: &[u8], split: usize) -> String {
        let mut hasher = Box::new(TthHasher::new());
        for chunk in data.chunks(split.max(1)) {
            hasher.update(chunk);
        }
        hasher.finalize()
    }

    fn base32_to_hex(encoded: &str) -> String {
        let mut bits: u64 = 0;
        let mut pending = 0u32;
        let mut out = Vec::new();

        for c in encoded.to_ascii_uppercase().bytes() {
            let value = match c {
                b'A'..=b'Z' => c - b'A',
                b'2'..=b'7' => c - b'2' + 26,
                _ => panic!("not base32: {c}"),
            };
            bits = (bits << 5) | u64::from(value);
            pending += 5;
            if pending >= 8 {
                pending -= 8;
                out.push((bits >> pending) as u8);
                bits &= (1 << pending) - 1;
            }
        }
        to_hex(&out)
    }

    #[test]
    fn test_dcpp_reference_vectors() {
        let vectors: [(&[u8], &str); 3] = [
            (b"", "lwpnacqdbzryxw3vhjvcj64qbznghohhhzwclnq"),
            (b"a", "czquwh3iyxbf5l3bgyugzhassmxu647ip2ike4y"),
            (b"abc", "asd4ujseh5m47pdyb46kbtsqtsgdklbhyxomuia"),
        ];

        for (input, base32) in vectors {
            assert_eq!(tth(input, 7), base32_to_hex(base32));
        }
    }

    #[test]
    fn test_two_leaves_combine() {
        let data = vec![7u8; TTH_LEAF_SIZE + 10];
        let expected = hash_node(
            &hash_leaf(&data[..TTH_LEAF_SIZE]),
            &hash_leaf(&data[TTH_LEAF_SIZE..]),
        );
        assert_eq!(tth(&data, 333), to_hex(&expected));
    }

    #[test]
    fn test_odd_leaf_is_promoted() {
        let data: Vec<u8> = (0..TTH_LEAF_SIZE * 3).map(|i| (i % 199) as u8).collect();
        let leaves: Vec<Node> = data.chunks(TTH_LEAF_SIZE).map(hash_leaf).collect();
        let expected = hash_node(&hash_node(&leaves[0], &leaves[1]), &leaves[2]);
        assert_eq!(tth(&data, TTH_LEAF_SIZE), to_hex(&expected));
    }

    #[test]
    fn test_seven_leaves_fold_right_to_left() {
        let data: Vec<u8> = (0..TTH_LEAF_SIZE * 6 + 1).map(|i| (i * 31 % 256) as u8).collect();
        let l: Vec<Node> = data.chunks(TTH_LEAF_SIZE).map(hash_leaf).collect();
        assert_eq!(l.len(), 7);

        let left = hash_node(&hash_node(&l[0], &l[1]), &hash_node(&l[2], &l[3]));
        let right = hash_node(&hash_node(&l[4], &l[5]), &l[6]);
        let expected = hash_node(&left, &right);

        assert_eq!(tth(&data, 4096), to_hex(&expected));
        assert_eq!(tth(&data, 1), to_hex(&expected));
    }
}
