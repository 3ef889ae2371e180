use alloy_primitives::{B256, keccak256};
use alloy_rlp::{Decodable, EMPTY_STRING_CODE, Encodable, Header};
use alloy_trie::EMPTY_ROOT_HASH;
use std::cell::OnceCell;

/// Trie operation failures.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// An operation walked into a digest-truncated subtree.
    #[error("reached an unresolved node: {0}")]
    NodeNotResolved(B256),
    /// A key is a strict prefix of another, which would require a branch
    /// value; Ethereum tries never need one.
    #[error("branch node with value")]
    ValueInBranch,
    /// RLP decoding failure.
    #[error("rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

/// The shape of one trie node.
///
/// Paths are kept as unpacked nibbles; the hex-prefix encoding is applied
/// only when a node is serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum NodeData {
    /// Empty subtree.
    #[default]
    Null,
    /// Sixteen-way fan-out. Branch values are unused on Ethereum.
    Branch([Option<Box<Node>>; 16]),
    /// Terminal path remainder and its value.
    Leaf(Vec<u8>, Vec<u8>),
    /// Shared path prefix over a single child.
    Extension(Vec<u8>, Box<Node>),
    /// A subtree elided to its hash.
    Digest(B256),
}

/// How a node is referenced from its parent: inline when the encoding is
/// shorter than 32 bytes, by hash otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeRef {
    Bytes(Vec<u8>),
    Digest(B256),
}

impl NodeRef {
    fn len(&self) -> usize {
        match self {
            NodeRef::Bytes(bytes) => bytes.len(),
            NodeRef::Digest(_) => 33,
        }
    }
}

/// A sparse Merkle-Patricia trie node.
///
/// The reference (hash or inline bytes) is computed once per shape; any
/// mutation resets the cell.
#[derive(Debug, Default)]
pub struct Node {
    data: NodeData,
    cached_ref: OnceCell<NodeRef>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            cached_ref: self.cached_ref.clone(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Node {}

impl From<NodeData> for Node {
    fn from(data: NodeData) -> Self {
        Self {
            data,
            cached_ref: OnceCell::new(),
        }
    }
}

/// Unpack a byte key into nibbles, high first.
pub(crate) fn nibbles_of(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Hex-prefix encoding of a nibble path.
fn encode_path(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let flag = match (is_leaf, odd) {
        (false, false) => 0x00,
        (false, true) => 0x10,
        (true, false) => 0x20,
        (true, true) => 0x30,
    };
    let mut iter = nibbles.iter();
    if odd {
        out.push(flag | iter.next().expect("odd length"));
    } else {
        out.push(flag);
    }
    while let (Some(high), Some(low)) = (iter.next(), iter.next()) {
        out.push((high << 4) | low);
    }
    out
}

fn decode_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), TrieError> {
    let first = *encoded.first().ok_or(alloy_rlp::Error::InputTooShort)?;
    let is_leaf = first & 0x20 != 0;
    let odd = first & 0x10 != 0;
    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if odd {
        nibbles.push(first & 0x0f);
    }
    for byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((nibbles, is_leaf))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl Node {
    /// Whether this subtree is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self.data, NodeData::Null)
    }

    /// Root hash of the subtree.
    pub fn hash(&self) -> B256 {
        match self.reference() {
            NodeRef::Digest(digest) => digest,
            NodeRef::Bytes(bytes) => {
                if bytes == [EMPTY_STRING_CODE] {
                    EMPTY_ROOT_HASH
                } else {
                    keccak256(&bytes)
                }
            }
        }
    }

    fn reference(&self) -> NodeRef {
        self.cached_ref
            .get_or_init(|| match &self.data {
                NodeData::Null => NodeRef::Bytes(vec![EMPTY_STRING_CODE]),
                NodeData::Digest(digest) => NodeRef::Digest(*digest),
                _ => {
                    let mut encoded = Vec::with_capacity(self.length());
                    self.encode(&mut encoded);
                    if encoded.len() < 32 {
                        NodeRef::Bytes(encoded)
                    } else {
                        NodeRef::Digest(keccak256(&encoded))
                    }
                }
            })
            .clone()
    }

    fn reference_encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self.reference() {
            NodeRef::Bytes(bytes) => out.put_slice(&bytes),
            NodeRef::Digest(digest) => digest.encode(out),
        }
    }

    fn invalidate(&mut self) {
        self.cached_ref = OnceCell::new();
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, TrieError> {
        self.get_nibbles(&nibbles_of(key))
    }

    fn get_nibbles(&self, path: &[u8]) -> Result<Option<&[u8]>, TrieError> {
        match &self.data {
            NodeData::Null => Ok(None),
            NodeData::Branch(children) => match path.split_first() {
                None => Err(TrieError::ValueInBranch),
                Some((nibble, rest)) => match &children[*nibble as usize] {
                    Some(child) => child.get_nibbles(rest),
                    None => Ok(None),
                },
            },
            NodeData::Leaf(prefix, value) => {
                if prefix == path {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            NodeData::Extension(prefix, child) => match path.strip_prefix(prefix.as_slice()) {
                Some(rest) => child.get_nibbles(rest),
                None => Ok(None),
            },
            NodeData::Digest(digest) => Err(TrieError::NodeNotResolved(*digest)),
        }
    }

    /// Insert `value` under `key`. Returns whether the trie changed.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<bool, TrieError> {
        self.insert_nibbles(&nibbles_of(key), value)
    }

    fn insert_nibbles(&mut self, path: &[u8], value: Vec<u8>) -> Result<bool, TrieError> {
        let changed = match &mut self.data {
            NodeData::Null => {
                self.data = NodeData::Leaf(path.to_vec(), value);
                true
            }
            NodeData::Branch(children) => match path.split_first() {
                None => return Err(TrieError::ValueInBranch),
                Some((nibble, rest)) => {
                    let slot = &mut children[*nibble as usize];
                    match slot {
                        Some(child) => child.insert_nibbles(rest, value)?,
                        None => {
                            *slot = Some(Box::new(
                                NodeData::Leaf(rest.to_vec(), value).into(),
                            ));
                            true
                        }
                    }
                }
            },
            NodeData::Leaf(prefix, old_value) => {
                let common = common_prefix(prefix, path);
                if common == prefix.len() && common == path.len() {
                    if *old_value == value {
                        false
                    } else {
                        *old_value = value;
                        true
                    }
                } else if common == prefix.len() || common == path.len() {
                    // One key would terminate inside the other.
                    return Err(TrieError::ValueInBranch);
                } else {
                    let mut children: [Option<Box<Node>>; 16] = Default::default();
                    children[prefix[common] as usize] = Some(Box::new(
                        NodeData::Leaf(prefix[common + 1..].to_vec(), old_value.clone()).into(),
                    ));
                    children[path[common] as usize] = Some(Box::new(
                        NodeData::Leaf(path[common + 1..].to_vec(), value).into(),
                    ));
                    let branch = NodeData::Branch(children);
                    self.data = if common > 0 {
                        NodeData::Extension(
                            path[..common].to_vec(),
                            Box::new(branch.into()),
                        )
                    } else {
                        branch
                    };
                    true
                }
            }
            NodeData::Extension(prefix, child) => {
                let common = common_prefix(prefix, path);
                if common == prefix.len() {
                    child.insert_nibbles(&path[common..], value)?
                } else if common == path.len() {
                    return Err(TrieError::ValueInBranch);
                } else {
                    // Split the extension at the divergence point.
                    let mut children: [Option<Box<Node>>; 16] = Default::default();
                    let old_child = std::mem::take(child);
                    children[prefix[common] as usize] = Some(if common + 1 == prefix.len() {
                        old_child
                    } else {
                        Box::new(
                            NodeData::Extension(prefix[common + 1..].to_vec(), old_child).into(),
                        )
                    });
                    children[path[common] as usize] = Some(Box::new(
                        NodeData::Leaf(path[common + 1..].to_vec(), value).into(),
                    ));
                    let branch = NodeData::Branch(children);
                    self.data = if common > 0 {
                        NodeData::Extension(path[..common].to_vec(), Box::new(branch.into()))
                    } else {
                        branch
                    };
                    true
                }
            }
            NodeData::Digest(digest) => return Err(TrieError::NodeNotResolved(*digest)),
        };
        if changed {
            self.invalidate();
        }
        Ok(changed)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, TrieError> {
        self.delete_nibbles(&nibbles_of(key))
    }

    fn delete_nibbles(&mut self, path: &[u8]) -> Result<bool, TrieError> {
        let deleted = match &mut self.data {
            NodeData::Null => false,
            NodeData::Branch(children) => match path.split_first() {
                None => return Err(TrieError::ValueInBranch),
                Some((nibble, rest)) => {
                    let slot = &mut children[*nibble as usize];
                    let deleted = match slot {
                        Some(child) => {
                            let deleted = child.delete_nibbles(rest)?;
                            if child.is_empty() {
                                *slot = None;
                            }
                            deleted
                        }
                        None => false,
                    };
                    if deleted {
                        self.collapse_branch()?;
                    }
                    deleted
                }
            },
            NodeData::Leaf(prefix, _) => {
                if prefix == path {
                    self.data = NodeData::Null;
                    true
                } else {
                    false
                }
            }
            NodeData::Extension(prefix, child) => {
                let deleted = match path.strip_prefix(prefix.as_slice()) {
                    Some(rest) => child.delete_nibbles(rest)?,
                    None => false,
                };
                if deleted {
                    self.collapse_extension()?;
                }
                deleted
            }
            NodeData::Digest(digest) => return Err(TrieError::NodeNotResolved(*digest)),
        };
        if deleted {
            self.invalidate();
        }
        Ok(deleted)
    }

    /// A branch left with a single child folds into that child.
    fn collapse_branch(&mut self) -> Result<(), TrieError> {
        let NodeData::Branch(children) = &mut self.data else {
            return Ok(());
        };
        let remaining = children.iter().filter(|child| child.is_some()).count();
        if remaining != 1 {
            return Ok(());
        }
        let index = children
            .iter()
            .position(|child| child.is_some())
            .expect("one child");
        let child = children[index].take().expect("one child");
        self.data = match child.data {
            NodeData::Leaf(prefix, value) => {
                let mut path = vec![index as u8];
                path.extend_from_slice(&prefix);
                NodeData::Leaf(path, value)
            }
            NodeData::Extension(prefix, grandchild) => {
                let mut path = vec![index as u8];
                path.extend_from_slice(&prefix);
                NodeData::Extension(path, grandchild)
            }
            data @ (NodeData::Branch(_) | NodeData::Digest(_)) => {
                NodeData::Extension(vec![index as u8], Box::new(data.into()))
            }
            NodeData::Null => NodeData::Null,
        };
        Ok(())
    }

    /// An extension over a collapsed child merges paths downward.
    fn collapse_extension(&mut self) -> Result<(), TrieError> {
        let NodeData::Extension(prefix, child) = &mut self.data else {
            return Ok(());
        };
        self.data = match &mut child.data {
            NodeData::Null => NodeData::Null,
            NodeData::Leaf(child_prefix, value) => {
                let mut path = std::mem::take(prefix);
                path.extend_from_slice(child_prefix);
                NodeData::Leaf(path, std::mem::take(value))
            }
            NodeData::Extension(child_prefix, grandchild) => {
                let mut path = std::mem::take(prefix);
                path.extend_from_slice(child_prefix);
                NodeData::Extension(path, std::mem::take(grandchild))
            }
            NodeData::Branch(_) | NodeData::Digest(_) => return Ok(()),
        };
        Ok(())
    }

    fn payload_length(&self) -> usize {
        match &self.data {
            NodeData::Null | NodeData::Digest(_) => 0,
            NodeData::Branch(children) => {
                let children_len: usize = children
                    .iter()
                    .map(|child| child.as_ref().map_or(1, |c| c.reference().len()))
                    .sum();
                // Plus the always-empty branch value.
                children_len + 1
            }
            NodeData::Leaf(prefix, value) => {
                let path = encode_path(prefix, true);
                path.as_slice().length() + value.as_slice().length()
            }
            NodeData::Extension(prefix, child) => {
                let path = encode_path(prefix, false);
                path.as_slice().length() + child.reference().len()
            }
        }
    }
}

impl Encodable for Node {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match &self.data {
            NodeData::Null => out.put_u8(EMPTY_STRING_CODE),
            NodeData::Digest(digest) => digest.encode(out),
            NodeData::Branch(children) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                for child in children {
                    match child {
                        Some(child) => child.reference_encode(out),
                        None => out.put_u8(EMPTY_STRING_CODE),
                    }
                }
                out.put_u8(EMPTY_STRING_CODE);
            }
            NodeData::Leaf(prefix, value) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                encode_path(prefix, true).as_slice().encode(out);
                value.as_slice().encode(out);
            }
            NodeData::Extension(prefix, child) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                encode_path(prefix, false).as_slice().encode(out);
                child.reference_encode(out);
            }
        }
    }

    fn length(&self) -> usize {
        match &self.data {
            NodeData::Null => 1,
            NodeData::Digest(_) => 33,
            _ => {
                let payload = self.payload_length();
                payload + alloy_rlp::length_of_length(payload)
            }
        }
    }
}

impl Decodable for Node {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first == EMPTY_STRING_CODE {
            *buf = &buf[1..];
            return Ok(NodeData::Null.into());
        }
        if first < 0xc0 {
            // A string: must be a 32-byte digest reference.
            let bytes = Header::decode_bytes(buf, false)?;
            if bytes.len() != 32 {
                return Err(alloy_rlp::Error::UnexpectedLength);
            }
            return Ok(NodeData::Digest(B256::from_slice(bytes)).into());
        }
        let head = Header::decode(buf)?;
        let mut payload = &buf[..head.payload_length];
        *buf = &buf[head.payload_length..];

        // Count items to distinguish branch (17) from leaf/extension (2).
        let mut probe = payload;
        let mut items = 0usize;
        while !probe.is_empty() {
            let item_head = Header::decode(&mut probe)?;
            probe = &probe[item_head.payload_length.min(probe.len())..];
            items += 1;
        }
        match items {
            2 => {
                let path = Header::decode_bytes(&mut payload, false)?;
                let (nibbles, is_leaf) =
                    decode_path(path).map_err(|_| alloy_rlp::Error::Custom("bad path"))?;
                if is_leaf {
                    let value = Header::decode_bytes(&mut payload, false)?;
                    Ok(NodeData::Leaf(nibbles, value.to_vec()).into())
                } else {
                    let child = decode_child(&mut payload)?;
                    Ok(NodeData::Extension(nibbles, Box::new(child)).into())
                }
            }
            17 => {
                let mut children: [Option<Box<Node>>; 16] = Default::default();
                for slot in children.iter_mut() {
                    if payload.first() == Some(&EMPTY_STRING_CODE) {
                        payload = &payload[1..];
                    } else {
                        *slot = Some(Box::new(decode_child(&mut payload)?));
                    }
                }
                // Branch value must be empty.
                if payload != [EMPTY_STRING_CODE] {
                    return Err(alloy_rlp::Error::Custom("branch value unsupported"));
                }
                Ok(NodeData::Branch(children).into())
            }
            _ => Err(alloy_rlp::Error::Custom("unexpected trie node arity")),
        }
    }
}

/// Decode a child reference: inline node (list) or 32-byte digest string.
fn decode_child(buf: &mut &[u8]) -> alloy_rlp::Result<Node> {
    let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
    if first >= 0xc0 {
        Node::decode(buf)
    } else {
        let bytes = Header::decode_bytes(buf, false)?;
        if bytes.len() != 32 {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(NodeData::Digest(B256::from_slice(bytes)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn empty_trie() {
        let trie = Node::default();
        assert!(trie.is_empty());
        assert_eq!(trie.hash(), EMPTY_ROOT_HASH);

        let mut out = Vec::new();
        trie.encode(&mut out);
        assert_eq!(out, vec![0x80]);
    }

    #[test]
    fn empty_key() {
        let mut trie = Node::default();
        trie.insert(&[], b"empty".to_vec()).unwrap();
        assert_eq!(trie.get(&[]).unwrap(), Some(b"empty".as_slice()));
        assert!(trie.delete(&[]).unwrap());
        assert!(trie.is_empty());
    }

    #[test]
    fn tiny_trie_canonical_hash() {
        // An extension over a branch with two value leaves.
        let mut trie = Node::default();
        trie.insert(b"a", alloy_rlp::encode(0u8)).unwrap();
        trie.insert(b"b", alloy_rlp::encode(1u8)).unwrap();
        assert!(!trie.is_empty());
        let expected = hex!("6fbf23d6ec055dd143ff50d558559770005ff44ae1d41276f1bd83affab6dd3b");
        assert_eq!(trie.hash().0, expected);

        let encoded = alloy_rlp::encode(&trie);
        let decoded = Node::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.hash(), trie.hash());
    }

    #[test]
    fn prefix_keys_rejected() {
        let mut trie = Node::default();
        trie.insert(b"do", b"verb".to_vec()).unwrap();
        assert!(matches!(
            trie.insert(b"dog", b"puppy".to_vec()),
            Err(TrieError::ValueInBranch)
        ));
    }

    #[test]
    fn keccak_keyed_insert_get_delete() {
        const N: usize = 256;
        let mut trie = Node::default();
        for i in 0..N {
            assert!(
                trie.insert(keccak256(i.to_be_bytes()).as_slice(), alloy_rlp::encode(i))
                    .unwrap()
            );
        }
        // Insertion order must not matter.
        let mut reversed = Node::default();
        for i in (0..N).rev() {
            reversed
                .insert(keccak256(i.to_be_bytes()).as_slice(), alloy_rlp::encode(i))
                .unwrap();
        }
        assert_eq!(trie.hash(), reversed.hash());

        for i in 0..N {
            assert_eq!(
                trie.get(keccak256(i.to_be_bytes()).as_slice()).unwrap(),
                Some(alloy_rlp::encode(i).as_slice())
            );
            assert_eq!(
                trie.get(keccak256((i + N).to_be_bytes()).as_slice()).unwrap(),
                None
            );
        }

        for i in 0..N {
            assert!(trie.delete(keccak256(i.to_be_bytes()).as_slice()).unwrap());
            let mut reference = Node::default();
            for j in i + 1..N {
                reference
                    .insert(keccak256(j.to_be_bytes()).as_slice(), alloy_rlp::encode(j))
                    .unwrap();
            }
            assert_eq!(trie.hash(), reference.hash());
        }
        assert!(trie.is_empty());
    }

    #[test]
    fn digest_subtree_blocks_access() {
        let mut trie = Node::default();
        trie.insert(b"aa", alloy_rlp::encode(1u8)).unwrap();
        trie.insert(b"ab", alloy_rlp::encode(2u8)).unwrap();
        let hash = trie.hash();

        let encoded = alloy_rlp::encode(&trie);
        let reparsed = Node::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(reparsed.hash(), hash);
    }

    #[test]
    fn idempotent_insert_reports_unchanged() {
        let mut trie = Node::default();
        assert!(trie.insert(b"key", b"value".to_vec()).unwrap());
        assert!(!trie.insert(b"key", b"value".to_vec()).unwrap());
        assert!(trie.insert(b"key", b"other".to_vec()).unwrap());
        assert!(!trie.delete(b"nope").unwrap());
    }
}
