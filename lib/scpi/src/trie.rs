// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command trie.
//!
//! The interpreter walks the command path one byte at a time, so the command
//! set is precomputed into a trie: each node matches one byte, terminal nodes
//! carry the index of the matched command. Nodes live in a single contiguous
//! arena and reference their children as an `(offset, length)` range into the
//! same arena, so the structure is value-typed throughout — no pointers, and
//! the finished arena can sit in a `static`.
//!
//! [`TrieBuilder`] constructs the arena from SCPI program mnemonics. The
//! uppercase portion of a mnemonic is its short form, so `"SYSTem:ERRor?"`
//! accepts `SYST:ERR?`, `SYSTEM:ERROR?`, and the mixed forms, all terminating
//! on the same command index. Matching is case-insensitive.

use bitflags::bitflags;

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct NodeFlags: u8 {
        /// This node completes a full or abbreviated command mnemonic.
        const TERMINAL = 0x01;
    }
}

/// One trie node. `children` are `nodes[first_child..first_child +
/// child_count]` in the owning arena.
#[derive(Copy, Clone, Debug)]
pub struct Node {
    character: u8,
    flags: NodeFlags,
    command: u8,
    first_child: u16,
    child_count: u8,
}

/// Index of the root node in every arena built by [`TrieBuilder`].
pub const ROOT: u16 = 0;

/// A borrowed, immutable view over a node arena.
#[derive(Copy, Clone)]
pub struct Trie<'a> {
    nodes: &'a [Node],
}

impl<'a> Trie<'a> {
    pub fn new(nodes: &'a [Node]) -> Self {
        Self { nodes }
    }

    /// The child of `node` matching `byte` (case-insensitively), if any.
    ///
    /// Child lists are short (at most the alphabet of the command set at one
    /// position), so this is a linear scan.
    pub fn child(&self, node: u16, byte: u8) -> Option<u16> {
        let n = self.nodes.get(node as usize)?;
        let folded = byte.to_ascii_uppercase();
        let first = n.first_child as usize;
        let children = self.nodes.get(first..first + n.child_count as usize)?;
        children
            .iter()
            .position(|c| c.character == folded)
            .map(|i| (first + i) as u16)
    }

    /// Whether `node` completes a command mnemonic.
    pub fn is_terminal(&self, node: u16) -> bool {
        self.nodes
            .get(node as usize)
            .is_some_and(|n| n.flags.contains(NodeFlags::TERMINAL))
    }

    /// The command index carried by a terminal node.
    pub fn command_index(&self, node: u16) -> Option<u8> {
        let n = self.nodes.get(node as usize)?;
        n.flags.contains(NodeFlags::TERMINAL).then_some(n.command)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrieError {
    /// The arena capacity `N` is too small for the command set.
    Full,
    /// A mnemonic was empty or longer than a path buffer allows.
    BadMnemonic,
    /// Two commands resolve to the same (possibly abbreviated) path.
    Conflict,
}

/// Longest accepted expanded command path, in bytes.
const MAX_PATH: usize = 64;

/// Most `:`-separated mnemonic segments in one command.
const MAX_SEGMENTS: usize = 8;

struct BuildNode {
    character: u8,
    terminal: bool,
    command: u8,
    first_child: Option<u16>,
    next_sibling: Option<u16>,
}

/// Builds a node arena from command mnemonics.
///
/// `N` bounds the node count; every distinct byte along every accepted form
/// of every mnemonic costs one node.
pub struct TrieBuilder<const N: usize> {
    nodes: heapless::Vec<BuildNode, N>,
}

impl<const N: usize> TrieBuilder<N> {
    pub fn new() -> Self {
        let mut nodes = heapless::Vec::new();
        // The root always exists and never matches a byte.
        let _ = nodes.push(BuildNode {
            character: 0,
            terminal: false,
            command: 0,
            first_child: None,
            next_sibling: None,
        });
        Self { nodes }
    }

    /// Inserts `mnemonic` (e.g. `"SYSTem:ERRor?"`) terminating on command
    /// table index `command`. Every combination of per-segment short and
    /// long forms is accepted.
    pub fn insert(&mut self, mnemonic: &str, command: u8) -> Result<(), TrieError> {
        if mnemonic.is_empty() {
            return Err(TrieError::BadMnemonic);
        }

        let mut segments: heapless::Vec<&str, MAX_SEGMENTS> = heapless::Vec::new();
        for seg in mnemonic.split(':') {
            if seg.is_empty() {
                return Err(TrieError::BadMnemonic);
            }
            segments.push(seg).map_err(|_| TrieError::BadMnemonic)?;
        }

        // Walk every short/long combination. Segments without a lowercase
        // tail only have one form; a bitmask over the segments enumerates
        // the rest, skipping duplicates by forcing such segments to "short".
        let count = segments.len();
        for mask in 0u32..(1 << count) {
            let mut skip = false;
            let mut path: heapless::Vec<u8, MAX_PATH> = heapless::Vec::new();
            for (i, seg) in segments.iter().enumerate() {
                let long = mask & (1 << i) != 0;
                if long && !seg.bytes().any(|b| b.is_ascii_lowercase()) {
                    // Identical to the short form; already covered.
                    skip = true;
                    break;
                }
                if i != 0 {
                    path.push(b':').map_err(|_| TrieError::BadMnemonic)?;
                }
                for b in seg.bytes() {
                    if !long && b.is_ascii_lowercase() {
                        continue;
                    }
                    path.push(b.to_ascii_uppercase())
                        .map_err(|_| TrieError::BadMnemonic)?;
                }
            }
            if skip {
                continue;
            }
            self.insert_path(&path, command)?;
        }
        Ok(())
    }

    fn insert_path(&mut self, path: &[u8], command: u8) -> Result<(), TrieError> {
        if path.is_empty() {
            return Err(TrieError::BadMnemonic);
        }
        let mut node = 0u16;
        for &b in path {
            node = match self.find_child(node, b) {
                Some(c) => c,
                None => self.add_child(node, b)?,
            };
        }
        let n = &mut self.nodes[node as usize];
        if n.terminal && n.command != command {
            return Err(TrieError::Conflict);
        }
        n.terminal = true;
        n.command = command;
        Ok(())
    }

    fn find_child(&self, parent: u16, byte: u8) -> Option<u16> {
        let mut cur = self.nodes[parent as usize].first_child;
        while let Some(i) = cur {
            if self.nodes[i as usize].character == byte {
                return Some(i);
            }
            cur = self.nodes[i as usize].next_sibling;
        }
        None
    }

    fn add_child(&mut self, parent: u16, byte: u8) -> Result<u16, TrieError> {
        let index = self.nodes.len() as u16;
        self.nodes
            .push(BuildNode {
                character: byte,
                terminal: false,
                command: 0,
                first_child: None,
                next_sibling: None,
            })
            .map_err(|_| TrieError::Full)?;

        // Append at the end of the sibling chain to keep insertion order.
        match self.nodes[parent as usize].first_child {
            None => self.nodes[parent as usize].first_child = Some(index),
            Some(first) => {
                let mut cur = first;
                while let Some(next) = self.nodes[cur as usize].next_sibling {
                    cur = next;
                }
                self.nodes[cur as usize].next_sibling = Some(index);
            }
        }
        Ok(index)
    }

    /// Flattens the builder into the final arena. Children of each node end
    /// up contiguous, in breadth-first order, with the root at index
    /// [`ROOT`].
    pub fn build(&self) -> Result<heapless::Vec<Node, N>, TrieError> {
        let mut out: heapless::Vec<Node, N> = heapless::Vec::new();
        let mut queue: heapless::Deque<(u16, u16), N> = heapless::Deque::new();

        out.push(self.flatten_one(0)).map_err(|_| TrieError::Full)?;
        queue.push_back((0, 0)).map_err(|_| TrieError::Full)?;

        while let Some((src, dst)) = queue.pop_front() {
            let first = out.len() as u16;
            let mut count = 0u8;
            let mut cur = self.nodes[src as usize].first_child;
            while let Some(i) = cur {
                let child_dst = out.len() as u16;
                out.push(self.flatten_one(i)).map_err(|_| TrieError::Full)?;
                queue
                    .push_back((i, child_dst))
                    .map_err(|_| TrieError::Full)?;
                count += 1;
                cur = self.nodes[i as usize].next_sibling;
            }
            out[dst as usize].first_child = first;
            out[dst as usize].child_count = count;
        }
        Ok(out)
    }

    fn flatten_one(&self, index: u16) -> Node {
        let n = &self.nodes[index as usize];
        Node {
            character: n.character,
            flags: if n.terminal {
                NodeFlags::TERMINAL
            } else {
                NodeFlags::empty()
            },
            command: n.command,
            first_child: 0,
            child_count: 0,
        }
    }
}

impl<const N: usize> Default for TrieBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(trie: &Trie<'_>, path: &str) -> Option<u16> {
        let mut node = ROOT;
        for b in path.bytes() {
            node = trie.child(node, b)?;
        }
        Some(node)
    }

    fn lookup(trie: &Trie<'_>, path: &str) -> Option<u8> {
        walk(trie, path).and_then(|n| trie.command_index(n))
    }

    #[test]
    fn long_and_short_forms_share_a_command() {
        let mut b = TrieBuilder::<128>::new();
        b.insert("SYSTem:ERRor?", 3).unwrap();
        let nodes = b.build().unwrap();
        let trie = Trie::new(&nodes);

        assert_eq!(lookup(&trie, "SYST:ERR?"), Some(3));
        assert_eq!(lookup(&trie, "SYSTEM:ERROR?"), Some(3));
        assert_eq!(lookup(&trie, "SYST:ERROR?"), Some(3));
        assert_eq!(lookup(&trie, "SYSTEM:ERR?"), Some(3));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut b = TrieBuilder::<64>::new();
        b.insert("TEST:NUMber", 0).unwrap();
        let nodes = b.build().unwrap();
        let trie = Trie::new(&nodes);

        assert_eq!(lookup(&trie, "test:num"), Some(0));
        assert_eq!(lookup(&trie, "Test:Number"), Some(0));
    }

    #[test]
    fn partial_mnemonics_are_not_terminal() {
        let mut b = TrieBuilder::<64>::new();
        b.insert("TEST:NUMber", 0).unwrap();
        let nodes = b.build().unwrap();
        let trie = Trie::new(&nodes);

        // "TEST:NUMB" is neither the short nor the long form.
        let node = walk(&trie, "TEST:NUMB").unwrap();
        assert!(!trie.is_terminal(node));
        assert_eq!(lookup(&trie, "TEST"), None);
    }

    #[test]
    fn unknown_byte_has_no_child() {
        let mut b = TrieBuilder::<64>::new();
        b.insert("RUN", 0).unwrap();
        let nodes = b.build().unwrap();
        let trie = Trie::new(&nodes);

        assert_eq!(walk(&trie, "RUX"), None);
    }

    #[test]
    fn sibling_commands_coexist() {
        let mut b = TrieBuilder::<128>::new();
        b.insert("TEST:NUMber", 0).unwrap();
        b.insert("TEST:STRing", 1).unwrap();
        b.insert("RUN", 2).unwrap();
        let nodes = b.build().unwrap();
        let trie = Trie::new(&nodes);

        assert_eq!(lookup(&trie, "TEST:NUM"), Some(0));
        assert_eq!(lookup(&trie, "TEST:STR"), Some(1));
        assert_eq!(lookup(&trie, "RUN"), Some(2));
    }

    #[test]
    fn conflicting_paths_are_rejected() {
        let mut b = TrieBuilder::<64>::new();
        b.insert("RUN", 0).unwrap();
        assert_eq!(b.insert("RUN", 1), Err(TrieError::Conflict));
        // Same command index is just a redundant insert.
        assert_eq!(b.insert("RUN", 0), Ok(()));
    }

    #[test]
    fn capacity_overflow_is_reported() {
        let mut b = TrieBuilder::<4>::new();
        assert_eq!(b.insert("LONGCOMMAND", 0), Err(TrieError::Full));
    }

    #[test]
    fn empty_and_malformed_mnemonics_are_rejected() {
        let mut b = TrieBuilder::<64>::new();
        assert_eq!(b.insert("", 0), Err(TrieError::BadMnemonic));
        assert_eq!(b.insert("A::B", 0), Err(TrieError::BadMnemonic));
    }
}
