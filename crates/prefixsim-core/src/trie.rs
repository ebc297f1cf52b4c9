//! Prefix trie over token blocks.
//!
//! Each node stands for one block at one prefix position and records the
//! set of workers holding that exact prefix. Nodes live in a flat map keyed
//! by [`BlockHash`]; parents refer to children by local hash, so the
//! longest-prefix walk touches one map entry per query block regardless of
//! how many sequences the trie has seen.
//!
//! Invariants maintained by every mutation:
//! - a worker listed on a node is listed on every ancestor of that node;
//! - no node exists with an empty worker set (empty nodes are pruned).

use crate::block::{BlockHash, LocalBlockHash, TokenBlock};
use prefixsim_algorithms::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How much of a query a single worker has cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOverlap {
    pub matched_blocks: u32,
    pub matched_tokens: u32,
}

#[derive(Debug)]
struct TrieNode {
    parent: Option<BlockHash>,
    depth: u32,
    children: HashMap<LocalBlockHash, BlockHash>,
    workers: BTreeSet<WorkerId>,
}

/// Blocks affected by a removal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrieRemoval {
    /// Nodes the worker was removed from, parents before children.
    pub removed: Vec<BlockHash>,
    /// Nodes deleted because no worker holds them any more.
    pub pruned: Vec<BlockHash>,
}

impl TrieRemoval {
    fn extend(&mut self, other: TrieRemoval) {
        self.removed.extend(other.removed);
        self.pruned.extend(other.pruned);
    }
}

/// Radix tree keyed by block signatures.
#[derive(Debug)]
pub struct PrefixTrie {
    block_size: u32,
    /// Children of the (implicit) root.
    root: HashMap<LocalBlockHash, BlockHash>,
    nodes: HashMap<BlockHash, TrieNode>,
}

impl PrefixTrie {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            root: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of nodes (distinct cached prefixes) in the trie.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Workers holding the prefix ending at `hash`.
    pub fn workers_at(&self, hash: &BlockHash) -> Option<&BTreeSet<WorkerId>> {
        self.nodes.get(hash).map(|n| &n.workers)
    }

    pub fn contains(&self, worker: WorkerId, hash: &BlockHash) -> bool {
        self.nodes
            .get(hash)
            .is_some_and(|n| n.workers.contains(&worker))
    }

    /// Number of nodes listing `worker`.
    pub fn worker_node_count(&self, worker: WorkerId) -> usize {
        self.nodes
            .values()
            .filter(|n| n.workers.contains(&worker))
            .count()
    }

    fn children_of(&self, parent: Option<BlockHash>) -> Option<&HashMap<LocalBlockHash, BlockHash>> {
        match parent {
            None => Some(&self.root),
            Some(hash) => self.nodes.get(&hash).map(|n| &n.children),
        }
    }

    /// Longest cached prefix of `blocks`, per worker.
    ///
    /// Walks from the root following each block's signature and stops at the
    /// first block with no matching child. Workers that hold none of the
    /// query are absent from the result.
    pub fn find_matches(&self, blocks: &[TokenBlock]) -> BTreeMap<WorkerId, CacheOverlap> {
        let mut scores = BTreeMap::new();
        let mut children = &self.root;

        for block in blocks {
            let Some(node) = children
                .get(&block.local_hash)
                .and_then(|hash| self.nodes.get(hash))
            else {
                break;
            };

            // Ancestor invariant: deeper worker sets are subsets, so
            // overwriting leaves each worker at its deepest depth.
            for &worker in &node.workers {
                scores.insert(
                    worker,
                    CacheOverlap {
                        matched_blocks: node.depth,
                        matched_tokens: node.depth * self.block_size,
                    },
                );
            }
            children = &node.children;
        }

        scores
    }

    /// Number of leading blocks of `blocks` that `worker` already holds.
    pub fn held_prefix(&self, worker: WorkerId, blocks: &[TokenBlock]) -> usize {
        blocks
            .iter()
            .take_while(|b| self.contains(worker, &b.hash))
            .count()
    }

    /// Record `worker` along the whole path of `blocks`.
    ///
    /// Returns the hashes of the nodes the worker was newly added to.
    /// Inserting a path the worker already holds changes nothing.
    pub fn insert(&mut self, blocks: &[TokenBlock], worker: WorkerId) -> Vec<BlockHash> {
        let mut added = Vec::new();
        let mut parent: Option<BlockHash> = None;

        for block in blocks {
            let children = match parent {
                None => &mut self.root,
                Some(p) => match self.nodes.get_mut(&p) {
                    Some(node) => &mut node.children,
                    None => break,
                },
            };
            let hash = *children.entry(block.local_hash).or_insert(block.hash);

            let node = self.nodes.entry(hash).or_insert_with(|| TrieNode {
                parent,
                depth: block.depth,
                children: HashMap::new(),
                workers: BTreeSet::new(),
            });
            if node.workers.insert(worker) {
                added.push(hash);
            }
            parent = Some(hash);
        }

        added
    }

    /// Remove `worker` from every node at or beyond index `from_depth` on the
    /// path of `blocks` (0 removes the whole path), and from the descendants
    /// of those nodes.
    pub fn remove(
        &mut self,
        worker: WorkerId,
        blocks: &[TokenBlock],
        from_depth: usize,
    ) -> TrieRemoval {
        let mut children = &self.root;
        let mut target = None;

        for (i, block) in blocks.iter().enumerate() {
            let Some(hash) = children.get(&block.local_hash).copied() else {
                break;
            };
            if i == from_depth {
                target = Some(hash);
                break;
            }
            match self.nodes.get(&hash) {
                Some(node) => children = &node.children,
                None => break,
            }
        }

        match target {
            Some(hash) => self.remove_subtree(worker, hash),
            None => TrieRemoval::default(),
        }
    }

    /// Remove `worker` from the node at `hash` and all of its descendants.
    pub fn remove_subtree(&mut self, worker: WorkerId, hash: BlockHash) -> TrieRemoval {
        let mut removal = TrieRemoval::default();
        let mut stack = vec![hash];

        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            if !node.workers.remove(&worker) {
                continue;
            }
            removal.removed.push(current);
            stack.extend(node.children.values().copied());
        }

        // Children of an emptied node were emptied too, so pruning the
        // topmost empty nodes first leaves no dangling children.
        for &current in &removal.removed {
            let is_empty = self
                .nodes
                .get(&current)
                .is_some_and(|n| n.workers.is_empty());
            if is_empty {
                self.prune(current, &mut removal.pruned);
            }
        }

        removal
    }

    /// Remove `worker` from the whole trie.
    pub fn remove_worker(&mut self, worker: WorkerId) -> TrieRemoval {
        let tops: Vec<BlockHash> = self.root.values().copied().collect();
        let mut removal = TrieRemoval::default();
        for hash in tops {
            removal.extend(self.remove_subtree(worker, hash));
        }
        removal
    }

    /// Delete the node at `hash` and its subtree, detaching it from its parent.
    fn prune(&mut self, hash: BlockHash, pruned: &mut Vec<BlockHash>) {
        let Some(node) = self.nodes.remove(&hash) else {
            return;
        };

        let siblings = match node.parent {
            None => Some(&mut self.root),
            Some(p) => self.nodes.get_mut(&p).map(|n| &mut n.children),
        };
        if let Some(siblings) = siblings {
            siblings.retain(|_, child| *child != hash);
        }
        pruned.push(hash);

        let mut stack: Vec<BlockHash> = node.children.into_values().collect();
        while let Some(child) = stack.pop() {
            if let Some(child_node) = self.nodes.remove(&child) {
                pruned.push(child);
                stack.extend(child_node.children.into_values());
            }
        }
    }

    pub fn clear(&mut self) {
        self.root.clear();
        self.nodes.clear();
    }

    /// Check the structural invariants, returning the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        for (&hash, node) in &self.nodes {
            if node.workers.is_empty() {
                return Err(format!("node {:?} has no workers", hash));
            }

            let Some(siblings) = self.children_of(node.parent) else {
                return Err(format!("node {:?} has a missing parent", hash));
            };
            if !siblings.values().any(|&child| child == hash) {
                return Err(format!("node {:?} is not linked from its parent", hash));
            }

            if let Some(parent_hash) = node.parent {
                let parent = &self.nodes[&parent_hash];
                if parent.depth + 1 != node.depth {
                    return Err(format!("node {:?} has inconsistent depth", hash));
                }
                if let Some(orphan) = node.workers.difference(&parent.workers).next() {
                    return Err(format!(
                        "worker {} holds {:?} but not its parent {:?}",
                        orphan, hash, parent_hash
                    ));
                }
            } else if node.depth != 1 {
                return Err(format!("root child {:?} has depth {}", hash, node.depth));
            }

            for child in node.children.values() {
                if !self.nodes.contains_key(child) {
                    return Err(format!("node {:?} links a missing child", hash));
                }
            }
        }
        Ok(())
    }
}
