//! Dominance Analysis
//!
//! This module provides the dominance information region rolling needs:
//! - Dominator tree (iterative dataflow algorithm)
//! - Post-dominator tree (same algorithm on the reversed CFG, with a virtual
//!   exit joining every block that leaves the function)
//! - Dominance frontiers

use super::{IrBlockId, IrFunction};
use std::collections::{HashMap, HashSet, VecDeque};

/// Direction the CFG is walked in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Immediate-dominator relation over the blocks of one function.
///
/// A block D dominates block B if every path from the root to B goes through D.
/// Blocks unreachable from the root have no entry.
#[derive(Debug, Clone)]
struct DomInfo {
    /// Immediate dominator for each block (roots have none)
    idom: HashMap<IrBlockId, IrBlockId>,

    /// Children in the dominator tree
    children: HashMap<IrBlockId, Vec<IrBlockId>>,

    /// Tree depth for each block (roots = 0)
    depth: HashMap<IrBlockId, usize>,

    /// Roots of the tree (entry, or every exit for post-dominance)
    roots: Vec<IrBlockId>,
}

impl DomInfo {
    /// Cooper, Harvey and Kennedy's simple iterative algorithm. A virtual root
    /// (index 0) precedes the real roots so several exits can be handled.
    fn compute(function: &IrFunction, direction: Direction) -> Self {
        let blocks = function.block_ids();
        let roots: Vec<IrBlockId> = match direction {
            Direction::Forward => function.entry_block().into_iter().collect(),
            Direction::Backward => blocks
                .iter()
                .copied()
                .filter(|&b| function.successors(b).is_empty())
                .collect(),
        };

        let succs = |b: IrBlockId| match direction {
            Direction::Forward => function.successors(b),
            Direction::Backward => function.predecessors(b),
        };
        let preds = |b: IrBlockId| match direction {
            Direction::Forward => function.predecessors(b),
            Direction::Backward => function.successors(b),
        };

        // Reverse postorder from the virtual root, index 0 reserved for it
        let rpo = Self::reverse_postorder(&roots, &succs);
        let mut index: HashMap<IrBlockId, usize> = HashMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            index.insert(b, i + 1);
        }

        let mut idom: Vec<Option<usize>> = vec![None; rpo.len() + 1];
        idom[0] = Some(0);
        for root in &roots {
            if let Some(&i) = index.get(root) {
                idom[i] = Some(0);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for (pos, &block) in rpo.iter().enumerate() {
                let b = pos + 1;
                if roots.contains(&block) {
                    continue;
                }
                let mut new_idom: Option<usize> = None;
                for pred in preds(block) {
                    let Some(&p) = index.get(&pred) else {
                        continue;
                    };
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => Self::intersect(current, p, &idom),
                    });
                }
                if new_idom.is_some() && new_idom != idom[b] {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let mut final_idom = HashMap::new();
        let mut children: HashMap<IrBlockId, Vec<IrBlockId>> = HashMap::new();
        for (pos, &block) in rpo.iter().enumerate() {
            if let Some(d) = idom[pos + 1] {
                if d != 0 {
                    let dom = rpo[d - 1];
                    final_idom.insert(block, dom);
                    children.entry(dom).or_default().push(block);
                }
            }
        }

        // Depths via BFS from the roots
        let mut depth = HashMap::new();
        let mut queue: VecDeque<IrBlockId> = VecDeque::new();
        for &root in &roots {
            depth.insert(root, 0);
            queue.push_back(root);
        }
        while let Some(block) = queue.pop_front() {
            let d = depth[&block];
            for &child in children.get(&block).map(|c| c.as_slice()).unwrap_or(&[]) {
                depth.insert(child, d + 1);
                queue.push_back(child);
            }
        }

        Self {
            idom: final_idom,
            children,
            depth,
            roots,
        }
    }

    /// Reverse postorder of the blocks reachable from `roots`
    fn reverse_postorder(
        roots: &[IrBlockId],
        succs: &dyn Fn(IrBlockId) -> Vec<IrBlockId>,
    ) -> Vec<IrBlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();

        for &root in roots {
            if !visited.insert(root) {
                continue;
            }
            let mut stack = vec![(root, succs(root), 0usize)];
            while let Some((block, next, i)) = stack.last_mut() {
                if *i < next.len() {
                    let succ = next[*i];
                    *i += 1;
                    if visited.insert(succ) {
                        let s = succs(succ);
                        stack.push((succ, s, 0));
                    }
                } else {
                    postorder.push(*block);
                    stack.pop();
                }
            }
        }

        postorder.reverse();
        postorder
    }

    /// Walk both fingers up the tree until they meet (indices are RPO + 1)
    fn intersect(mut b1: usize, mut b2: usize, idom: &[Option<usize>]) -> usize {
        while b1 != b2 {
            while b1 > b2 {
                match idom[b1] {
                    Some(d) => b1 = d,
                    None => return b2,
                }
            }
            while b2 > b1 {
                match idom[b2] {
                    Some(d) => b2 = d,
                    None => return b1,
                }
            }
        }
        b1
    }

    fn dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        if a == b {
            return self.depth.contains_key(&a);
        }
        let mut current = b;
        while let Some(&dom) = self.idom.get(&current) {
            if dom == a {
                return true;
            }
            current = dom;
        }
        false
    }
}

/// Dominator tree for a function's control flow graph.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    info: DomInfo,
}

impl DominatorTree {
    pub fn compute(function: &IrFunction) -> Self {
        Self {
            info: DomInfo::compute(function, Direction::Forward),
        }
    }

    /// Get the immediate dominator of a block.
    pub fn idom(&self, block: IrBlockId) -> Option<IrBlockId> {
        self.info.idom.get(&block).copied()
    }

    /// Get children of a block in the dominator tree.
    pub fn children(&self, block: IrBlockId) -> &[IrBlockId] {
        self.info
            .children
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn depth(&self, block: IrBlockId) -> usize {
        self.info.depth.get(&block).copied().unwrap_or(0)
    }

    /// Check if block A dominates block B.
    pub fn dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        self.info.dominates(a, b)
    }

    pub fn strictly_dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn is_reachable(&self, block: IrBlockId) -> bool {
        self.info.depth.contains_key(&block)
    }
}

/// Post-dominator tree: B post-dominates A if every path from A to a
/// function exit goes through B.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    info: DomInfo,
}

impl PostDominatorTree {
    pub fn compute(function: &IrFunction) -> Self {
        Self {
            info: DomInfo::compute(function, Direction::Backward),
        }
    }

    /// Immediate post-dominator; `None` for exits and for blocks whose only
    /// common post-dominator is the virtual exit
    pub fn ipdom(&self, block: IrBlockId) -> Option<IrBlockId> {
        self.info.idom.get(&block).copied()
    }

    pub fn post_dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        self.info.dominates(a, b)
    }

    /// Blocks without successors
    pub fn exits(&self) -> &[IrBlockId] {
        &self.info.roots
    }
}

/// Dominance frontier of every block: the blocks where its dominance ends.
#[derive(Debug, Clone, Default)]
pub struct DominanceFrontier {
    frontier: HashMap<IrBlockId, HashSet<IrBlockId>>,
}

impl DominanceFrontier {
    /// Standard runner-based construction over join points
    pub fn compute(function: &IrFunction, domtree: &DominatorTree) -> Self {
        let mut frontier: HashMap<IrBlockId, HashSet<IrBlockId>> = HashMap::new();

        for block in function.block_ids() {
            if !domtree.is_reachable(block) {
                continue;
            }
            let preds: Vec<IrBlockId> = function
                .predecessors(block)
                .into_iter()
                .filter(|&p| domtree.is_reachable(p))
                .collect();
            if preds.len() < 2 {
                continue;
            }
            let idom = domtree.idom(block);
            for pred in preds {
                let mut runner = Some(pred);
                while let Some(r) = runner {
                    if Some(r) == idom {
                        break;
                    }
                    frontier.entry(r).or_default().insert(block);
                    runner = domtree.idom(r);
                }
            }
        }

        Self { frontier }
    }

    pub fn frontier(&self, block: IrBlockId) -> Option<&HashSet<IrBlockId>> {
        self.frontier.get(&block)
    }

    pub fn contains(&self, block: IrBlockId, target: IrBlockId) -> bool {
        self.frontier
            .get(&block)
            .is_some_and(|f| f.contains(&target))
    }
}
