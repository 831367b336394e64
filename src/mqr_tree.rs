//! ## The MQR-Tree
//!
//! A node in this tree has exactly five slots: four quadrants (NW, NE, SW, SE) taken
//! relative to the node's own centroid, plus a CENTER slot for entries whose centroid
//! exactly coincides with the node's. Unlike a quadtree, slot boundaries are not fixed in
//! advance — they move every time the node's own MBR (and therefore its centroid) shifts,
//! which is what the insertion queue in this module exists to handle.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use ordered_float::OrderedFloat;
use tracing::{debug, info};

use crate::exceptions::MqrTreeError;
use crate::geometry::Envelope;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The iteration cap applied to the insertion work queue when a tree is built with
/// [`MqrTree::new`]. See [`MqrTree::with_iteration_cap`] to override it.
pub const DEFAULT_ITERATION_CAP: u64 = 50_000;

/// One of a node's five slots.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    Nw,
    Ne,
    Sw,
    Se,
    Center,
}

impl Quadrant {
    pub const ALL: [Quadrant; 5] = [
        Quadrant::Nw,
        Quadrant::Ne,
        Quadrant::Sw,
        Quadrant::Se,
        Quadrant::Center,
    ];

    fn index(self) -> usize {
        match self {
            Quadrant::Nw => 0,
            Quadrant::Ne => 1,
            Quadrant::Sw => 2,
            Quadrant::Se => 3,
            Quadrant::Center => 4,
        }
    }
}

/// Determines which of a node's five slots an entry belongs in, given the entry's MBR
/// centroid and the node's own MBR centroid.
///
/// An exact (bitwise) centroid match goes to [`Quadrant::Center`]. Otherwise the entry is
/// assigned by comparing coordinates: west/south wins ties go east/north, i.e. an entry
/// exactly on the node's vertical midline is treated as east, and one exactly on the
/// horizontal midline is treated as north.
pub fn find_insert_quad(entry_mbr: &Envelope, node_mbr: &Envelope) -> Quadrant {
    let (ex, ey) = entry_mbr.centroid();
    let (nx, ny) = node_mbr.centroid();
    if ex == nx && ey == ny {
        return Quadrant::Center;
    }
    match (ex < nx, ey < ny) {
        (true, true) => Quadrant::Sw,
        (true, false) => Quadrant::Nw,
        (false, false) => Quadrant::Ne,
        (false, true) => Quadrant::Se,
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeType {
    Normal,
    Center,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
enum Entry<T> {
    Leaf { payload: T, mbr: Envelope },
    Internal { child: Box<Node<T>>, mbr: Envelope },
}

impl<T> Entry<T> {
    fn mbr(&self) -> &Envelope {
        match self {
            Entry::Leaf { mbr, .. } => mbr,
            Entry::Internal { mbr, .. } => mbr,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Node<T> {
    mbr: Envelope,
    node_type: NodeType,
    slots: [Option<Entry<T>>; 5],
}

impl<T> Node<T> {
    /// Builds a one-entry root/child node out of a single entry, unifying the
    /// empty-node case into a constructor so [`Node::insert`] only ever has to handle the
    /// general (non-empty) case.
    fn new_leaf_root(entry: Entry<T>) -> Self {
        let mbr = *entry.mbr();
        let mut slots: [Option<Entry<T>>; 5] = [None, None, None, None, None];
        slots[Quadrant::Center.index()] = Some(entry);
        Node {
            mbr,
            node_type: NodeType::Center,
            slots,
        }
    }

    fn slot(&self, q: Quadrant) -> &Option<Entry<T>> {
        &self.slots[q.index()]
    }

    fn slot_mut(&mut self, q: Quadrant) -> &mut Option<Entry<T>> {
        &mut self.slots[q.index()]
    }

    fn leaf_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|e| match e {
                Entry::Leaf { .. } => 1,
                Entry::Internal { child, .. } => child.leaf_count(),
            })
            .sum()
    }

    /// Inserts `entry` into this (non-empty) node, expanding the node's MBR, detecting any
    /// resulting slot shifts, and draining the insertion queue those shifts produce.
    fn insert(&mut self, entry: Entry<T>, budget: &mut Budget) -> Result<(), MqrTreeError> {
        let orig_mbr = self.mbr;
        self.mbr = self.mbr.union(entry.mbr());

        let mut queue: VecDeque<(Quadrant, Entry<T>)> = VecDeque::new();
        let quad = find_insert_quad(entry.mbr(), &self.mbr);
        queue.push_back((quad, entry));

        self.find_shifted_objs(&orig_mbr, &mut queue);
        self.insert_queue(&mut queue, budget)
    }

    /// Detects whether this node's centroid moved and, if so, requeues every slot whose
    /// recomputed quadrant no longer matches the slot it currently occupies.
    fn find_shifted_objs(&mut self, orig_mbr: &Envelope, queue: &mut VecDeque<(Quadrant, Entry<T>)>) {
        if self.mbr.centroid() == orig_mbr.centroid() {
            return;
        }

        if self.node_type == NodeType::Center {
            debug!("centroid moved under a CENTER node; requeuing all of its entries");
            // The node's centroid moved out from under every one of its slots, including
            // the CENTER one: every entry must be requeued, not just CENTER's.
            for q in Quadrant::ALL {
                if let Some(entry) = self.slots[q.index()].take() {
                    let new_quad = find_insert_quad(entry.mbr(), &self.mbr);
                    queue.push_back((new_quad, entry));
                }
            }
            self.node_type = NodeType::Normal;
            return;
        }

        for q in Quadrant::ALL {
            if q == Quadrant::Center {
                continue;
            }
            if let Some(entry) = &self.slots[q.index()] {
                let new_quad = find_insert_quad(entry.mbr(), &self.mbr);
                if new_quad != q {
                    let entry = self.slots[q.index()].take().unwrap();
                    debug!(from = ?q, to = ?new_quad, "shifted entry requeued");
                    if new_quad == Quadrant::Center {
                        self.node_type = NodeType::Center;
                    }
                    queue.push_back((new_quad, entry));
                }
            }
        }
    }

    /// Drains the FIFO insertion queue, placing, recursing into, or splitting slots as
    /// required. Every entry assigned to [`Quadrant::Center`] is handled the same way
    /// whether it arrived there by direct insertion or by a later centroid shift.
    fn insert_queue(
        &mut self,
        queue: &mut VecDeque<(Quadrant, Entry<T>)>,
        budget: &mut Budget,
    ) -> Result<(), MqrTreeError> {
        while let Some((quad, entry)) = queue.pop_front() {
            budget.tick()?;

            if quad == Quadrant::Center {
                self.place_center_entry(entry, budget)?;
                continue;
            }

            match self.slot_mut(quad).take() {
                None => {
                    *self.slot_mut(quad) = Some(entry);
                }
                Some(Entry::Internal { mut child, .. }) => {
                    child.insert(entry, budget)?;
                    let child_mbr = child.mbr;
                    *self.slot_mut(quad) = Some(Entry::Internal {
                        child,
                        mbr: child_mbr,
                    });
                }
                Some(existing @ Entry::Leaf { .. }) => {
                    debug!(quad = ?quad, "collision with existing leaf; splitting into a child node");
                    let mut child = Node::new_leaf_root(existing);
                    child.insert(entry, budget)?;
                    let child_mbr = child.mbr;
                    *self.slot_mut(quad) = Some(Entry::Internal {
                        child: Box::new(child),
                        mbr: child_mbr,
                    });
                }
            }
        }
        Ok(())
    }

    /// Places an entry known to share this node's own centroid (i.e. one routed to
    /// [`Quadrant::Center`]).
    ///
    /// A CENTER-typed node is exempt from the usual "entry lives in the quadrant
    /// `find_insert_quad` returns" rule, which is
    /// what lets this terminate: once the CENTER slot itself is taken, a second
    /// co-located entry can never be re-routed to CENTER and collide with itself the way
    /// a NORMAL slot collision does, so the remaining NW/NE/SW/SE slots are used as plain
    /// chain storage first. Only once all five are full does the CENTER occupant get
    /// pushed one level down into a nested chain node, which starts with four slots free
    /// again — so every call either places `entry` directly or recurses exactly once into
    /// a smaller problem, and the chain always terminates.
    fn place_center_entry(&mut self, entry: Entry<T>, budget: &mut Budget) -> Result<(), MqrTreeError> {
        budget.tick()?;
        self.node_type = NodeType::Center;

        if self.slot(Quadrant::Center).is_none() {
            *self.slot_mut(Quadrant::Center) = Some(entry);
            return Ok(());
        }

        for q in [Quadrant::Nw, Quadrant::Ne, Quadrant::Sw, Quadrant::Se] {
            if self.slot(q).is_none() {
                *self.slot_mut(q) = Some(entry);
                return Ok(());
            }
        }

        debug!("CENTER chain level full; nesting another chain node");
        match self.slot_mut(Quadrant::Center).take().unwrap() {
            Entry::Internal { mut child, .. } => {
                child.place_center_entry(entry, budget)?;
                let child_mbr = child.mbr;
                *self.slot_mut(Quadrant::Center) = Some(Entry::Internal {
                    child,
                    mbr: child_mbr,
                });
            }
            leaf @ Entry::Leaf { .. } => {
                let mut child = Node::new_leaf_root(leaf);
                child.place_center_entry(entry, budget)?;
                let child_mbr = child.mbr;
                *self.slot_mut(Quadrant::Center) = Some(Entry::Internal {
                    child: Box::new(child),
                    mbr: child_mbr,
                });
            }
        }
        Ok(())
    }

    fn search<'a>(&'a self, query: &Envelope, out: &mut Vec<&'a T>) {
        for entry in self.slots.iter().flatten() {
            if !entry.mbr().intersects(query) {
                continue;
            }
            match entry {
                Entry::Leaf { payload, .. } => out.push(payload),
                Entry::Internal { child, .. } => child.search(query, out),
            }
        }
    }

    fn occupied(&self) -> impl Iterator<Item = (Quadrant, &Entry<T>)> {
        Quadrant::ALL
            .into_iter()
            .filter_map(move |q| self.slots[q.index()].as_ref().map(|e| (q, e)))
    }

    /// Checks that this node's MBR is the union of its entries' MBRs (to within
    /// `epsilon`) and that a NORMAL node's slot keys match `find_insert_quad` for their
    /// entries, recursively.
    fn check_invariants(&self, epsilon: f64) -> Result<(), String> {
        let mut union: Option<Envelope> = None;
        for (quadrant, entry) in self.occupied() {
            union = Some(match union {
                None => *entry.mbr(),
                Some(u) => u.union(entry.mbr()),
            });

            if self.node_type == NodeType::Normal {
                let expected = find_insert_quad(entry.mbr(), &self.mbr);
                if expected != quadrant {
                    return Err(format!(
                        "quadrant invariant violated: entry in slot {quadrant:?} belongs in {expected:?}"
                    ));
                }
            }

            if let Entry::Internal { child, .. } = entry {
                child.check_invariants(epsilon)?;
            }
        }

        if let Some(union) = union {
            let dx_min = (union.min_x() - self.mbr.min_x()).abs();
            let dx_max = (union.max_x() - self.mbr.max_x()).abs();
            let dy_min = (union.min_y() - self.mbr.min_y()).abs();
            let dy_max = (union.max_y() - self.mbr.max_y()).abs();
            if dx_min > epsilon || dx_max > epsilon || dy_min > epsilon || dy_max > epsilon {
                return Err(format!(
                    "MBR invariant violated: node MBR {:?} does not match union of entries {:?}",
                    self.mbr, union
                ));
            }
        }
        Ok(())
    }

    /// Checks that no two sibling entries in this node (or any descendant) have
    /// overlapping interiors. Only meaningful when every inserted envelope is a point.
    fn check_no_sibling_overlap(&self) -> bool {
        let entries: Vec<&Entry<T>> = self.occupied().map(|(_, e)| e).collect();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                if entries[i].mbr().interiors_overlap(entries[j].mbr()) {
                    return false;
                }
            }
        }
        entries.iter().all(|e| match e {
            Entry::Leaf { .. } => true,
            Entry::Internal { child, .. } => child.check_no_sibling_overlap(),
        })
    }
}

/// Tracks the remaining insertion work budget, turning a runaway rebalancing cascade into
/// a reported error instead of an unbounded loop.
struct Budget {
    remaining: u64,
    cap: u64,
}

impl Budget {
    fn new(cap: u64) -> Self {
        Budget { remaining: cap, cap }
    }

    fn tick(&mut self) -> Result<(), MqrTreeError> {
        if self.remaining == 0 {
            return Err(MqrTreeError::IterationCapExceeded { cap: self.cap });
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// An entry in the best-first k-NN search's outer priority queue: either a node reachable
/// through an internal entry, or a leaf candidate ready to be offered to the result set.
enum Candidate<'a, T> {
    Node(&'a Node<T>),
    Leaf(&'a T),
}

struct HeapItem<'a, T> {
    key: OrderedFloat<f64>,
    candidate: Candidate<'a, T>,
}

impl<'a, T> PartialEq for HeapItem<'a, T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<'a, T> Eq for HeapItem<'a, T> {}

impl<'a, T> PartialOrd for HeapItem<'a, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, T> Ord for HeapItem<'a, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that `BinaryHeap`, which is a max-heap, pops the smallest key first.
        other.key.cmp(&self.key)
    }
}

/// A bounded max-heap of the k best candidates found so far, keyed by squared distance so
/// the current worst kept candidate is always at the top.
struct BestK<'a, T> {
    k: usize,
    heap: BinaryHeap<(OrderedFloat<f64>, &'a T)>,
}

impl<'a, T> BestK<'a, T> {
    fn new(k: usize) -> Self {
        BestK {
            k,
            heap: BinaryHeap::with_capacity(k),
        }
    }

    fn worst(&self) -> Option<f64> {
        self.heap.peek().map(|(d, _)| d.into_inner())
    }

    fn offer(&mut self, dist_sq: f64, payload: &'a T) {
        if self.heap.len() < self.k {
            self.heap.push((OrderedFloat(dist_sq), payload));
        } else if let Some(worst) = self.worst() {
            if dist_sq < worst {
                self.heap.pop();
                self.heap.push((OrderedFloat(dist_sq), payload));
            }
        }
    }

    fn into_sorted_vec(self) -> Vec<&'a T> {
        let mut items: Vec<(OrderedFloat<f64>, &'a T)> = self.heap.into_vec();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items.into_iter().map(|(_, payload)| payload).collect()
    }
}

/// An in-memory spatial index over axis-aligned bounding boxes, keyed by a five-slot
/// (NW/NE/SW/SE/CENTER) node shape whose slot boundaries move with the node's own MBR.
///
/// The tree is not height-balanced; it trades that for zero MBR overlap between siblings
/// holding distinct centroids.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct MqrTree<T> {
    root: Option<Node<T>>,
    iteration_cap: u64,
}

impl<T> Default for MqrTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MqrTree<T> {
    /// Creates an empty tree with the default iteration cap.
    pub fn new() -> Self {
        info!(cap = DEFAULT_ITERATION_CAP, "creating new MqrTree");
        MqrTree {
            root: None,
            iteration_cap: DEFAULT_ITERATION_CAP,
        }
    }

    /// Creates an empty tree with a caller-supplied iteration cap, overriding
    /// [`DEFAULT_ITERATION_CAP`]. Mainly useful for tests that want a small cap to exercise
    /// [`MqrTreeError::IterationCapExceeded`] cheaply.
    pub fn with_iteration_cap(cap: u64) -> Self {
        info!(cap, "creating new MqrTree with custom iteration cap");
        MqrTree {
            root: None,
            iteration_cap: cap,
        }
    }

    /// Returns the number of payloads stored in the tree.
    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, Node::leaf_count)
    }

    /// Returns true if the tree holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the node-MBR and slot-quadrant invariants across the whole tree,
    /// within a small floating-point tolerance. Intended for tests and debugging, not for
    /// use on a hot path.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invariant violation found.
    pub fn check_invariants(&self, epsilon: f64) -> Result<(), String> {
        match &self.root {
            None => Ok(()),
            Some(root) => root.check_invariants(epsilon),
        }
    }

    /// Checks that no two sibling entries anywhere in the tree overlap as interiors.
    /// Only meaningful when every inserted envelope is a point.
    pub fn check_no_sibling_overlap(&self) -> bool {
        match &self.root {
            None => true,
            Some(root) => root.check_no_sibling_overlap(),
        }
    }

    /// Inserts `payload` at `mbr`.
    ///
    /// # Errors
    ///
    /// Returns [`MqrTreeError::IterationCapExceeded`] if the insertion's rebalancing
    /// cascade exceeds the tree's iteration cap. The tree must not be used again after
    /// this error.
    pub fn insert(&mut self, payload: T, mbr: Envelope) -> Result<(), MqrTreeError> {
        info!(
            min_x = mbr.min_x(),
            max_x = mbr.max_x(),
            min_y = mbr.min_y(),
            max_y = mbr.max_y(),
            "inserting entry"
        );
        let entry = Entry::Leaf { payload, mbr };
        let mut budget = Budget::new(self.iteration_cap);
        match &mut self.root {
            None => {
                self.root = Some(Node::new_leaf_root(entry));
                Ok(())
            }
            Some(root) => root.insert(entry, &mut budget),
        }
    }

    /// Returns every payload whose envelope intersects `query`. An empty tree returns an
    /// empty vector.
    pub fn search(&self, query: &Envelope) -> Vec<&T> {
        info!(
            min_x = query.min_x(),
            max_x = query.max_x(),
            min_y = query.min_y(),
            max_y = query.max_y(),
            "performing region search"
        );
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.search(query, &mut out);
        }
        out
    }

    /// Returns up to `k` payloads nearest to `point`, nearest first, using a best-first
    /// search of node and leaf MBRs.
    ///
    /// Distance to an internal entry is measured to its node MBR; distance to a leaf is
    /// measured to that leaf envelope's centroid, not its boundary, matching this tree's
    /// definition of "nearest" for non-point envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`MqrTreeError::InvalidK`] if `k == 0`. An empty tree returns an empty
    /// vector rather than an error.
    pub fn knn_search(&self, point: (f64, f64), k: usize) -> Result<Vec<&T>, MqrTreeError> {
        info!(x = point.0, y = point.1, k, "performing k-NN search");
        if k == 0 {
            return Err(MqrTreeError::InvalidK { k });
        }

        let mut best = BestK::new(k);
        let root = match &self.root {
            None => return Ok(Vec::new()),
            Some(root) => root,
        };

        let mut heap: BinaryHeap<HeapItem<'_, T>> = BinaryHeap::new();
        heap.push(HeapItem {
            key: OrderedFloat(root.mbr.min_distance_sq(point.0, point.1)),
            candidate: Candidate::Node(root),
        });

        while let Some(HeapItem { key, candidate }) = heap.pop() {
            if let Some(worst) = best.worst() {
                if best.heap.len() >= k && key.into_inner() > worst {
                    break;
                }
            }
            match candidate {
                Candidate::Leaf(payload) => {
                    best.offer(key.into_inner(), payload);
                }
                Candidate::Node(node) => {
                    for entry in node.slots.iter().flatten() {
                        match entry {
                            Entry::Leaf { payload, mbr } => {
                                let (cx, cy) = mbr.centroid();
                                let d = crate::geometry::dist_sq(point, (cx, cy));
                                heap.push(HeapItem {
                                    key: OrderedFloat(d),
                                    candidate: Candidate::Leaf(payload),
                                });
                            }
                            Entry::Internal { child, mbr } => {
                                let d = mbr.min_distance_sq(point.0, point.1);
                                heap.push(HeapItem {
                                    key: OrderedFloat(d),
                                    candidate: Candidate::Node(child),
                                });
                            }
                        }
                    }
                }
            }
        }

        Ok(best.into_sorted_vec())
    }
}
