use std::collections::HashMap;

use crate::graph::NodeId;

pub type GroupId = u32;

/// A logical execution cursor walking the graph. Not a thread; strands are
/// interleaved cooperatively within one tick.
#[derive(Debug, Clone)]
pub struct Strand {
    pub node: NodeId,
    /// Time spent parked at the current node.
    pub time_slice: f32,
    /// Return addresses pushed by `Call`.
    pub stack: Vec<NodeId>,
    /// Fork group this strand counts toward, if any.
    pub group: Option<GroupId>,
    /// Group this strand spawned when it converted to a watcher.
    pub spawned_group: Option<GroupId>,
    pub watcher: bool,
    /// Parked at a merge point until the group releases.
    pub waiting: bool,
    /// Inbox node this strand was spawned for; its destructor runs when the
    /// strand dies.
    pub inbox: Option<NodeId>,
    pub dead: bool,
}

impl Strand {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            time_slice: 0.0,
            stack: Vec::new(),
            group: None,
            spawned_group: None,
            watcher: false,
            waiting: false,
            inbox: None,
            dead: false,
        }
    }

    pub fn with_group(node: NodeId, group: Option<GroupId>) -> Self {
        Self {
            group,
            ..Self::new(node)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForkGroup {
    pub parent: Option<GroupId>,
    /// Live sibling strands still accounted for by this group.
    pub members: usize,
}

/// Fork-group bookkeeping for one execution state. Integer group ids stand in
/// for pointer identity when matching merges to their fork.
#[derive(Debug, Default, Clone)]
pub struct GroupTable {
    groups: HashMap<GroupId, ForkGroup>,
    next: GroupId,
}

impl GroupTable {
    pub fn create(&mut self, parent: Option<GroupId>, members: usize) -> GroupId {
        let id = self.next;
        self.next += 1;
        self.groups.insert(id, ForkGroup { parent, members });
        id
    }

    pub fn get(&self, id: GroupId) -> Option<&ForkGroup> {
        self.groups.get(&id)
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut ForkGroup> {
        self.groups.get_mut(&id)
    }

    pub fn remove(&mut self, id: GroupId) -> Option<ForkGroup> {
        self.groups.remove(&id)
    }

    /// Whether `group` is `ancestor` or descends from it via parent links.
    pub fn descends_from(&self, group: Option<GroupId>, ancestor: GroupId) -> bool {
        let mut cur = group;
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.groups.get(&id).and_then(|g| g.parent);
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
