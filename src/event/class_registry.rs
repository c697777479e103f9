//! The class registry maps event classes to small integer ids that are sent on the wire, and
//!  creates event instances from those ids on the receiving side.
//!
//! Every class is registered with a version. Within a class group, ids are assigned in
//!  ascending order of (version, name), so a peer with an older build knows a prefix of the
//!  newer peer's classes with identical ids. During the handshake the peers agree on the number
//!  of shared classes, and that number must end on a version border - otherwise the peers would
//!  disagree about a class with the same id.
//!
//! The registry is built once and then shared read-only between connections. The only mutable
//!  state is the per-class bit statistics, which are atomic.

use crate::event::NetEvent;
use anyhow::bail;
use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

bitflags! {
    /// the set of class groups an event class is registered for
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct NetClassGroupMask: u32 {
        const GAME = 1 << 0;
        const COMMUNITY = 1 << 1;
        const MASTER = 1 << 2;
    }
}

/// A class group is an independent id space, e.g. game traffic vs. traffic to a master server
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NetClassGroup {
    Game,
    Community,
    Master,
}

impl NetClassGroup {
    pub const ALL: [NetClassGroup; 3] = [NetClassGroup::Game, NetClassGroup::Community, NetClassGroup::Master];

    pub fn mask(&self) -> NetClassGroupMask {
        match self {
            NetClassGroup::Game => NetClassGroupMask::GAME,
            NetClassGroup::Community => NetClassGroupMask::COMMUNITY,
            NetClassGroup::Master => NetClassGroupMask::MASTER,
        }
    }
}

pub type EventFactory = Arc<dyn Fn() -> Box<dyn NetEvent> + Send + Sync>;

/// number of bits needed to encode ids `0..count`, i.e. ceil(log2(count))
pub fn class_id_bit_size(count: u32) -> u8 {
    if count <= 1 {
        0
    }
    else {
        (u32::BITS - (count - 1).leading_zeros()) as u8
    }
}

pub struct ClassRep {
    name: &'static str,
    version: u32,
    groups: NetClassGroupMask,
    factory: EventFactory,
    initial_update_count: AtomicU64,
    initial_update_bits: AtomicU64,
}

impl Debug for ClassRep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClassRep{{{:?} v{} {:?}}}", self.name, self.version, self.groups)
    }
}

impl ClassRep {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn groups(&self) -> NetClassGroupMask {
        self.groups
    }

    pub fn create(&self) -> Box<dyn NetEvent> {
        (self.factory)()
    }

    /// records the size of one serialized instance
    pub fn add_initial_update(&self, bits: usize) {
        self.initial_update_count.fetch_add(1, Ordering::Relaxed);
        self.initial_update_bits.fetch_add(bits as u64, Ordering::Relaxed);
    }

    /// (number of serialized instances, total bits)
    pub fn initial_update_stats(&self) -> (u64, u64) {
        (
            self.initial_update_count.load(Ordering::Relaxed),
            self.initial_update_bits.load(Ordering::Relaxed),
        )
    }
}

#[derive(Default)]
pub struct ClassRegistryBuilder {
    classes: Vec<ClassRep>,
}

impl ClassRegistryBuilder {
    pub fn new() -> ClassRegistryBuilder {
        Default::default()
    }

    pub fn register_event(
        mut self,
        name: &'static str,
        version: u32,
        groups: NetClassGroupMask,
        factory: impl Fn() -> Box<dyn NetEvent> + Send + Sync + 'static,
    ) -> ClassRegistryBuilder {
        self.classes.push(ClassRep {
            name,
            version,
            groups,
            factory: Arc::new(factory),
            initial_update_count: AtomicU64::new(0),
            initial_update_bits: AtomicU64::new(0),
        });
        self
    }

    pub fn build(mut self) -> anyhow::Result<ClassRegistry> {
        let mut names = FxHashSet::default();
        for c in &self.classes {
            if !names.insert(c.name) {
                bail!("event class {:?} is registered more than once", c.name);
            }
        }
        self.classes.sort_by(|a, b| (a.version, a.name).cmp(&(b.version, b.name)));

        let classes = self.classes.into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();

        let mut tables = FxHashMap::default();
        for group in NetClassGroup::ALL {
            let group_classes = classes.iter()
                .filter(|c| c.groups.contains(group.mask()))
                .cloned()
                .collect::<Vec<_>>();

            let Ok(count) = u32::try_from(group_classes.len()) else {
                bail!("too many event classes in group {:?}", group);
            };

            let mut ids_by_name = FxHashMap::default();
            for (id, c) in (0..count).zip(&group_classes) {
                ids_by_name.insert(c.name, id);
            }

            debug!("class group {:?}: {} event classes", group, count);
            tables.insert(group, ClassTable { classes: group_classes, count, ids_by_name });
        }

        Ok(ClassRegistry { tables })
    }
}

struct ClassTable {
    classes: Vec<Arc<ClassRep>>,
    count: u32,
    ids_by_name: FxHashMap<&'static str, u32>,
}

pub struct ClassRegistry {
    tables: FxHashMap<NetClassGroup, ClassTable>,
}

impl Debug for ClassRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_map();
        for group in NetClassGroup::ALL {
            if let Some(table) = self.tables.get(&group) {
                d.entry(&group, &table.classes);
            }
        }
        d.finish()
    }
}

impl ClassRegistry {
    pub fn class_count(&self, group: NetClassGroup) -> u32 {
        self.tables.get(&group)
            .map(|t| t.count)
            .unwrap_or(0)
    }

    pub fn class_rep(&self, group: NetClassGroup, class_id: u32) -> Option<&ClassRep> {
        self.tables.get(&group)?
            .classes.get(usize::try_from(class_id).ok()?)
            .map(|c| c.as_ref())
    }

    pub fn class_version(&self, group: NetClassGroup, class_id: u32) -> Option<u32> {
        self.class_rep(group, class_id)
            .map(|c| c.version)
    }

    pub fn create(&self, group: NetClassGroup, class_id: u32) -> Option<Box<dyn NetEvent>> {
        self.class_rep(group, class_id)
            .map(|c| c.create())
    }

    pub fn class_id(&self, group: NetClassGroup, class_name: &str) -> Option<u32> {
        self.tables.get(&group)?
            .ids_by_name.get(class_name)
            .copied()
    }

    pub fn class_id_of(&self, group: NetClassGroup, event: &dyn NetEvent) -> Option<u32> {
        self.class_id(group, event.class_name())
    }

    /// Does truncating the group's class table to `count` classes cut between two versions
    ///  (or not at all)? An empty prefix trivially does.
    pub fn is_version_border_count(&self, group: NetClassGroup, count: u32) -> bool {
        let Some(table) = self.tables.get(&group) else {
            return count == 0;
        };
        if count == 0 || count == table.count {
            return true;
        }
        if count > table.count {
            return false;
        }
        match (table.classes.get(count as usize - 1), table.classes.get(count as usize)) {
            (Some(last), Some(next)) => last.version != next.version,
            _ => false,
        }
    }
}
