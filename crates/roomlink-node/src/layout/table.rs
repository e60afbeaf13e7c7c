use std::collections::BTreeMap;

use roomlink_core::protocol::LayoutId;

use crate::config::{LayoutConfig, WallSection};

/// Static layout table: which addresses are combined under each layout, and
/// which layout each wall-sensor reading selects.
#[derive(Debug, Clone, Default)]
pub struct LayoutTable {
    layouts: Vec<LayoutConfig>,
    wall: BTreeMap<u8, LayoutId>,
    wall_enabled: bool,
}

impl LayoutTable {
    pub fn new(layouts: Vec<LayoutConfig>, wall: &WallSection) -> Self {
        Self { layouts, wall: wall.map.clone(), wall_enabled: wall.enabled }
    }

    pub fn members(&self, id: &LayoutId) -> Option<&[String]> {
        self.layouts.iter().find(|l| &l.id == id).map(|l| l.members.as_slice())
    }

    pub fn contains(&self, id: &LayoutId) -> bool {
        self.members(id).is_some()
    }

    pub fn first(&self) -> Option<&LayoutId> {
        self.layouts.first().map(|l| &l.id)
    }

    pub fn wall_enabled(&self) -> bool {
        self.wall_enabled
    }

    /// Layout for a 3-bit partition key. Higher bits are ignored.
    pub fn for_wall_key(&self, key: u8) -> Option<&LayoutId> {
        self.wall.get(&(key & 0b111))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn id(s: &str) -> LayoutId {
        LayoutId::parse(s).unwrap()
    }

    #[test]
    fn lookups() {
        let layouts = vec![
            LayoutConfig { id: id("LAY1"), members: vec![] },
            LayoutConfig { id: id("LAY2"), members: vec!["10.0.0.100".into(), "10.0.0.110".into()] },
        ];
        let wall = WallSection { enabled: true, map: [(0, id("LAY1")), (5, id("LAY2"))].into_iter().collect() };
        let t = LayoutTable::new(layouts, &wall);

        assert_eq!(t.members(&id("LAY2")).unwrap().len(), 2);
        assert!(!t.contains(&id("LAY9")));
        assert_eq!(t.first(), Some(&id("LAY1")));
        assert_eq!(t.for_wall_key(5), Some(&id("LAY2")));
        assert_eq!(t.for_wall_key(0b1101), Some(&id("LAY2")));
        assert_eq!(t.for_wall_key(3), None);
    }
}
