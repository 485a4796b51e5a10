//! The container side of the system: an object is an identity that aggregates
//! components and owns the local half of the subscription registry.

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::component::ComponentId;
use crate::request::{RequestId, SubscriptionRecord};

/// A handle to an object living in a [`World`](crate::world::World).
///
/// Ids count up from 1 and are never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub(crate) u32);

impl fmt::Display for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Per-object state: the name→components index and the local subscription
/// table. Created and mutated only through the world.
pub(crate) struct Object {
  finalized: bool,
  /// Set when destruction of this object has been deferred; the object rejects
  /// new components and sends until the slot is released.
  doomed: bool,
  /// Insertion-ordered, both across names and within a name's list; the
  /// late-join sweep and destruction order lean on this.
  components: IndexMap<SmolStr, Vec<ComponentId>, ahash::RandomState>,
  /// Dense, indexed by `RequestId`, grown on demand.
  local_subs: Vec<Vec<SubscriptionRecord>>,
}

impl Object {
  pub fn new() -> Self {
    Self {
      finalized: false,
      doomed: false,
      components: IndexMap::default(),
      local_subs: Vec::new(),
    }
  }

  pub fn is_finalized(&self) -> bool {
    self.finalized
  }

  pub fn finalize(&mut self) {
    self.finalized = true;
  }

  pub fn is_doomed(&self) -> bool {
    self.doomed
  }

  pub fn doom(&mut self) {
    self.doomed = true;
  }

  pub fn insert_component(&mut self, name: SmolStr, id: ComponentId) {
    self.components.entry(name).or_insert_with(Vec::new).push(id);
  }

  /// Evict a component: drop it from the name index and strip every local
  /// subscription record it registered, in one pass.
  pub fn remove_component(&mut self, id: ComponentId, name: &str) {
    if let Some(list) = self.components.get_mut(name) {
      list.retain(|&c| c != id);
    }
    for records in &mut self.local_subs {
      records.retain(|rec| rec.subscriber != id);
    }
  }

  /// The live components of one name, in insertion order.
  pub fn components_named(&self, name: &str) -> Vec<ComponentId> {
    self.components.get(name).cloned().unwrap_or_default()
  }

  pub fn count_named(&self, name: &str) -> usize {
    self.components.get(name).map_or(0, Vec::len)
  }

  /// Every component owned by this object, names in insertion order.
  pub fn all_components(&self) -> Vec<ComponentId> {
    self.components.values().flatten().copied().collect()
  }

  pub fn register_local(&mut self, id: RequestId, record: SubscriptionRecord) {
    if self.local_subs.len() <= id.index() {
      self.local_subs.resize_with(id.index() + 1, Vec::new);
    }
    self.local_subs[id.index()].push(record);
  }

  /// Snapshot of the local subscriber list for a request, for the dispatcher
  /// to iterate without holding a borrow across callbacks.
  pub fn local_records(&self, id: RequestId) -> Vec<SubscriptionRecord> {
    self.local_subs.get(id.index()).cloned().unwrap_or_default()
  }

  pub fn track_local(&self, id: RequestId, subscriber: ComponentId) {
    if let Some(records) = self.local_subs.get(id.index()) {
      for rec in records {
        if rec.subscriber == subscriber {
          rec.tracked.set(true);
        }
      }
    }
  }
}
