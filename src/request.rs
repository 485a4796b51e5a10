//! Named interests and the machinery that indexes them: the request-id
//! allocator, per-request locks, and subscription records.

use std::cell::{Cell, RefCell};
use std::fmt;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::component::ComponentId;
use crate::messages::ErasedHandler;

/// Interned id of a request, used to index the dispatch tables.
///
/// Id 0 is the "no such request" sentinel; dispatch paths check it before
/// touching any table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub(crate) u32);

impl RequestId {
  pub const NONE: RequestId = RequestId(0);

  pub fn is_none(self) -> bool {
    self.0 == 0
  }

  pub(crate) fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// What a request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Lifecycle of components with a given name.
  Component,
  /// A user-defined message name.
  Message,
  /// One-shot catch-up on components with a given name. Shares the
  /// [`RequestKind::Component`] id namespace.
  AllComponents,
}

impl RequestKind {
  /// Which interning table this kind lives in. AllComponents aliases to
  /// Component; asking for "all existing" does not create a separate id space.
  fn table(self) -> usize {
    match self {
      RequestKind::Component | RequestKind::AllComponents => 0,
      RequestKind::Message => 1,
    }
  }
}

/// A named interest: the key subscriptions are registered under.
#[derive(Debug, Clone)]
pub struct Request {
  pub kind: RequestKind,
  pub name: SmolStr,
}

impl Request {
  pub fn new(kind: RequestKind, name: &str) -> Self {
    Self {
      kind,
      name: SmolStr::new(name),
    }
  }
}

/// Which table a subscription goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
  /// Cross-object: the world's dispatch table.
  Global,
  /// Same-object: the owning object's table.
  Local,
}

/// One subscriber bound to one request.
#[derive(Clone)]
pub(crate) struct SubscriptionRecord {
  pub subscriber: ComponentId,
  pub handler: ErasedHandler,
  /// Only meaningful for local Component subscriptions on not-yet-finalized
  /// objects; checked at finalization.
  pub required: bool,
  /// Diagnostic: emit a log line on each delivery to this record.
  pub tracked: Cell<bool>,
}

/// Re-entrancy guard for one request id.
///
/// While `locked` is set, a dispatch for this id is iterating its subscriber
/// list; subscriptions arriving meanwhile are parked on the pending queues and
/// replayed through the normal registration path at release.
#[derive(Default)]
pub(crate) struct RequestLock {
  pub locked: Cell<bool>,
  pub pending_global: RefCell<Vec<(Request, SubscriptionRecord)>>,
  pub pending_local: RefCell<Vec<(Request, SubscriptionRecord)>>,
}

/// The request-id allocator: interns (kind, name) pairs into small dense ids.
///
/// A single counter serves both kinds, so every id belongs to exactly one
/// (kind, name) pair and the id→name table can stay dense.
pub(crate) struct RequestInterner {
  counter: u32,
  name_to_id: [AHashMap<SmolStr, RequestId>; 2],
  /// Indexed by `RequestId`; entry 0 is the sentinel's empty name.
  id_to_name: Vec<SmolStr>,
}

impl RequestInterner {
  pub fn new() -> Self {
    Self {
      counter: 0,
      name_to_id: [AHashMap::new(), AHashMap::new()],
      id_to_name: vec![SmolStr::default()],
    }
  }

  /// Return the id for this request, minting one if the name is new to the
  /// kind. The second value is true when a fresh id was minted, so the caller
  /// can append the parallel lock slot.
  pub fn intern(&mut self, kind: RequestKind, name: &str) -> (RequestId, bool) {
    let table = kind.table();
    if let Some(&id) = self.name_to_id[table].get(name) {
      return (id, false);
    }
    self.counter += 1;
    let id = RequestId(self.counter);
    self.name_to_id[table].insert(SmolStr::new(name), id);
    self.id_to_name.push(SmolStr::new(name));
    (id, true)
  }

  /// Return the id if the name has been interned for this kind, NONE otherwise.
  /// Whether a dispatch slot has materialized is the world's concern, not ours.
  pub fn get(&self, kind: RequestKind, name: &str) -> RequestId {
    self.name_to_id[kind.table()]
      .get(name)
      .copied()
      .unwrap_or(RequestId::NONE)
  }

  pub fn name_of(&self, id: RequestId) -> SmolStr {
    self
      .id_to_name
      .get(id.index())
      .cloned()
      .unwrap_or_default()
  }
}
