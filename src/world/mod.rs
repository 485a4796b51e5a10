//! The place all the objects, components, and subscriptions live, and the
//! dispatcher that moves notifications between them.

mod storage;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use crossbeam::channel;
use log::{debug, trace};
use smol_str::SmolStr;
use thiserror::Error;

use crate::component::{Component, ComponentId};
use crate::loop_panic;
use crate::messages::{Envelope, EnvelopeKind, Payload, WorldAccess};
use crate::object::ObjectId;
use crate::request::{
  Request, RequestId, RequestInterner, RequestKind, RequestLock, Scope, SubscriptionRecord,
};

use self::storage::Storage;

/// Things that can go wrong talking to the bus.
///
/// Every failure is fatal to the operation that hit it; the world makes no
/// attempt to roll back whatever the operation did before failing.
#[derive(Debug, Error)]
pub enum WorldError {
  #[error("object {0} does not exist or has been destroyed")]
  UnknownObject(ObjectId),
  #[error("component {0} is destroyed or was never adopted")]
  InvalidComponent(ComponentId),
  #[error("the name {0:?} is already registered to object {1}")]
  DuplicateName(SmolStr, ObjectId),
  #[error("dispatch re-entered request {0} from inside its own delivery")]
  ReentrantSelfDispatch(RequestId),
  #[error("object {oid} rejected component {name:?}: {reason}")]
  AddFailure {
    oid: ObjectId,
    name: SmolStr,
    reason: eyre::Error,
  },
}

/// Subscription requests made by a component's activation hook. The hook holds
/// the component mutably borrowed, so they are parked here and processed the
/// moment it returns.
struct ActivationFrame {
  component: ComponentId,
  queued: Vec<(Scope, Request, SubscriptionRecord)>,
}

/// The top-level registry and dispatcher.
///
/// Strictly single-threaded; all operations run to completion on the calling
/// stack, and callbacks are free to re-enter the world through the
/// [`WorldAccess`] they receive. Mutating entry points take `&mut self` at the
/// API boundary; re-entrant paths route through the same internals under the
/// re-entrancy protocol.
pub struct World {
  storage: Storage,
  requests: RefCell<RequestInterner>,
  /// Indexed by `RequestId`, parallel to the interner; entry 0 backs the
  /// sentinel. Behind `Rc` so the vector may grow while a lock is held.
  locks: RefCell<Vec<Rc<RequestLock>>>,
  active_locks: Cell<usize>,
  /// Indexed by `RequestId`, grown only when a subscription materializes the
  /// slot; the `lookup_request` fast path keys off that.
  global_subs: RefCell<Vec<Vec<SubscriptionRecord>>>,
  /// Reverse index: which requests each component registered globally, so
  /// destruction can evict them in one pass.
  subs_by_component: RefCell<AHashMap<ComponentId, Vec<Request>>>,
  /// Names whose presence is checked when the object is finalized.
  required: RefCell<AHashMap<ObjectId, Vec<SmolStr>>>,
  /// The world-wide unique-name directory.
  names: RefCell<AHashMap<SmolStr, ObjectId>>,
  activations: RefCell<Vec<ActivationFrame>>,
  /// Components whose destruction arrived while a dispatch was running; the
  /// queue drains in FIFO order once the last lock releases.
  dead_tx: channel::Sender<ComponentId>,
  dead_rx: channel::Receiver<ComponentId>,
  /// Objects whose slot release is waiting on the component drain.
  dead_objects: RefCell<Vec<ObjectId>>,
}

impl World {
  pub fn new() -> World {
    let (tx, rx) = channel::unbounded();

    Self {
      storage: Storage::new(),
      requests: RefCell::new(RequestInterner::new()),
      // request ids count from 1, so seed an empty lock in front
      locks: RefCell::new(vec![Rc::new(RequestLock::default())]),
      active_locks: Cell::new(0),
      global_subs: RefCell::new(Vec::new()),
      subs_by_component: RefCell::new(AHashMap::new()),
      required: RefCell::new(AHashMap::new()),
      names: RefCell::new(AHashMap::new()),
      activations: RefCell::new(Vec::new()),
      dead_tx: tx,
      dead_rx: rx,
      dead_objects: RefCell::new(Vec::new()),
    }
  }

  /// Create a fresh, empty object. Never fails.
  pub fn create_object(&mut self) -> ObjectId {
    self.create_object_inner()
  }

  /// Adopt a component onto an object: sets its owner, runs its activation
  /// hook, then announces its creation to every matching subscriber (global
  /// first, then the object's own, never the component itself).
  pub fn add_component(
    &mut self,
    object: ObjectId,
    component: Box<dyn Component>,
  ) -> Result<ComponentId, WorldError> {
    self.add_component_inner(object, component)
  }

  /// Destroy a component. Idempotent on stale handles. While any dispatch is
  /// running the destruction is deferred until the bus goes quiescent, and the
  /// component keeps receiving notifications in the meantime.
  pub fn destroy_component(&mut self, id: ComponentId) {
    self.destroy_component_inner(id);
  }

  /// Destroy an object and every component on it.
  pub fn destroy_object(&mut self, object: ObjectId) -> Result<(), WorldError> {
    self.destroy_object_inner(object)
  }

  /// Mark an object finalized and run its required-components check: any
  /// required name with no live component destroys the object. The check runs
  /// once; finalizing again is a no-op.
  pub fn finalize_object(&mut self, object: ObjectId) -> Result<(), WorldError> {
    self.finalize_object_inner(object)
  }

  /// Deliver a message to every subscriber in the world, in registration
  /// order. No-op if nothing ever subscribed to the name.
  pub fn send_message(&mut self, sender: ComponentId, name: &str) -> Result<(), WorldError> {
    self.send_global_inner(sender, name, None)
  }

  pub fn send_message_with<P: Payload>(
    &mut self,
    sender: ComponentId,
    name: &str,
    payload: P,
  ) -> Result<(), WorldError> {
    self.send_global_inner(sender, name, Some(Rc::new(payload) as Rc<dyn Payload>))
  }

  /// Deliver a message to the subscribers on one object only.
  pub fn send_to_object(
    &mut self,
    sender: ComponentId,
    object: ObjectId,
    name: &str,
  ) -> Result<(), WorldError> {
    self.send_to_object_inner(sender, object, name, None)
  }

  pub fn send_to_object_with<P: Payload>(
    &mut self,
    sender: ComponentId,
    object: ObjectId,
    name: &str,
    payload: P,
  ) -> Result<(), WorldError> {
    self.send_to_object_inner(sender, object, name, Some(Rc::new(payload) as Rc<dyn Payload>))
  }

  /// Intern a message name, for callers that want to hold the id.
  pub fn message_request_id(&mut self, name: &str) -> RequestId {
    self.intern_request(RequestKind::Message, name)
  }

  /// The id a request dispatches under, or [`RequestId::NONE`] while the name
  /// is unknown or no subscription has materialized its dispatch slot yet.
  pub fn lookup_request(&self, kind: RequestKind, name: &str) -> RequestId {
    let rid = self.requests.borrow().get(kind, name);
    if rid.is_none() || self.global_subs.borrow().len() <= rid.index() {
      return RequestId::NONE;
    }
    rid
  }

  /// Register a world-unique name for an object.
  pub fn register_object_name(&mut self, object: ObjectId, name: &str) -> Result<(), WorldError> {
    self.register_object_name_inner(object, name)
  }

  pub fn lookup_object_name(&self, name: &str) -> Option<ObjectId> {
    self.names.borrow().get(name).copied()
  }

  /// Run a closure against the concrete component behind a handle. `None` if
  /// the handle is stale or the component is not a `C`.
  ///
  /// Panics if that component is currently executing one of its own handlers.
  pub fn read_component<C: Component, R>(
    &self,
    id: ComponentId,
    f: impl FnOnce(&C) -> R,
  ) -> Option<R> {
    let cell = self.storage.cell(id)?;
    let guard = cell.try_borrow().unwrap_or_else(|_| loop_panic(id));
    let concrete = (**guard).downcast_ref::<C>().ok()?;
    Some(f(concrete))
  }

  /// Mutable flavor of [`World::read_component`].
  pub fn write_component<C: Component, R>(
    &self,
    id: ComponentId,
    f: impl FnOnce(&mut C) -> R,
  ) -> Option<R> {
    let cell = self.storage.cell(id)?;
    let mut guard = cell.try_borrow_mut().unwrap_or_else(|_| loop_panic(id));
    let concrete = (**guard).downcast_mut::<C>().ok()?;
    Some(f(concrete))
  }

  /// The live components of one name on one object, in insertion order.
  pub fn components(&self, object: ObjectId, name: &str) -> Vec<ComponentId> {
    self
      .storage
      .with_object(object, |obj| obj.components_named(name))
      .unwrap_or_default()
  }

  pub fn is_alive(&self, id: ComponentId) -> bool {
    self.storage.is_alive(id)
  }

  pub fn object_exists(&self, object: ObjectId) -> bool {
    self.storage.object_live(object)
  }

  pub fn owner_of(&self, id: ComponentId) -> Option<ObjectId> {
    self.storage.owner_of(id)
  }

  pub fn component_name(&self, id: ComponentId) -> Option<SmolStr> {
    self.storage.name_of(id)
  }

  /// Log every delivery to `subscriber`'s subscription on a component name.
  pub fn track_component_request(&mut self, subscriber: ComponentId, name: &str, local: bool) {
    self.track_request_inner(RequestKind::Component, name, local, subscriber);
  }

  /// Log every delivery to `subscriber`'s subscription on a message name.
  pub fn track_message_request(&mut self, subscriber: ComponentId, name: &str) {
    self.track_request_inner(RequestKind::Message, name, false, subscriber);
  }

  /// Log this component's lifecycle events.
  pub fn track_component(&mut self, id: ComponentId) {
    self.storage.track(id);
  }

  // ------------------------------------------------------------------
  // internals, all `&self`: these are the paths callbacks re-enter on
  // ------------------------------------------------------------------

  pub(crate) fn create_object_inner(&self) -> ObjectId {
    let id = self.storage.create_object();
    trace!("object {id} created");
    id
  }

  pub(crate) fn add_component_inner(
    &self,
    oid: ObjectId,
    component: Box<dyn Component>,
  ) -> Result<ComponentId, WorldError> {
    if !self.storage.object_live(oid) {
      return Err(WorldError::UnknownObject(oid));
    }
    let name = SmolStr::new(component.name());
    if name.is_empty() {
      return Err(WorldError::AddFailure {
        oid,
        name,
        reason: eyre::eyre!("component name must not be empty"),
      });
    }

    let id = self.storage.adopt(oid, name.clone(), component);
    trace!("component {id} ({name}) adopted by object {oid}");

    // The activation hook holds the component borrowed, so its subscription
    // requests park on this frame and run the moment it returns.
    self.activations.borrow_mut().push(ActivationFrame {
      component: id,
      queued: Vec::new(),
    });
    let cell = self.storage.cell(id).expect("slot inserted just above");
    let hook_result = {
      let mut guard = cell.borrow_mut();
      let access = WorldAccess::new(self, id, oid);
      guard.attached(&access)
    };
    let frame = self
      .activations
      .borrow_mut()
      .pop()
      .expect("frame pushed just above");
    if let Err(reason) = hook_result {
      return Err(WorldError::AddFailure { oid, name, reason });
    }

    for (scope, req, rec) in frame.queued {
      if !self.storage.is_alive(id) {
        // destroyed itself from inside the hook
        break;
      }
      match scope {
        Scope::Global => self.register_global(req, rec),
        Scope::Local => self.register_local(req, rec),
      }
    }
    if !self.storage.is_alive(id) {
      return Ok(id);
    }

    let rid = self.lookup_request(RequestKind::Component, &name);
    if rid.is_none() {
      return Ok(id);
    }
    let env = Envelope::lifecycle(EnvelopeKind::Create, id);
    self.activate(rid)?;
    self.dispatch_global(rid, &env, Some(id));
    self.dispatch_local(oid, rid, &env, Some(id));
    self.release(rid);
    Ok(id)
  }

  pub(crate) fn destroy_component_inner(&self, id: ComponentId) {
    if !self.storage.is_alive(id) {
      return;
    }
    if self.active_locks.get() > 0 {
      trace!("deferring destruction of component {id} until the bus is quiescent");
      self.dead_tx.send(id).unwrap();
      return;
    }

    let owner = self.storage.owner_of(id).expect("live component has an owner");
    let name = self.storage.name_of(id).expect("live component has a name");
    let tracked = self.storage.is_tracked(id);

    // Evict its global subscriptions in one pass over the reverse index,
    // then everything local through the object. Eviction precedes the
    // DESTROY dispatch, so a component can never hear about its own death.
    let requests = self
      .subs_by_component
      .borrow_mut()
      .remove(&id)
      .unwrap_or_default();
    for req in requests {
      let rid = self.requests.borrow().get(req.kind, &req.name);
      if rid.is_none() {
        continue;
      }
      if let Some(list) = self.global_subs.borrow_mut().get_mut(rid.index()) {
        list.retain(|rec| rec.subscriber != id);
      }
    }
    self
      .storage
      .with_object_mut(owner, |obj| obj.remove_component(id, &name));

    let rid = self.lookup_request(RequestKind::Component, &name);
    if !rid.is_none() {
      let env = Envelope::lifecycle(EnvelopeKind::Destroy, id);
      self
        .activate(rid)
        .expect("no dispatch is active during an immediate destruction");
      self.dispatch_global(rid, &env, None);
      self.dispatch_local(owner, rid, &env, Some(id));
      // the slot goes away before pending replay, so anything parked on this
      // lock sees the component dead
      self.storage.discard(id);
      self.release(rid);
    } else {
      self.storage.discard(id);
    }

    if tracked {
      debug!("component {id} ({name}) destroyed");
    } else {
      trace!("component {id} ({name}) destroyed");
    }
  }

  pub(crate) fn destroy_object_inner(&self, oid: ObjectId) -> Result<(), WorldError> {
    if !self.storage.object_exists(oid) {
      return Err(WorldError::UnknownObject(oid));
    }
    if !self.storage.object_live(oid) {
      // already condemned; its release is queued
      return Ok(());
    }
    let components = self
      .storage
      .with_object(oid, |obj| obj.all_components())
      .unwrap_or_default();
    for component in components {
      self.destroy_component_inner(component);
    }
    if self.active_locks.get() > 0 {
      self.storage.with_object_mut(oid, |obj| obj.doom());
      self.dead_objects.borrow_mut().push(oid);
      trace!("deferring release of object {oid} until the bus is quiescent");
    } else {
      self.release_object_slot(oid);
    }
    Ok(())
  }

  pub(crate) fn finalize_object_inner(&self, oid: ObjectId) -> Result<(), WorldError> {
    if !self.storage.object_live(oid) {
      return Err(WorldError::UnknownObject(oid));
    }
    let already = self
      .storage
      .with_object(oid, |obj| obj.is_finalized())
      .unwrap_or(true);
    if already {
      // the required check runs once
      return Ok(());
    }
    self.storage.with_object_mut(oid, |obj| obj.finalize());

    let required = self.required.borrow_mut().remove(&oid).unwrap_or_default();
    let missing = required.iter().any(|name| {
      self
        .storage
        .with_object(oid, |obj| obj.count_named(name))
        .unwrap_or(0)
        == 0
    });
    if missing {
      debug!("object {oid} is missing a required component, destroying it");
      self.destroy_object_inner(oid)?;
    }
    Ok(())
  }

  pub(crate) fn send_global_inner(
    &self,
    sender: ComponentId,
    name: &str,
    payload: Option<Rc<dyn Payload>>,
  ) -> Result<(), WorldError> {
    if !self.storage.is_alive(sender) {
      return Err(WorldError::InvalidComponent(sender));
    }
    let rid = self.lookup_request(RequestKind::Message, name);
    if rid.is_none() {
      // nobody has ever asked for this
      return Ok(());
    }
    let env = Envelope::message(sender, payload);
    self.activate(rid)?;
    self.dispatch_global(rid, &env, None);
    self.release(rid);
    Ok(())
  }

  pub(crate) fn send_to_object_inner(
    &self,
    sender: ComponentId,
    oid: ObjectId,
    name: &str,
    payload: Option<Rc<dyn Payload>>,
  ) -> Result<(), WorldError> {
    if !self.storage.object_live(oid) {
      return Err(WorldError::UnknownObject(oid));
    }
    if !self.storage.is_alive(sender) {
      return Err(WorldError::InvalidComponent(sender));
    }
    let rid = self.lookup_request(RequestKind::Message, name);
    if rid.is_none() {
      return Ok(());
    }
    let env = Envelope::message(sender, payload);
    self.activate(rid)?;
    self.dispatch_local(oid, rid, &env, None);
    self.release(rid);
    Ok(())
  }

  pub(crate) fn register_object_name_inner(
    &self,
    oid: ObjectId,
    name: &str,
  ) -> Result<(), WorldError> {
    if !self.storage.object_live(oid) {
      return Err(WorldError::UnknownObject(oid));
    }
    let mut names = self.names.borrow_mut();
    if let Some(&taken) = names.get(name) {
      return Err(WorldError::DuplicateName(SmolStr::new(name), taken));
    }
    names.insert(SmolStr::new(name), oid);
    Ok(())
  }

  /// Entry point for every subscription request. Requests made by the
  /// component currently inside its activation hook park on the hook's frame;
  /// everything else registers right away (which may itself pend on a lock).
  pub(crate) fn submit_subscription(&self, scope: Scope, req: Request, rec: SubscriptionRecord) {
    {
      let mut frames = self.activations.borrow_mut();
      if let Some(frame) = frames.last_mut() {
        if frame.component == rec.subscriber {
          frame.queued.push((scope, req, rec));
          return;
        }
      }
    }
    match scope {
      Scope::Global => self.register_global(req, rec),
      Scope::Local => self.register_local(req, rec),
    }
  }

  pub(crate) fn intern_request(&self, kind: RequestKind, name: &str) -> RequestId {
    let (rid, fresh) = self.requests.borrow_mut().intern(kind, name);
    if fresh {
      // keep the lock table parallel to the interner
      self.locks.borrow_mut().push(Rc::new(RequestLock::default()));
    }
    rid
  }

  pub(crate) fn track_request_inner(
    &self,
    kind: RequestKind,
    name: &str,
    local: bool,
    subscriber: ComponentId,
  ) {
    let rid = self.intern_request(kind, name);
    if !local {
      if let Some(records) = self.global_subs.borrow().get(rid.index()) {
        for rec in records {
          if rec.subscriber == subscriber {
            rec.tracked.set(true);
          }
        }
      }
    }
    // message subscriptions are mirrored into the object, mark that copy too
    if let Some(owner) = self.storage.owner_of(subscriber) {
      self
        .storage
        .with_object(owner, |obj| obj.track_local(rid, subscriber));
    }
  }

  fn register_global(&self, req: Request, rec: SubscriptionRecord) {
    if !self.storage.is_alive(rec.subscriber) {
      // the subscriber died while this request was parked
      return;
    }
    let rid = self.intern_request(req.kind, &req.name);
    let lock = self.lock(rid);
    if lock.locked.get() {
      lock.pending_global.borrow_mut().push((req, rec));
      return;
    }

    if req.kind != RequestKind::AllComponents {
      self.materialize_slot(rid);
      self.global_subs.borrow_mut()[rid.index()].push(rec.clone());
      if req.kind == RequestKind::Message {
        // mirror into the owner's table so sends aimed at the object reach it
        if let Some(owner) = self.storage.owner_of(rec.subscriber) {
          self
            .storage
            .with_object_mut(owner, |obj| obj.register_local(rid, rec.clone()));
        }
      }
      self
        .subs_by_component
        .borrow_mut()
        .entry(rec.subscriber)
        .or_default()
        .push(req.clone());
      self.note_required(&req, &rec);
    }
    if req.kind == RequestKind::Message {
      return;
    }

    // catch up on what already exists
    self.activate(rid).expect("checked unlocked just above");
    self.sweep_everywhere(rid, &req.name, &rec);
    self.release(rid);
  }

  fn register_local(&self, req: Request, rec: SubscriptionRecord) {
    if !self.storage.is_alive(rec.subscriber) {
      return;
    }
    let rid = self.intern_request(req.kind, &req.name);
    let lock = self.lock(rid);
    if lock.locked.get() {
      lock.pending_local.borrow_mut().push((req, rec));
      return;
    }
    let owner = match self.storage.owner_of(rec.subscriber) {
      Some(owner) => owner,
      None => return,
    };

    if req.kind != RequestKind::AllComponents {
      self.materialize_slot(rid);
      self
        .storage
        .with_object_mut(owner, |obj| obj.register_local(rid, rec.clone()));
      self.note_required(&req, &rec);
    }
    if req.kind == RequestKind::Message {
      return;
    }

    self.activate(rid).expect("checked unlocked just above");
    self.sweep_object(owner, rid, &req.name, &rec);
    self.release(rid);
  }

  /// Requirements only stick to objects that have not been finalized yet.
  fn note_required(&self, req: &Request, rec: &SubscriptionRecord) {
    if !rec.required {
      return;
    }
    if let Some(owner) = self.storage.owner_of(rec.subscriber) {
      let finalized = self
        .storage
        .with_object(owner, |obj| obj.is_finalized())
        .unwrap_or(true);
      if !finalized {
        self
          .required
          .borrow_mut()
          .entry(owner)
          .or_default()
          .push(req.name.clone());
      }
    }
  }

  /// A request's dispatch slot exists once anything has subscribed to it, in
  /// either scope. Adoption keys its entire CREATE dispatch off this.
  fn materialize_slot(&self, rid: RequestId) {
    let mut subs = self.global_subs.borrow_mut();
    if subs.len() <= rid.index() {
      subs.resize_with(rid.index() + 1, Vec::new);
    }
  }

  // ------------------------------------------------------------------
  // dispatch
  // ------------------------------------------------------------------

  fn sweep_everywhere(&self, rid: RequestId, name: &str, rec: &SubscriptionRecord) {
    let candidates = self.storage.components_named_everywhere(name);
    self.sweep_candidates(rid, rec, candidates);
  }

  fn sweep_object(&self, owner: ObjectId, rid: RequestId, name: &str, rec: &SubscriptionRecord) {
    let candidates = self
      .storage
      .with_object(owner, |obj| obj.components_named(name))
      .unwrap_or_default();
    self.sweep_candidates(rid, rec, candidates);
  }

  /// Synthesize Create envelopes for everything in `candidates` that is still
  /// alive, skipping the subscriber itself. The list is a snapshot; callbacks
  /// are free to keep mutating the registry while we walk it.
  fn sweep_candidates(&self, rid: RequestId, rec: &SubscriptionRecord, candidates: Vec<ComponentId>) {
    for candidate in candidates {
      if candidate == rec.subscriber || !self.storage.is_alive(candidate) {
        continue;
      }
      let env = Envelope::lifecycle(EnvelopeKind::Create, candidate);
      self.deliver(rec, &env, rid);
    }
  }

  fn dispatch_global(&self, rid: RequestId, env: &Envelope, skip: Option<ComponentId>) {
    let records = match self.global_subs.borrow().get(rid.index()) {
      Some(list) => list.clone(),
      None => return,
    };
    for rec in &records {
      if skip == Some(rec.subscriber) {
        continue;
      }
      self.deliver(rec, env, rid);
    }
  }

  fn dispatch_local(&self, oid: ObjectId, rid: RequestId, env: &Envelope, skip: Option<ComponentId>) {
    let records = match self.storage.with_object(oid, |obj| obj.local_records(rid)) {
      Some(records) => records,
      None => return,
    };
    for rec in &records {
      if skip == Some(rec.subscriber) {
        continue;
      }
      self.deliver(rec, env, rid);
    }
  }

  fn deliver(&self, rec: &SubscriptionRecord, env: &Envelope, rid: RequestId) {
    let (cell, owner) = match self.storage.cell_and_owner(rec.subscriber) {
      Some(found) => found,
      None => return,
    };
    if rec.tracked.get() {
      debug!(
        "component {} received {:?} for {:?} from component {}",
        rec.subscriber,
        env.kind(),
        self.requests.borrow().name_of(rid),
        env.sender()
      );
    }
    let mut guard = cell
      .try_borrow_mut()
      .unwrap_or_else(|_| loop_panic(rec.subscriber));
    let access = WorldAccess::new(self, rec.subscriber, owner);
    (*rec.handler)(&mut **guard, env, &access);
  }

  // ------------------------------------------------------------------
  // the lock protocol
  // ------------------------------------------------------------------

  fn lock(&self, rid: RequestId) -> Rc<RequestLock> {
    self.locks.borrow()[rid.index()].clone()
  }

  fn activate(&self, rid: RequestId) -> Result<(), WorldError> {
    let lock = self.lock(rid);
    if lock.locked.get() {
      return Err(WorldError::ReentrantSelfDispatch(rid));
    }
    lock.locked.set(true);
    self.active_locks.set(self.active_locks.get() + 1);
    Ok(())
  }

  /// Unlock, replay the subscriptions that piled up behind this dispatch, and
  /// if that was the last active lock, run the deferred destructions.
  fn release(&self, rid: RequestId) {
    let lock = self.lock(rid);
    debug_assert!(lock.locked.get(), "released request {rid} twice");
    lock.locked.set(false);
    self.active_locks.set(self.active_locks.get() - 1);

    let pending_global = lock.pending_global.take();
    let pending_local = lock.pending_local.take();
    for (req, rec) in pending_global {
      self.register_global(req, rec);
    }
    for (req, rec) in pending_local {
      self.register_local(req, rec);
    }

    if self.active_locks.get() == 0 {
      self.drain_deferred();
    }
  }

  /// Destroy everything that asked to die mid-dispatch, oldest first, then
  /// release the objects waiting on them. Destruction dispatches DESTROY
  /// notifications, so this can grow the queues it is draining; the nested
  /// releases take care of those, and the outer loop mops up.
  fn drain_deferred(&self) {
    loop {
      let dead: Vec<ComponentId> = self.dead_rx.try_iter().collect();
      let doomed: Vec<ObjectId> = self.dead_objects.borrow_mut().drain(..).collect();
      if dead.is_empty() && doomed.is_empty() {
        break;
      }
      for id in dead {
        self.destroy_component_inner(id);
      }
      for oid in doomed {
        self.release_object_slot(oid);
      }
    }
  }

  fn release_object_slot(&self, oid: ObjectId) {
    self.storage.release_object(oid);
    self.required.borrow_mut().remove(&oid);
    self.names.borrow_mut().retain(|_, owner| *owner != oid);
    trace!("object {oid} destroyed");
  }
}
