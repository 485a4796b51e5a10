//! What flows through the bus (envelopes and their payloads) and the handle a
//! component uses to talk back to the world from inside a hook or handler.

use std::cell::Cell;
use std::rc::Rc;

use downcast::{downcast, Any};
use smol_str::SmolStr;

use crate::component::{Component, ComponentId};
use crate::object::ObjectId;
use crate::request::{Request, RequestId, RequestKind, Scope, SubscriptionRecord};
use crate::world::{World, WorldError};

/// Why a notification was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
  /// A matching component was adopted (or already existed at subscription
  /// time). Only ever originated by the bus.
  Create,
  /// A matching component is being destroyed. Only ever originated by the bus.
  Destroy,
  /// A user-defined message.
  Message,
}

/// An opaque value riding along on a message.
///
/// The bus does not interpret payloads; sender and receiver agree on the
/// concrete type by convention and the receiver downcasts with
/// [`Envelope::payload`].
pub trait Payload: Any {}
downcast!(dyn Payload);

/// The value delivered to a subscription callback.
#[derive(Clone)]
pub struct Envelope {
  kind: EnvelopeKind,
  sender: ComponentId,
  payload: Option<Rc<dyn Payload>>,
}

impl Envelope {
  pub(crate) fn lifecycle(kind: EnvelopeKind, sender: ComponentId) -> Self {
    Self {
      kind,
      sender,
      payload: None,
    }
  }

  pub(crate) fn message(sender: ComponentId, payload: Option<Rc<dyn Payload>>) -> Self {
    Self {
      kind: EnvelopeKind::Message,
      sender,
      payload,
    }
  }

  pub fn kind(&self) -> EnvelopeKind {
    self.kind
  }

  /// Handle of the component this notification is about (for Create/Destroy)
  /// or that sent it (for Message). Resolve it through the world; it may have
  /// gone stale if you stashed the envelope.
  pub fn sender(&self) -> ComponentId {
    self.sender
  }

  /// The payload, if one was attached and it is a `P`.
  pub fn payload<P: Payload>(&self) -> Option<&P> {
    self.payload.as_deref().and_then(|p| p.downcast_ref::<P>().ok())
  }
}

/// A subscription callback: a plain function on the subscribing component.
///
/// Handlers are deliberately stateless; anything they need lives on the
/// component itself or rides in the envelope.
pub type MsgHandler<C> = fn(this: &mut C, envelope: &Envelope, access: &WorldAccess);

/// Type-erased handler as stored in subscription records. `Rc` because records
/// are cloned into dispatch snapshots.
pub(crate) type ErasedHandler = Rc<dyn Fn(&mut dyn Component, &Envelope, &WorldAccess)>;

pub(crate) fn erase_handler<C: Component>(handler: MsgHandler<C>) -> ErasedHandler {
  let clo = move |component: &mut dyn Component, envelope: &Envelope, access: &WorldAccess| {
    let component = component
      .downcast_mut::<C>()
      .expect("subscription was registered for a different component type than it was delivered to");
    handler(component, envelope, access)
  };
  Rc::new(clo)
}

/// Way to access the world from inside a component: handed to
/// [`Component::attached`] and to every handler invocation, carrying the
/// component's own identity so sends and subscriptions know their subject.
///
/// Everything here runs under the world's re-entrancy protocol, so it is fine
/// to call these mid-dispatch; subscriptions may be queued and destruction may
/// be deferred rather than happening on the spot.
pub struct WorldAccess<'w> {
  world: &'w World,
  me: ComponentId,
  owner: ObjectId,
}

impl<'w> WorldAccess<'w> {
  pub(crate) fn new(world: &'w World, me: ComponentId, owner: ObjectId) -> Self {
    Self { world, me, owner }
  }

  /// Handle of the component this access belongs to.
  pub fn id(&self) -> ComponentId {
    self.me
  }

  /// The object owning this component.
  pub fn owner_id(&self) -> ObjectId {
    self.owner
  }

  /// This component's name.
  pub fn name(&self) -> SmolStr {
    self
      .world
      .component_name(self.me)
      .expect("a component with an access handle has a slot")
  }

  fn record<C: Component>(&self, handler: MsgHandler<C>, required: bool) -> SubscriptionRecord {
    SubscriptionRecord {
      subscriber: self.me,
      handler: erase_handler(handler),
      required,
      tracked: Cell::new(false),
    }
  }

  /// Subscribe to a user-defined message, world-wide. The subscription is also
  /// mirrored into the owning object's table so sends aimed at the object
  /// reach it.
  pub fn request_message<C: Component>(&self, name: &str, handler: MsgHandler<C>) {
    self.world.submit_subscription(
      Scope::Global,
      Request::new(RequestKind::Message, name),
      self.record(handler, false),
    );
  }

  /// Subscribe to creation/destruction of components of the given name,
  /// everywhere, or with `local` only on this component's own object.
  ///
  /// Matching components that already exist are announced immediately with
  /// synthetic [`EnvelopeKind::Create`] envelopes (never including the
  /// subscriber itself).
  pub fn request_component<C: Component>(&self, name: &str, handler: MsgHandler<C>, local: bool) {
    let scope = if local { Scope::Local } else { Scope::Global };
    self.world.submit_subscription(
      scope,
      Request::new(RequestKind::Component, name),
      self.record(handler, false),
    );
  }

  /// Like a local [`WorldAccess::request_component`], but additionally demands
  /// that at least one such component exists when the owning object is
  /// finalized; otherwise the object is destroyed. Has no requirement effect
  /// on already-finalized objects.
  pub fn require_component<C: Component>(&self, name: &str, handler: MsgHandler<C>) {
    self.world.submit_subscription(
      Scope::Local,
      Request::new(RequestKind::Component, name),
      self.record(handler, true),
    );
  }

  /// One-shot catch-up: synthesizes Create envelopes for the currently-alive
  /// components of the given name, world-wide, and registers nothing. No
  /// future notifications are delivered.
  pub fn request_all_existing<C: Component>(&self, name: &str, handler: MsgHandler<C>) {
    self.world.submit_subscription(
      Scope::Global,
      Request::new(RequestKind::AllComponents, name),
      self.record(handler, false),
    );
  }

  /// Send a message to every subscriber in the world.
  pub fn send_message(&self, name: &str) -> Result<(), WorldError> {
    self.world.send_global_inner(self.me, name, None)
  }

  pub fn send_message_with<P: Payload>(&self, name: &str, payload: P) -> Result<(), WorldError> {
    self
      .world
      .send_global_inner(self.me, name, Some(Rc::new(payload) as Rc<dyn Payload>))
  }

  /// Send a message to the subscribers on this component's own object only.
  pub fn send_local_message(&self, name: &str) -> Result<(), WorldError> {
    self.world.send_to_object_inner(self.me, self.owner, name, None)
  }

  pub fn send_local_message_with<P: Payload>(&self, name: &str, payload: P) -> Result<(), WorldError> {
    self
      .world
      .send_to_object_inner(self.me, self.owner, name, Some(Rc::new(payload) as Rc<dyn Payload>))
  }

  /// Send a message to the subscribers on one particular object.
  pub fn send_to_object(&self, object: ObjectId, name: &str) -> Result<(), WorldError> {
    self.world.send_to_object_inner(self.me, object, name, None)
  }

  pub fn send_to_object_with<P: Payload>(
    &self,
    object: ObjectId,
    name: &str,
    payload: P,
  ) -> Result<(), WorldError> {
    self
      .world
      .send_to_object_inner(self.me, object, name, Some(Rc::new(payload) as Rc<dyn Payload>))
  }

  /// Intern the message name and return its request id, for callers that want
  /// to skip the by-name lookup on a hot path.
  pub fn message_request_id(&self, name: &str) -> RequestId {
    self.world.intern_request(RequestKind::Message, name)
  }

  /// Create a fresh, empty object.
  pub fn create_object(&self) -> ObjectId {
    self.world.create_object_inner()
  }

  /// Adopt a component onto any object.
  pub fn add_component(
    &self,
    object: ObjectId,
    component: Box<dyn Component>,
  ) -> Result<ComponentId, WorldError> {
    self.world.add_component_inner(object, component)
  }

  /// Adopt a sibling component onto this component's own object.
  pub fn add_local_component(&self, component: Box<dyn Component>) -> Result<ComponentId, WorldError> {
    self.world.add_component_inner(self.owner, component)
  }

  /// Destroy this component. While any dispatch is running the destruction is
  /// deferred; the component keeps receiving notifications until the bus goes
  /// quiescent.
  pub fn destroy_self(&self) {
    self.world.destroy_component_inner(self.me);
  }

  /// Destroy any component, with the same deferral rules as
  /// [`WorldAccess::destroy_self`]. No-op on stale handles.
  pub fn destroy_component(&self, id: ComponentId) {
    self.world.destroy_component_inner(id);
  }

  /// Destroy an object and every component on it.
  pub fn destroy_object(&self, object: ObjectId) -> Result<(), WorldError> {
    self.world.destroy_object_inner(object)
  }

  /// Finalize an object, running its required-components check.
  pub fn finalize_object(&self, object: ObjectId) -> Result<(), WorldError> {
    self.world.finalize_object_inner(object)
  }

  /// Register a world-unique name for this component's object.
  pub fn register_object_name(&self, name: &str) -> Result<(), WorldError> {
    self.world.register_object_name_inner(self.owner, name)
  }

  /// Resolve a name registered with [`WorldAccess::register_object_name`].
  pub fn lookup_object_name(&self, name: &str) -> Option<ObjectId> {
    self.world.lookup_object_name(name)
  }

  /// Run a closure against the concrete component behind a handle. `None` if
  /// the handle is stale or the component is not a `C`.
  ///
  /// Panics if that component is currently executing one of its own handlers.
  pub fn read_component<C: Component, R>(&self, id: ComponentId, f: impl FnOnce(&C) -> R) -> Option<R> {
    self.world.read_component(id, f)
  }

  /// Mutable flavor of [`WorldAccess::read_component`].
  pub fn write_component<C: Component, R>(
    &self,
    id: ComponentId,
    f: impl FnOnce(&mut C) -> R,
  ) -> Option<R> {
    self.world.write_component(id, f)
  }

  /// The live components of one name on one object, in insertion order.
  pub fn components(&self, object: ObjectId, name: &str) -> Vec<ComponentId> {
    self.world.components(object, name)
  }

  pub fn is_alive(&self, id: ComponentId) -> bool {
    self.world.is_alive(id)
  }

  pub fn owner_of(&self, id: ComponentId) -> Option<ObjectId> {
    self.world.owner_of(id)
  }

  pub fn component_name(&self, id: ComponentId) -> Option<SmolStr> {
    self.world.component_name(id)
  }

  /// Start logging every delivery to this component's subscription on the
  /// given component name.
  pub fn track_component_request(&self, name: &str, local: bool) {
    self
      .world
      .track_request_inner(RequestKind::Component, name, local, self.me);
  }

  /// Start logging every delivery to this component's subscription on the
  /// given message name.
  pub fn track_message_request(&self, name: &str) {
    self
      .world
      .track_request_inner(RequestKind::Message, name, false, self.me);
  }
}
