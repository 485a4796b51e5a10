//! Behavior units attachable to [objects](crate::object::ObjectId), driven entirely by
//! notifications from the bus.

use std::fmt;

use downcast::{downcast, Any};

use crate::messages::WorldAccess;

/// A handle to a component living in a [`World`](crate::world::World).
///
/// Ids are minted when the component is adopted, count up from 1, and are never
/// reused within a run, so a stale handle simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) u32);

impl fmt::Display for ComponentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Something attached to an object that gives it its behavior.
///
/// A component is constructed detached, as a plain value; it cannot touch the
/// bus until [`World::add_component`](crate::world::World::add_component) adopts
/// it. Adoption sets its owner and runs [`Component::attached`] once, which is
/// where the component declares what it wants to hear about. After that, all of
/// its behavior happens inside handlers.
///
/// Components hold their own state and nothing of the core's; the world refers
/// to them purely by [`ComponentId`].
pub trait Component: Any {
  /// The name this component is indexed under and matched against
  /// subscriptions, verbatim. Must not be empty.
  fn name(&self) -> &str;

  /// Called once, immediately after adoption.
  ///
  /// Subscriptions declared here are processed when the hook returns, before
  /// the component's own creation notification goes out. Returning an `Err`
  /// aborts the adoption with [`WorldError::AddFailure`](crate::world::WorldError);
  /// whatever the hook did before failing is left as-is.
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    let _ = cx;
    Ok(())
  }
}
downcast!(dyn Component);
