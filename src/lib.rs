#![doc = include_str!("../README.md")]

pub mod component;
pub mod messages;
pub mod object;
pub mod request;
pub mod world;

use component::ComponentId;

fn loop_panic(perpetrator: ComponentId) -> ! {
  panic!(
    "component {} was delivered a notification while one of its own handlers was still on the stack, probably via a loop of messages. check the stacktrace.",
    perpetrator
  )
}

pub mod prelude {
  pub use crate::component::{Component, ComponentId};
  pub use crate::messages::{Envelope, EnvelopeKind, MsgHandler, Payload, WorldAccess};
  pub use crate::object::ObjectId;
  pub use crate::request::{RequestId, RequestKind};
  pub use crate::world::{World, WorldError};
}
