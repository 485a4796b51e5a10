//! Adoption basics: owner links, the name index, and the ways adoption fails.

use operon::prelude::*;

struct Anchor;
impl Component for Anchor {
  fn name(&self) -> &str {
    "Anchor"
  }
}

#[test]
fn basic_adoption() {
  let mut world = World::new();
  let obj = world.create_object();
  let anchor = world.add_component(obj, Box::new(Anchor)).unwrap();

  assert_eq!(world.owner_of(anchor), Some(obj));
  assert_eq!(world.component_name(anchor).as_deref(), Some("Anchor"));
  assert_eq!(world.components(obj, "Anchor"), vec![anchor]);
  assert!(world.is_alive(anchor));
}

#[test]
fn components_sharing_a_name_stack_up_in_order() {
  let mut world = World::new();
  let obj = world.create_object();
  let first = world.add_component(obj, Box::new(Anchor)).unwrap();
  let second = world.add_component(obj, Box::new(Anchor)).unwrap();
  let third = world.add_component(obj, Box::new(Anchor)).unwrap();

  assert_eq!(world.components(obj, "Anchor"), vec![first, second, third]);
}

#[test]
fn ids_are_never_reused() {
  let mut world = World::new();
  let obj = world.create_object();
  let first = world.add_component(obj, Box::new(Anchor)).unwrap();
  world.destroy_component(first);
  let second = world.add_component(obj, Box::new(Anchor)).unwrap();

  assert_ne!(first, second);
  assert!(!world.is_alive(first));
  assert!(world.is_alive(second));
}

#[test]
fn unknown_objects_are_rejected() {
  let mut world = World::new();
  let obj = world.create_object();
  world.destroy_object(obj).unwrap();

  let err = world.add_component(obj, Box::new(Anchor)).unwrap_err();
  assert!(matches!(err, WorldError::UnknownObject(_)));
}

struct Nameless;
impl Component for Nameless {
  fn name(&self) -> &str {
    ""
  }
}

#[test]
fn empty_names_are_rejected() {
  let mut world = World::new();
  let obj = world.create_object();
  let err = world.add_component(obj, Box::new(Nameless)).unwrap_err();
  assert!(matches!(err, WorldError::AddFailure { .. }));
}

struct FaultyIgnition;
impl Component for FaultyIgnition {
  fn name(&self) -> &str {
    "FaultyIgnition"
  }
  fn attached(&mut self, _cx: &WorldAccess) -> eyre::Result<()> {
    Err(eyre::eyre!("no spark"))
  }
}

#[test]
fn failing_hooks_surface_as_add_failures() {
  let mut world = World::new();
  let obj = world.create_object();
  let err = world.add_component(obj, Box::new(FaultyIgnition)).unwrap_err();
  assert!(matches!(err, WorldError::AddFailure { .. }));
  // no rollback: whatever the failed adoption did is left in place
  assert_eq!(world.components(obj, "FaultyIgnition").len(), 1);
  assert!(world.object_exists(obj));
}
