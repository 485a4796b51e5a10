//! Late-join: subscribing after the fact synthesizes creation notifications
//! for everything that already exists, in a well-defined order.

use std::cell::RefCell;
use std::rc::Rc;

use operon::prelude::*;

type Log = Rc<RefCell<Vec<ComponentId>>>;

struct Spark;
impl Component for Spark {
  fn name(&self) -> &str {
    "Spark"
  }
}

struct Watcher {
  seen: Log,
}
impl Component for Watcher {
  fn name(&self) -> &str {
    "Watcher"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_component("Spark", Watcher::on_spark, false);
    Ok(())
  }
}
impl Watcher {
  fn on_spark(this: &mut Watcher, env: &Envelope, _access: &WorldAccess) {
    if env.kind() == EnvelopeKind::Create {
      this.seen.borrow_mut().push(env.sender());
    }
  }
}

#[test]
fn late_joiners_catch_up() {
  let mut world = World::new();
  let o1 = world.create_object();
  let spark = world.add_component(o1, Box::new(Spark)).unwrap();

  let seen = Log::default();
  let o2 = world.create_object();
  world
    .add_component(o2, Box::new(Watcher { seen: seen.clone() }))
    .unwrap();

  assert_eq!(*seen.borrow(), vec![spark]);
}

#[test]
fn catch_up_runs_in_object_creation_order() {
  let mut world = World::new();
  let mut sparks = Vec::new();
  for _ in 0..5 {
    let obj = world.create_object();
    sparks.push(world.add_component(obj, Box::new(Spark)).unwrap());
  }

  let seen = Log::default();
  let home = world.create_object();
  world
    .add_component(home, Box::new(Watcher { seen: seen.clone() }))
    .unwrap();

  assert_eq!(*seen.borrow(), sparks);
}

#[test]
fn subscribers_keep_hearing_about_new_arrivals() {
  let mut world = World::new();
  let seen = Log::default();
  let home = world.create_object();
  world
    .add_component(home, Box::new(Watcher { seen: seen.clone() }))
    .unwrap();
  assert!(seen.borrow().is_empty());

  let o1 = world.create_object();
  let s1 = world.add_component(o1, Box::new(Spark)).unwrap();
  let s2 = world.add_component(o1, Box::new(Spark)).unwrap();

  assert_eq!(*seen.borrow(), vec![s1, s2]);
}

struct CensusTaker {
  seen: Log,
}
impl Component for CensusTaker {
  fn name(&self) -> &str {
    "CensusTaker"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_all_existing("Spark", |this: &mut CensusTaker, env, _access| {
      this.seen.borrow_mut().push(env.sender());
    });
    Ok(())
  }
}

#[test]
fn one_shot_catch_up_hears_nothing_afterwards() {
  let mut world = World::new();
  let o1 = world.create_object();
  let s1 = world.add_component(o1, Box::new(Spark)).unwrap();

  let seen = Log::default();
  let o2 = world.create_object();
  world
    .add_component(o2, Box::new(CensusTaker { seen: seen.clone() }))
    .unwrap();
  assert_eq!(*seen.borrow(), vec![s1]);

  let o3 = world.create_object();
  world.add_component(o3, Box::new(Spark)).unwrap();
  // still just the catch-up; the one-shot registered nothing
  assert_eq!(*seen.borrow(), vec![s1]);
}

struct Vain {
  seen: Log,
}
impl Component for Vain {
  fn name(&self) -> &str {
    "Vain"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_component(
      "Vain",
      |this: &mut Vain, env: &Envelope, _access: &WorldAccess| {
        this.seen.borrow_mut().push(env.sender());
      },
      false,
    );
    Ok(())
  }
}

#[test]
fn nobody_is_told_about_themselves() {
  let mut world = World::new();
  let seen = Log::default();
  let o1 = world.create_object();
  let v1 = world
    .add_component(o1, Box::new(Vain { seen: seen.clone() }))
    .unwrap();
  // nothing else exists, and v1's own creation must not echo back
  assert!(seen.borrow().is_empty());

  let o2 = world.create_object();
  let v2 = world
    .add_component(o2, Box::new(Vain { seen: seen.clone() }))
    .unwrap();
  // v2's catch-up saw v1, then v1 heard v2's creation; neither heard itself
  assert_eq!(*seen.borrow(), vec![v1, v2]);
}

#[test]
fn lookup_stays_none_until_a_subscription_materializes() {
  let mut world = World::new();
  let o1 = world.create_object();
  world.add_component(o1, Box::new(Spark)).unwrap();
  assert!(world
    .lookup_request(RequestKind::Component, "Spark")
    .is_none());

  let seen = Log::default();
  let o2 = world.create_object();
  world.add_component(o2, Box::new(Watcher { seen })).unwrap();
  assert!(!world
    .lookup_request(RequestKind::Component, "Spark")
    .is_none());
}
