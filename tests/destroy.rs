//! Destruction: deferral while dispatches run, eviction, and exactly-once
//! destroy notifications.

use std::cell::RefCell;
use std::rc::Rc;

use operon::prelude::*;

type Hits = Rc<RefCell<u32>>;

struct Clock;
impl Component for Clock {
  fn name(&self) -> &str {
    "Clock"
  }
}

/// Counts ticks and dies on the first one.
struct Mayfly {
  ticks: Hits,
}
impl Component for Mayfly {
  fn name(&self) -> &str {
    "Mayfly"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_message("Tick", |this: &mut Mayfly, _env, access| {
      *this.ticks.borrow_mut() += 1;
      access.destroy_self();
    });
    Ok(())
  }
}

/// Subscribed after the mayfly, so it observes the corpse mid-dispatch.
struct Coroner {
  mayfly: ComponentId,
  alive_during_tick: Option<bool>,
}
impl Component for Coroner {
  fn name(&self) -> &str {
    "Coroner"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_message("Tick", |this: &mut Coroner, _env, access| {
      this.alive_during_tick = Some(access.is_alive(this.mayfly));
    });
    Ok(())
  }
}

#[test]
fn self_destruction_waits_for_quiescence() {
  let mut world = World::new();
  let home = world.create_object();
  let clock = world.add_component(home, Box::new(Clock)).unwrap();
  let ticks = Hits::default();
  let mayfly = world
    .add_component(home, Box::new(Mayfly { ticks: ticks.clone() }))
    .unwrap();
  world
    .add_component(
      home,
      Box::new(Coroner {
        mayfly,
        alive_during_tick: None,
      }),
    )
    .unwrap();

  world.send_message(clock, "Tick").unwrap();
  assert_eq!(*ticks.borrow(), 1);
  // the mayfly asked to die mid-dispatch; the later subscriber still saw it
  let coroner_saw = world
    .components(home, "Coroner")
    .first()
    .and_then(|&c| world.read_component(c, |c: &Coroner| c.alive_during_tick))
    .unwrap();
  assert_eq!(coroner_saw, Some(true));
  // once the send returned, it was gone
  assert!(!world.is_alive(mayfly));

  // and a later tick must not reach it
  world.send_message(clock, "Tick").unwrap();
  assert_eq!(*ticks.borrow(), 1);
}

/// Destroys a designated victim when the clock ticks.
struct Assassin {
  target: Option<ComponentId>,
}
impl Component for Assassin {
  fn name(&self) -> &str {
    "Assassin"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_message("Tick", |this: &mut Assassin, _env, access| {
      if let Some(target) = this.target {
        access.destroy_component(target);
      }
    });
    Ok(())
  }
}

/// Just counts ticks.
struct Bystander {
  ticks: Hits,
}
impl Component for Bystander {
  fn name(&self) -> &str {
    "Bystander"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_message("Tick", |this: &mut Bystander, _env, _access| {
      *this.ticks.borrow_mut() += 1;
    });
    Ok(())
  }
}

#[test]
fn marked_components_keep_receiving_until_the_drain() {
  let mut world = World::new();
  let home = world.create_object();
  let clock = world.add_component(home, Box::new(Clock)).unwrap();
  let assassin = world
    .add_component(home, Box::new(Assassin { target: None }))
    .unwrap();
  let ticks = Hits::default();
  let victim = world
    .add_component(home, Box::new(Bystander { ticks: ticks.clone() }))
    .unwrap();
  world
    .write_component(assassin, |a: &mut Assassin| a.target = Some(victim))
    .unwrap();

  world.send_message(clock, "Tick").unwrap();
  // the assassin spoke first, but the victim still heard this tick
  assert_eq!(*ticks.borrow(), 1);
  assert!(!world.is_alive(victim));

  world.send_message(clock, "Tick").unwrap();
  assert_eq!(*ticks.borrow(), 1);
}

struct Organ;
impl Component for Organ {
  fn name(&self) -> &str {
    "Organ"
  }
}

struct Obituary {
  seen: Rc<RefCell<Vec<(EnvelopeKind, ComponentId)>>>,
}
impl Component for Obituary {
  fn name(&self) -> &str {
    "Obituary"
  }
  fn attached(&mut self, cx: &WorldAccess) -> eyre::Result<()> {
    cx.request_component(
      "Organ",
      |this: &mut Obituary, env: &Envelope, _access: &WorldAccess| {
        this.seen.borrow_mut().push((env.kind(), env.sender()));
      },
      false,
    );
    Ok(())
  }
}

#[test]
fn destroying_an_object_notifies_once_per_component() {
  let mut world = World::new();
  let seen = Rc::new(RefCell::new(Vec::new()));
  let morgue = world.create_object();
  world
    .add_component(morgue, Box::new(Obituary { seen: seen.clone() }))
    .unwrap();

  let body = world.create_object();
  let organs: Vec<ComponentId> = (0..3)
    .map(|_| world.add_component(body, Box::new(Organ)).unwrap())
    .collect();
  seen.borrow_mut().clear();

  world.destroy_object(body).unwrap();
  let destroys: Vec<ComponentId> = seen
    .borrow()
    .iter()
    .filter(|(kind, _)| *kind == EnvelopeKind::Destroy)
    .map(|(_, id)| *id)
    .collect();
  assert_eq!(destroys, organs);
  assert!(!world.object_exists(body));
  for organ in organs {
    assert!(!world.is_alive(organ));
  }
}

#[test]
fn double_destroy_is_a_no_op() {
  let mut world = World::new();
  let seen = Rc::new(RefCell::new(Vec::new()));
  let morgue = world.create_object();
  world
    .add_component(morgue, Box::new(Obituary { seen: seen.clone() }))
    .unwrap();

  let body = world.create_object();
  let organ = world.add_component(body, Box::new(Organ)).unwrap();
  seen.borrow_mut().clear();

  world.destroy_component(organ);
  world.destroy_component(organ);
  assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn destroyed_subscribers_are_evicted() {
  let mut world = World::new();
  let home = world.create_object();
  let clock = world.add_component(home, Box::new(Clock)).unwrap();
  let ticks = Hits::default();
  let bystander = world
    .add_component(home, Box::new(Bystander { ticks: ticks.clone() }))
    .unwrap();

  world.destroy_component(bystander);
  world.send_message(clock, "Tick").unwrap();
  assert_eq!(*ticks.borrow(), 0);
}
