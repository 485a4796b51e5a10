use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::component::{Component, ComponentId};
use crate::object::{Object, ObjectId};

/// How each component is stored. The cell is shared out to the dispatcher so
/// the slot map can keep changing underneath a delivery in progress.
pub(crate) type ComponentCell = Rc<RefCell<Box<dyn Component>>>;

pub(crate) struct ComponentSlot {
  pub owner: ObjectId,
  pub name: SmolStr,
  /// Diagnostic: log this component's lifecycle events.
  pub tracked: Cell<bool>,
  pub cell: ComponentCell,
}

/// Slot storage for objects and components.
///
/// Objects sit in a vector indexed directly by id (ids start at 1, slot 0
/// stays empty so indices line up); destroyed objects leave a `None` behind
/// since ids are never reused. Components live in a map because their ids are
/// minted far faster than object ids and the map drops slots on destruction.
pub(crate) struct Storage {
  objects: RefCell<Vec<Option<Object>>>,
  components: RefCell<AHashMap<ComponentId, ComponentSlot>>,
  next_object: Cell<u32>,
  next_component: Cell<u32>,
}

impl Storage {
  pub fn new() -> Self {
    Self {
      objects: RefCell::new(vec![None]),
      components: RefCell::new(AHashMap::new()),
      next_object: Cell::new(1),
      next_component: Cell::new(1),
    }
  }

  pub fn create_object(&self) -> ObjectId {
    let id = ObjectId(self.next_object.get());
    self.next_object.set(id.0 + 1);
    self.objects.borrow_mut().push(Some(Object::new()));
    id
  }

  /// The object slot is present, destroyed or not being a separate question.
  pub fn object_exists(&self, id: ObjectId) -> bool {
    self
      .objects
      .borrow()
      .get(id.0 as usize)
      .map_or(false, Option::is_some)
  }

  /// Present and not condemned to a deferred destruction.
  pub fn object_live(&self, id: ObjectId) -> bool {
    self
      .objects
      .borrow()
      .get(id.0 as usize)
      .map_or(false, |slot| slot.as_ref().map_or(false, |obj| !obj.is_doomed()))
  }

  pub fn release_object(&self, id: ObjectId) {
    if let Some(slot) = self.objects.borrow_mut().get_mut(id.0 as usize) {
      *slot = None;
    }
  }

  /// Run a closure against one object, if it still exists.
  pub fn with_object<R>(&self, id: ObjectId, f: impl FnOnce(&Object) -> R) -> Option<R> {
    self
      .objects
      .borrow()
      .get(id.0 as usize)
      .and_then(Option::as_ref)
      .map(f)
  }

  pub fn with_object_mut<R>(&self, id: ObjectId, f: impl FnOnce(&mut Object) -> R) -> Option<R> {
    self
      .objects
      .borrow_mut()
      .get_mut(id.0 as usize)
      .and_then(Option::as_mut)
      .map(f)
  }

  /// Mint an id for the component, move it into a slot, and index it on its
  /// owner. The owner link is set here, exactly once, before the activation
  /// hook ever runs.
  pub fn adopt(&self, owner: ObjectId, name: SmolStr, component: Box<dyn Component>) -> ComponentId {
    let id = ComponentId(self.next_component.get());
    self.next_component.set(id.0 + 1);
    self.components.borrow_mut().insert(
      id,
      ComponentSlot {
        owner,
        name: name.clone(),
        tracked: Cell::new(false),
        cell: Rc::new(RefCell::new(component)),
      },
    );
    self.with_object_mut(owner, |obj| obj.insert_component(name, id));
    id
  }

  /// Drop the slot. The cell itself lives on as long as anyone still holds it.
  pub fn discard(&self, id: ComponentId) {
    self.components.borrow_mut().remove(&id);
  }

  pub fn is_alive(&self, id: ComponentId) -> bool {
    self.components.borrow().contains_key(&id)
  }

  pub fn cell(&self, id: ComponentId) -> Option<ComponentCell> {
    self.components.borrow().get(&id).map(|slot| slot.cell.clone())
  }

  pub fn cell_and_owner(&self, id: ComponentId) -> Option<(ComponentCell, ObjectId)> {
    self
      .components
      .borrow()
      .get(&id)
      .map(|slot| (slot.cell.clone(), slot.owner))
  }

  pub fn owner_of(&self, id: ComponentId) -> Option<ObjectId> {
    self.components.borrow().get(&id).map(|slot| slot.owner)
  }

  pub fn name_of(&self, id: ComponentId) -> Option<SmolStr> {
    self.components.borrow().get(&id).map(|slot| slot.name.clone())
  }

  pub fn is_tracked(&self, id: ComponentId) -> bool {
    self
      .components
      .borrow()
      .get(&id)
      .map_or(false, |slot| slot.tracked.get())
  }

  pub fn track(&self, id: ComponentId) {
    if let Some(slot) = self.components.borrow().get(&id) {
      slot.tracked.set(true);
    }
  }

  /// Every live component of the given name anywhere, objects in creation
  /// order, components within an object in insertion order. This is the
  /// iteration order the late-join sweep promises.
  pub fn components_named_everywhere(&self, name: &str) -> Vec<ComponentId> {
    let objects = self.objects.borrow();
    objects
      .iter()
      .filter_map(Option::as_ref)
      .flat_map(|obj| obj.components_named(name))
      .collect()
  }
}
