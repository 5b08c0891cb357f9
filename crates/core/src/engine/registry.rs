//! C4: the dispatcher registry.
//!
//! Grounded on `crates/agency/src/pty/registry.rs` for the
//! counter-plus-collection registry idiom, and on the naming/width
//! semantics spelled out in `original_source/gsh/remote_dispatcher.py` and
//! `control_commands.py` (`do_list`, `do_rename`).

use super::callbacks::DispatcherId;
use super::dispatcher::RemoteDispatcher;

/// Process-wide set of all live C3 instances, in insertion order.
pub struct DispatcherRegistry {
  dispatchers: Vec<RemoteDispatcher>,
  next_id: DispatcherId,
  max_display_name_length: usize,
}

impl DispatcherRegistry {
  pub fn new() -> Self {
    Self {
      dispatchers: Vec::new(),
      next_id: 1,
      max_display_name_length: 0,
    }
  }

  pub fn alloc_id(&mut self) -> DispatcherId {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  /// Return a name not currently held by any other dispatcher; on
  /// collision, append the smallest unused numeric suffix `#n`, `n >= 1`.
  pub fn make_unique_name(&self, candidate: &str) -> String {
    if !self.name_taken(candidate) {
      return candidate.to_string();
    }
    let mut n = 1usize;
    loop {
      let name = format!("{candidate}#{n}");
      if !self.name_taken(&name) {
        return name;
      }
      n += 1;
    }
  }

  fn name_taken(&self, name: &str) -> bool {
    self.dispatchers.iter().any(|d| d.display_name() == name)
  }

  pub fn insert(&mut self, dispatcher: RemoteDispatcher, interactive: bool) {
    self.dispatchers.push(dispatcher);
    self.update_max_display_name_length(interactive);
  }

  pub fn remove_dead(&mut self) {
    self.dispatchers.retain(|d| d.active());
  }

  /// Drop every dispatcher `id` for which `predicate` holds, e.g. `:purge`
  /// deleting disabled shells.
  pub fn remove_where(&mut self, ids: &[DispatcherId]) {
    self.dispatchers.retain(|d| !ids.contains(&d.id()));
  }

  pub fn get_mut(&mut self, id: DispatcherId) -> Option<&mut RemoteDispatcher> {
    self.dispatchers.iter_mut().find(|d| d.id() == id)
  }

  /// Swap a dead entry for a freshly spawned one sharing its id, used by
  /// `:reconnect`.
  pub fn replace(&mut self, id: DispatcherId, new: RemoteDispatcher) {
    if let Some(slot) = self.dispatchers.iter_mut().find(|d| d.id() == id) {
      *slot = new;
    }
  }

  pub fn all_instances(&self) -> impl Iterator<Item = &RemoteDispatcher> {
    self.dispatchers.iter()
  }

  pub fn all_instances_mut(&mut self) -> impl Iterator<Item = &mut RemoteDispatcher> {
    self.dispatchers.iter_mut()
  }

  pub fn max_display_name_length(&self) -> usize {
    self.max_display_name_length
  }

  /// Recompute from scratch — the true max of enabled entities in
  /// interactive mode, or of all active entities in non-interactive mode
  /// (Open Question i: the reference's signed-delta bookkeeping can drift).
  pub fn update_max_display_name_length(&mut self, interactive: bool) {
    self.max_display_name_length = self
      .dispatchers
      .iter()
      .filter(|d| if interactive { d.enabled() } else { d.active() })
      .map(|d| d.display_name().len())
      .max()
      .unwrap_or(0);
  }

  /// Pretty-print per-dispatcher status rows, column aligned.
  pub fn format_info(&self) -> String {
    let width = self
      .dispatchers
      .iter()
      .map(|d| d.display_name().len())
      .max()
      .unwrap_or(0);
    self
      .dispatchers
      .iter()
      .map(|d| format!("{:width$}  {}", d.display_name(), d.status_label(), width = width))
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn len(&self) -> usize {
    self.dispatchers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dispatchers.is_empty()
  }
}

impl Default for DispatcherRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::dispatcher::test_support::fake_dispatcher;

  #[test]
  fn duplicate_names_get_numeric_suffixes() {
    let mut reg = DispatcherRegistry::new();
    let name1 = reg.make_unique_name("host");
    reg.insert(fake_dispatcher(reg.alloc_id(), &name1), true);

    let name2 = reg.make_unique_name("host");
    assert_eq!(name2, "host#1");
    reg.insert(fake_dispatcher(reg.alloc_id(), &name2), true);

    let name3 = reg.make_unique_name("host");
    assert_eq!(name3, "host#2");
  }

  #[test]
  fn max_display_name_length_recomputes_from_scratch() {
    let mut reg = DispatcherRegistry::new();
    reg.insert(fake_dispatcher(reg.alloc_id(), "short"), true);
    reg.insert(fake_dispatcher(reg.alloc_id(), "a-much-longer-name"), true);
    assert_eq!(reg.max_display_name_length(), "a-much-longer-name".len());

    reg.remove_dead();
    assert_eq!(reg.len(), 2, "both are still active, nothing removed");
  }
}
