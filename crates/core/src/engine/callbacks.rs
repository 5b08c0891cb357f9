//! C2: the inline callback registry.
//!
//! Ground truth: `original_source/gsh/callbacks.py`. Every remote dispatcher
//! shares one registry (held by the owning `EngineContext`) and uses it to
//! smuggle out-of-band signals through the same byte stream the remote
//! shell's real output travels on.

use std::collections::HashMap;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const RANDOM_LENGTH: usize = 20;
const TRIGGER_LENGTH: usize = 2 * RANDOM_LENGTH + 2;

pub type DispatcherId = u64;
pub type Handler = Box<dyn FnMut(&[u8])>;

struct Entry {
  handler: Handler,
  continuous: bool,
  owner: DispatcherId,
}

/// Small xorshift64 PRNG. Nothing in the teacher's dependency stack pulls in
/// `rand`, and triggers only need to be unguessable enough not to collide
/// with real remote output, not cryptographically secure.
struct Rng(u64);

impl Rng {
  fn seeded() -> Self {
    let nanos = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(0x9E37_79B9_7F4A_7C15);
    let seed = (std::process::id() as u64) ^ nanos;
    Rng(seed | 1)
  }

  fn next_u64(&mut self) -> u64 {
    let mut x = self.0;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    self.0 = x;
    x
  }

  fn random_string(&mut self, len: usize) -> String {
    (0..len)
      .map(|_| {
        let idx = (self.next_u64() % ALPHABET.len() as u64) as usize;
        ALPHABET[idx] as char
      })
      .collect()
  }
}

/// Table mapping freshly minted random markers to local handler functions.
pub struct CallbackRegistry {
  rng: Rng,
  common_prefix: String,
  entries: HashMap<String, Entry>,
}

impl CallbackRegistry {
  pub fn new() -> Self {
    let mut rng = Rng::seeded();
    let r0 = rng.random_string(RANDOM_LENGTH);
    Self {
      rng,
      common_prefix: format!("gsh-{r0},"),
      entries: HashMap::new(),
    }
  }

  pub fn common_prefix(&self) -> &str {
    &self.common_prefix
  }

  /// Register a handler, returning the two halves the caller must emit as
  /// adjacent quoted string literals so shell expansion cannot rejoin the
  /// marker inside its own parser before it reaches the output stream.
  pub fn add(
    &mut self,
    owner: DispatcherId,
    continuous: bool,
    handler: Handler,
  ) -> (String, String) {
    let r1 = self.rng.random_string(RANDOM_LENGTH);
    let r2 = self.rng.random_string(RANDOM_LENGTH);
    let trigger = format!("{r1}/{r2}.");
    self.entries.insert(
      trigger,
      Entry {
        handler,
        continuous,
        owner,
      },
    );
    let prefix_half = format!("{}{r1}/", self.common_prefix);
    let suffix_half = format!("{r2}.");
    (prefix_half, suffix_half)
  }

  pub fn any_in(&self, buffer: &[u8]) -> bool {
    find_subslice(buffer, self.common_prefix.as_bytes()).is_some()
  }

  /// Locate the common prefix inside `line`; if a known trigger immediately
  /// follows, invoke its handler with the remainder of the line and report
  /// true. At most one trigger is consumed per call.
  pub fn process(&mut self, line: &[u8]) -> bool {
    let prefix = self.common_prefix.as_bytes();
    let Some(idx) = find_subslice(line, prefix) else {
      return false;
    };
    let after_prefix = &line[idx + prefix.len()..];
    if after_prefix.len() < TRIGGER_LENGTH {
      return false;
    }
    let trigger_bytes = &after_prefix[..TRIGGER_LENGTH];
    let Ok(trigger) = std::str::from_utf8(trigger_bytes) else {
      return false;
    };
    let Some(entry) = self.entries.get_mut(trigger) else {
      return false;
    };
    let payload = &after_prefix[TRIGGER_LENGTH..];
    (entry.handler)(payload);
    if !entry.continuous {
      self.entries.remove(trigger);
    }
    true
  }

  /// Remove every trigger owned by `owner`. Called from `disconnect()` so a
  /// dead dispatcher's outstanding triggers don't leak for the rest of the
  /// engine's lifetime (Open Question ii).
  pub fn drop_owner(&mut self, owner: DispatcherId) {
    self.entries.retain(|_, entry| entry.owner != owner);
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

impl Default for CallbackRegistry {
  fn default() -> Self {
    Self::new()
  }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  if needle.is_empty() {
    return Some(0);
  }
  if haystack.len() < needle.len() {
    return None;
  }
  haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::rc::Rc;

  #[test]
  fn round_trip_invokes_handler_once_for_non_continuous() {
    let mut reg = CallbackRegistry::new();
    let seen: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let (prefix_half, suffix_half) =
      reg.add(1, false, Box::new(move |payload| seen2.borrow_mut().push(payload.to_vec())));

    let line = format!("{prefix_half}{suffix_half}hello\n");
    assert!(reg.process(line.as_bytes()));
    assert_eq!(seen.borrow().as_slice(), &[b"hello\n".to_vec()]);

    // second emission: entry was removed, so nothing fires
    assert!(!reg.process(line.as_bytes()));
    assert_eq!(seen.borrow().len(), 1);
  }

  #[test]
  fn continuous_handler_fires_repeatedly() {
    let mut reg = CallbackRegistry::new();
    let count = Rc::new(RefCell::new(0));
    let count2 = count.clone();
    let (prefix_half, suffix_half) = reg.add(1, true, Box::new(move |_| *count2.borrow_mut() += 1));
    let line = format!("{prefix_half}{suffix_half}\n");

    assert!(reg.process(line.as_bytes()));
    assert!(reg.process(line.as_bytes()));
    assert_eq!(*count.borrow(), 2);
  }

  #[test]
  fn two_registrations_do_not_cross_payloads() {
    let mut reg = CallbackRegistry::new();
    let a = Rc::new(RefCell::new(None));
    let b = Rc::new(RefCell::new(None));
    let (a2, b2) = (a.clone(), b.clone());
    let (pa, sa) = reg.add(1, false, Box::new(move |p| *a2.borrow_mut() = Some(p.to_vec())));
    let (pb, sb) = reg.add(2, false, Box::new(move |p| *b2.borrow_mut() = Some(p.to_vec())));

    reg.process(format!("{pa}{sa}payload-a\n").as_bytes());
    reg.process(format!("{pb}{sb}payload-b\n").as_bytes());

    assert_eq!(a.borrow().as_deref(), Some(b"payload-a\n".as_slice()));
    assert_eq!(b.borrow().as_deref(), Some(b"payload-b\n".as_slice()));
  }

  #[test]
  fn truncated_trigger_near_end_of_line_does_not_match() {
    let mut reg = CallbackRegistry::new();
    reg.add(1, false, Box::new(|_| {}));
    let short_line = format!("{}short\n", reg.common_prefix());
    assert!(!reg.process(short_line.as_bytes()));
    assert_eq!(reg.len(), 1, "no entry should be consumed");
  }

  #[test]
  fn drop_owner_removes_only_that_owners_entries() {
    let mut reg = CallbackRegistry::new();
    reg.add(1, true, Box::new(|_| {}));
    reg.add(2, true, Box::new(|_| {}));
    assert_eq!(reg.len(), 2);
    reg.drop_owner(1);
    assert_eq!(reg.len(), 1);
  }

  #[test]
  fn any_in_detects_presence_without_consuming() {
    let mut reg = CallbackRegistry::new();
    let (prefix_half, suffix_half) = reg.add(1, false, Box::new(|_| {}));
    let buf = format!("noise {prefix_half}{suffix_half}more\n");
    assert!(reg.any_in(buf.as_bytes()));
    assert_eq!(reg.len(), 1);
  }
}
