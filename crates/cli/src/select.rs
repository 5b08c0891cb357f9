//! Shell-selection mini-language: glob patterns over live display names.
//!
//! Grounded on `original_source/gsh/dispatchers.py`'s `selected_shells`,
//! translated to an anchored `regex::Regex` per pattern rather than pulling
//! in a dedicated `glob` crate, per SPEC_FULL.md 4.8.

use regex::Regex;

use groupshell_core::engine::{DispatcherId, EngineContext};

/// Translate one shell glob (`*`, `?`, `[...]`, `[!...]`) into an anchored
/// regex. Every other character is escaped literally.
pub fn glob_to_regex(pattern: &str) -> Regex {
  let mut out = String::from("^");
  let mut chars = pattern.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '*' => out.push_str(".*"),
      '?' => out.push('.'),
      '[' => {
        out.push('[');
        if chars.peek() == Some(&'!') {
          out.push('^');
          chars.next();
        }
        for c2 in chars.by_ref() {
          out.push(c2);
          if c2 == ']' {
            break;
          }
        }
      }
      _ => out.push_str(&regex::escape(&c.to_string())),
    }
  }
  out.push('$');
  Regex::new(&out).unwrap_or_else(|_| Regex::new(r"^\b$").expect("empty-match fallback is valid"))
}

/// Resolve a pattern list against the engine's live dispatchers. An empty
/// list selects everything, matching the reference's "no arguments ⇒ all".
pub fn selected_shells(ctx: &EngineContext, patterns: &[String]) -> Vec<DispatcherId> {
  if patterns.is_empty() {
    return ctx.ids();
  }
  let regexes: Vec<Regex> = patterns.iter().map(|p| glob_to_regex(p)).collect();
  ctx
    .ids()
    .into_iter()
    .filter(|id| {
      ctx
        .display_name(*id)
        .is_some_and(|name| regexes.iter().any(|r| r.is_match(name)))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn star_matches_any_suffix() {
    let re = glob_to_regex("web*");
    assert!(re.is_match("web1"));
    assert!(re.is_match("web"));
    assert!(!re.is_match("db1"));
  }

  #[test]
  fn question_mark_matches_one_character() {
    let re = glob_to_regex("db?");
    assert!(re.is_match("db1"));
    assert!(!re.is_match("db12"));
  }

  #[test]
  fn bracket_class_matches_a_set() {
    let re = glob_to_regex("db[12]");
    assert!(re.is_match("db1"));
    assert!(re.is_match("db2"));
    assert!(!re.is_match("db3"));
  }

  #[test]
  fn empty_pattern_list_selects_everything() {
    let mut ctx = EngineContext::new(groupshell_core::config::Config::default());
    ctx.config.transport_template = "true".to_string();
    let a = ctx.add("a", None).unwrap();
    let b = ctx.add("b", None).unwrap();
    let mut got = selected_shells(&ctx, &[]);
    got.sort();
    let mut want = vec![a, b];
    want.sort();
    assert_eq!(got, want);
  }
}
