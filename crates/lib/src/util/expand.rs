//! `$VAR` / `${VAR}` expansion against a build environment.
//!
//! Unknown variables are left untouched so that literal dollar signs in
//! patterns and property values survive expansion.

use std::collections::BTreeMap;

/// Expand `$NAME` and `${NAME}` references using `env`.
pub fn expand_vars(input: &str, env: &BTreeMap<String, String>) -> String {
  let mut out = String::with_capacity(input.len());
  let chars: Vec<char> = input.chars().collect();
  let mut i = 0;

  while i < chars.len() {
    if chars[i] != '$' {
      out.push(chars[i]);
      i += 1;
      continue;
    }

    if chars.get(i + 1) == Some(&'{') {
      if let Some(close) = chars[i + 2..].iter().position(|c| *c == '}') {
        let name: String = chars[i + 2..i + 2 + close].iter().collect();
        match env.get(&name) {
          Some(value) => out.push_str(value),
          None => out.extend(&chars[i..i + 3 + close]),
        }
        i += 3 + close;
        continue;
      }
    } else {
      let len = chars[i + 1..]
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
        .count();
      if len > 0 {
        let name: String = chars[i + 1..i + 1 + len].iter().collect();
        match env.get(&name) {
          Some(value) => out.push_str(value),
          None => out.extend(&chars[i..i + 1 + len]),
        }
        i += 1 + len;
        continue;
      }
    }

    out.push('$');
    i += 1;
  }

  out
}
