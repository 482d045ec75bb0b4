//! Ant-style path matching.
//!
//! Supported syntax:
//! - `?` matches one character within a path segment
//! - `*` matches zero or more characters within a path segment
//! - `**` matches zero or more whole path segments
//! - a trailing `/` is shorthand for `/**`
//!
//! Both `/` and `\` are accepted as separators in patterns and paths.

/// Replace Windows separators with `/`.
pub fn normalize_separators(path: &str) -> String {
  path.replace('\\', "/")
}

/// Whether a pattern segment contains wildcard characters.
pub fn has_wildcard(segment: &str) -> bool {
  segment.contains('*') || segment.contains('?')
}

/// A compiled Ant pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntPattern {
  raw: String,
  segments: Vec<String>,
  case_sensitive: bool,
}

impl AntPattern {
  /// Compile a case-sensitive pattern (file paths).
  pub fn new(pattern: &str) -> Self {
    Self::with_case(pattern, true)
  }

  /// Compile a pattern with explicit case sensitivity.
  pub fn with_case(pattern: &str, case_sensitive: bool) -> Self {
    let mut raw = normalize_separators(pattern.trim());
    if raw.ends_with('/') {
      raw.push_str("**");
    }
    let segments = raw
      .split('/')
      .filter(|s| !s.is_empty())
      .map(|s| if case_sensitive { s.to_string() } else { s.to_lowercase() })
      .collect();
    Self {
      raw,
      segments,
      case_sensitive,
    }
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  /// Whether the pattern contains a `**` segment.
  pub fn is_recursive(&self) -> bool {
    self.segments.iter().any(|s| s == "**")
  }

  /// Leading segments without wildcards, joined with `/`.
  ///
  /// For `build/libs/*.jar` this is `build/libs`; for `**/*.jar` it is empty.
  pub fn base_dir(&self) -> String {
    let fixed: Vec<&str> = self
      .segments
      .iter()
      .take_while(|s| !has_wildcard(s))
      .map(String::as_str)
      .collect();
    // A pattern with no wildcards names a file; its base is the parent.
    if fixed.len() == self.segments.len() && !fixed.is_empty() {
      return fixed[..fixed.len() - 1].join("/");
    }
    fixed.join("/")
  }

  /// The pattern with `base_dir()` stripped.
  pub fn remainder(&self) -> AntPattern {
    let base_len = if self.base_dir().is_empty() {
      0
    } else {
      self.base_dir().split('/').count()
    };
    let rest = self.segments[base_len..].join("/");
    AntPattern {
      raw: rest.clone(),
      segments: self.segments[base_len..].to_vec(),
      case_sensitive: self.case_sensitive,
    }
  }

  /// Match a path relative to the pattern's root.
  pub fn matches(&self, path: &str) -> bool {
    let normalized = normalize_separators(path);
    let path_segments: Vec<String> = normalized
      .split('/')
      .filter(|s| !s.is_empty())
      .map(|s| if self.case_sensitive { s.to_string() } else { s.to_lowercase() })
      .collect();
    let pattern: Vec<&str> = self.segments.iter().map(String::as_str).collect();
    let path: Vec<&str> = path_segments.iter().map(String::as_str).collect();
    match_segments(&pattern, &path)
  }
}

impl std::fmt::Display for AntPattern {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.raw)
  }
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
  match pattern.first() {
    None => path.is_empty(),
    Some(&"**") => {
      let rest = &pattern[1..];
      (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
    }
    Some(segment) => match path.first() {
      Some(name) if match_segment(segment, name) => match_segments(&pattern[1..], &path[1..]),
      _ => false,
    },
  }
}

/// Match one path segment against a pattern segment with `*` and `?`.
pub fn match_segment(pattern: &str, name: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let n: Vec<char> = name.chars().collect();
  let (mut pi, mut ni) = (0usize, 0usize);
  let mut star: Option<usize> = None;
  let mut star_match = 0usize;

  while ni < n.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
      pi += 1;
      ni += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some(pi);
      star_match = ni;
      pi += 1;
    } else if let Some(s) = star {
      pi = s + 1;
      star_match += 1;
      ni = star_match;
    } else {
      return false;
    }
  }

  while pi < p.len() && p[pi] == '*' {
    pi += 1;
  }
  pi == p.len()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_star_stays_in_segment() {
    let p = AntPattern::new("build/*.jar");
    assert!(p.matches("build/a.jar"));
    assert!(!p.matches("build/sub/a.jar"));
    assert!(!p.matches("build/a.war"));
  }

  #[test]
  fn double_star_spans_directories() {
    let p = AntPattern::new("build/**/*.jar");
    assert!(p.matches("build/a.jar"));
    assert!(p.matches("build/x/y/a.jar"));
    assert!(!p.matches("other/a.jar"));
  }

  #[test]
  fn question_mark_matches_one_char() {
    let p = AntPattern::new("lib-?.zip");
    assert!(p.matches("lib-1.zip"));
    assert!(!p.matches("lib-10.zip"));
  }

  #[test]
  fn trailing_slash_means_everything_below() {
    let p = AntPattern::new("dist/");
    assert!(p.matches("dist/a"));
    assert!(p.matches("dist/x/y.txt"));
    assert!(p.is_recursive());
  }

  #[test]
  fn windows_separators_are_normalized() {
    let p = AntPattern::new("build\\libs\\*.jar");
    assert!(p.matches("build/libs/app.jar"));
    assert!(p.matches("build\\libs\\app.jar"));
  }

  #[test]
  fn case_insensitive_matching() {
    let p = AntPattern::with_case("*password*", false);
    assert!(p.matches("DB_PASSWORD"));
    assert!(p.matches("password"));
    assert!(!AntPattern::new("*password*").matches("DB_PASSWORD"));
  }

  #[test]
  fn base_dir_and_remainder() {
    let p = AntPattern::new("build/libs/*.jar");
    assert_eq!(p.base_dir(), "build/libs");
    assert_eq!(p.remainder().as_str(), "*.jar");

    let p = AntPattern::new("**/*.jar");
    assert_eq!(p.base_dir(), "");
    assert_eq!(p.remainder().as_str(), "**/*.jar");

    let p = AntPattern::new("out/report.txt");
    assert_eq!(p.base_dir(), "out");
    assert!(p.remainder().matches("report.txt"));
  }

  #[test]
  fn segment_matching_backtracks() {
    assert!(match_segment("*a*b", "xxaxxb"));
    assert!(match_segment("a*", "a"));
    assert!(!match_segment("a*c", "abcd"));
    assert!(match_segment("*", ""));
  }
}
