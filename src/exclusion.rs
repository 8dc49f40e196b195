//! Ignore-pattern filtering for snapshot enumeration
//!
//! Glob patterns compile through `globset`; explicit regular expressions are
//! used as written. Each pattern carries its own case-sensitivity flag.
//! Patterns containing `/` match the full relative path, everything else
//! matches the file name alone.

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Pattern syntax selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
	#[default]
	Glob,
	Regex,
}

/// One ignore pattern as written in a group descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSpec {
	/// Pattern text, glob or regex depending on `kind`
	pub pattern: String,

	pub kind: PatternKind,

	pub case_insensitive: bool,
}

impl Default for PatternSpec {
	fn default() -> Self {
		PatternSpec { pattern: String::new(), kind: PatternKind::Glob, case_insensitive: false }
	}
}

impl PatternSpec {
	pub fn glob(pattern: impl Into<String>) -> Self {
		PatternSpec { pattern: pattern.into(), kind: PatternKind::Glob, case_insensitive: false }
	}

	pub fn regex(pattern: impl Into<String>) -> Self {
		PatternSpec { pattern: pattern.into(), kind: PatternKind::Regex, case_insensitive: false }
	}

	pub fn case_insensitive(mut self) -> Self {
		self.case_insensitive = true;
		self
	}
}

#[derive(Debug)]
enum Compiled {
	Glob(GlobMatcher),
	Regex(Regex),
}

#[derive(Debug)]
struct CompiledPattern {
	/// Match against the relative path rather than the bare file name
	matches_path: bool,
	inner: Compiled,
}

/// Compiled set of ignore patterns
#[derive(Debug, Default)]
pub struct IgnoreSet {
	patterns: Vec<CompiledPattern>,
}

impl IgnoreSet {
	/// Empty set; nothing is ignored
	pub fn empty() -> Self {
		IgnoreSet { patterns: Vec::new() }
	}

	pub fn compile(specs: &[PatternSpec]) -> Result<Self, SyncError> {
		let mut patterns = Vec::with_capacity(specs.len());

		for spec in specs {
			let matches_path = spec.pattern.contains('/');
			let inner = match spec.kind {
				PatternKind::Glob => {
					let glob = GlobBuilder::new(&spec.pattern)
						.case_insensitive(spec.case_insensitive)
						.literal_separator(matches_path)
						.build()
						.map_err(|e| SyncError::Format {
							message: format!("bad glob '{}': {}", spec.pattern, e),
						})?;
					Compiled::Glob(glob.compile_matcher())
				}
				PatternKind::Regex => {
					let re = RegexBuilder::new(&spec.pattern)
						.case_insensitive(spec.case_insensitive)
						.build()
						.map_err(|e| SyncError::Format {
							message: format!("bad regex '{}': {}", spec.pattern, e),
						})?;
					Compiled::Regex(re)
				}
			};
			patterns.push(CompiledPattern { matches_path, inner });
		}

		Ok(IgnoreSet { patterns })
	}

	/// Check one file against every pattern
	pub fn is_ignored(&self, rel_path: &str, file_name: &str) -> bool {
		self.patterns.iter().any(|p| {
			let subject = if p.matches_path { rel_path } else { file_name };
			match &p.inner {
				Compiled::Glob(m) => m.is_match(subject),
				Compiled::Regex(re) => re.is_match(subject),
			}
		})
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_glob_case_insensitive() {
		let set =
			IgnoreSet::compile(&[PatternSpec::glob("*.tmp").case_insensitive()]).unwrap();

		assert!(set.is_ignored("FOO.TMP", "FOO.TMP"));
		assert!(set.is_ignored("sub/dir/bar.Tmp", "bar.Tmp"));
		assert!(!set.is_ignored("foo.txt", "foo.txt"));
	}

	#[test]
	fn test_glob_case_sensitive_by_default() {
		let set = IgnoreSet::compile(&[PatternSpec::glob("*.tmp")]).unwrap();

		assert!(set.is_ignored("foo.tmp", "foo.tmp"));
		assert!(!set.is_ignored("FOO.TMP", "FOO.TMP"));
	}

	#[test]
	fn test_path_pattern_matches_relative_path() {
		let set = IgnoreSet::compile(&[PatternSpec::glob("build/**")]).unwrap();

		assert!(set.is_ignored("build/out/a.o", "a.o"));
		assert!(!set.is_ignored("src/a.o", "a.o"));
	}

	#[test]
	fn test_regex_pattern() {
		let set =
			IgnoreSet::compile(&[PatternSpec::regex(r"^~\$.*").case_insensitive()]).unwrap();

		assert!(set.is_ignored("~$report.docx", "~$report.docx"));
		assert!(!set.is_ignored("report.docx", "report.docx"));
	}

	#[test]
	fn test_bad_pattern_is_format_error() {
		let err = IgnoreSet::compile(&[PatternSpec::regex("(")]).unwrap_err();
		assert!(matches!(err, SyncError::Format { .. }));
	}
}

// vim: ts=4
