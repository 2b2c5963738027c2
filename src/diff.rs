/// Parse a unified diff into edit scripts: for every changed file, which
/// reference lines were removed and which current lines were added, plus the
/// reference path of renamed files.
///
/// Also provides a [`DiffSource`] trait that abstracts over different
/// ways to obtain a diff (stdin, git).
use std::process::Command;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tracing::debug;

use crate::edit::{CodeDelta, Edit, FileChanges};
use crate::error::{CovdeltaError, Result};

// ---------------------------------------------------------------------------
// Diff sources
// ---------------------------------------------------------------------------

/// A source for obtaining a unified diff.
pub trait DiffSource {
    /// Fetch the diff text.
    fn fetch_diff(&self) -> anyhow::Result<String>;

    /// Fetch the diff and parse it into edit scripts.
    fn code_delta(&self) -> anyhow::Result<CodeDelta> {
        let text = self.fetch_diff()?;
        parse_diff(&text).context("Failed to parse diff")
    }
}

/// Diff from stdin.
pub struct StdinDiff;

impl DiffSource for StdinDiff {
    fn fetch_diff(&self) -> anyhow::Result<String> {
        std::io::read_to_string(std::io::stdin()).context("Failed to read diff from stdin")
    }
}

/// Diff from a git command (e.g., `git diff main...HEAD`).
pub struct GitDiff {
    /// Arguments to pass to `git diff`.
    pub args: String,
}

impl DiffSource for GitDiff {
    fn fetch_diff(&self) -> anyhow::Result<String> {
        let diff_args: Vec<&str> = self.args.split_whitespace().collect();
        let output = Command::new("git")
            .arg("diff")
            .args(&diff_args)
            .output()
            .context("Failed to run git diff")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git diff failed: {stderr}");
        }

        String::from_utf8(output.stdout).context("git diff output not valid UTF-8")
    }
}

// ---------------------------------------------------------------------------
// Diff parsing
// ---------------------------------------------------------------------------

/// `@@ -old_start[,old_count] +new_start[,new_count] @@`
static HUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

/// Prepend a path prefix to all current and reference paths of a delta.
pub fn apply_path_prefix(delta: CodeDelta, prefix: &str) -> CodeDelta {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return delta;
    }
    let prefixed = |path: String| format!("{prefix}/{path}");
    CodeDelta {
        files: delta
            .files
            .into_iter()
            .map(|(path, changes)| (prefixed(path), changes))
            .collect(),
        old_paths: delta
            .old_paths
            .into_iter()
            .map(|(path, old)| (prefixed(path), prefixed(old)))
            .collect(),
    }
}

/// Decode a C-style quoted path, as git writes names with spaces, quotes or
/// non-ASCII bytes. Returns the decoded path and the text after the closing
/// quote.
fn unquote(quoted: &str) -> Result<(String, &str)> {
    let unterminated = || CovdeltaError::Parse(format!("unterminated quoted path: {quoted}"));
    let body = quoted.strip_prefix('"').ok_or_else(unterminated)?;
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while let Some(&byte) = bytes.get(i) {
        i += 1;
        match byte {
            b'"' => return Ok((String::from_utf8_lossy(&out).into_owned(), &body[i..])),
            b'\\' => {
                let escaped = *bytes.get(i).ok_or_else(unterminated)?;
                i += 1;
                let decoded = match escaped {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'v' => 0x0b,
                    b'"' | b'\\' => escaped,
                    // Octal escapes encode single bytes of a UTF-8 name.
                    b'0'..=b'7' => {
                        let mut value = u32::from(escaped - b'0');
                        let mut digits = 1;
                        while digits < 3 {
                            match bytes.get(i) {
                                Some(&(d @ b'0'..=b'7')) => {
                                    value = value * 8 + u32::from(d - b'0');
                                }
                                _ => break,
                            }
                            i += 1;
                            digits += 1;
                        }
                        u8::try_from(value).map_err(|_| {
                            CovdeltaError::Parse(format!("octal escape out of range: {quoted}"))
                        })?
                    }
                    other => {
                        return Err(CovdeltaError::Parse(format!(
                            "unknown escape '\\{}' in path: {quoted}",
                            char::from(other)
                        )))
                    }
                };
                out.push(decoded);
            }
            _ => out.push(byte),
        }
    }
    Err(unterminated())
}

/// A path as written on `rename from/to` lines: quoted or verbatim.
fn decode_path(raw: &str) -> Result<String> {
    if raw.starts_with('"') {
        Ok(unquote(raw)?.0)
    } else {
        Ok(raw.to_string())
    }
}

/// Strip the "b/" (default git) or "a/" side prefix.
fn strip_side(path: &str) -> &str {
    path.strip_prefix("b/")
        .or_else(|| path.strip_prefix("a/"))
        .unwrap_or(path)
}

/// Clean the path of a `---`/`+++` line: unquote it, drop the trailing
/// timestamp written by `diff -u` and the side prefix. Returns `None` for
/// /dev/null.
fn clean_path(raw: &str) -> Result<Option<String>> {
    let raw = if raw.starts_with('"') {
        unquote(raw)?.0
    } else {
        raw.split('\t').next().unwrap_or(raw).trim_end().to_string()
    };
    if raw == "/dev/null" {
        return Ok(None);
    }
    Ok(Some(strip_side(&raw).to_string()))
}

/// Split the `a/<old> b/<new>` part of a `diff --git` header. Either side
/// may be quoted.
fn header_paths(rest: &str) -> Result<Option<(String, String)>> {
    let (old, new) = if rest.starts_with('"') {
        let (old, tail) = unquote(rest)?;
        (old, decode_path(tail.trim_start())?)
    } else if let Some(at) = rest.ends_with('"').then(|| rest.rfind(" \"")).flatten() {
        (rest[..at].to_string(), unquote(&rest[at + 1..])?.0)
    } else {
        match rest.rsplit_once(" b/") {
            Some((old, new)) => (old.to_string(), format!("b/{new}")),
            None => return Ok(None),
        }
    };
    Ok(Some((strip_side(&old).to_string(), strip_side(&new).to_string())))
}

/// A contiguous run of removed and added lines inside a hunk.
#[derive(Debug, Default)]
struct Run {
    old_start: u32,
    new_start: u32,
    removed: u32,
    added: u32,
}

impl Run {
    fn to_edit(&self) -> Option<Edit> {
        let old = self.old_start..=self.old_start.saturating_add(self.removed.saturating_sub(1));
        let new = self.new_start..=self.new_start.saturating_add(self.added.saturating_sub(1));
        match (self.removed, self.added) {
            (0, 0) => None,
            (_, 0) => Some(Edit::delete(old, self.new_start.saturating_sub(1))),
            (0, _) => Some(Edit::insert(self.old_start.saturating_sub(1), new)),
            _ => Some(Edit::replace(old, new)),
        }
    }
}

/// Parser state for one file of the diff.
#[derive(Debug, Default)]
struct FileState {
    old_path: Option<String>,
    new_path: Option<String>,
    deleted: bool,
    renamed: bool,
    seen_hunk: bool,
    changes: FileChanges,
    run: Option<Run>,
    /// Next line numbers on each side and the hunk lines still expected.
    old_pos: u32,
    new_pos: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl FileState {
    fn in_hunk(&self) -> bool {
        self.old_remaining > 0 || self.new_remaining > 0
    }

    fn flush_run(&mut self) {
        if let Some(edit) = self.run.take().and_then(|run| run.to_edit()) {
            self.changes.push(edit);
        }
    }

    fn start_hunk(&mut self, header: &str) -> Result<()> {
        self.flush_run();
        let caps = HUNK_RE
            .captures(header)
            .ok_or_else(|| CovdeltaError::Parse(format!("malformed hunk header: {header}")))?;
        let number = |index: usize, default: u32| -> Result<u32> {
            match caps.get(index) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|e| CovdeltaError::Parse(format!("{header}: {e}"))),
                None => Ok(default),
            }
        };
        let (old_start, old_count) = (number(1, 0)?, number(2, 1)?);
        let (new_start, new_count) = (number(3, 0)?, number(4, 1)?);

        // An empty side names the line after which the other side's lines go.
        self.old_pos = if old_count == 0 {
            old_start.saturating_add(1)
        } else {
            old_start
        };
        self.new_pos = if new_count == 0 {
            new_start.saturating_add(1)
        } else {
            new_start
        };
        self.old_remaining = old_count;
        self.new_remaining = new_count;
        self.seen_hunk = true;
        Ok(())
    }

    fn run(&mut self) -> &mut Run {
        let (old_start, new_start) = (self.old_pos, self.new_pos);
        self.run.get_or_insert_with(|| Run {
            old_start,
            new_start,
            ..Default::default()
        })
    }

    /// Consume one line of the current hunk. A line that cannot belong to a
    /// hunk, or one that overruns a side's count, means the hunk is shorter
    /// than its header claims.
    fn hunk_line(&mut self, line: &str) -> Result<()> {
        match line.as_bytes().first() {
            Some(b'-') if self.old_remaining > 0 => {
                self.run().removed += 1;
                self.old_pos = self.old_pos.saturating_add(1);
                self.old_remaining -= 1;
            }
            Some(b'+') if self.new_remaining > 0 => {
                self.run().added += 1;
                self.new_pos = self.new_pos.saturating_add(1);
                self.new_remaining -= 1;
            }
            // "\ No newline at end of file" is diff metadata, not a real line
            Some(b'\\') => {}
            // Some tools strip the space of empty context lines.
            Some(b' ') | None if self.old_remaining > 0 && self.new_remaining > 0 => {
                self.flush_run();
                self.old_pos = self.old_pos.saturating_add(1);
                self.new_pos = self.new_pos.saturating_add(1);
                self.old_remaining -= 1;
                self.new_remaining -= 1;
            }
            _ => {
                return Err(CovdeltaError::Parse(format!(
                    "hunk ends early, {} old and {} new lines missing before: {line}",
                    self.old_remaining, self.new_remaining
                )))
            }
        }
        if !self.in_hunk() {
            self.flush_run();
        }
        Ok(())
    }

    fn finish(mut self, delta: &mut CodeDelta) {
        self.flush_run();
        if self.deleted {
            return;
        }
        let Some(path) = self.new_path else {
            return;
        };
        let renamed = match &self.old_path {
            Some(old) if *old != path => {
                delta.old_paths.insert(path.clone(), old.clone());
                true
            }
            _ => self.renamed,
        };
        if !self.changes.is_empty() || renamed {
            delta.files.insert(path, self.changes);
        }
    }
}

/// Parse a unified diff (e.g., `git diff`) into a [`CodeDelta`].
///
/// Every contiguous run of removed and added lines becomes one edit: only
/// removals a DELETE, only additions an INSERT, both a REPLACE. Deleted files
/// are skipped. Renamed files are keyed by their new path and recorded in
/// [`CodeDelta::old_paths`].
pub fn parse_diff(diff_text: &str) -> Result<CodeDelta> {
    let mut delta = CodeDelta::new();
    let mut current: Option<FileState> = None;

    for line in diff_text.lines() {
        if let Some(state) = current.as_mut().filter(|s| s.in_hunk()) {
            state.hunk_line(line)?;
            continue;
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(done) = current.take() {
                done.finish(&mut delta);
            }
            let mut state = FileState::default();
            if let Some((old, new)) = header_paths(rest)? {
                state.old_path = Some(old);
                state.new_path = Some(new);
            }
            current = Some(state);
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // Plain `diff -u` output has no per-file header line.
            if current.as_ref().map_or(true, |s| s.seen_hunk) {
                if let Some(done) = current.take() {
                    done.finish(&mut delta);
                }
            }
            let state = current.get_or_insert_with(FileState::default);
            state.old_path = clean_path(rest)?;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let state = current.get_or_insert_with(FileState::default);
            match clean_path(rest)? {
                Some(path) => state.new_path = Some(path),
                None => state.deleted = true,
            }
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            let state = current.get_or_insert_with(FileState::default);
            state.old_path = Some(decode_path(rest)?);
            state.renamed = true;
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            let state = current.get_or_insert_with(FileState::default);
            state.new_path = Some(decode_path(rest)?);
            state.renamed = true;
        } else if line.starts_with("deleted file mode") {
            if let Some(state) = current.as_mut() {
                state.deleted = true;
            }
        } else if line.starts_with("@@") {
            if let Some(state) = current.as_mut() {
                state.start_hunk(line)?;
            }
        }
    }
    if let Some(done) = current.take() {
        if done.in_hunk() {
            return Err(CovdeltaError::Parse(format!(
                "diff ends inside a hunk, {} old and {} new lines missing",
                done.old_remaining, done.new_remaining
            )));
        }
        done.finish(&mut delta);
    }

    debug!(
        files = delta.files.len(),
        renamed = delta.old_paths.len(),
        "Parsed diff"
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edits(delta: &CodeDelta, path: &str) -> Vec<Edit> {
        delta.changes(path).unwrap().edits().to_vec()
    }

    // -- Diff parsing tests -------------------------------------------------

    #[test]
    fn test_hunk_header_positions() {
        let mut state = FileState::default();
        state.start_hunk("@@ -10,5 +20,8 @@ fn main()").unwrap();
        assert_eq!((state.old_pos, state.new_pos), (10, 20));
        assert_eq!((state.old_remaining, state.new_remaining), (5, 8));

        state.start_hunk("@@ -0,0 +1,3 @@").unwrap();
        assert_eq!((state.old_pos, state.new_pos), (1, 1));

        state.start_hunk("@@ -5 +5 @@").unwrap();
        assert_eq!((state.old_remaining, state.new_remaining), (1, 1));

        assert!(state.start_hunk("@@ garbage @@").is_err());
    }

    #[test]
    fn test_run_to_edit() {
        let run = |old_start, new_start, removed, added| Run {
            old_start,
            new_start,
            removed,
            added,
        };
        assert_eq!(run(3, 3, 2, 0).to_edit(), Some(Edit::delete(3..=4, 2)));
        assert_eq!(run(3, 3, 0, 2).to_edit(), Some(Edit::insert(2, 3..=4)));
        assert_eq!(run(3, 4, 1, 3).to_edit(), Some(Edit::replace(3..=3, 4..=6)));
        assert_eq!(run(1, 1, 0, 0).to_edit(), None);
    }

    #[test]
    fn test_parse_diff_kinds() {
        let diff = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,5 +1,6 @@
 fn a() {}
-fn b() {}
+fn c() {}
+fn d() {}
 fn e() {}
-fn f() {}
 fn g() {}
+fn h() {}
";
        let delta = parse_diff(diff).unwrap();
        assert_eq!(
            edits(&delta, "src/lib.rs"),
            vec![
                Edit::replace(2..=2, 2..=3),
                Edit::delete(4..=4, 4),
                Edit::insert(5, 6..=6),
            ]
        );
        assert!(delta.old_paths.is_empty());
    }

    #[test]
    fn test_removed_line_that_looks_like_header() {
        let diff = "\
--- a/x.txt
+++ b/x.txt
@@ -1,2 +1,1 @@
--- not a header
 keep
";
        let delta = parse_diff(diff).unwrap();
        assert_eq!(edits(&delta, "x.txt"), vec![Edit::delete(1..=1, 0)]);
    }

    #[test]
    fn test_plain_diff_u_with_timestamps() {
        let diff = "\
--- old/a.c\t2024-01-01 10:00:00.000000000 +0000
+++ a.c\t2024-01-02 10:00:00.000000000 +0000
@@ -2,0 +3 @@
+int x;
--- b.c
+++ b.c
@@ -1 +1 @@
-int y;
+long y;
";
        let delta = parse_diff(diff).unwrap();
        assert_eq!(edits(&delta, "a.c"), vec![Edit::insert(2, 3..=3)]);
        assert_eq!(edits(&delta, "b.c"), vec![Edit::replace(1..=1, 1..=1)]);
        assert_eq!(delta.reference_path("a.c"), "old/a.c");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(
            unquote(r#""a/my file.rs" rest"#).unwrap(),
            ("a/my file.rs".to_string(), " rest")
        );
        assert_eq!(unquote(r#""tab\there\\""#).unwrap().0, "tab\there\\");
        assert_eq!(unquote(r#""caf\303\251""#).unwrap().0, "caf\u{e9}");
        assert_eq!(unquote(r#""\"q\"""#).unwrap().0, "\"q\"");
        assert!(unquote(r#""open"#).is_err());
        assert!(unquote(r#""bad\q""#).is_err());
        assert!(unquote(r#""\777""#).is_err());
    }

    #[test]
    fn test_header_paths() {
        let paths = |rest: &str| header_paths(rest).unwrap().unwrap();
        assert_eq!(paths("a/x y.rs b/x y.rs"), ("x y.rs".to_string(), "x y.rs".to_string()));
        assert_eq!(
            paths(r#""a/m\303\244h.rs" "b/m\303\244h.rs""#),
            ("m\u{e4}h.rs".to_string(), "m\u{e4}h.rs".to_string())
        );
        // only the renamed side needs quoting
        assert_eq!(
            paths(r#"a/plain.rs "b/t\tab.rs""#),
            ("plain.rs".to_string(), "t\tab.rs".to_string())
        );
        assert_eq!(header_paths("no sides here").unwrap(), None);
    }

    #[test]
    fn test_diff_ending_inside_a_hunk() {
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -1,3 +1,3 @@
 keep
-old
";
        let err = parse_diff(diff).unwrap_err();
        assert!(err.to_string().contains("diff ends inside a hunk"), "{err}");
    }

    #[test]
    fn test_hunk_line_overrunning_a_side() {
        // the header announces no removed line
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -1,0 +2,2 @@
+one
-two
";
        assert!(parse_diff(diff).is_err());
    }

    #[test]
    fn test_apply_path_prefix() {
        let mut delta = CodeDelta::new();
        delta
            .files
            .insert("src/a.rs".to_string(), [Edit::insert(0, 1..=1)].into_iter().collect());
        delta
            .old_paths
            .insert("src/a.rs".to_string(), "src/b.rs".to_string());

        let delta = apply_path_prefix(delta, "crates/core/");
        assert!(delta.changes("crates/core/src/a.rs").is_some());
        assert_eq!(delta.reference_path("crates/core/src/a.rs"), "crates/core/src/b.rs");

        let unchanged = apply_path_prefix(delta.clone(), "");
        assert_eq!(unchanged, delta);
    }
}
