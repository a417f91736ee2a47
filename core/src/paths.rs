//! Path normalization and title-encoded file-operation parsing.
//!
//! Planner output encodes intent in step titles (`write:out.csv Build the
//! table`, `read:"notes 2.md" summarize`). Dependency inference and artifact
//! matching both rely on the same normalized-path comparison, so both live
//! here.

use crate::plan::Capability;

/// A file operation inferred from a step title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Write,
    Read,
    Append,
    Delete,
}

impl FileOp {
    /// Whether a later step performing some operation on the same path should
    /// wait on a step that performed this one.
    pub fn produces(&self) -> bool {
        matches!(self, FileOp::Write | FileOp::Append | FileOp::Delete)
    }

    /// Whether this operation observes prior state of the path.
    pub fn consumes(&self) -> bool {
        matches!(self, FileOp::Read | FileOp::Append | FileOp::Delete)
    }
}

/// Normalize a path for equality comparison: strip surrounding quotes and
/// whitespace, unify separators, drop a leading `./`.
pub fn normalize(raw: &str) -> String {
    let mut p = raw.trim();
    if (p.starts_with('"') && p.ends_with('"') && p.len() >= 2)
        || (p.starts_with('\'') && p.ends_with('\'') && p.len() >= 2)
    {
        p = &p[1..p.len() - 1];
    }
    let mut out = p.trim().replace('\\', "/");
    while out.starts_with("./") {
        out = out[2..].to_string();
    }
    out
}

/// Split a `<capability>:<argument> <description>` title into its prefix and
/// argument. The argument may be quoted to carry spaces; otherwise it ends at
/// the first whitespace.
pub fn title_prefix(title: &str) -> Option<(&str, String)> {
    let colon = title.find(':')?;
    let prefix = title[..colon].trim();
    if prefix.is_empty() || prefix.contains(char::is_whitespace) {
        return None;
    }
    let rest = title[colon + 1..].trim_start();
    let arg = if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        stripped[..end].to_string()
    } else if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'')?;
        stripped[..end].to_string()
    } else {
        rest.split_whitespace().next().unwrap_or("").to_string()
    };
    if arg.is_empty() {
        return None;
    }
    Some((prefix, arg))
}

/// Extract the file operation and normalized path a step title encodes, if
/// any. Only titles whose prefix parses to a file capability count; `run:` or
/// `fetch:` arguments are not paths.
pub fn title_file_op(title: &str) -> Option<(FileOp, String)> {
    let (prefix, arg) = title_prefix(title)?;
    let capability: Capability = prefix.parse().ok()?;
    let op = match capability {
        Capability::WriteFile => FileOp::Write,
        Capability::ReadFile => FileOp::Read,
        Capability::AppendFile => FileOp::Append,
        Capability::DeleteFile => FileOp::Delete,
        _ => return None,
    };
    Some((op, normalize(&arg)))
}

/// Whether `title` textually references the (already normalized) artifact
/// path, either as a whole token or in quoted form.
///
/// Matching is token-bounded: `out.csv` does not match a mention of
/// `out.csv.bak`.
pub fn title_references(title: &str, artifact: &str) -> bool {
    if artifact.is_empty() {
        return false;
    }
    let token_matches = |token: &str| {
        let token = token
            .trim_end_matches(|c: char| matches!(c, ',' | ';' | '.' | ':'))
            .trim_matches(|c: char| matches!(c, '(' | ')' | '"' | '\''));
        // `write:out.csv` mentions the path after its op prefix.
        normalize(token) == artifact || token.split(':').any(|part| normalize(part) == artifact)
    };
    if title.split_whitespace().any(token_matches) {
        return true;
    }
    // Quoted mention with spaces, or an un-normalized spelling of the same path.
    title
        .split(['"', '\''])
        .any(|fragment| normalize(fragment) == artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_quotes_and_dot_slash() {
        assert_eq!(normalize("\"out.csv\""), "out.csv");
        assert_eq!(normalize("'my file.txt'"), "my file.txt");
        assert_eq!(normalize("./data/out.csv"), "data/out.csv");
        assert_eq!(normalize("data\\out.csv"), "data/out.csv");
        assert_eq!(normalize("  out.csv  "), "out.csv");
    }

    #[test]
    fn prefix_plain_argument() {
        let (prefix, arg) = title_prefix("write:out.csv Build the table").unwrap();
        assert_eq!(prefix, "write");
        assert_eq!(arg, "out.csv");
    }

    #[test]
    fn prefix_quoted_argument_with_spaces() {
        let (prefix, arg) = title_prefix("read:\"my notes.md\" Summarize").unwrap();
        assert_eq!(prefix, "read");
        assert_eq!(arg, "my notes.md");
    }

    #[test]
    fn prefix_rejects_sentences_with_colons() {
        // "Remember: do the thing" is prose, not an op prefix.
        assert!(title_prefix("Remember this: do the thing").is_none());
        assert!(title_prefix("no colon here").is_none());
        assert!(title_prefix(": missing prefix").is_none());
    }

    #[test]
    fn file_op_extraction() {
        assert_eq!(
            title_file_op("write:out.csv Build the table"),
            Some((FileOp::Write, "out.csv".into()))
        );
        assert_eq!(
            title_file_op("append:'log file.txt' note progress"),
            Some((FileOp::Append, "log file.txt".into()))
        );
        assert_eq!(
            title_file_op("delete:./tmp/scratch.bin cleanup"),
            Some((FileOp::Delete, "tmp/scratch.bin".into()))
        );
        // Non-file prefixes carry no path.
        assert_eq!(title_file_op("run:make build"), None);
        assert_eq!(title_file_op("fetch:https://example.com data"), None);
    }

    #[test]
    fn op_producer_consumer_classification() {
        assert!(FileOp::Write.produces());
        assert!(!FileOp::Write.consumes());
        assert!(FileOp::Append.produces());
        assert!(FileOp::Append.consumes());
        assert!(FileOp::Delete.produces());
        assert!(FileOp::Delete.consumes());
        assert!(!FileOp::Read.produces());
        assert!(FileOp::Read.consumes());
    }

    #[test]
    fn artifact_reference_matching() {
        assert!(title_references("write:out.csv Build the table", "out.csv"));
        assert!(title_references("assemble \"my report.md\" now", "my report.md"));
        assert!(title_references("summarize out.csv, then stop", "out.csv"));
        assert!(title_references("inspect ./out.csv by hand", "out.csv"));
        assert!(!title_references("write:other.csv unrelated", "out.csv.bak"));
        assert!(!title_references("anything", ""));
    }

    #[test]
    fn artifact_matching_is_token_bounded() {
        // A longer path containing the artifact as a prefix is not a mention.
        assert!(!title_references("tidy out.csv.bak leftovers", "out.csv"));
        assert!(!title_references("delete:out.csv.bak cleanup", "out.csv"));
    }
}
