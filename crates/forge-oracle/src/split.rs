//! Multi-file oracle response splitting.
//!
//! Oracle output carries one or more files, each introduced by a
//! `### <path>` header line. Markdown code fences around a file body are
//! tolerated and stripped.

use tracing::debug;

use crate::error::OracleError;

/// One file extracted from an oracle response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Relative path from the header line; empty when the response carried
    /// no header at all.
    pub path: String,
    /// File body with surrounding fences stripped.
    pub source: String,
}

/// Split an oracle response on `### <path>` headers.
///
/// A response without any header is treated as a single unnamed file.
///
/// # Errors
///
/// Returns [`OracleError::EmptyResponse`] when the response contains no
/// content at all.
pub fn split_response(text: &str) -> Result<Vec<GeneratedFile>, OracleError> {
    if text.trim().is_empty() {
        return Err(OracleError::EmptyResponse);
    }

    let mut files: Vec<GeneratedFile> = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_body: Vec<&str> = Vec::new();

    let mut flush = |path: Option<String>, body: &mut Vec<&str>, files: &mut Vec<GeneratedFile>| {
        let source = strip_fences(&body.join("\n"));
        body.clear();
        if path.is_none() && source.is_empty() {
            return;
        }
        files.push(GeneratedFile {
            path: path.unwrap_or_default(),
            source,
        });
    };

    for line in text.lines() {
        if let Some(header) = line.strip_prefix("### ") {
            flush(current_path.take(), &mut current_body, &mut files);
            current_path = Some(header.trim().to_string());
        } else {
            current_body.push(line);
        }
    }
    flush(current_path, &mut current_body, &mut files);

    if files.is_empty() {
        return Err(OracleError::Unparseable(
            "response contained headers but no file bodies".to_string(),
        ));
    }
    debug!(files = files.len(), "Oracle response split");
    Ok(files)
}

/// Strip a single surrounding markdown code fence, if present.
fn strip_fences(body: &str) -> String {
    let trimmed = body.trim();
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().map_or(false, |l| l.trim_start().starts_with("```")) {
        lines.remove(0);
        if lines.last().map_or(false, |l| l.trim() == "```") {
            lines.pop();
        }
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multi_file() {
        let response = "### models/trade.py\nclass Trade: pass\n\n### models/position.py\nclass Position: pass\n";
        let files = split_response(response).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "models/trade.py");
        assert_eq!(files[0].source, "class Trade: pass");
        assert_eq!(files[1].path, "models/position.py");
    }

    #[test]
    fn test_split_without_header_is_single_file() {
        let files = split_response("class Trade: pass\n").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "");
        assert_eq!(files[0].source, "class Trade: pass");
    }

    #[test]
    fn test_split_strips_fences() {
        let response = "### models/trade.py\n```python\nclass Trade: pass\n```\n";
        let files = split_response(response).unwrap();
        assert_eq!(files[0].source, "class Trade: pass");
    }

    #[test]
    fn test_split_empty_is_error() {
        assert!(matches!(
            split_response("   \n"),
            Err(OracleError::EmptyResponse)
        ));
    }

    #[test]
    fn test_preamble_before_first_header_is_dropped_when_empty() {
        let response = "\n### a.py\nprint('a')\n";
        let files = split_response(response).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.py");
    }
}
