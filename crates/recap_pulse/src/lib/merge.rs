use std::sync::LazyLock;

use itertools::Itertools;
use regex::{Captures, Regex};

static TIMESTAMP_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[-(\d+)s-\]").expect("invalid timestamp marker pattern"));

/// Condense prior segment summaries into a bounded-length digest for
/// the next segment's prompt.
///
/// Only heading and top-level bold-bullet lines are kept, in order,
/// stopping once the character budget is reached. Injecting this
/// digest instead of the raw summaries keeps prompts from growing
/// without bound across segments.
pub fn condense_context(summaries: &[String], budget_chars: usize) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for summary in summaries {
        for line in summary.lines() {
            if line.starts_with("## ") || line.starts_with("- **") {
                // Account for the joining newline.
                total += line.len() + usize::from(!lines.is_empty());
                lines.push(line);
                if total > budget_chars {
                    return lines.join("\n");
                }
            }
        }
    }

    lines.join("\n")
}

/// Concatenate segment summaries as labeled parts for the final merge
/// prompt.
pub fn label_parts<S: AsRef<str>>(summaries: &[S]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("**PART {}:**\n{}", i + 1, summary.as_ref()))
        .join("\n\n")
}

/// Rewrite `[-930s-]` markers left by the generative provider into
/// readable timestamps, linked into the source media when its URL is
/// known: `[15:30](<url&t=930>)`.
pub fn rewrite_timestamp_markers(text: &str, media_url: Option<&str>) -> String {
    TIMESTAMP_MARKER_REGEX
        .replace_all(text, |caps: &Captures<'_>| {
            let seconds: u64 = caps[1].parse().unwrap_or(0);
            let stamp = format_timestamp(seconds as f64);
            match media_url {
                Some(url) => {
                    let sep = if url.contains('?') { '&' } else { '?' };
                    format!("[{stamp}](<{url}{sep}t={seconds}>)")
                }
                None => format!("[{stamp}]"),
            }
        })
        .into_owned()
}

/// Format seconds as `m:ss`, or `h:mm:ss` past the hour mark.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
