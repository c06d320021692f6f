//! Motion program text conventions
//!
//! Programs travel as newline-terminated text lines. Comment lines start with
//! [`COMMENT_MARKER`] and, like blank lines, are never transmitted.

/// Marker that starts a comment line
pub const COMMENT_MARKER: char = ';';

/// Whether a program line should be sent to the device
pub fn is_transmittable(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with(COMMENT_MARKER)
}

/// Trimmed transmittable lines of a program, in order
pub fn transmittable_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter(|l| is_transmittable(l.as_ref()))
        .map(|l| l.as_ref().trim().to_string())
        .collect()
}
