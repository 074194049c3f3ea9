use crate::error::FileStoreError;

/// Unicode lookalikes for `/` and `\` that some filesystems would otherwise
/// happily accept as path separators.
const UNICODE_SEPARATORS: &[char] = &['\u{2044}', '\u{2215}', '\u{FF0F}', '\u{FF3C}'];
const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

const MAX_NAME_BYTES: usize = 200;

/// Sanitizes a proposed file name for safe use as a destination on disk.
///
/// Replaces path separators (including Unicode lookalikes), runs of `.`,
/// control bytes, and `<>:"|?*` with `_`; strips trailing dots; truncates on
/// codepoint boundaries to at most 200 bytes while preserving the
/// extension. A name consisting solely of a NUL byte is rejected outright
/// rather than substituted, since it cannot be represented on most
/// filesystems at all.
pub fn sanitize_name(name: &str) -> Result<String, FileStoreError> {
    if name.contains('\0') {
        return Err(FileStoreError::NullByteInName);
    }
    if name.is_empty() {
        return Err(FileStoreError::EmptyName);
    }

    let mut replaced = String::with_capacity(name.len());
    for c in name.chars() {
        let replace = c == '/'
            || c == '\\'
            || UNICODE_SEPARATORS.contains(&c)
            || RESERVED.contains(&c)
            || c.is_control();
        replaced.push(if replace { '_' } else { c });
    }

    // Trailing dots are stripped outright (Windows forbids them); any
    // remaining internal run of 2+ dots collapses to a single "_".
    let stripped = replaced.trim_end_matches('.');

    let mut out = String::with_capacity(stripped.len());
    let mut dot_run = 0usize;
    for c in stripped.chars() {
        if c == '.' {
            dot_run += 1;
            if dot_run == 1 {
                out.push('.');
            } else if dot_run == 2 {
                out.pop();
                out.push('_');
            }
        } else {
            dot_run = 0;
            out.push(c);
        }
    }

    let out = if out.is_empty() { "_".to_string() } else { out };

    Ok(truncate_preserving_extension(&out, MAX_NAME_BYTES))
}

fn truncate_preserving_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    let budget = max_bytes.saturating_sub(ext.len());
    let mut end = budget.min(stem.len());
    while end > 0 && !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reserved_and_unicode_separators() {
        let sanitized = sanitize_name("a\u{2044}b\\c<d>.txt").unwrap();
        assert!(!sanitized.contains(['/', '\\', '<', '>', '\u{2044}']));
    }

    #[test]
    fn strips_trailing_dots() {
        assert_eq!(sanitize_name("name...").unwrap(), "name");
    }

    #[test]
    fn truncates_preserving_extension() {
        let long_stem = "a".repeat(300);
        let name = format!("{long_stem}.txt");
        let sanitized = sanitize_name(&name).unwrap();
        assert!(sanitized.len() <= MAX_NAME_BYTES);
        assert!(sanitized.ends_with(".txt"));
    }
}
