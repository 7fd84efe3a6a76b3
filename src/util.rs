/// Mask a phone number for logs, keeping the first four and last two digits.
///
/// `"+250788123489"` becomes `"+250*******89"`. Short inputs are fully masked.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 6))
}

/// Both spellings of a phone number: bare digits and `+`-prefixed.
///
/// Returns an empty list for blank input.
pub fn phone_variants(phone: &str) -> Vec<String> {
    let bare = phone.trim().trim_start_matches('+');
    if bare.is_empty() {
        return Vec::new();
    }
    vec![bare.to_string(), format!("+{bare}")]
}

/// Cut `s` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}
