use std::collections::HashSet;

use crate::error::ApiError;

const MAX_SLUG_LEN: usize = 80;
pub const MAX_RECIPIENTS: usize = 1000;

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

/// Required text field: present, not blank after trimming, within `max`.
pub fn check_required(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    check_length(field, value, 1, max)
}

pub fn check_optional(field: &str, value: Option<&str>, max: usize) -> Result<(), ApiError> {
    match value {
        Some(v) => check_length(field, v, 0, max),
        None => Ok(()),
    }
}

pub fn check_email(value: &str) -> Result<(), ApiError> {
    check_length("email", value, 3, 254)?;
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ApiError::BadRequest("invalid email address".into()));
    };
    if local.is_empty() || domain.is_empty() || value.contains(char::is_whitespace) {
        return Err(ApiError::BadRequest("invalid email address".into()));
    }
    Ok(())
}

/// Phone numbers are digits with an optional leading `+`, 9 to 15 digits.
pub fn check_phone(value: &str) -> Result<(), ApiError> {
    let digits = value.strip_prefix('+').unwrap_or(value);
    if !(9..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::BadRequest(format!("invalid phone number '{value}'")));
    }
    Ok(())
}

pub fn check_amount(field: &str, value: f64) -> Result<(), ApiError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::BadRequest(format!(
            "{field} must be a non-negative number"
        )));
    }
    Ok(())
}

pub fn check_positive_amount(field: &str, value: f64) -> Result<(), ApiError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ApiError::BadRequest(format!("{field} must be greater than zero")));
    }
    Ok(())
}

pub fn check_url(field: &str, value: &str) -> Result<(), ApiError> {
    check_length(field, value, 1, 2048)?;
    let parsed =
        url::Url::parse(value).map_err(|_| ApiError::BadRequest(format!("{field} is not a URL")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(format!(
            "{field} must use http or https scheme"
        )));
    }
    Ok(())
}

pub fn check_recipients(recipients: &[String]) -> Result<(), ApiError> {
    if recipients.is_empty() {
        return Err(ApiError::BadRequest("at least one recipient is required".into()));
    }
    if recipients.len() > MAX_RECIPIENTS {
        return Err(ApiError::BadRequest(format!(
            "max {MAX_RECIPIENTS} recipients per broadcast"
        )));
    }
    for r in recipients {
        check_phone(r)?;
    }
    Ok(())
}

/// URL-safe slug: lowercase ASCII alphanumerics with single `-` separators.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-').to_owned();
    if slug.is_empty() { "item".into() } else { slug }
}

/// `base` if free, otherwise the first `base-N` (N >= 2) not in `taken`.
pub fn next_free_slug(base: &str, taken: &[String]) -> String {
    let taken: HashSet<&str> = taken.iter().map(String::as_str).collect();
    if !taken.contains(base) {
        return base.to_owned();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn check_length_counts_chars_not_bytes() {
        assert!(check_length("f", "ɛyɛ", 3, 3).is_ok());
    }

    #[test]
    fn check_length_above_max_names_field() {
        let err = check_length("title", "abcdef", 1, 5).unwrap_err();
        assert!(
            matches!(err, ApiError::BadRequest(ref msg) if msg.contains("title")),
            "got: {err:?}"
        );
    }

    #[test]
    fn check_required_rejects_blank() {
        let err = check_required("message", "   ", 100).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref msg) if msg == "message is required"));
    }

    #[test]
    fn check_optional_accepts_none() {
        assert!(check_optional("note", None, 10).is_ok());
        assert!(check_optional("note", Some("x".repeat(11).as_str()), 10).is_err());
    }

    #[rstest]
    #[case("pastor@church.org")]
    #[case("a@b")]
    fn email_valid(#[case] email: &str) {
        assert!(check_email(email).is_ok());
    }

    #[rstest]
    #[case("no-at-sign")]
    #[case("@church.org")]
    #[case("pastor@")]
    #[case("pas tor@church.org")]
    fn email_invalid(#[case] email: &str) {
        assert!(check_email(email).is_err());
    }

    #[rstest]
    #[case("0244123456")]
    #[case("+233244123456")]
    #[case("233244123456")]
    fn phone_valid(#[case] phone: &str) {
        assert!(check_phone(phone).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("12345")]
    #[case("+23324412345678901")]
    #[case("024-412-3456")]
    #[case("++233244123456")]
    fn phone_invalid(#[case] phone: &str) {
        assert!(check_phone(phone).is_err());
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(50.5, true)]
    #[case(-1.0, false)]
    #[case(f64::NAN, false)]
    #[case(f64::INFINITY, false)]
    fn amount_rules(#[case] value: f64, #[case] ok: bool) {
        assert_eq!(check_amount("tithe", value).is_ok(), ok);
    }

    #[test]
    fn positive_amount_rejects_zero() {
        assert!(check_positive_amount("amount", 0.0).is_err());
        assert!(check_positive_amount("amount", 0.01).is_ok());
    }

    #[rstest]
    #[case("https://cdn.church.org/flyer.png", true)]
    #[case("http://example.com/a.jpg", true)]
    #[case("ftp://example.com/a.jpg", false)]
    #[case("not a url", false)]
    fn url_rules(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(check_url("image_url", value).is_ok(), ok);
    }

    #[test]
    fn recipients_must_be_nonempty_and_valid() {
        assert!(check_recipients(&[]).is_err());
        assert!(check_recipients(&["0244123456".into()]).is_ok());
        assert!(check_recipients(&["0244123456".into(), "bad".into()]).is_err());
    }

    #[test]
    fn recipients_capped() {
        let many = vec!["0244123456".to_owned(); MAX_RECIPIENTS + 1];
        assert!(check_recipients(&many).is_err());
    }

    // -----------------------------------------------------------------------
    // slugify
    // -----------------------------------------------------------------------

    #[rstest]
    #[case("Sunday Service", "sunday-service")]
    #[case("  Harvest -- Thanksgiving 2026! ", "harvest-thanksgiving-2026")]
    #[case("Youth & Children's Day", "youth-children-s-day")]
    #[case("Akwaaba: Ɔdɔ Nyame", "akwaaba-d-nyame")]
    #[case("!!!", "item")]
    #[case("", "item")]
    fn slugify_cases(#[case] title: &str, #[case] expected: &str) {
        assert_eq!(slugify(title), expected);
    }

    #[test]
    fn slugify_truncates_long_titles() {
        let slug = slugify(&"word ".repeat(50));
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn next_free_slug_uses_base_when_free() {
        assert_eq!(next_free_slug("easter", &[]), "easter");
        assert_eq!(next_free_slug("easter", &["easter-2".into()]), "easter");
    }

    #[test]
    fn next_free_slug_finds_first_gap() {
        let taken = vec!["easter".into(), "easter-2".into(), "easter-4".into()];
        assert_eq!(next_free_slug("easter", &taken), "easter-3");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn slug_charset(title in ".{0,200}") {
                let slug = slugify(&title);
                prop_assert!(!slug.is_empty());
                prop_assert!(slug.len() <= MAX_SLUG_LEN);
                prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
                prop_assert!(!slug.starts_with('-'));
                prop_assert!(!slug.ends_with('-'));
                prop_assert!(!slug.contains("--"));
            }

            #[test]
            fn slug_is_idempotent(title in "[A-Za-z0-9 ,.!-]{1,60}") {
                let once = slugify(&title);
                prop_assert_eq!(slugify(&once), once);
            }

            #[test]
            fn next_free_slug_never_returns_taken(n in 0_usize..20) {
                let mut taken = vec!["mass".to_owned()];
                taken.extend((2..n + 2).map(|i| format!("mass-{i}")));
                let picked = next_free_slug("mass", &taken);
                prop_assert!(!taken.contains(&picked));
            }
        }
    }
}
