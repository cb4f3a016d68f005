//! Lossy title/artist canonicalization used for the second search attempt.
//!
//! `&` truncation and the inline `ft.` clause only apply to the artist field.
use once_cell::sync::Lazy;
use regex::Regex;

static FEAT_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\(feat.*\)").unwrap());
static FT_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\bft\.\s.*").unwrap());
static AMP_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)&.*").unwrap());

/// Strip a parenthetical "(feat. ...)" clause.
pub fn strip_feat(s: &str) -> String {
    FEAT_PAREN.replace(s, "").into_owned()
}

/// Strip an inline "ft. ..." clause and everything after it.
pub fn strip_ft(s: &str) -> String {
    FT_CLAUSE.replace(s, "").into_owned()
}

/// Truncate at the first ampersand.
pub fn strip_amp(s: &str) -> String {
    AMP_TAIL.replace(s, "").into_owned()
}

/// Canonical (title, artist) pair for the fallback search. Whitespace is left
/// untouched so "Song (feat. X)" becomes "Song ".
pub fn normalize(title: &str, artist: &str) -> (String, String) {
    let title = strip_feat(title);
    let artist = strip_ft(&strip_feat(&strip_amp(artist)));
    (title, artist)
}
