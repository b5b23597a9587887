//! User identity and filename normalization.
//!
//! Every physical name (document collection, text index, image index) is
//! derived here from the normalized user id, and every filename that
//! reaches a storage key goes through [`sanitize_filename`]. Upload,
//! delete and query-filter paths all call the same functions.

/// Trim and lower-case a user identifier.
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_lowercase()
}

/// Derives per-user collection and index names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNaming {
    prefix: String,
}

impl Default for CollectionNaming {
    fn default() -> Self {
        Self::new("user_")
    }
}

impl CollectionNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Document-store collection name for `user_id`.
    ///
    /// Distinct normalized ids always map to distinct names.
    pub fn collection(&self, user_id: &str) -> String {
        format!(
            "{}{}",
            index_safe(&self.prefix),
            escape_user_id(&normalize_user_id(user_id))
        )
    }

    /// Text vector index name. Shares the collection name.
    pub fn text_index(&self, user_id: &str) -> String {
        self.collection(user_id)
    }

    /// Image vector index name.
    pub fn image_index(&self, user_id: &str) -> String {
        format!("{}_images", self.collection(user_id))
    }
}

/// Replace characters OpenSearch rejects in index names.
fn index_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' => '_',
            c if c.is_whitespace() => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Reversible escape into index-safe characters: `[a-z0-9.-]` pass
/// through, every other UTF-8 byte (`_` included) becomes `_xx` hex.
fn escape_user_id(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for c in user.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("_{:02x}", byte));
            }
        }
    }
    out
}

/// Percent-decode (when `%` is present), collapse whitespace runs and trim.
///
/// Invalid percent-encoded UTF-8 leaves the raw string in place.
pub fn normalize_filename(filename: &str) -> String {
    let decoded = if filename.contains('%') {
        match urlencoding::decode(filename) {
            Ok(s) => s.into_owned(),
            Err(_) => filename.to_string(),
        }
    } else {
        filename.to_string()
    };
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize and keep only the path basename.
pub fn sanitize_filename(filename: &str) -> String {
    let normalized = normalize_filename(filename);
    normalized
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Split a comma-separated `document_names` field into sanitized names.
pub fn parse_document_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(sanitize_filename)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_are_trimmed_and_lowercased() {
        assert_eq!(normalize_user_id("  Alice "), "alice");
    }

    #[test]
    fn naming_is_centralized() {
        let naming = CollectionNaming::default();
        assert_eq!(naming.collection("Alice"), "user_alice");
        assert_eq!(naming.text_index("alice"), "user_alice");
        assert_eq!(naming.image_index(" ALICE"), "user_alice_images");
    }

    #[test]
    fn illegal_index_characters_are_escaped() {
        let naming = CollectionNaming::new("");
        assert_eq!(naming.collection("a/b*c d"), "a_2fb_2ac_20d");
        assert_eq!(naming.collection("jo\u{e9}"), "jo_c3_a9");
    }

    #[test]
    fn distinct_users_never_share_a_collection() {
        let naming = CollectionNaming::default();
        let names: Vec<String> = ["a b", "a_b", "a/b", "a__b", "a_20b"]
            .iter()
            .map(|u| naming.collection(u))
            .collect();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(naming.collection("a_b"), "user_a_5fb");
        // an escaped id never ends in "_images"
        assert_ne!(naming.image_index("a"), naming.collection("a_images"));
    }

    #[test]
    fn configured_prefix_is_made_index_safe() {
        let naming = CollectionNaming::new("Team Docs/");
        assert_eq!(naming.collection("alice"), "team_docs_alice");
    }

    #[test]
    fn filenames_are_decoded_and_collapsed() {
        assert_eq!(normalize_filename("my%20report.pdf"), "my report.pdf");
        assert_eq!(normalize_filename("  a   b\t c.txt "), "a b c.txt");
        // Invalid UTF-8 after decoding keeps the raw input.
        assert_eq!(normalize_filename("bad%FF.txt"), "bad%FF.txt");
    }

    #[test]
    fn sanitize_keeps_basename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\Q3%20plan.docx"), "Q3 plan.docx");
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
    }

    #[test]
    fn document_names_are_split_and_filtered() {
        assert_eq!(
            parse_document_names("a.pdf, b%20c.pdf,, "),
            vec!["a.pdf".to_string(), "b c.pdf".to_string()]
        );
        assert!(parse_document_names("").is_empty());
    }
}
