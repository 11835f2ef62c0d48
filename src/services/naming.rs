//! Filename policy and short identifier generation.

use rand::Rng;

/// Characters used for short identifiers unless configured otherwise.
pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_SHORT_ID_LEN: usize = 6;

/// Accept any name with at least one `.` in it.
///
/// This is a weak filter and not a security boundary; deployments that care
/// about file types must validate further upstream.
pub fn is_allowed_name(name: &str) -> bool {
    !name.is_empty() && name.contains('.')
}

/// Reduce a client-supplied filename to a flat, filesystem-safe name.
///
/// - non-ASCII characters are dropped
/// - path separators become word breaks
/// - whitespace runs collapse to a single `_`
/// - anything outside `[A-Za-z0-9_.-]` is removed
/// - leading/trailing `.` and `_` are trimmed
///
/// May return an empty string, which callers must treat as invalid.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Split a name into stem and extension (extension keeps its dot).
///
/// Leading dots never start an extension, so `.env` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(pos) => name.split_at(leading + pos),
        None => (name, ""),
    }
}

/// The `attempt`-th alternative for a taken name: `report.pdf` → `report_2.pdf`.
///
/// Attempt 0 is the name itself.
pub fn collision_candidate(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    format!("{stem}_{attempt}{ext}")
}

/// Draws random short identifiers from a fixed alphabet.
#[derive(Debug, Clone)]
pub struct ShortIdGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl ShortIdGenerator {
    /// Alphabet and length are validated by the registry configuration.
    pub fn new(alphabet: &str, length: usize) -> Self {
        Self {
            alphabet: alphabet.chars().collect(),
            length,
        }
    }

    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }

    /// Draw until `is_taken` rejects nothing, giving up after `max_attempts`.
    pub fn generate_unique<F>(&self, max_attempts: usize, is_taken: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        (0..max_attempts)
            .map(|_| self.generate())
            .find(|candidate| !is_taken(candidate))
    }
}

impl Default for ShortIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHABET, DEFAULT_SHORT_ID_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_need_a_dot() {
        assert!(is_allowed_name("report.pdf"));
        assert!(is_allowed_name(".env"));
        assert!(!is_allowed_name("README"));
        assert!(!is_allowed_name(""));
    }

    #[test]
    fn sanitize_flattens_paths_and_strips_unsafe_chars() {
        assert_eq!(sanitize_filename("My Report.pdf"), "My_Report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd.txt"), "etc_passwd.txt");
        assert_eq!(sanitize_filename("C:\\Users\\me\\a b.txt"), "C_Users_me_a_b.txt");
        assert_eq!(sanitize_filename("inv<oice>?.csv"), "invoice.csv");
        assert_eq!(sanitize_filename("café.txt"), "caf.txt");
        assert_eq!(sanitize_filename("..."), "");
        assert_eq!(sanitize_filename("/"), "");
    }

    #[test]
    fn extension_split_ignores_leading_dots() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("Makefile"), ("Makefile", ""));
        assert_eq!(split_extension(".env"), (".env", ""));
    }

    #[test]
    fn collision_candidates_number_before_extension() {
        assert_eq!(collision_candidate("report.pdf", 0), "report.pdf");
        assert_eq!(collision_candidate("report.pdf", 1), "report_1.pdf");
        assert_eq!(collision_candidate("report.pdf", 2), "report_2.pdf");
        assert_eq!(collision_candidate("archive.tar.gz", 3), "archive.tar_3.gz");
        assert_eq!(collision_candidate("notes", 1), "notes_1");
    }

    #[test]
    fn short_ids_use_the_alphabet_and_length() {
        let generator = ShortIdGenerator::default();
        for _ in 0..100 {
            let id = generator.generate();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn unique_generation_retries_and_gives_up() {
        let generator = ShortIdGenerator::new("ab", 1);
        let id = generator.generate_unique(64, |c| c == "a").unwrap();
        assert_eq!(id, "b");
        assert!(generator.generate_unique(16, |_| true).is_none());
    }
}
