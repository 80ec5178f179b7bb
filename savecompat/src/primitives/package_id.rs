use crate::primitives::host::PackageEnvironment;

/// Strips one distribution decoration (e.g. `_steam`, `_copy`) from a manifest package id.
///
/// Returns `None` for ids that are empty after trimming. An id that consists only of a
/// decoration is kept verbatim.
///
/// # Examples
/// ```
/// use savecompat::primitives::normalize_package_id;
///
/// let suffixes = vec!["_steam".to_string(), "_copy".to_string()];
/// assert_eq!(normalize_package_id("author.mod_steam", &suffixes).as_deref(), Some("author.mod"));
/// assert_eq!(normalize_package_id("  ", &suffixes), None);
/// ```
#[must_use]
pub fn normalize_package_id(raw: &str, suffixes: &[String]) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let stripped = suffixes
        .iter()
        .filter(|suffix| !suffix.is_empty())
        .find_map(|suffix| trimmed.strip_suffix(suffix.as_str()))
        .filter(|bare| !bare.is_empty())
        .unwrap_or(trimmed);

    Some(stripped.to_string())
}

/// Whether `package_id`, or any of its decorated variants, is enabled in `environment`.
#[must_use]
pub fn is_package_enabled(
    environment: &dyn PackageEnvironment,
    package_id: &str,
    suffixes: &[String],
) -> bool {
    environment.is_enabled(package_id.to_string())
        || suffixes
            .iter()
            .filter(|suffix| !suffix.is_empty())
            .any(|suffix| environment.is_enabled(format!("{package_id}{suffix}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Enabled(Vec<&'static str>);

    impl PackageEnvironment for Enabled {
        fn is_enabled(&self, package_id: String) -> bool {
            self.0.contains(&package_id.as_str())
        }

        fn enabled_package_ids(&self) -> Vec<String> {
            self.0.iter().map(ToString::to_string).collect()
        }
    }

    fn suffixes() -> Vec<String> {
        vec!["_steam".to_string(), "_copy".to_string()]
    }

    #[test]
    fn test_normalize_strips_single_suffix() {
        assert_eq!(
            normalize_package_id("pawn.ext_copy", &suffixes()).as_deref(),
            Some("pawn.ext")
        );
        assert_eq!(
            normalize_package_id("pawn.ext", &suffixes()).as_deref(),
            Some("pawn.ext")
        );
    }

    #[test]
    fn test_normalize_keeps_bare_suffix() {
        assert_eq!(
            normalize_package_id("_steam", &suffixes()).as_deref(),
            Some("_steam")
        );
    }

    #[test]
    fn test_enabled_checks_decorated_variants() {
        let environment = Enabled(vec!["pawn.ext_steam"]);
        assert!(is_package_enabled(&environment, "pawn.ext", &suffixes()));
        assert!(!is_package_enabled(&environment, "other.ext", &suffixes()));
        assert!(!is_package_enabled(&environment, "pawn.ext", &[]));
    }
}
