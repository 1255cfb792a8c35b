use std::sync::{LazyLock, Mutex};

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

static STRING_INTERNER: LazyLock<Mutex<StringInterner<DefaultBackend>>> =
    LazyLock::new(|| Mutex::new(StringInterner::default()));

/// An interned identifier.
///
/// Two `Ident`s compare equal exactly when they spell the same name, which keeps
/// name sets and slot tables cheap to build and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(DefaultSymbol);

impl Ident {
    pub fn new(s: &str) -> Self {
        Self(
            STRING_INTERNER
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_or_intern(s),
        )
    }

    pub fn as_str(&self) -> String {
        self.resolve_with(str::to_string)
    }

    pub fn resolve_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        let interner = STRING_INTERNER.lock().unwrap_or_else(|e| e.into_inner());
        f(interner.resolve(self.0).unwrap_or_default())
    }
}

impl Default for Ident {
    fn default() -> Self {
        Ident::new("")
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.resolve_with(|s| write!(f, "{}", s))
    }
}

#[cfg(feature = "ast-json")]
impl serde::Serialize for Ident {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.resolve_with(|s| serializer.serialize_str(s))
    }
}

#[cfg(feature = "ast-json")]
impl<'de> serde::Deserialize<'de> for Ident {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Ident::new(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_new_and_as_str() {
        let ident = Ident::new("source");
        assert_eq!(ident.as_str(), "source");
    }

    #[test]
    fn test_ident_from_str_and_string() {
        let ident1: Ident = "elem".into();
        let ident2: Ident = String::from("elem").into();
        assert_eq!(ident1, ident2);
        assert_eq!(ident1.as_str(), "elem");
    }

    #[test]
    fn test_ident_display_trait() {
        let ident = Ident::new("more_values_available");
        assert_eq!(format!("{}", ident), "more_values_available");
    }

    #[test]
    fn test_ident_resolve_with() {
        let ident = Ident::new("buf");
        assert_eq!(ident.resolve_with(|s| s.len()), 3);
    }

    #[cfg(feature = "ast-json")]
    #[test]
    fn test_ident_serde() {
        let ident = Ident::new("serde_test");
        let serialized = serde_json::to_string(&ident).unwrap();
        assert_eq!(serialized, "\"serde_test\"");
        let deserialized: Ident = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, ident);
    }
}
