use std::collections::HashMap;

use tracing::debug;

use super::{vendors, Dialect};

/// Builds a dialect on demand.
pub type DialectFactory = fn() -> Dialect;

/// Maps normalized product names to dialects.
///
/// Lookup tries the full normalized name, then successively shorter
/// underscore-separated prefixes, then the fallback.
pub struct DialectRegistry {
    factories: HashMap<String, DialectFactory>,
    fallback: DialectFactory,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(vendors::generic);
        registry.register("sqlite", vendors::sqlite);
        registry.register("mysql", vendors::mysql);
        registry.register("mariadb", vendors::mysql);
        registry.register("postgresql", vendors::postgresql);
        registry.register("oracle", vendors::oracle);
        registry.register("microsoft_sql_server", vendors::sqlserver);
        registry.register("h2", vendors::h2);
        registry.register("apache_derby", vendors::derby);
        registry.register("db2", vendors::db2);
        registry
    }
}

impl DialectRegistry {
    /// A registry with nothing but a fallback.
    pub fn empty(fallback: DialectFactory) -> Self {
        Self {
            factories: HashMap::new(),
            fallback,
        }
    }

    /// Registers (or replaces) the dialect for a product token.
    pub fn register(&mut self, product: &str, factory: DialectFactory) {
        self.factories
            .insert(normalize_product_name(product), factory);
    }

    pub fn select(&self, product_name: &str) -> Dialect {
        let mut token = normalize_product_name(product_name);
        loop {
            if let Some(factory) = self.factories.get(&token) {
                debug!(product = product_name, token = %token, "selected dialect");
                return factory();
            }
            match token.rfind('_') {
                Some(cut) => token.truncate(cut),
                None => break,
            }
        }
        debug!(product = product_name, "no dialect registered, using fallback");
        (self.fallback)()
    }
}

/// Lower-cases a product name and replaces every non-alphanumeric run with `_`.
pub fn normalize_product_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}
