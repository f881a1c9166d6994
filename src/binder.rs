//! Field binding: discover the key a PII value was logged under.
//!
//! Strategies are tried in a fixed order and the first hit wins. Each one is
//! a pure function of `(content, value)`; `FieldBinder` only adds a shared
//! cache of the compiled per-value patterns.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const FIELD_NAME: &str = r"[A-Za-z0-9_.\-]+";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingStrategy {
    /// `"field" : "value"` or `'field' = 'value'`
    QuotedPair,
    /// `field=value`, `field: "value"`
    BarePair,
    /// `<tag field="value">`
    XmlAttribute,
    /// `<field>... value ...</field>`
    XmlTag,
}

impl BindingStrategy {
    pub const ORDER: [BindingStrategy; 4] = [
        BindingStrategy::QuotedPair,
        BindingStrategy::BarePair,
        BindingStrategy::XmlAttribute,
        BindingStrategy::XmlTag,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BindingStrategy::QuotedPair => "quoted_pair",
            BindingStrategy::BarePair => "bare_pair",
            BindingStrategy::XmlAttribute => "xml_attribute",
            BindingStrategy::XmlTag => "xml_tag",
        }
    }

    fn pattern(&self, value: &str) -> String {
        let value = regex::escape(value);
        match self {
            BindingStrategy::QuotedPair => format!(
                r#"(?i)["']\s*(?P<field>[^"']+?)\s*["']\s*[:=]\s*["']?{}["']?"#,
                value
            ),
            BindingStrategy::BarePair => format!(
                r#"(?i)\b(?P<field>{})\s*[:=]\s*["']?{}["']?"#,
                FIELD_NAME, value
            ),
            BindingStrategy::XmlAttribute => format!(
                r#"(?i)<[^>]*\b(?P<field>{})\s*=\s*["']{}["'][^>]*>"#,
                FIELD_NAME, value
            ),
            BindingStrategy::XmlTag => format!(
                r#"(?i)<\s*(?P<field>{name})[^>]*>[^<]*?{value}[^<]*?</\s*(?P<close>{name})\s*>"#,
                name = FIELD_NAME,
                value = value
            ),
        }
    }

    fn compile(&self, value: &str) -> Result<Regex> {
        Regex::new(&self.pattern(value))
            .with_context(|| format!("failed to compile {} binder for value {:?}", self.name(), value))
    }

    fn extract(&self, regex: &Regex, content: &str) -> Option<String> {
        match self {
            BindingStrategy::XmlTag => {
                // open and close tag names must agree
                let mut pos = 0;
                while pos < content.len() {
                    let caps = regex.captures_at(content, pos)?;
                    let whole = caps.get(0)?;
                    let field = caps.name("field")?.as_str();
                    let close = caps.name("close")?.as_str();
                    if field.eq_ignore_ascii_case(close) {
                        return clean_field(field);
                    }
                    pos = whole.start() + content[whole.start()..].chars().next()?.len_utf8();
                }
                None
            }
            _ => regex
                .captures(content)
                .and_then(|caps| caps.name("field"))
                .and_then(|field| clean_field(field.as_str())),
        }
    }

    /// Uncached single-strategy lookup.
    pub fn bind(&self, content: &str, value: &str) -> Result<Option<String>> {
        let regex = self.compile(value)?;
        Ok(self.extract(&regex, content))
    }
}

impl fmt::Display for BindingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn clean_field(raw: &str) -> Option<String> {
    let field = raw.trim();
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: String,
    pub strategy: BindingStrategy,
}

/// All strategies compiled for one value, in priority order.
#[derive(Debug)]
pub struct ValuePatterns {
    compiled: Vec<(BindingStrategy, Regex)>,
}

impl ValuePatterns {
    pub fn compile(value: &str) -> Result<Self> {
        let compiled = BindingStrategy::ORDER
            .iter()
            .map(|strategy| strategy.compile(value).map(|regex| (*strategy, regex)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { compiled })
    }

    pub fn bind(&self, content: &str) -> Option<FieldBinding> {
        self.compiled.iter().find_map(|(strategy, regex)| {
            strategy.extract(regex, content).map(|field| FieldBinding {
                field,
                strategy: *strategy,
            })
        })
    }
}

/// Binder shared by every file worker. The cache is cleared wholesale when it
/// reaches capacity; a capacity of zero disables caching.
#[derive(Debug)]
pub struct FieldBinder {
    cache: RwLock<HashMap<String, Arc<ValuePatterns>>>,
    capacity: usize,
}

impl FieldBinder {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn bind(&self, content: &str, value: &str) -> Result<Option<FieldBinding>> {
        let patterns = self.patterns_for(value)?;
        Ok(patterns.bind(content))
    }

    pub fn cached_values(&self) -> usize {
        self.cache.read().len()
    }

    fn patterns_for(&self, value: &str) -> Result<Arc<ValuePatterns>> {
        if let Some(patterns) = self.cache.read().get(value) {
            return Ok(Arc::clone(patterns));
        }

        let patterns = Arc::new(ValuePatterns::compile(value)?);
        if self.capacity == 0 {
            return Ok(patterns);
        }

        let mut cache = self.cache.write();
        if cache.len() >= self.capacity {
            debug!("Binder cache reached {} values, clearing", cache.len());
            cache.clear();
        }
        let entry = cache
            .entry(value.to_string())
            .or_insert_with(|| Arc::clone(&patterns));
        Ok(Arc::clone(entry))
    }
}
